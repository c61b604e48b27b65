//! Filter evaluation for in-memory documents.
//!
//! This module provides the comparison engine used to filter, order and cursor
//! BSON documents held by the in-memory store.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, Document, datetime::DateTime};

use docset_core::{
    error::DocSetError,
    query::{FieldOp, Filter, FilterVisitor},
};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64 so that `Int32(3)` equals `Int64(3)`.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            _ => Comparable::Null,
        }
    }
}

impl Comparable<'_> {
    /// Rank of the value's type in the cross-type ordering.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Bool(_) => 1,
            Comparable::Number(_) => 2,
            Comparable::DateTime(_) => 3,
            Comparable::String(_) => 4,
            Comparable::Array(_) => 5,
            Comparable::Map(_) => 6,
        }
    }

    /// Total ordering used for sorting and cursors: values of different types order by
    /// type rank, arrays lexicographically, maps are equal to each other.
    pub(crate) fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Comparable::Array(a), Comparable::Array(b)) => {
                for (left, right) in a.iter().zip(b) {
                    match left.total_cmp(right) {
                        Ordering::Equal => continue,
                        ordering => return ordering,
                    }
                }
                a.len().cmp(&b.len())
            }
            (Comparable::Number(a), Comparable::Number(b)) => a.total_cmp(b),
            _ => self
                .partial_cmp(other)
                .unwrap_or_else(|| self.rank().cmp(&other.rank())),
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Looks up a dotted path (`address.city`) in `document`.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }

    Some(current)
}

/// Evaluates the filters of a query against one document.
pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// `true` when every filter matches.
    pub fn matches(&mut self, filters: &[Filter]) -> Result<bool, DocSetError> {
        Ok(self.visit_filters(filters)?.into_iter().all(|matched| matched))
    }
}

impl FilterVisitor for DocumentEvaluator<'_> {
    type Output = bool;
    type Error = DocSetError;

    fn visit_filter(&mut self, field: &str, op: FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        // missing and null fields never match, not even `!=`
        let field_value = match lookup(self.document, field) {
            None | Some(Bson::Null) | Some(Bson::Undefined) => return Ok(false),
            Some(field_value) => field_value,
        };

        let left = Comparable::from(field_value);
        let right = Comparable::from(value);

        Ok(match op {
            FieldOp::Eq => left == right,
            FieldOp::Ne => left != right,
            FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => match left.partial_cmp(&right) {
                Some(ordering) => match op {
                    FieldOp::Gt => ordering == Ordering::Greater,
                    FieldOp::Gte => ordering != Ordering::Less,
                    FieldOp::Lt => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                },
                None => false,
            },
        })
    }
}
