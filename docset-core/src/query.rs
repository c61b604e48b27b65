//! Native store query model.
//!
//! A [`Query`] is what a single branch of a compiled predicate plan turns into: a
//! conjunction of field filters, at most one ordering, an optional start cursor and
//! an optional limit. Backends translate it into their own query language through
//! a [`FilterVisitor`].
//!
//! ```ignore
//! use docset::query::{Query, Filter, SortDirection};
//!
//! let query = Query::builder()
//!     .filter(Filter::eq("status", "active"))
//!     .order_by("documentPosition", SortDirection::Asc)
//!     .start_at(10)
//!     .limit(25)
//!     .build();
//! ```

use bson::Bson;

use crate::error::DocSetError;

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

/// Sort specification for query results.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    /// The field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Field comparison operators supported by the store protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
}

impl FieldOp {
    /// Returns the protocol symbol for this operator.
    pub fn symbol(&self) -> &'static str {
        match self {
            FieldOp::Eq => "==",
            FieldOp::Ne => "!=",
            FieldOp::Gt => ">",
            FieldOp::Gte => ">=",
            FieldOp::Lt => "<",
            FieldOp::Lte => "<=",
        }
    }

    /// `true` for `<`, `<=`, `>` and `>=`.
    pub fn is_range(&self) -> bool {
        matches!(self, FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte)
    }
}

/// A single field comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Public document field name (dotted paths address nested fields).
    pub field: String,
    /// Comparison operator.
    pub op: FieldOp,
    /// Value to compare against.
    pub value: Bson,
}

impl Filter {
    /// Creates a filter from its parts.
    pub fn new(field: impl Into<String>, op: FieldOp, value: impl Into<Bson>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Creates an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::new(field, FieldOp::Eq, value)
    }

    /// Creates a not-equal filter.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::new(field, FieldOp::Ne, value)
    }

    /// Creates a greater-than filter.
    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::new(field, FieldOp::Gt, value)
    }

    /// Creates a greater-than-or-equal filter.
    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::new(field, FieldOp::Gte, value)
    }

    /// Creates a less-than filter.
    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::new(field, FieldOp::Lt, value)
    }

    /// Creates a less-than-or-equal filter.
    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::new(field, FieldOp::Lte, value)
    }
}

/// A structured query against one collection.
///
/// All filters are joined by AND; the store has no server-side OR.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Filters that must all match.
    pub filters: Vec<Filter>,
    /// Optional ordering.
    pub order_by: Option<Sort>,
    /// Start cursor, compared against the ordering field.
    pub start_at: Option<Bson>,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
}

impl Query {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        QueryBuilder { query: Query::default() }
    }

    /// Appends a filter to the conjunction.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.query.filters.push(filter);
        self
    }

    /// Sets the ordering.
    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.order_by = Some(Sort { field: field.into(), direction });
        self
    }

    /// Sets the start cursor.
    pub fn start_at(mut self, value: impl Into<Bson>) -> Self {
        self.query.start_at = Some(value.into());
        self
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

/// Translates the filters of a [`Query`] into a backend representation.
pub trait FilterVisitor {
    type Output;
    type Error: Into<DocSetError>;

    fn visit_filter(
        &mut self,
        field: &str,
        op: FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_filters(&mut self, filters: &[Filter]) -> Result<Vec<Self::Output>, Self::Error> {
        filters
            .iter()
            .map(|filter| self.visit_filter(&filter.field, filter.op, &filter.value))
            .collect()
    }
}
