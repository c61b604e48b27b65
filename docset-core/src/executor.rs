//! Execution of compiled predicate plans.
//!
//! Every branch of a [`CompiledPlan`] becomes one store [`Query`]. The branch queries
//! of one call run concurrently while holding the commit barrier; their results are
//! unioned in branch order under a global `take` budget, optionally filtered by a
//! client-side text search, and handed back as [`Tracked`] entities registered with
//! the owning unit of work.

use std::collections::HashSet;

use bson::{Bson, Document};
use futures::future::try_join_all;
use tracing::debug;

use crate::{
    backend::StoreBackend,
    entity::{CREATED_DATE_FIELD, DOCUMENT_POSITION_FIELD, Entity, ID_FIELD},
    error::DocSetResult,
    predicate::{Branch, CompiledPlan},
    query::{FieldOp, Filter, Query, QueryBuilder, SortDirection},
    tracker::Tracked,
    unit_of_work::UnitOfWork,
};

/// Pagination and search policy of one execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Global result budget across all branches.
    pub take: Option<usize>,
    /// Start cursor applied to every branch query.
    pub start_at: Option<Bson>,
    /// Case-insensitive text every returned document must contain.
    pub search_text: Option<String>,
    /// Raw documents scanned per branch while searching.
    pub search_limit: Option<usize>,
}

impl QueryOptions {
    fn branch_limit(&self) -> Option<usize> {
        if self.search_text.is_some() { self.search_limit } else { self.take }
    }
}

/// Builds the store query of one plan branch.
///
/// Purely equality-based branches (and standalone `!=` terms) are ordered by the
/// document position. Other groups are ordered by their first field, and a standalone
/// range term by its own field.
pub fn branch_query(branch: &Branch<'_>, options: &QueryOptions) -> Query {
    let mut builder = Query::builder();

    for term in branch.terms {
        builder = builder.filter(Filter::new(term.field.clone(), term.op, term.value.clone()));
    }

    let order_field = match branch.terms {
        [term] if !branch.grouped && matches!(term.op, FieldOp::Eq | FieldOp::Ne) => DOCUMENT_POSITION_FIELD,
        terms if branch.grouped && terms.iter().all(|term| term.op == FieldOp::Eq) => DOCUMENT_POSITION_FIELD,
        [first, ..] => first.field.as_str(),
        [] => DOCUMENT_POSITION_FIELD,
    };
    builder = builder.order_by(order_field, SortDirection::Asc);

    finish(builder, options)
}

/// Builds a filterless query ordered by `field`.
pub fn ordered_query(field: &str, options: &QueryOptions) -> Query {
    finish(Query::builder().order_by(field, SortDirection::Asc), options)
}

fn finish(mut builder: QueryBuilder, options: &QueryOptions) -> Query {
    if let Some(start_at) = &options.start_at {
        builder = builder.start_at(start_at.clone());
    }

    if let Some(limit) = options.branch_limit() {
        builder = builder.limit(limit);
    }

    builder.build()
}

/// Runs plans against the backend of a [`UnitOfWork`].
#[derive(Debug)]
pub struct QueryExecutor<'a, B> {
    unit: &'a UnitOfWork<B>,
}

impl<'a, B: StoreBackend> QueryExecutor<'a, B> {
    pub fn new(unit: &'a UnitOfWork<B>) -> Self {
        Self { unit }
    }

    /// Runs every branch of `plan` and returns the tracked union.
    pub async fn execute<E: Entity>(&self, plan: &CompiledPlan, options: &QueryOptions) -> DocSetResult<Vec<Tracked<E>>> {
        let queries = plan
            .branches()
            .iter()
            .map(|branch| branch_query(branch, options))
            .collect();

        self.run(queries, options).await
    }

    /// Runs one filterless query ordered by `field`.
    pub async fn execute_ordered<E: Entity>(&self, field: &str, options: &QueryOptions) -> DocSetResult<Vec<Tracked<E>>> {
        self.run(vec![ordered_query(field, options)], options).await
    }

    /// Reads one document by id.
    pub async fn get<E: Entity>(&self, id: &str) -> DocSetResult<Option<Tracked<E>>> {
        let collection = self.unit.mapper().collection::<E>()?;

        let document = {
            let _guard = self.unit.barrier().enter();
            debug!(collection, id, "reading document");
            self.unit.backend().get_document(collection, id).await?
        };

        match document {
            Some(document) => Ok(Some(self.unit.track(collection, document).await?)),
            None => Ok(None),
        }
    }

    async fn run<E: Entity>(&self, queries: Vec<Query>, options: &QueryOptions) -> DocSetResult<Vec<Tracked<E>>> {
        let collection = self.unit.mapper().collection::<E>()?;

        let results = {
            let _guard = self.unit.barrier().enter();
            debug!(collection, branches = queries.len(), "issuing branch queries");

            try_join_all(
                queries
                    .into_iter()
                    .map(|query| self.unit.backend().query_documents(query, collection)),
            )
            .await?
        };

        let mut tracked = Vec::new();
        for document in union(results, options) {
            tracked.push(self.unit.track(collection, document).await?);
        }

        Ok(tracked)
    }
}

/// Concatenates branch results in order, skipping documents already returned and
/// stopping once `take` documents are collected.
pub fn union(branches: Vec<Vec<Document>>, options: &QueryOptions) -> Vec<Document> {
    let needle = options
        .search_text
        .as_deref()
        .map(str::to_lowercase)
        .filter(|text| !text.is_empty());

    let mut seen = HashSet::new();
    let mut remaining = options.take;
    let mut out = Vec::new();

    'branches: for documents in branches {
        for document in documents {
            if remaining == Some(0) {
                break 'branches;
            }

            if let Some(needle) = &needle {
                if !document_contains(&document, needle) {
                    continue;
                }
            }

            if let Ok(id) = document.get_str(ID_FIELD) {
                if !seen.insert(id.to_string()) {
                    continue;
                }
            }

            out.push(document);
            remaining = remaining.map(|left| left - 1);
        }
    }

    out
}

/// Whether any leaf of `document`, bookkeeping fields aside, contains `needle`.
///
/// `needle` must already be lower-cased.
pub fn document_contains(document: &Document, needle: &str) -> bool {
    document
        .iter()
        .filter(|(key, _)| !matches!(key.as_str(), ID_FIELD | DOCUMENT_POSITION_FIELD | CREATED_DATE_FIELD))
        .any(|(_, value)| value_contains(value, needle))
}

fn value_contains(value: &Bson, needle: &str) -> bool {
    match value {
        Bson::Document(doc) => doc.values().any(|value| value_contains(value, needle)),
        Bson::Array(items) => items.iter().any(|value| value_contains(value, needle)),
        Bson::Null | Bson::Undefined => false,
        Bson::String(text) => text.to_lowercase().contains(needle),
        other => other.to_string().to_lowercase().contains(needle),
    }
}
