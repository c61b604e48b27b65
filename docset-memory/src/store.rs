//! In-memory storage implementation of the store protocol.
//!
//! Documents are kept per collection in ordered maps behind an async-aware
//! read-write lock. Queries obey the same restrictions as a hosted document store,
//! so code exercised against this backend behaves the same in production.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use bson::{Bson, Document};
use mea::rwlock::RwLock;
use tracing::debug;

use docset_core::{
    backend::{DEFAULT_MAX_BATCH_SIZE, StoreBackend, StoreBackendBuilder, WriteKind, WriteOp},
    entity::ID_FIELD,
    error::{DocSetError, DocSetResult},
    query::{Query, SortDirection},
};

use crate::evaluator::{Comparable, DocumentEvaluator, lookup};

type CollectionMap = BTreeMap<String, Document>;
type StoreMap = HashMap<String, CollectionMap>;

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, so clones
/// share the same underlying data.
///
/// # Query restrictions
///
/// - a start cursor requires an ordering
/// - range filters (`<`, `<=`, `>`, `>=`) may only target one field
/// - that field must be the ordering field, when one is given
///
/// Documents lacking the ordering field are left out of ordered results.
///
/// # Example
///
/// ```ignore
/// use docset_memory::InMemoryStore;
/// use docset::backend::{StoreBackend, WriteOp};
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// store
///     .commit_batch(vec![WriteOp::set("users", "u-1", doc! { "id": "u-1", "name": "Alice" })])
///     .await?;
///
/// assert!(store.get_document("users", "u-1").await?.is_some());
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> (document id -> document)
    store: Arc<RwLock<StoreMap>>,
    max_batch_size: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }

    /// Creates a builder for constructing an `InMemoryStore` with custom options.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Number of documents held in `collection`.
    pub async fn document_count(&self, collection: &str) -> usize {
        self.store
            .read()
            .await
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Names of every collection holding at least one document.
    pub async fn collections(&self) -> Vec<String> {
        self.store
            .read()
            .await
            .iter()
            .filter(|(_, documents)| !documents.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn validate_query(query: &Query) -> DocSetResult<()> {
    if query.start_at.is_some() && query.order_by.is_none() {
        return Err(DocSetError::Query("a start cursor requires an ordering".to_string()));
    }

    let mut range_field: Option<&str> = None;
    for filter in query.filters.iter().filter(|filter| filter.op.is_range()) {
        match range_field {
            Some(field) if field != filter.field => {
                return Err(DocSetError::Query(format!(
                    "range filters on both {field} and {} are not supported",
                    filter.field
                )));
            }
            _ => range_field = Some(filter.field.as_str()),
        }
    }

    if let (Some(field), Some(sort)) = (range_field, &query.order_by) {
        if sort.field != field {
            return Err(DocSetError::Query(format!(
                "a range filter on {field} requires ordering by {field}, not {}",
                sort.field
            )));
        }
    }

    Ok(())
}

fn apply(store: &mut StoreMap, op: WriteOp) -> DocSetResult<()> {
    let documents = store.entry(op.collection.clone()).or_default();

    match op.kind {
        WriteKind::Set => {
            let mut document = op.document;
            document.insert(ID_FIELD, op.id.clone());
            documents.insert(op.id, document);
        }
        WriteKind::Update => {
            let Some(existing) = documents.get_mut(&op.id) else {
                return Err(DocSetError::Write(format!(
                    "no document {} in collection {} to update",
                    op.id, op.collection
                )));
            };

            for (key, value) in op.document {
                existing.insert(key, value);
            }
        }
        WriteKind::Delete => {
            documents.remove(&op.id);
        }
    }

    Ok(())
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn get_document(&self, collection: &str, id: &str) -> DocSetResult<Option<Document>> {
        Ok(self
            .store
            .read()
            .await
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned())
    }

    async fn query_documents(&self, query: Query, collection: &str) -> DocSetResult<Vec<Document>> {
        validate_query(&query)?;

        let store = self.store.read().await;
        let Some(collection_map) = store.get(collection) else {
            return Ok(vec![]);
        };

        let mut matched = Vec::new();
        for document in collection_map.values() {
            if DocumentEvaluator::new(document).matches(&query.filters)? {
                matched.push(document);
            }
        }

        if let Some(sort) = &query.order_by {
            matched.retain(|document| lookup(document, &sort.field).is_some());

            // ties keep id order, which is the map order
            matched.sort_by(|a, b| {
                let left = lookup(a, &sort.field).map(Comparable::from).unwrap_or(Comparable::Null);
                let right = lookup(b, &sort.field).map(Comparable::from).unwrap_or(Comparable::Null);

                match sort.direction {
                    SortDirection::Asc => left.total_cmp(&right),
                    SortDirection::Desc => right.total_cmp(&left),
                }
            });

            if let Some(start_at) = &query.start_at {
                let cursor = Comparable::from(start_at);

                matched.retain(|document| {
                    let value = lookup(document, &sort.field).map(Comparable::from).unwrap_or(Comparable::Null);

                    match sort.direction {
                        SortDirection::Asc => value.total_cmp(&cursor) != Ordering::Less,
                        SortDirection::Desc => value.total_cmp(&cursor) != Ordering::Greater,
                    }
                });
            }
        }

        Ok(matched
            .into_iter()
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn commit_batch(&self, batch: Vec<WriteOp>) -> DocSetResult<()> {
        if batch.len() > self.max_batch_size {
            return Err(DocSetError::BatchTooLarge {
                size: batch.len(),
                limit: self.max_batch_size,
            });
        }

        let mut store = self.store.write().await;

        // apply to a copy so a failing write leaves the store untouched
        let mut next = (*store).clone();
        let writes = batch.len();
        for op in batch {
            apply(&mut next, op)?;
        }

        *store = next;
        debug!(writes, "applied batch");

        Ok(())
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// ```ignore
/// use docset_memory::InMemoryStore;
/// use docset::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().max_batch_size(50).build().await?;
/// ```
#[derive(Debug)]
pub struct InMemoryStoreBuilder {
    max_batch_size: usize,
}

impl Default for InMemoryStoreBuilder {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl InMemoryStoreBuilder {
    /// Largest batch [`commit_batch`](StoreBackend::commit_batch) accepts.
    pub fn max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> DocSetResult<Self::Backend> {
        Ok(InMemoryStore {
            store: Arc::new(RwLock::new(StoreMap::new())),
            max_batch_size: self.max_batch_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use docset_core::query::Filter;

    use super::*;

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .commit_batch(vec![
                WriteOp::set("tasks", "a", doc! { "title": "write", "priority": 3, "documentPosition": 1 }),
                WriteOp::set("tasks", "b", doc! { "title": "review", "priority": 1, "documentPosition": 2 }),
                WriteOp::set("tasks", "c", doc! { "title": "ship", "priority": 2, "documentPosition": 3 }),
            ])
            .await
            .unwrap();
        store
    }

    fn ids(documents: &[Document]) -> Vec<&str> {
        documents.iter().map(|doc| doc.get_str("id").unwrap()).collect()
    }

    #[tokio::test]
    async fn set_stores_the_id() {
        let store = seeded().await;

        let doc = store.get_document("tasks", "a").await.unwrap().unwrap();
        assert_eq!(doc.get_str("id").unwrap(), "a");
        assert_eq!(store.document_count("tasks").await, 3);
        assert!(store.get_document("tasks", "z").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ordered_queries_honor_cursor_and_limit() {
        let store = seeded().await;

        let query = Query::builder()
            .order_by("documentPosition", SortDirection::Asc)
            .start_at(2)
            .limit(1)
            .build();
        assert_eq!(ids(&store.query_documents(query, "tasks").await.unwrap()), vec!["b"]);

        let query = Query::builder().order_by("priority", SortDirection::Desc).build();
        assert_eq!(ids(&store.query_documents(query, "tasks").await.unwrap()), vec!["a", "c", "b"]);

        let query = Query::builder()
            .order_by("priority", SortDirection::Desc)
            .start_at(2)
            .build();
        assert_eq!(ids(&store.query_documents(query, "tasks").await.unwrap()), vec!["c", "b"]);
    }

    #[tokio::test]
    async fn range_filters_must_follow_the_ordering() {
        let store = seeded().await;

        let query = Query::builder()
            .filter(Filter::gt("priority", 1))
            .order_by("documentPosition", SortDirection::Asc)
            .build();
        let err = store.query_documents(query, "tasks").await.unwrap_err();
        assert!(matches!(err, DocSetError::Query(_)));

        let query = Query::builder()
            .filter(Filter::gt("priority", 1))
            .filter(Filter::lt("documentPosition", 3))
            .build();
        assert!(matches!(store.query_documents(query, "tasks").await, Err(DocSetError::Query(_))));

        let query = Query::builder().start_at(1).build();
        assert!(matches!(store.query_documents(query, "tasks").await, Err(DocSetError::Query(_))));

        let query = Query::builder()
            .filter(Filter::gt("priority", 1))
            .filter(Filter::eq("title", "ship"))
            .order_by("priority", SortDirection::Asc)
            .build();
        assert_eq!(ids(&store.query_documents(query, "tasks").await.unwrap()), vec!["c"]);
    }

    #[tokio::test]
    async fn failed_batches_leave_the_store_untouched() {
        let store = seeded().await;

        let err = store
            .commit_batch(vec![
                WriteOp::delete("tasks", "a"),
                WriteOp::update("tasks", "missing", doc! { "title": "x" }),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, DocSetError::Write(_)));
        assert!(store.get_document("tasks", "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn updates_merge_fields() {
        let store = seeded().await;

        store
            .commit_batch(vec![WriteOp::update("tasks", "a", doc! { "priority": 9 })])
            .await
            .unwrap();

        let doc = store.get_document("tasks", "a").await.unwrap().unwrap();
        assert_eq!(doc.get_i32("priority").unwrap(), 9);
        assert_eq!(doc.get_str("title").unwrap(), "write");
    }

    #[tokio::test]
    async fn builder_caps_batches() {
        let store = InMemoryStore::builder().max_batch_size(1).build().await.unwrap();

        let err = store
            .commit_batch(vec![
                WriteOp::set("tasks", "a", doc! {}),
                WriteOp::set("tasks", "b", doc! {}),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, DocSetError::BatchTooLarge { size: 2, limit: 1 }));
        assert!(store.collections().await.is_empty());
    }
}
