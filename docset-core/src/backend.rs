//! Storage backend abstraction for the remote document store.
//!
//! The [`StoreBackend`] trait is the store query protocol this layer speaks: point
//! reads by collection and id, conjunctive queries with a single ordering, a start
//! cursor and a limit, and batched `set`/`update`/`delete` writes committed
//! atomically as one unit.
//!
//! # Examples
//!
//! ```ignore
//! use docset::backend::{StoreBackend, WriteOp};
//! use docset::query::{Query, Filter, SortDirection};
//! use bson::doc;
//!
//! let backend = MyBackendImpl::new();
//!
//! backend
//!     .commit_batch(vec![WriteOp::set("users", "u-1", doc! { "id": "u-1", "name": "Alice" })])
//!     .await?;
//!
//! let query = Query::builder()
//!     .filter(Filter::eq("name", "Alice"))
//!     .order_by("documentPosition", SortDirection::Asc)
//!     .build();
//! let users = backend.query_documents(query, "users").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use bson::Document;

use crate::{error::DocSetResult, query::Query};

/// Batch ceiling of the reference provider.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;

/// Kind of a batched write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    /// Creates or replaces the whole document.
    Set,
    /// Merges the given fields into an existing document.
    Update,
    /// Removes the document.
    Delete,
}

/// A single write of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    pub kind: WriteKind,
    pub collection: String,
    pub id: String,
    /// Persisted document. Empty for deletes.
    pub document: Document,
}

impl WriteOp {
    pub fn set(collection: impl Into<String>, id: impl Into<String>, document: Document) -> Self {
        Self {
            kind: WriteKind::Set,
            collection: collection.into(),
            id: id.into(),
            document,
        }
    }

    pub fn update(collection: impl Into<String>, id: impl Into<String>, document: Document) -> Self {
        Self {
            kind: WriteKind::Update,
            collection: collection.into(),
            id: id.into(),
            document,
        }
    }

    pub fn delete(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: WriteKind::Delete,
            collection: collection.into(),
            id: id.into(),
            document: Document::new(),
        }
    }
}

/// Abstract interface for document store backends.
///
/// Documents cross this boundary in their persisted form: public field names, with
/// the document id under `id`.
///
/// # Thread Safety
///
/// All implementations must be thread-safe. A unit of work issues the branch queries
/// of one predicate concurrently.
///
/// # Error Handling
///
/// A query the store cannot serve (for instance a range filter on a field other than
/// the ordering field) must fail with [`DocSetError::Query`](crate::error::DocSetError::Query).
/// A batch that cannot be applied must leave the store unchanged.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Reads one document by id.
    async fn get_document(&self, collection: &str, id: &str) -> DocSetResult<Option<Document>>;

    /// Runs a conjunctive query against one collection.
    async fn query_documents(&self, query: Query, collection: &str) -> DocSetResult<Vec<Document>>;

    /// Applies every write of `batch` atomically.
    async fn commit_batch(&self, batch: Vec<WriteOp>) -> DocSetResult<()>;

    /// Largest number of writes one batch may carry.
    fn max_batch_size(&self) -> usize {
        DEFAULT_MAX_BATCH_SIZE
    }

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op, but backends with external connections
    /// should override this.
    async fn shutdown(self) -> DocSetResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    async fn get_document(&self, collection: &str, id: &str) -> DocSetResult<Option<Document>> {
        (*self).get_document(collection, id).await
    }

    async fn query_documents(&self, query: Query, collection: &str) -> DocSetResult<Vec<Document>> {
        (*self).query_documents(query, collection).await
    }

    async fn commit_batch(&self, batch: Vec<WriteOp>) -> DocSetResult<()> {
        (*self).commit_batch(batch).await
    }

    fn max_batch_size(&self) -> usize {
        (*self).max_batch_size()
    }
}

#[async_trait]
impl<B> StoreBackend for Arc<B>
where
    B: StoreBackend,
{
    async fn get_document(&self, collection: &str, id: &str) -> DocSetResult<Option<Document>> {
        self.as_ref().get_document(collection, id).await
    }

    async fn query_documents(&self, query: Query, collection: &str) -> DocSetResult<Vec<Document>> {
        self.as_ref().query_documents(query, collection).await
    }

    async fn commit_batch(&self, batch: Vec<WriteOp>) -> DocSetResult<()> {
        self.as_ref().commit_batch(batch).await
    }

    fn max_batch_size(&self) -> usize {
        self.as_ref().max_batch_size()
    }
}

/// Factory for backends that need asynchronous setup.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocSetResult<Self::Backend>;
}
