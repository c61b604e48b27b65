//! Unit of work: pending writes, tracked entities and the commit barrier.
//!
//! Writes are staged into a [`PendingBatch`] and flushed by
//! [`UnitOfWork::save_changes`]. A save first waits until no query or registered task
//! is outstanding, then stages an update for every tracked entity that was mutated,
//! then commits everything atomically. The batch is emptied after every attempt.
//!
//! Entities loaded through a unit of work are tracked once per `(collection, id)`:
//! loading a document that is already tracked hands out the existing entity, local
//! changes included, instead of a second copy.
//!
//! A failed commit sets a sticky write error. While it is set, saves return
//! immediately without touching the store.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bson::{Bson, Document};
use mea::mutex::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{
    backend::{StoreBackend, WriteOp},
    barrier::CommitBarrier,
    batch::PendingBatch,
    config::ContextConfig,
    entity::{DOCUMENT_POSITION_FIELD, Entity, OperationContext},
    error::{DocSetError, DocSetResult},
    mapper::EntityMapper,
    query::{Query, SortDirection},
    tracker::{AnyTracked, ChangeTracker, Tracked},
};

/// Position bookkeeping of one collection within a save cycle.
#[derive(Debug, Clone, Copy)]
struct PositionCounter {
    last_persisted: i64,
    staged: i64,
}

/// Owner of one write batch and of every entity loaded through it.
pub struct UnitOfWork<B> {
    backend: B,
    mapper: EntityMapper,
    config: ContextConfig,
    pending: Mutex<PendingBatch>,
    tracked: Mutex<HashMap<(String, String), Arc<dyn AnyTracked>>>,
    positions: Mutex<HashMap<String, PositionCounter>>,
    barrier: CommitBarrier,
    write_error: Arc<AtomicBool>,
    commit_lock: Mutex<()>,
}

impl<B: fmt::Debug> fmt::Debug for UnitOfWork<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("backend", &self.backend)
            .field("config", &self.config)
            .field("barrier", &self.barrier)
            .field("write_error", &self.write_error.load(Ordering::SeqCst))
            .finish()
    }
}

impl<B: StoreBackend> UnitOfWork<B> {
    pub fn new(backend: B, mapper: EntityMapper, config: ContextConfig) -> Self {
        Self {
            backend,
            mapper,
            config,
            pending: Mutex::new(PendingBatch::new()),
            tracked: Mutex::new(HashMap::new()),
            positions: Mutex::new(HashMap::new()),
            barrier: CommitBarrier::new(),
            write_error: Arc::new(AtomicBool::new(false)),
            commit_lock: Mutex::new(()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn mapper(&self) -> &EntityMapper {
        &self.mapper
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn barrier(&self) -> &CommitBarrier {
        &self.barrier
    }

    /// Queues an insert (or full replace) of `entity`.
    ///
    /// An entity in [`OperationContext::Unknown`] is switched to
    /// [`OperationContext::Insert`]. With pagination enabled the entity receives the
    /// next document position. Pending files are uploaded before the entity is queued.
    pub async fn stage<E: Entity>(&self, entity: &mut E) -> DocSetResult<()> {
        let collection = self.mapper.collection::<E>()?.to_string();
        let id = required_id(entity, &collection)?;

        let context = entity.meta().context().or(OperationContext::Insert);
        entity.meta_mut().set_context(context);

        // validation must fail before any round trip
        self.mapper.to_document(&*entity, context)?;

        let position = if self.config.add_pagination {
            let position = self.next_position(&collection).await?;
            entity.meta_mut().set_document_position(position);
            Some(position)
        } else {
            None
        };

        let document = {
            let _guard = self.barrier.enter();
            self.mapper.to_document_with_files(entity, context).await
        };

        let document = match document {
            Ok(document) => document,
            Err(err) => {
                if let Some(position) = position {
                    self.release_position(&collection, position).await;
                }
                return Err(err);
            }
        };

        debug!(collection = %collection, id = %id, "staged set");
        self.pending.lock().await.stage(WriteOp::set(collection, id, document));

        Ok(())
    }

    /// Queues a delete of `entity`.
    pub async fn remove<E: Entity>(&self, entity: &E) -> DocSetResult<()> {
        let collection = self.mapper.collection::<E>()?.to_string();
        let id = required_id(entity, &collection)?;

        debug!(collection = %collection, id = %id, "staged delete");
        self.pending.lock().await.stage(WriteOp::delete(collection, id));

        Ok(())
    }

    async fn next_position(&self, collection: &str) -> DocSetResult<i64> {
        let mut positions = self.positions.lock().await;

        let last_persisted = match positions.get(collection) {
            Some(counter) => counter.last_persisted,
            None => self.last_position(collection).await?,
        };

        let counter = positions
            .entry(collection.to_string())
            .or_insert(PositionCounter { last_persisted, staged: 0 });

        counter.staged += 1;
        Ok(counter.last_persisted + counter.staged)
    }

    /// Hands back `position` when it is still the latest one reserved for `collection`.
    async fn release_position(&self, collection: &str, position: i64) {
        if let Some(counter) = self.positions.lock().await.get_mut(collection) {
            if counter.last_persisted + counter.staged == position {
                counter.staged -= 1;
            }
        }
    }

    async fn last_position(&self, collection: &str) -> DocSetResult<i64> {
        let _guard = self.barrier.enter();

        let query = Query::builder()
            .order_by(DOCUMENT_POSITION_FIELD, SortDirection::Desc)
            .limit(1)
            .build();

        let Some(last) = self.backend.query_documents(query, collection).await?.into_iter().next() else {
            return Ok(0);
        };

        match last.get(DOCUMENT_POSITION_FIELD) {
            Some(Bson::Int32(position)) => Ok(i64::from(*position)),
            Some(Bson::Int64(position)) => Ok(*position),
            Some(Bson::Double(position)) if position.is_finite() => Ok(*position as i64),
            _ => Err(DocSetError::invalid_field(
                DOCUMENT_POSITION_FIELD,
                format!(
                    "last document of {collection} ({}) has no usable position",
                    last.get_str("id").unwrap_or("unknown id")
                ),
            )),
        }
    }

    /// Materializes `document` as a tracked entity owned by this unit of work.
    ///
    /// When the document is already tracked the existing entity is returned as is.
    pub async fn track<E: Entity>(&self, collection: &str, document: Document) -> DocSetResult<Tracked<E>> {
        let entity: E = self.mapper.from_document(document.clone())?;
        let key = (collection.to_string(), required_id(&entity, collection)?);

        let mut tracked = self.tracked.lock().await;
        if let Some(existing) = tracked.get(&key).cloned().and_then(Tracked::<E>::from_erased) {
            return Ok(existing);
        }

        let (entry, _) = ChangeTracker::track(entity, collection, Some(document));
        tracked.insert(key, entry.erased());

        Ok(entry)
    }

    /// Number of distinct entities loaded through this unit of work.
    pub async fn tracked_count(&self) -> usize {
        self.tracked.lock().await.len()
    }

    /// Number of writes currently staged.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Holds the commit barrier until `task` completes.
    ///
    /// The barrier is entered immediately, before the returned future is first
    /// polled. A task that fails records the sticky write error.
    pub fn register_task<F, T>(&self, task: F) -> impl Future<Output = DocSetResult<T>> + Send + 'static
    where
        F: Future<Output = DocSetResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.barrier.enter();
        let write_error = self.write_error.clone();

        async move {
            let result = task.await;
            drop(guard);

            if let Err(err) = &result {
                error!(error = %err, "registered task failed");
                write_error.store(true, Ordering::SeqCst);
            }

            result
        }
    }

    pub fn has_write_error(&self) -> bool {
        self.write_error.load(Ordering::SeqCst)
    }

    pub fn clear_write_error(&self) {
        self.write_error.store(false, Ordering::SeqCst);
    }

    /// Commits every staged write plus the write-back of mutated tracked entities.
    ///
    /// Returns the number of writes committed. Whatever the outcome, the pending batch
    /// and position counters are reset afterwards.
    pub async fn save_changes(&self) -> DocSetResult<usize> {
        let _commit = self.commit_lock.lock().await;

        let result = if self.has_write_error() {
            warn!("unable to save changes, a previous write failed on this context");
            Ok(0)
        } else {
            self.commit().await
        };

        self.pending.lock().await.clear();
        self.positions.lock().await.clear();

        result
    }

    async fn commit(&self) -> DocSetResult<usize> {
        let timeout = self.config.commit_timeout();
        let deadline = Instant::now() + timeout;

        if let Err(err) = self
            .barrier
            .wait_clear(self.config.poll_interval(), timeout)
            .await
        {
            warn!(outstanding = self.barrier.outstanding(), "commit barrier did not clear");
            return Err(err);
        }

        let dirty: Vec<_> = self
            .tracked
            .lock()
            .await
            .values()
            .filter(|entry| entry.is_dirty())
            .cloned()
            .collect();
        let mut updates = Vec::new();

        for entry in dirty {
            match entry.pending_update(&self.mapper, deadline, timeout).await {
                Ok(Some((id, document))) => updates.push((entry, id, document)),
                Ok(None) => {}
                Err(err @ DocSetError::CommitTimeout(_)) => {
                    warn!(collection = entry.collection(), "tracked entity stayed locked past the commit timeout");
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        }

        let mut pending = self.pending.lock().await;
        let mut written = Vec::with_capacity(updates.len());

        for (entry, id, document) in updates {
            if pending.stage_tracked_update(entry.collection(), &id, document.clone()) {
                written.push((entry, document));
            }
        }

        if pending.is_empty() {
            debug!("nothing to commit");
            return Ok(0);
        }

        let limit = match self.config.max_batch_size {
            Some(max) => max.min(self.backend.max_batch_size()),
            None => self.backend.max_batch_size(),
        };

        if pending.len() > limit {
            return Err(DocSetError::BatchTooLarge {
                size: pending.len(),
                limit,
            });
        }

        let batch = pending.take();
        drop(pending);

        let size = batch.len();
        info!(writes = size, "committing batch");

        if let Err(err) = self.backend.commit_batch(batch).await {
            error!(error = %err, "batch commit failed");
            self.write_error.store(true, Ordering::SeqCst);
            return Err(DocSetError::Write(err.to_string()));
        }

        for (entry, document) in written {
            entry.mark_committed(document).await;
        }

        Ok(size)
    }
}

fn required_id<E: Entity>(entity: &E, collection: &str) -> DocSetResult<String> {
    match entity.id() {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(DocSetError::MissingId(collection.to_string())),
    }
}
