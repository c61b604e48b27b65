//! Change tracking of materialized entities.
//!
//! A [`Tracked`] entity is handed out by queries instead of the bare entity. Reads go
//! through [`Tracked::read`]; writes go through [`Tracked::write`], whose guard flips the
//! dirty bit the first time the entity is mutably dereferenced. Nothing ever has to be
//! marked modified by hand.
//!
//! ```ignore
//! let (user, handle) = ChangeTracker::track(user, "users", None);
//!
//! assert_eq!(user.read().await.name, "Alice");
//! assert!(!handle.is_dirty());
//!
//! user.write().await.name = "Bob".into();
//! assert!(handle.is_dirty());
//! ```

use std::{
    any::Any,
    fmt,
    ops::{Deref, DerefMut},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bson::Document;
use mea::{
    mutex::Mutex,
    rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use tokio::time::{Instant, timeout_at};
use tracing::{trace, warn};

use crate::{
    entity::{Entity, OperationContext},
    error::{DocSetError, DocSetResult},
    mapper::EntityMapper,
};

/// Read-only view of the dirty bit of one tracked entity.
#[derive(Debug, Clone)]
pub struct DirtyHandle {
    dirty: Arc<AtomicBool>,
}

impl DirtyHandle {
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }
}

/// Wraps entities so that mutation after load is observable.
pub struct ChangeTracker;

impl ChangeTracker {
    /// Starts tracking `entity`, loaded from `collection`.
    ///
    /// `loaded` is the document the entity was built from, if any. A write-back that
    /// would reproduce it exactly is skipped.
    pub fn track<E: Entity>(entity: E, collection: impl Into<String>, loaded: Option<Document>) -> (Tracked<E>, DirtyHandle) {
        let dirty = Arc::new(AtomicBool::new(false));

        let tracked = Tracked {
            entry: Arc::new(TrackedEntry {
                entity: RwLock::new(entity),
                dirty: dirty.clone(),
                collection: collection.into(),
                last_written: Mutex::new(loaded),
            }),
        };

        (tracked, DirtyHandle { dirty })
    }
}

/// A change-tracked entity.
///
/// Clones share the same entity and dirty bit.
pub struct Tracked<E> {
    entry: Arc<TrackedEntry<E>>,
}

impl<E> Clone for Tracked<E> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry.clone(),
        }
    }
}

impl<E> fmt::Debug for Tracked<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.entry, f)
    }
}

impl<E: Entity> Tracked<E> {
    /// Borrows the entity for reading. Never marks it dirty.
    pub async fn read(&self) -> RwLockReadGuard<'_, E> {
        self.entry.entity.read().await
    }

    /// Borrows the entity for writing. The first mutable access marks it dirty.
    pub async fn write(&self) -> TrackedWriteGuard<'_, E> {
        TrackedWriteGuard {
            guard: self.entry.entity.write().await,
            dirty: &self.entry.dirty,
        }
    }

    /// Clones the current state of the entity.
    pub async fn snapshot(&self) -> E {
        self.entry.entity.read().await.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.entry.dirty.load(Ordering::SeqCst)
    }

    pub fn handle(&self) -> DirtyHandle {
        DirtyHandle {
            dirty: self.entry.dirty.clone(),
        }
    }

    /// Collection the entity was loaded from.
    pub fn collection(&self) -> &str {
        &self.entry.collection
    }

    pub(crate) fn erased(&self) -> Arc<dyn AnyTracked> {
        self.entry.clone()
    }

    /// Recovers the typed handle of an entry tracked for `E`.
    pub(crate) fn from_erased(erased: Arc<dyn AnyTracked>) -> Option<Self> {
        erased.into_any().downcast::<TrackedEntry<E>>().ok().map(|entry| Self { entry })
    }
}

/// Write access to a tracked entity.
pub struct TrackedWriteGuard<'a, E> {
    guard: RwLockWriteGuard<'a, E>,
    dirty: &'a AtomicBool,
}

impl<E> Deref for TrackedWriteGuard<'_, E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.guard
    }
}

impl<E> DerefMut for TrackedWriteGuard<'_, E> {
    fn deref_mut(&mut self) -> &mut E {
        if !self.dirty.swap(true, Ordering::SeqCst) {
            trace!("tracked entity marked dirty");
        }
        &mut self.guard
    }
}

struct TrackedEntry<E> {
    entity: RwLock<E>,
    dirty: Arc<AtomicBool>,
    collection: String,
    last_written: Mutex<Option<Document>>,
}

impl<E> fmt::Debug for TrackedEntry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedEntry")
            .field("collection", &self.collection)
            .field("dirty", &self.dirty.load(Ordering::SeqCst))
            .finish()
    }
}

impl<E: Entity> TrackedEntry<E> {
    /// Writes the uploaded file urls back onto the live entity.
    ///
    /// The entity is replaced only when it still matches the snapshot the uploads
    /// were made from.
    async fn store_uploads(
        &self,
        uploaded: &E,
        before: &Document,
        mapper: &EntityMapper,
        context: OperationContext,
        deadline: Instant,
        timeout: Duration,
    ) -> DocSetResult<()> {
        let mut live = timeout_at(deadline, self.entity.write())
            .await
            .map_err(|_| DocSetError::CommitTimeout(timeout))?;

        if mapper.to_document(&*live, context).ok().as_ref() == Some(before) {
            *live = uploaded.clone();
        } else {
            warn!(collection = %self.collection, "entity changed during upload, keeping its local file state");
        }

        Ok(())
    }
}

/// Type-erased access used by the unit of work's dirty scan.
#[async_trait]
pub(crate) trait AnyTracked: Send + Sync + fmt::Debug {
    fn collection(&self) -> &str;

    fn is_dirty(&self) -> bool;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Transcodes the entity for write-back when it is dirty and differs from what
    /// was last loaded or written.
    ///
    /// The entity is read from a snapshot, so shared read guards held by callers do
    /// not block. Waiting for a held write guard fails with
    /// [`DocSetError::CommitTimeout`] once `deadline` passes.
    async fn pending_update(
        &self,
        mapper: &EntityMapper,
        deadline: Instant,
        timeout: Duration,
    ) -> DocSetResult<Option<(String, Document)>>;

    /// Records the document that was just committed.
    async fn mark_committed(&self, document: Document);
}

#[async_trait]
impl<E: Entity> AnyTracked for TrackedEntry<E> {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    async fn pending_update(
        &self,
        mapper: &EntityMapper,
        deadline: Instant,
        timeout: Duration,
    ) -> DocSetResult<Option<(String, Document)>> {
        if !self.is_dirty() {
            return Ok(None);
        }

        let mut entity = {
            let guard = timeout_at(deadline, self.entity.read())
                .await
                .map_err(|_| DocSetError::CommitTimeout(timeout))?;
            E::clone(&guard)
        };

        let context = match entity.meta().context() {
            OperationContext::IgnoreAll => OperationContext::IgnoreAll,
            _ => OperationContext::Update,
        };

        let before = mapper.to_document(&entity, context)?;
        if mapper.upload_files(&mut entity).await? > 0 {
            self.store_uploads(&entity, &before, mapper, context, deadline, timeout).await?;
        }

        let id = entity
            .id()
            .map(str::to_string)
            .ok_or_else(|| DocSetError::MissingId(self.collection.clone()))?;

        let document = mapper.to_document(&entity, context)?;

        if self.last_written.lock().await.as_ref() == Some(&document) {
            return Ok(None);
        }

        Ok(Some((id, document)))
    }

    async fn mark_committed(&self, document: Document) {
        *self.last_written.lock().await = Some(document);
    }
}
