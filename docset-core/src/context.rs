//! The database context and its typed entity sets.
//!
//! A [`DbContext`] is built once per unit of work through [`DbContext::builder`], which
//! registers every entity type up front. Entities are then read through
//! [`EntitySet`]s, mutated in place, and written back by
//! [`DbContext::save_changes`].
//!
//! # Example
//!
//! ```ignore
//! use docset::prelude::*;
//!
//! let ctx = DbContext::builder(InMemoryStore::new())
//!     .config(ContextConfig::default().with_pagination(true))
//!     .register::<User>()
//!     .build()?;
//!
//! let mut user = User::new("Alice");
//! ctx.add(&mut user).await?;
//! ctx.save_changes().await?;
//!
//! let active = ctx
//!     .set::<User>()
//!     .filter(PredicateBuilder::new().equal("status", "active"))?
//!     .take(10)
//!     .to_list()
//!     .await?;
//!
//! for user in &active {
//!     user.write().await.status = "idle".into();
//! }
//! ctx.save_changes().await?;
//! ```

use std::{future::Future, marker::PhantomData, sync::Arc};

use bson::Bson;

use crate::{
    backend::StoreBackend,
    config::ContextConfig,
    entity::{DOCUMENT_POSITION_FIELD, Entity, FieldTagged, ID_FIELD},
    error::{DocSetError, DocSetResult},
    executor::{QueryExecutor, QueryOptions},
    file::BlobStore,
    mapper::EntityMapper,
    page::{Page, PageRequest},
    predicate::{CompiledPlan, PredicateBuilder},
    query::FieldOp,
    schema::{EntityRegistry, FieldTagRegistry},
    tracker::Tracked,
    unit_of_work::UnitOfWork,
};

/// Entry point for reading and writing entities through one unit of work.
///
/// Cloning is cheap; clones share the same pending batch and tracked entities.
#[derive(Debug)]
pub struct DbContext<B> {
    unit: Arc<UnitOfWork<B>>,
}

impl<B> Clone for DbContext<B> {
    fn clone(&self) -> Self {
        Self {
            unit: self.unit.clone(),
        }
    }
}

impl<B: StoreBackend> DbContext<B> {
    /// Starts configuring a context over `backend`.
    pub fn builder(backend: B) -> DbContextBuilder<B> {
        DbContextBuilder::new(backend)
    }

    /// Typed access to the entities of type `E`.
    pub fn set<E: Entity>(&self) -> EntitySet<'_, B, E> {
        EntitySet {
            unit: &self.unit,
            _entity: PhantomData,
        }
    }

    /// Queues an insert of `entity`. See [`UnitOfWork::stage`].
    pub async fn add<E: Entity>(&self, entity: &mut E) -> DocSetResult<()> {
        self.unit.stage(entity).await
    }

    /// Queues the deletion of `entity`.
    pub async fn remove<E: Entity>(&self, entity: &E) -> DocSetResult<()> {
        self.unit.remove(entity).await
    }

    /// Commits pending writes and mutated tracked entities. See [`UnitOfWork::save_changes`].
    pub async fn save_changes(&self) -> DocSetResult<usize> {
        self.unit.save_changes().await
    }

    /// Keeps the commit barrier held until `task` completes. See [`UnitOfWork::register_task`].
    pub fn register_task<F, T>(&self, task: F) -> impl Future<Output = DocSetResult<T>> + Send + 'static
    where
        F: Future<Output = DocSetResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.unit.register_task(task)
    }

    pub fn has_write_error(&self) -> bool {
        self.unit.has_write_error()
    }

    pub fn clear_write_error(&self) {
        self.unit.clear_write_error()
    }

    /// Number of writes staged for the next save.
    pub async fn pending_writes(&self) -> usize {
        self.unit.pending_count().await
    }

    pub fn config(&self) -> &ContextConfig {
        self.unit.config()
    }

    pub fn backend(&self) -> &B {
        self.unit.backend()
    }

    pub fn mapper(&self) -> &EntityMapper {
        self.unit.mapper()
    }

    pub fn unit_of_work(&self) -> &UnitOfWork<B> {
        &self.unit
    }
}

/// The explicit initialization object of a [`DbContext`].
///
/// Registration mistakes are recorded and reported by [`build`](Self::build).
#[derive(Debug)]
pub struct DbContextBuilder<B> {
    backend: B,
    config: ContextConfig,
    registry: EntityRegistry,
    blob_store: Option<Arc<dyn BlobStore>>,
    error: Option<DocSetError>,
}

impl<B: StoreBackend> DbContextBuilder<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            config: ContextConfig::default(),
            registry: EntityRegistry::new(),
            blob_store: None,
            error: None,
        }
    }

    pub fn config(mut self, config: ContextConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers an entity (or nested object) type. Each type may be registered once.
    pub fn register<T: FieldTagged>(mut self) -> Self {
        if let Err(err) = self.registry.register::<T>() {
            self.error.get_or_insert(err);
        }
        self
    }

    /// Sets the blob store used to upload file fields.
    pub fn blob_store(mut self, blob_store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(blob_store);
        self
    }

    pub fn build(self) -> DocSetResult<DbContext<B>> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let registry: Arc<dyn FieldTagRegistry> = Arc::new(self.registry);
        let mut mapper = EntityMapper::new(registry);
        if let Some(blob_store) = self.blob_store {
            mapper = mapper.with_blob_store(blob_store);
        }

        Ok(DbContext {
            unit: Arc::new(UnitOfWork::new(self.backend, mapper, self.config)),
        })
    }
}

/// Typed view of one collection.
#[derive(Debug)]
pub struct EntitySet<'a, B, E> {
    unit: &'a UnitOfWork<B>,
    _entity: PhantomData<fn() -> E>,
}

impl<'a, B: StoreBackend, E: Entity> EntitySet<'a, B, E> {
    fn query(&self, source: QuerySource) -> EntityQuery<'a, B, E> {
        EntityQuery {
            unit: self.unit,
            source,
            options: QueryOptions::default(),
            _entity: PhantomData,
        }
    }

    /// Entities matching the predicate.
    pub fn filter(&self, predicate: PredicateBuilder) -> DocSetResult<EntityQuery<'a, B, E>> {
        Ok(self.query(QuerySource::Plan(predicate.compile()?)))
    }

    /// Every entity, in position order.
    pub fn all(&self) -> EntityQuery<'a, B, E> {
        self.order_by(DOCUMENT_POSITION_FIELD)
    }

    /// Every entity, ordered by `field`.
    pub fn order_by(&self, field: impl Into<String>) -> EntityQuery<'a, B, E> {
        self.query(QuerySource::Ordered(field.into()))
    }

    /// Entities containing `text` in any field, in position order.
    pub fn search(&self, text: &str) -> DocSetResult<EntityQuery<'a, B, E>> {
        if text.trim().is_empty() {
            return Err(DocSetError::Query("please provide some text to search".to_string()));
        }

        Ok(self.all().search(text))
    }

    /// The entity with the lowest position. Fails with [`DocSetError::NotFound`] when the
    /// collection is empty.
    pub async fn first(&self) -> DocSetResult<Tracked<E>> {
        self.all().first().await
    }

    /// The first entity matching the predicate, if any.
    ///
    /// A predicate that is a single `id` equality reads the document directly.
    pub async fn first_or_default(&self, predicate: PredicateBuilder) -> DocSetResult<Option<Tracked<E>>> {
        let plan = predicate.compile()?;

        if let Some(id) = id_lookup(&plan) {
            return QueryExecutor::new(self.unit).get(&id).await;
        }

        self.query(QuerySource::Plan(plan)).first_or_default().await
    }

    /// Reads one entity by id.
    pub async fn find(&self, id: &str) -> DocSetResult<Option<Tracked<E>>> {
        QueryExecutor::new(self.unit).get(id).await
    }

    /// One page of entities in position order.
    pub async fn page(&self, request: PageRequest) -> DocSetResult<Page<Tracked<E>>> {
        let items = self
            .all()
            .start_at(request.start_position())
            .take(request.per_page)
            .to_list()
            .await?;

        Ok(request.to_page(items))
    }
}

fn id_lookup(plan: &CompiledPlan) -> Option<String> {
    match (plan.and_groups.as_slice(), plan.or_branches.as_slice()) {
        ([], [term]) if term.op == FieldOp::Eq && matches!(term.field.as_str(), ID_FIELD | "_id") => {
            match &term.value {
                Bson::String(id) => Some(id.clone()),
                _ => None,
            }
        }
        _ => None,
    }
}

#[derive(Debug, Clone)]
enum QuerySource {
    Plan(CompiledPlan),
    Ordered(String),
}

/// A configured, not yet executed, query over one collection.
#[derive(Debug)]
pub struct EntityQuery<'a, B, E> {
    unit: &'a UnitOfWork<B>,
    source: QuerySource,
    options: QueryOptions,
    _entity: PhantomData<fn() -> E>,
}

impl<'a, B: StoreBackend, E: Entity> EntityQuery<'a, B, E> {
    /// Caps the number of entities returned across all branches.
    pub fn take(mut self, take: usize) -> Self {
        self.options.take = Some(take);
        self
    }

    /// Starts every branch at `value` of its ordering field.
    pub fn start_at(mut self, value: impl Into<Bson>) -> Self {
        self.options.start_at = Some(value.into());
        self
    }

    /// Keeps only entities containing `text` (case-insensitive) in any field.
    pub fn search(mut self, text: &str) -> Self {
        self.options.search_text = Some(text.to_string());
        self
    }

    /// Number of raw documents scanned per branch while searching.
    pub fn search_limit(mut self, limit: usize) -> Self {
        self.options.search_limit = Some(limit);
        self
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub async fn to_list(self) -> DocSetResult<Vec<Tracked<E>>> {
        let executor = QueryExecutor::new(self.unit);

        match &self.source {
            QuerySource::Plan(plan) => executor.execute(plan, &self.options).await,
            QuerySource::Ordered(field) => executor.execute_ordered(field, &self.options).await,
        }
    }

    pub async fn first_or_default(self) -> DocSetResult<Option<Tracked<E>>> {
        Ok(self.take(1).to_list().await?.into_iter().next())
    }

    /// Like [`first_or_default`](Self::first_or_default), failing with
    /// [`DocSetError::NotFound`] when nothing matches.
    pub async fn first(self) -> DocSetResult<Tracked<E>> {
        let collection = self.unit.mapper().collection::<E>()?.to_string();

        self.first_or_default()
            .await?
            .ok_or(DocSetError::NotFound(collection))
    }
}
