#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use docset::{
    bson::Document,
    memory::{InMemoryBlobStore, InMemoryStore},
    prelude::*,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub title: String,
    pub status: String,
    pub role: String,
    pub priority: i32,
    pub notes: String,
}

impl Task {
    pub fn new(title: &str, status: &str, priority: i32) -> Self {
        Self {
            title: title.to_string(),
            status: status.to_string(),
            priority,
            ..Self::default()
        }
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = role.to_string();
        self
    }
}

impl FieldTagged for Task {
    fn type_name() -> &'static str {
        "Task"
    }

    fn field_tags() -> EntitySchema {
        EntitySchema::builder::<Self>(Self::type_name())
            .collection("tasks")
            .required("title")
            .ignore("notes")
            .build()
    }
}

impl Entity for Task {
    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub name: String,
    pub avatar: Option<StorageFile>,
}

impl FieldTagged for Profile {
    fn type_name() -> &'static str {
        "Profile"
    }

    fn field_tags() -> EntitySchema {
        EntitySchema::builder::<Self>(Self::type_name())
            .collection("profiles")
            .file("avatar")
            .build()
    }
}

impl Entity for Profile {
    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }
}

/// In-memory backend that counts calls and can be told to fail commits.
#[derive(Debug, Default)]
pub struct CountingBackend {
    pub inner: InMemoryStore,
    pub gets: AtomicUsize,
    pub queries: AtomicUsize,
    pub commits: AtomicUsize,
    pub writes: AtomicUsize,
    pub fail_commits: AtomicBool,
}

impl CountingBackend {
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreBackend for CountingBackend {
    async fn get_document(&self, collection: &str, id: &str) -> DocSetResult<Option<Document>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get_document(collection, id).await
    }

    async fn query_documents(&self, query: Query, collection: &str) -> DocSetResult<Vec<Document>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query_documents(query, collection).await
    }

    async fn commit_batch(&self, batch: Vec<WriteOp>) -> DocSetResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(DocSetError::Backend("injected commit failure".to_string()));
        }

        let size = batch.len();
        self.inner.commit_batch(batch).await?;
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.writes.fetch_add(size, Ordering::SeqCst);

        Ok(())
    }
}

pub fn fast_config() -> ContextConfig {
    ContextConfig::default()
        .with_commit_timeout(Duration::from_millis(100))
        .with_poll_interval(Duration::from_millis(5))
}

pub fn context(config: ContextConfig) -> (DbContext<Arc<CountingBackend>>, Arc<CountingBackend>) {
    let backend = Arc::new(CountingBackend::default());

    let ctx = DbContext::builder(backend.clone())
        .config(config)
        .register::<Task>()
        .register::<Profile>()
        .build()
        .unwrap();

    (ctx, backend)
}

pub fn context_with_blobs(blobs: InMemoryBlobStore) -> DbContext<Arc<CountingBackend>> {
    DbContext::builder(Arc::new(CountingBackend::default()))
        .config(fast_config())
        .register::<Task>()
        .register::<Profile>()
        .blob_store(Arc::new(blobs))
        .build()
        .unwrap()
}

/// Adds `tasks` and saves them.
pub async fn seed<B: StoreBackend>(ctx: &DbContext<B>, tasks: Vec<Task>) -> Vec<String> {
    let mut ids = Vec::new();

    for mut task in tasks {
        ctx.add(&mut task).await.unwrap();
        ids.push(task.meta.id().unwrap().to_string());
    }

    ctx.save_changes().await.unwrap();
    ids
}
