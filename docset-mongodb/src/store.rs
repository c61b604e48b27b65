use async_trait::async_trait;
use bson::{Document, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, ClientSession, Collection as MongoCollection,
    options::{ClientOptions, FindOptions},
};
use tracing::{debug, warn};

use docset_core::{
    backend::{DEFAULT_MAX_BATCH_SIZE, StoreBackend, StoreBackendBuilder, WriteKind, WriteOp},
    entity::ID_FIELD,
    error::{DocSetError, DocSetResult},
    query::Query,
};

use crate::{
    query::{FindCommand, MONGO_ID_FIELD},
    sanitizer::KeySanitizer,
};

fn backend_error(err: mongodb::error::Error) -> DocSetError {
    DocSetError::Backend(err.to_string())
}

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
    max_batch_size: usize,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self {
            client,
            database,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(&KeySanitizer::sanitize_key(collection_name))
    }

    /// Converts a persisted document into its stored form, keyed by `_id`.
    fn prepare_document(id: &str, document: Document) -> Document {
        let mut prepared = doc! { MONGO_ID_FIELD: id };
        prepared.extend(
            KeySanitizer::sanitize_document(document)
                .into_iter()
                .filter(|(key, _)| key != ID_FIELD && key != MONGO_ID_FIELD),
        );
        prepared
    }

    /// Converts a stored document back into its persisted form, keyed by `id`.
    fn restore_document(document: Document) -> Document {
        let mut restored = Document::new();
        if let Some(id) = document.get(MONGO_ID_FIELD) {
            restored.insert(ID_FIELD, id.clone());
        }
        restored.extend(
            KeySanitizer::restore_document(document)
                .into_iter()
                .filter(|(key, _)| key != MONGO_ID_FIELD),
        );
        restored
    }

    async fn apply(&self, op: WriteOp, session: &mut ClientSession) -> DocSetResult<()> {
        let collection = self.get_collection(&op.collection);
        let filter = doc! { MONGO_ID_FIELD: op.id.as_str() };

        match op.kind {
            WriteKind::Set => {
                collection
                    .replace_one(filter, Self::prepare_document(&op.id, op.document))
                    .upsert(true)
                    .session(&mut *session)
                    .await
                    .map_err(backend_error)?;
            }
            WriteKind::Update => {
                let mut fields = Self::prepare_document(&op.id, op.document);
                fields.remove(MONGO_ID_FIELD);

                let result = collection
                    .update_one(filter, doc! { "$set": fields })
                    .session(&mut *session)
                    .await
                    .map_err(backend_error)?;

                if result.matched_count == 0 {
                    return Err(DocSetError::Write(format!(
                        "no document {} in collection {} to update",
                        op.id, op.collection
                    )));
                }
            }
            WriteKind::Delete => {
                collection
                    .delete_one(filter)
                    .session(&mut *session)
                    .await
                    .map_err(backend_error)?;
            }
        }

        Ok(())
    }

    async fn shutdown(self) -> DocSetResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn get_document(&self, collection: &str, id: &str) -> DocSetResult<Option<Document>> {
        Ok(self
            .get_collection(collection)
            .find_one(doc! { MONGO_ID_FIELD: id })
            .await
            .map_err(backend_error)?
            .map(Self::restore_document))
    }

    async fn query_documents(&self, query: Query, collection: &str) -> DocSetResult<Vec<Document>> {
        let find = FindCommand::from_query(&query)?;

        let mut options = FindOptions::default();
        options.sort = find.sort;
        options.limit = find.limit;

        Ok(self
            .get_collection(collection)
            .find(find.filter)
            .with_options(options)
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)?
            .into_iter()
            .map(Self::restore_document)
            .collect())
    }

    async fn commit_batch(&self, batch: Vec<WriteOp>) -> DocSetResult<()> {
        if batch.len() > self.max_batch_size {
            return Err(DocSetError::BatchTooLarge {
                size: batch.len(),
                limit: self.max_batch_size,
            });
        }

        let writes = batch.len();
        let mut session = self.client.start_session().await.map_err(backend_error)?;
        session.start_transaction().await.map_err(backend_error)?;

        for op in batch {
            if let Err(err) = self.apply(op, &mut session).await {
                if let Err(abort) = session.abort_transaction().await {
                    warn!(error = %abort, "unable to abort transaction");
                }
                return Err(err);
            }
        }

        session.commit_transaction().await.map_err(backend_error)?;
        debug!(writes, "committed transaction");

        Ok(())
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn shutdown(self) -> DocSetResult<()> {
        self.shutdown().await
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    max_batch_size: usize,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }

    /// Largest batch committed in one transaction.
    pub fn max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocSetResult<Self::Backend> {
        let client = Client::with_options(
            ClientOptions::parse(&self.dsn)
                .await
                .map_err(|e| DocSetError::Initialization(e.to_string()))?,
        )
        .map_err(|e| DocSetError::Initialization(e.to_string()))?;

        let mut store = MongoDbStore::new(client, self.database);
        store.max_batch_size = self.max_batch_size;

        Ok(store)
    }
}
