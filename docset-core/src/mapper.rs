//! Entity ⇄ document transcoding.
//!
//! [`EntityMapper::to_document`] turns an entity into its persisted form: field rules are
//! validated, ignored fields dropped, value objects flattened to their raw value, nested
//! objects transcoded recursively and internally prefixed names made public.
//! [`EntityMapper::from_document`] reverses this by overlaying a stored document onto
//! a default instance of the target type.
//!
//! ```ignore
//! let mapper = EntityMapper::new(Arc::new(registry));
//! let doc = mapper.to_document(&user, OperationContext::Insert)?;
//! let back: User = mapper.from_document(doc)?;
//! ```

use std::sync::Arc;

use bson::{Bson, Document, de::deserialize_from_bson, doc};
use futures::{FutureExt, future::BoxFuture};
use tracing::debug;

use crate::{
    entity::{Entity, FieldTagged, OperationContext, VALUE_OBJECT_KEY, INTERNAL_PREFIX, public_name},
    error::{DocSetError, DocSetResult},
    file::{BlobStore, StorageFile},
    schema::{EntitySchema, FieldTag, FieldTagRegistry, serialize_document},
};

/// Rule-driven transcoder between entities and store documents.
#[derive(Debug, Clone)]
pub struct EntityMapper {
    registry: Arc<dyn FieldTagRegistry>,
    blob_store: Option<Arc<dyn BlobStore>>,
}

impl EntityMapper {
    pub fn new(registry: Arc<dyn FieldTagRegistry>) -> Self {
        Self {
            registry,
            blob_store: None,
        }
    }

    /// Sets the blob store that pending files are uploaded to.
    pub fn with_blob_store(mut self, blob_store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(blob_store);
        self
    }

    pub fn registry(&self) -> &Arc<dyn FieldTagRegistry> {
        &self.registry
    }

    fn schema(&self, type_name: &str) -> DocSetResult<&EntitySchema> {
        self.registry
            .schema(type_name)
            .ok_or_else(|| DocSetError::EntityNotRegistered(type_name.to_string()))
    }

    /// Collection that entities of type `E` are stored in.
    pub fn collection<E: FieldTagged>(&self) -> DocSetResult<&str> {
        Ok(self.schema(E::type_name())?.collection())
    }

    /// Transcodes `entity` into its persisted document.
    ///
    /// Validation runs for every non-exempt field unless `context` is
    /// [`OperationContext::IgnoreAll`]. The same context applies to nested objects.
    pub fn to_document<T: FieldTagged>(&self, entity: &T, context: OperationContext) -> DocSetResult<Document> {
        let schema = self.schema(T::type_name())?;
        self.transcode(schema, serialize_document(entity)?, context)
    }

    /// Uploads pending files of `entity`, then transcodes it.
    pub async fn to_document_with_files<E: Entity>(
        &self,
        entity: &mut E,
        context: OperationContext,
    ) -> DocSetResult<Document> {
        self.upload_files(entity).await?;
        self.to_document(entity, context)
    }

    /// Builds an instance of `T` from a stored document.
    ///
    /// Fields missing from the document keep the value of `T::default()`.
    pub fn from_document<T: FieldTagged>(&self, document: Document) -> DocSetResult<T> {
        let schema = self.schema(T::type_name())?;
        let internal = self.restore(schema, document)?;
        Ok(deserialize_from_bson(Bson::Document(internal))?)
    }

    fn transcode(&self, schema: &EntitySchema, doc: Document, context: OperationContext) -> DocSetResult<Document> {
        if context != OperationContext::IgnoreAll {
            for tag in schema.fields().iter().filter(|tag| !tag.is_ignored()) {
                let value = doc.get(tag.name());
                tag.validate(value, context)?;

                if tag.is_file() && !tag.is_exempt(context) {
                    validate_files(tag, value)?;
                }
            }
        }

        let mut out = Document::new();

        for (key, value) in doc {
            let value = match schema.field(&key) {
                Some(tag) if tag.is_ignored() => continue,
                Some(tag) if tag.is_value_object() => unwrap_value_object(value),
                Some(tag) => match tag.nested() {
                    Some(nested) => {
                        let nested = self.schema(nested.type_name)?;
                        map_objects(value, |doc| self.transcode(nested, doc, context))?
                    }
                    None => value,
                },
                None => value,
            };

            out.insert(public_name(&key), value);
        }

        Ok(out)
    }

    fn restore(&self, schema: &EntitySchema, doc: Document) -> DocSetResult<Document> {
        let mut out = schema.template()?;

        for (key, value) in doc {
            let key = internal_name(&out, key);

            let value = match schema.field(&key) {
                Some(tag) if tag.is_value_object() => match value {
                    // keeps the default wrapper
                    Bson::Null => continue,
                    raw => wrap_value_object(raw),
                },
                Some(tag) => match tag.nested() {
                    Some(nested) => {
                        let nested = self.schema(nested.type_name)?;
                        map_objects(value, |doc| self.restore(nested, doc))?
                    }
                    None => value,
                },
                None => value,
            };

            out.insert(key, value);
        }

        Ok(out)
    }

    /// Uploads every pending [`StorageFile`] reachable through `file` tags of `entity`.
    ///
    /// Uploaded files get their `url` set and their raw data cleared. Returns the number
    /// of uploads performed.
    pub async fn upload_files<E: Entity>(&self, entity: &mut E) -> DocSetResult<usize> {
        let schema = self.schema(E::type_name())?;
        let mut doc = serialize_document(entity)?;

        let uploaded = self.upload_in(schema, &mut doc).await?;

        if uploaded > 0 {
            let context = entity.meta().context();
            *entity = deserialize_from_bson(Bson::Document(doc))?;
            entity.meta_mut().set_context(context);
        }

        Ok(uploaded)
    }

    fn upload_in<'a>(&'a self, schema: &'a EntitySchema, doc: &'a mut Document) -> BoxFuture<'a, DocSetResult<usize>> {
        async move {
            let mut uploaded = 0;

            for tag in schema.fields() {
                let Some(nested) = tag.nested() else { continue };
                let Some(value) = doc.get_mut(tag.name()) else { continue };

                let targets: Vec<&mut Document> = match value {
                    Bson::Document(doc) => vec![doc],
                    Bson::Array(items) => items.iter_mut().filter_map(Bson::as_document_mut).collect(),
                    _ => continue,
                };

                if tag.is_file() {
                    for target in targets {
                        uploaded += self.upload_one(tag, target).await?;
                    }
                } else {
                    let nested = self.schema(nested.type_name)?;
                    for target in targets {
                        uploaded += self.upload_in(nested, target).await?;
                    }
                }
            }

            Ok(uploaded)
        }
        .boxed()
    }

    async fn upload_one(&self, tag: &FieldTag, doc: &mut Document) -> DocSetResult<usize> {
        let mut file: StorageFile = deserialize_from_bson(Bson::Document(doc.clone()))?;

        if !file.is_pending() {
            return Ok(0);
        }

        file.validate()
            .map_err(|reason| DocSetError::invalid_field(tag.public_name(), reason))?;

        let Some(data) = file.raw_data.take() else {
            return Ok(0);
        };

        let blob_store = self
            .blob_store
            .as_ref()
            .ok_or_else(|| DocSetError::Upload("no blob store configured".to_string()))?;

        let path = file.full_path();
        debug!(path = %path, field = tag.public_name(), "uploading file");

        let url = blob_store.upload(&path, data).await.map_err(DocSetError::Upload)?;
        file.url = Some(url);
        *doc = serialize_document(&file)?;

        Ok(1)
    }
}

/// Applies `f` to a nested object or to every object of an array of them.
fn map_objects<F>(value: Bson, mut f: F) -> DocSetResult<Bson>
where
    F: FnMut(Document) -> DocSetResult<Document>,
{
    match value {
        Bson::Document(doc) => Ok(Bson::Document(f(doc)?)),
        Bson::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Bson::Document(doc) => f(doc).map(Bson::Document),
                other => Ok(other),
            })
            .collect::<DocSetResult<Vec<_>>>()
            .map(Bson::Array),
        other => Ok(other),
    }
}

fn unwrap_value_object(value: Bson) -> Bson {
    match value {
        Bson::Document(mut doc) => doc.remove(VALUE_OBJECT_KEY).unwrap_or(Bson::Null),
        Bson::Array(items) => Bson::Array(items.into_iter().map(unwrap_value_object).collect()),
        other => other,
    }
}

fn wrap_value_object(value: Bson) -> Bson {
    match value {
        Bson::Array(items) => Bson::Array(items.into_iter().map(wrap_value_object).collect()),
        raw => Bson::Document(doc! { VALUE_OBJECT_KEY: raw }),
    }
}

/// Maps a public document key back to the serialized name used by `template`.
fn internal_name(template: &Document, key: String) -> String {
    if template.contains_key(&key) {
        return key;
    }

    let prefixed = format!("{INTERNAL_PREFIX}{key}");
    if template.contains_key(&prefixed) { prefixed } else { key }
}

fn validate_files(tag: &FieldTag, value: Option<&Bson>) -> DocSetResult<()> {
    let files: Vec<&Bson> = match value {
        Some(Bson::Array(items)) => items.iter().collect(),
        Some(Bson::Null) | None => Vec::new(),
        Some(other) => vec![other],
    };

    for file in files {
        let file: StorageFile = deserialize_from_bson(file.clone())?;
        file.validate()
            .map_err(|reason| DocSetError::invalid_field(tag.public_name(), reason))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::{
        entity::EntityMeta,
        file::FileData,
        schema::EntityRegistry,
    };

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Email {
        value: String,
    }

    impl crate::entity::ValueObject for Email {
        type Value = String;

        fn value(&self) -> &String {
            &self.value
        }

        fn validate(&self) -> Result<(), String> {
            if self.value.contains('@') {
                Ok(())
            } else {
                Err("invalid email".into())
            }
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Address {
        city: String,
        #[serde(rename = "_zip")]
        zip: String,
    }

    impl FieldTagged for Address {
        fn type_name() -> &'static str {
            "Address"
        }

        fn field_tags() -> EntitySchema {
            EntitySchema::builder::<Self>(Self::type_name()).required("city").build()
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Customer {
        #[serde(flatten)]
        meta: EntityMeta,
        name: String,
        email: Email,
        address: Address,
        previous: Vec<Address>,
        password: String,
        avatar: Option<StorageFile>,
    }

    impl FieldTagged for Customer {
        fn type_name() -> &'static str {
            "Customer"
        }

        fn field_tags() -> EntitySchema {
            EntitySchema::builder::<Self>(Self::type_name())
                .collection("customers")
                .required("name")
                .exempt("name", OperationContext::Update)
                .value_object::<Email>("email")
                .nested::<Address>("address")
                .nested::<Address>("previous")
                .ignore("password")
                .file("avatar")
                .build()
        }
    }

    impl Entity for Customer {
        fn meta(&self) -> &EntityMeta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut EntityMeta {
            &mut self.meta
        }
    }

    fn mapper() -> EntityMapper {
        let mut registry = EntityRegistry::new();
        registry.register::<Customer>().unwrap();
        EntityMapper::new(Arc::new(registry))
    }

    fn customer() -> Customer {
        Customer {
            meta: EntityMeta::with_id("c-1").at_position(7),
            name: "Ada".into(),
            email: Email { value: "ada@example.com".into() },
            address: Address { city: "London".into(), zip: "N1".into() },
            previous: vec![Address { city: "Paris".into(), zip: "75".into() }],
            password: "secret".into(),
            avatar: None,
        }
    }

    #[test]
    fn document_has_public_names_and_raw_values() {
        let doc = mapper().to_document(&customer(), OperationContext::Insert).unwrap();

        assert_eq!(doc.get_str("id").unwrap(), "c-1");
        assert_eq!(doc.get_i64("documentPosition").unwrap(), 7);
        assert!(doc.contains_key("createdDate"));
        assert_eq!(doc.get_str("email").unwrap(), "ada@example.com");
        assert_eq!(doc.get_document("address").unwrap().get_str("zip").unwrap(), "N1");
        assert_eq!(doc.get_array("previous").unwrap()[0].as_document().unwrap().get_str("zip").unwrap(), "75");
        assert!(!doc.contains_key("password"));
        assert!(doc.keys().all(|key| !key.starts_with(INTERNAL_PREFIX)));
    }

    #[test]
    fn round_trip_restores_public_fields() {
        let mapper = mapper();
        let original = customer();

        let doc = mapper.to_document(&original, OperationContext::Insert).unwrap();
        let restored: Customer = mapper.from_document(doc).unwrap();

        assert_eq!(restored.meta.id(), original.meta.id());
        assert_eq!(restored.meta.document_position(), 7);
        assert_eq!(restored.meta.created_date(), original.meta.created_date());
        assert_eq!(restored.name, original.name);
        assert_eq!(restored.email, original.email);
        assert_eq!(restored.address, original.address);
        assert_eq!(restored.previous, original.previous);
        assert_eq!(restored.password, "");
    }

    #[test]
    fn absent_fields_keep_defaults() {
        let restored: Customer = mapper().from_document(doc! { "id": "c-9", "name": "Bob" }).unwrap();

        assert_eq!(restored.meta.id(), Some("c-9"));
        assert_eq!(restored.name, "Bob");
        assert_eq!(restored.email, Email::default());
        assert_eq!(restored.address, Address::default());
    }

    #[test]
    fn validation_names_the_failing_field() {
        let mapper = mapper();

        let mut bad_email = customer();
        bad_email.email.value = "nope".into();
        match mapper.to_document(&bad_email, OperationContext::Insert) {
            Err(DocSetError::InvalidEntityState { field, .. }) => assert_eq!(field, "email"),
            other => panic!("unexpected {other:?}"),
        }

        let mut nameless = customer();
        nameless.name.clear();
        assert!(mapper.to_document(&nameless, OperationContext::Insert).is_err());
        assert!(mapper.to_document(&nameless, OperationContext::Update).is_ok());
        assert!(mapper.to_document(&nameless, OperationContext::IgnoreAll).is_ok());
    }

    #[test]
    fn nested_objects_inherit_the_context() {
        let mapper = mapper();
        let mut homeless = customer();
        homeless.address.city.clear();

        match mapper.to_document(&homeless, OperationContext::Update) {
            Err(DocSetError::InvalidEntityState { field, .. }) => assert_eq!(field, "city"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(mapper.to_document(&homeless, OperationContext::IgnoreAll).is_ok());
    }

    #[derive(Debug, Default)]
    struct RecordingBlobStore {
        paths: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BlobStore for RecordingBlobStore {
        async fn upload(&self, path: &str, _data: FileData) -> Result<String, String> {
            self.paths.lock().unwrap().push(path.to_string());
            Ok(format!("https://files.test/{path}"))
        }
    }

    #[tokio::test]
    async fn pending_files_are_uploaded_before_transcoding() {
        let blobs = Arc::new(RecordingBlobStore::default());
        let mapper = mapper().with_blob_store(blobs.clone());

        let mut entity = customer();
        entity.meta.set_context(OperationContext::Insert);
        entity.avatar = Some(
            StorageFile::new("avatar", "png")
                .with_storage_path("customers")
                .with_data(FileData::Bytes(vec![1, 2, 3])),
        );

        let doc = mapper.to_document_with_files(&mut entity, OperationContext::Insert).await.unwrap();

        assert_eq!(*blobs.paths.lock().unwrap(), vec!["customers/avatar.png".to_string()]);
        assert_eq!(entity.meta.context(), OperationContext::Insert);

        let avatar = entity.avatar.as_ref().unwrap();
        assert_eq!(avatar.url.as_deref(), Some("https://files.test/customers/avatar.png"));
        assert!(avatar.raw_data.is_none());

        let stored = doc.get_document("avatar").unwrap();
        assert!(!stored.contains_key("rawData"));
        assert!(!stored.contains_key("noFileExtension"));
    }

    #[tokio::test]
    async fn upload_without_blob_store_fails() {
        let mut entity = customer();
        entity.avatar = Some(StorageFile::new("a", "txt").with_data(FileData::DataUrl("data:,x".into())));

        let err = mapper().upload_files(&mut entity).await.unwrap_err();
        assert!(matches!(err, DocSetError::Upload(_)));
    }
}
