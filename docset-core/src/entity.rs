//! Core traits and types for entities.
//!
//! An entity is a serde-serializable struct that embeds an [`EntityMeta`] (flattened)
//! and declares its field tags through [`FieldTagged`].
//!
//! # Example
//!
//! ```ignore
//! use docset::entity::{Entity, EntityMeta, FieldTagged};
//! use docset::schema::EntitySchema;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! pub struct User {
//!     #[serde(flatten)]
//!     pub meta: EntityMeta,
//!     pub name: String,
//!     pub password: String,
//! }
//!
//! impl FieldTagged for User {
//!     fn type_name() -> &'static str { "User" }
//!
//!     fn field_tags() -> EntitySchema {
//!         EntitySchema::builder::<Self>(Self::type_name())
//!             .required("name")
//!             .ignore("password")
//!             .build()
//!     }
//! }
//!
//! impl Entity for User {
//!     fn meta(&self) -> &EntityMeta { &self.meta }
//!     fn meta_mut(&mut self) -> &mut EntityMeta { &mut self.meta }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::schema::EntitySchema;

/// Public document name of the entity id.
pub const ID_FIELD: &str = "id";
/// Public document name of the creation timestamp.
pub const CREATED_DATE_FIELD: &str = "createdDate";
/// Public document name of the monotonic position.
pub const DOCUMENT_POSITION_FIELD: &str = "documentPosition";
/// Prefix marking an internal (non-public) serialized field name.
pub const INTERNAL_PREFIX: char = '_';

/// Scopes which field validations apply while an entity is transcoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationContext {
    /// The entity is being inserted.
    Insert,
    /// The entity is being written back after a mutation.
    Update,
    /// Every validation is skipped.
    IgnoreAll,
    #[default]
    Unknown,
}

impl OperationContext {
    /// Returns `self`, or `fallback` when `self` is [`OperationContext::Unknown`].
    pub fn or(self, fallback: OperationContext) -> OperationContext {
        match self {
            OperationContext::Unknown => fallback,
            other => other,
        }
    }
}

/// Identity and bookkeeping fields shared by every entity.
///
/// Embed it with `#[serde(flatten)]`. Its fields serialize under internal names
/// (`_id`, `_createdDate`, `_documentPosition`) that the mapper renames to their
/// public names. The operation context is never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMeta {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    #[serde(rename = "_createdDate", default = "Utc::now")]
    created_date: DateTime<Utc>,
    #[serde(rename = "_documentPosition", default)]
    document_position: i64,
    #[serde(skip)]
    context: OperationContext,
}

impl EntityMeta {
    /// Creates metadata with a freshly generated id.
    pub fn new() -> Self {
        Self::with_optional_id(Some(Uuid::new_v4().to_string()))
    }

    /// Creates metadata with the supplied id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self::with_optional_id(Some(id.into()))
    }

    /// Creates metadata without generating an id.
    pub fn without_id() -> Self {
        Self::with_optional_id(None)
    }

    fn with_optional_id(id: Option<String>) -> Self {
        Self {
            id,
            created_date: Utc::now(),
            document_position: 0,
            context: OperationContext::Unknown,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    pub fn created_date(&self) -> DateTime<Utc> {
        self.created_date
    }

    pub fn set_created_date(&mut self, created_date: DateTime<Utc>) {
        self.created_date = created_date;
    }

    pub fn document_position(&self) -> i64 {
        self.document_position
    }

    pub fn set_document_position(&mut self, position: i64) {
        self.document_position = position;
    }

    /// Builder-style variant of [`EntityMeta::set_document_position`].
    pub fn at_position(mut self, position: i64) -> Self {
        self.document_position = position;
        self
    }

    pub fn context(&self) -> OperationContext {
        self.context
    }

    pub fn set_context(&mut self, context: OperationContext) {
        self.context = context;
    }
}

impl Default for EntityMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// A type whose fields carry mapping tags.
///
/// Both root entities and nested objects implement this trait. `Default` supplies the
/// fresh instance that incoming documents are assigned onto.
pub trait FieldTagged: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    /// Stable type identifier. Root entities use it as their collection name.
    fn type_name() -> &'static str;

    /// Builds the field tag table. Called once, when the type is registered.
    fn field_tags() -> EntitySchema {
        EntitySchema::builder::<Self>(Self::type_name()).build()
    }
}

/// A root entity persisted in its own collection.
pub trait Entity: FieldTagged + Clone {
    /// Returns the entity's metadata.
    fn meta(&self) -> &EntityMeta;

    /// Returns the entity's metadata mutably.
    fn meta_mut(&mut self) -> &mut EntityMeta;

    /// Shorthand for `self.meta().id()`.
    fn id(&self) -> Option<&str> {
        self.meta().id()
    }
}

/// A single-value wrapper with its own validity rule.
///
/// Inside an entity a value object serializes as `{ "value": raw }`; the persisted
/// document holds only `raw`.
pub trait ValueObject: Serialize + DeserializeOwned + Send + Sync + 'static {
    type Value;

    /// Returns the wrapped value.
    fn value(&self) -> &Self::Value;

    /// Checks the wrapped value.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Field name under which a value object stores its raw value.
pub const VALUE_OBJECT_KEY: &str = "value";

/// Strips the internal prefix from a serialized field name.
pub fn public_name(name: &str) -> &str {
    name.strip_prefix(INTERNAL_PREFIX).unwrap_or(name)
}
