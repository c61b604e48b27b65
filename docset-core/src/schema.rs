//! Static field tag tables.
//!
//! Every [`FieldTagged`] type describes its fields once, at registration time, through
//! an [`EntitySchema`]. The mapper consumes these tables through the
//! [`FieldTagRegistry`] trait, so any lookup service can stand in for the default
//! [`EntityRegistry`].
//!
//! ```ignore
//! EntitySchema::builder::<Order>("Order")
//!     .collection("orders")
//!     .nested::<Address>("shipping")
//!     .value_object::<Email>("contact")
//!     .file("invoice")
//!     .required("reference")
//!     .exempt("reference", OperationContext::Update)
//!     .validate_with("total", |value| match value.as_f64() {
//!         Some(total) if total >= 0.0 => Ok(()),
//!         _ => Err("total must be positive".into()),
//!     })
//!     .build();
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt::Debug,
};

use bson::{Bson, Document, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::Serialize;

use crate::{
    entity::{FieldTagged, OperationContext, ValueObject, public_name},
    error::{DocSetError, DocSetResult},
};

/// A rule applied to the serialized value of a field.
pub type FieldRule = fn(&Bson) -> Result<(), String>;

/// Reference to the declared type of a nested-object field.
#[derive(Debug, Clone, Copy)]
pub struct NestedType {
    pub type_name: &'static str,
    pub schema: fn() -> EntitySchema,
}

impl NestedType {
    pub fn of<N: FieldTagged>() -> Self {
        Self {
            type_name: N::type_name(),
            schema: N::field_tags,
        }
    }
}

/// Mapping rules for one field.
#[derive(Debug, Clone)]
pub struct FieldTag {
    name: String,
    ignored: bool,
    nested: Option<NestedType>,
    value_object: Option<FieldRule>,
    file: bool,
    required: bool,
    validator: Option<FieldRule>,
    exempt: Vec<OperationContext>,
}

impl FieldTag {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ignored: false,
            nested: None,
            value_object: None,
            file: false,
            required: false,
            validator: None,
            exempt: Vec::new(),
        }
    }

    /// Serialized name of the field (possibly internally prefixed).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the field in the persisted document.
    pub fn public_name(&self) -> &str {
        public_name(&self.name)
    }

    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    pub fn nested(&self) -> Option<&NestedType> {
        self.nested.as_ref()
    }

    pub fn is_value_object(&self) -> bool {
        self.value_object.is_some()
    }

    pub fn is_file(&self) -> bool {
        self.file
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Whether validation of this field is skipped under `context`.
    pub fn is_exempt(&self, context: OperationContext) -> bool {
        context == OperationContext::IgnoreAll || self.exempt.contains(&context)
    }

    /// Runs every rule of this field against its serialized value.
    ///
    /// `value` is `None` when the field is absent from the serialized entity.
    pub fn validate(&self, value: Option<&Bson>, context: OperationContext) -> DocSetResult<()> {
        if self.is_exempt(context) {
            return Ok(());
        }

        let value = value.unwrap_or(&Bson::Null);

        if self.required && is_blank(value) {
            return Err(DocSetError::invalid_field(self.public_name(), "field is required"));
        }

        if let Some(rule) = self.value_object {
            if !matches!(value, Bson::Null) {
                rule(value).map_err(|reason| DocSetError::invalid_field(self.public_name(), reason))?;
            }
        }

        if let Some(rule) = self.validator {
            rule(value).map_err(|reason| DocSetError::invalid_field(self.public_name(), reason))?;
        }

        Ok(())
    }
}

fn is_blank(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => true,
        Bson::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Field tag table of one type.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    type_name: &'static str,
    collection: String,
    fields: Vec<FieldTag>,
    template: fn() -> DocSetResult<Document>,
}

impl EntitySchema {
    /// Starts a table for `T`. The collection name defaults to the type name.
    pub fn builder<T: Serialize + Default>(type_name: &'static str) -> EntitySchemaBuilder {
        EntitySchemaBuilder {
            schema: EntitySchema {
                type_name,
                collection: type_name.to_string(),
                fields: Vec::new(),
                template: default_document::<T>,
            },
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn fields(&self) -> &[FieldTag] {
        &self.fields
    }

    /// Looks up a tag by serialized field name.
    pub fn field(&self, name: &str) -> Option<&FieldTag> {
        self.fields.iter().find(|tag| tag.name == name)
    }

    /// Serializes a fresh default instance of the type.
    pub fn template(&self) -> DocSetResult<Document> {
        (self.template)()
    }
}

/// Fluent constructor for [`EntitySchema`].
#[derive(Debug, Clone)]
pub struct EntitySchemaBuilder {
    schema: EntitySchema,
}

impl EntitySchemaBuilder {
    fn tag(&mut self, field: &str) -> &mut FieldTag {
        let position = match self.schema.fields.iter().position(|tag| tag.name == field) {
            Some(position) => position,
            None => {
                self.schema.fields.push(FieldTag::new(field));
                self.schema.fields.len() - 1
            }
        };

        &mut self.schema.fields[position]
    }

    /// Overrides the collection name.
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.schema.collection = collection.into();
        self
    }

    /// Never persists `field`.
    pub fn ignore(mut self, field: &str) -> Self {
        self.tag(field).ignored = true;
        self
    }

    /// Declares `field` as a nested object (or array of them) of type `N`.
    pub fn nested<N: FieldTagged>(mut self, field: &str) -> Self {
        self.tag(field).nested = Some(NestedType::of::<N>());
        self
    }

    /// Declares `field` as a value object of type `V`.
    pub fn value_object<V: ValueObject>(mut self, field: &str) -> Self {
        self.tag(field).value_object = Some(validate_value_object::<V>);
        self
    }

    /// Declares `field` as a [`StorageFile`](crate::file::StorageFile) (or array of them)
    /// to upload before the entity is persisted.
    pub fn file(mut self, field: &str) -> Self {
        let tag = self.tag(field);
        tag.file = true;
        tag.nested = Some(NestedType::of::<crate::file::StorageFile>());
        self
    }

    /// Rejects a missing, null or empty value for `field`.
    pub fn required(mut self, field: &str) -> Self {
        self.tag(field).required = true;
        self
    }

    /// Attaches a custom rule to `field`.
    pub fn validate_with(mut self, field: &str, rule: FieldRule) -> Self {
        self.tag(field).validator = Some(rule);
        self
    }

    /// Skips the rules of `field` while the entity is in `context`.
    pub fn exempt(mut self, field: &str, context: OperationContext) -> Self {
        let tag = self.tag(field);
        if !tag.exempt.contains(&context) {
            tag.exempt.push(context);
        }
        self
    }

    pub fn build(self) -> EntitySchema {
        self.schema
    }
}

fn default_document<T: Serialize + Default>() -> DocSetResult<Document> {
    serialize_document(&T::default())
}

fn validate_value_object<V: ValueObject>(value: &Bson) -> Result<(), String> {
    let object: V = deserialize_from_bson(value.clone()).map_err(|err| err.to_string())?;
    object.validate()
}

/// Serializes `value`, which must produce a BSON document.
pub(crate) fn serialize_document<T: Serialize + ?Sized>(value: &T) -> DocSetResult<Document> {
    match serialize_to_bson(value)? {
        Bson::Document(doc) => Ok(doc),
        other => Err(DocSetError::Serialization(format!(
            "expected a document, found {:?}",
            other.element_type()
        ))),
    }
}

/// Resolves field tag tables by type name.
pub trait FieldTagRegistry: Send + Sync + Debug {
    fn schema(&self, type_name: &str) -> Option<&EntitySchema>;
}

/// Default [`FieldTagRegistry`], populated once at startup.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    schemas: HashMap<&'static str, EntitySchema>,
    explicit: HashSet<&'static str>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` and, implicitly, every nested type its table names.
    ///
    /// Registering the same type twice is an [`DocSetError::Initialization`] error.
    pub fn register<T: FieldTagged>(&mut self) -> DocSetResult<()> {
        let type_name = T::type_name();

        if !self.explicit.insert(type_name) {
            return Err(DocSetError::Initialization(format!(
                "type {type_name} is already registered"
            )));
        }

        self.insert(T::field_tags());
        Ok(())
    }

    fn insert(&mut self, schema: EntitySchema) {
        let nested = schema
            .fields()
            .iter()
            .filter_map(|tag| tag.nested().copied())
            .collect::<Vec<_>>();

        self.schemas.insert(schema.type_name(), schema);

        for nested in nested {
            if !self.schemas.contains_key(nested.type_name) {
                self.insert((nested.schema)());
            }
        }
    }

    /// Collection name of a registered type.
    pub fn collection_of(&self, type_name: &str) -> Option<&str> {
        self.schemas.get(type_name).map(EntitySchema::collection)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.schemas.contains_key(type_name)
    }
}

impl FieldTagRegistry for EntityRegistry {
    fn schema(&self, type_name: &str) -> Option<&EntitySchema> {
        self.schemas.get(type_name)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Inner {
        label: String,
    }

    impl FieldTagged for Inner {
        fn type_name() -> &'static str {
            "Inner"
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Outer {
        name: String,
        inner: Inner,
    }

    impl FieldTagged for Outer {
        fn type_name() -> &'static str {
            "Outer"
        }

        fn field_tags() -> EntitySchema {
            EntitySchema::builder::<Self>(Self::type_name())
                .collection("outers")
                .nested::<Inner>("inner")
                .required("name")
                .exempt("name", OperationContext::Update)
                .build()
        }
    }

    #[test]
    fn registration_includes_nested_types() {
        let mut registry = EntityRegistry::new();
        registry.register::<Outer>().unwrap();

        assert_eq!(registry.collection_of("Outer"), Some("outers"));
        assert!(registry.contains("Inner"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = EntityRegistry::new();
        registry.register::<Outer>().unwrap();

        let err = registry.register::<Outer>().unwrap_err();
        assert!(matches!(err, DocSetError::Initialization(_)));

        // nested types can still be registered explicitly once
        registry.register::<Inner>().unwrap();
    }

    #[test]
    fn required_rule_respects_exemptions() {
        let schema = Outer::field_tags();
        let tag = schema.field("name").unwrap();
        let blank = Bson::String(String::new());

        assert!(tag.validate(Some(&blank), OperationContext::Insert).is_err());
        assert!(tag.validate(None, OperationContext::Unknown).is_err());
        assert!(tag.validate(Some(&blank), OperationContext::Update).is_ok());
        assert!(tag.validate(Some(&blank), OperationContext::IgnoreAll).is_ok());
    }

    #[test]
    fn template_serializes_defaults() {
        let template = Outer::field_tags().template().unwrap();
        assert_eq!(template.get_str("name").unwrap(), "");
        assert!(template.get_document("inner").is_ok());
    }
}
