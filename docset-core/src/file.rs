//! File fields and the blob store they upload to.

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{entity::FieldTagged, schema::EntitySchema};

/// Raw content of a file that has not been uploaded yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileData {
    /// A `data:` URL.
    DataUrl(String),
    Bytes(Vec<u8>),
}

/// A file stored in the blob store and referenced from an entity.
///
/// Only `name`, `extension`, `storagePath` and `url` are persisted. A file with raw
/// data is uploaded when its owning entity is transcoded, after which `url` holds
/// the retrievable location and the raw data is dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageFile {
    pub name: String,
    pub extension: String,
    #[serde(default)]
    pub storage_path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub raw_data: Option<FileData>,
    #[serde(default)]
    pub no_file_extension: bool,
}

impl StorageFile {
    pub fn new(name: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extension: extension.into(),
            ..Self::default()
        }
    }

    /// Creates a file whose name carries no extension.
    pub fn without_extension(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            no_file_extension: true,
            ..Self::default()
        }
    }

    pub fn with_storage_path(mut self, path: impl Into<String>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    pub fn with_data(mut self, data: FileData) -> Self {
        self.raw_data = Some(data);
        self
    }

    /// Whether the file still has to be uploaded.
    pub fn is_pending(&self) -> bool {
        self.raw_data.is_some()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("File name not provided".into());
        }

        if !self.no_file_extension && self.extension.is_empty() {
            return Err("File extension not provided".into());
        }

        if self.url.is_none() && self.raw_data.is_none() {
            return Err("File data not provided".into());
        }

        Ok(())
    }

    /// Path of the file inside the blob store.
    pub fn full_path(&self) -> String {
        let file_name = if self.no_file_extension || self.extension.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.extension)
        };

        match self.storage_path.as_deref() {
            Some(path) if !path.is_empty() => format!("{}/{file_name}", path.trim_end_matches('/')),
            _ => file_name,
        }
    }
}

impl FieldTagged for StorageFile {
    fn type_name() -> &'static str {
        "StorageFile"
    }

    fn field_tags() -> EntitySchema {
        EntitySchema::builder::<Self>(Self::type_name())
            .ignore("rawData")
            .ignore("noFileExtension")
            .build()
    }
}

/// Blob storage used to upload [`StorageFile`] contents.
#[async_trait]
pub trait BlobStore: Send + Sync + Debug {
    /// Uploads `data` at `path` and returns its retrievable URL.
    async fn upload(&self, path: &str, data: FileData) -> Result<String, String>;
}
