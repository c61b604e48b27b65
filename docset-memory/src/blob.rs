//! In-memory blob storage for file fields.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use mea::rwlock::RwLock;
use tracing::debug;

use docset_core::file::{BlobStore, FileData};

/// URL scheme of blobs held by [`InMemoryBlobStore`].
pub const MEMORY_URL_SCHEME: &str = "memory://";

/// A [`BlobStore`] that keeps uploaded files in memory.
///
/// Clones share the same blobs. Uploads resolve to `memory://<path>`.
#[derive(Default, Clone, Debug)]
pub struct InMemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, FileData>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the data stored at `path`.
    pub async fn get(&self, path: &str) -> Option<FileData> {
        self.blobs.read().await.get(path).cloned()
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn upload(&self, path: &str, data: FileData) -> Result<String, String> {
        if path.is_empty() {
            return Err("empty storage path".to_string());
        }

        self.blobs.write().await.insert(path.to_string(), data);
        debug!(path, "stored blob");

        Ok(format!("{MEMORY_URL_SCHEME}{path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uploads_resolve_to_memory_urls() {
        let blobs = InMemoryBlobStore::new();

        let url = blobs
            .upload("avatars/alice.png", FileData::Bytes(vec![1, 2, 3]))
            .await
            .unwrap();

        assert_eq!(url, "memory://avatars/alice.png");
        assert_eq!(blobs.get("avatars/alice.png").await, Some(FileData::Bytes(vec![1, 2, 3])));
        assert!(blobs.upload("", FileData::Bytes(vec![])).await.is_err());
        assert_eq!(blobs.len().await, 1);
    }
}
