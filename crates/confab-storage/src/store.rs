//! The object-store interface and its data types.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use confab_core::types::session::FileSource;
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;

/// Metadata for a stored object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub key: String,

    /// Original filename before key normalization.
    pub filename: String,

    pub size: u64,

    pub content_type: String,

    pub last_modified: DateTime<Utc>,

    #[serde(default)]
    pub etag: String,

    /// Includes a `source` tag (`user` or `tool`).
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ObjectMetadata {
    pub fn source(&self) -> Option<FileSource> {
        match self.tags.get("source").map(String::as_str) {
            Some("user") => Some(FileSource::User),
            Some("tool") => Some(FileSource::Tool),
            _ => crate::key::key_source(&self.key),
        }
    }
}

/// A stored object with its content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredObject {
    #[serde(flatten)]
    pub metadata: ObjectMetadata,

    pub content_base64: String,
}

/// Filter for listings.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub source: Option<FileSource>,
    pub limit: Option<usize>,
}

/// Per-user storage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_files: usize,
    pub upload_files: usize,
    pub generated_files: usize,
    pub total_bytes: u64,
}

/// Per-user object storage.
///
/// Every operation is scoped to the calling user; implementations must
/// refuse keys owned by someone else. Token-gated downloads are authorized
/// at the HTTP edge, not here.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a new object and return its metadata.
    async fn upload(
        &self,
        user: &str,
        filename: &str,
        content_base64: &str,
        content_type: &str,
        tags: BTreeMap<String, String>,
        source: FileSource,
    ) -> StorageResult<ObjectMetadata>;

    /// Fetch an object; `Ok(None)` when the key does not exist.
    async fn get(&self, user: &str, key: &str) -> StorageResult<Option<StoredObject>>;

    /// List the user's objects, newest first.
    async fn list(&self, user: &str, filter: ListFilter) -> StorageResult<Vec<ObjectMetadata>>;

    /// Delete an object; `Ok(false)` when it did not exist.
    async fn delete(&self, user: &str, key: &str) -> StorageResult<bool>;

    /// Aggregate counts and sizes for the user.
    async fn stats(&self, user: &str) -> StorageResult<StorageStats>;
}
