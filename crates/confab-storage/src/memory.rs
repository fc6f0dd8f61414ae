//! In-memory object store.
//!
//! Presents the exact `ObjectStore` surface of the remote backend, including
//! key construction and ownership checks, so the rest of the gateway cannot
//! tell the two apart. Used for development and tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use confab_core::types::session::FileSource;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::key;
use crate::store::{ListFilter, ObjectMetadata, ObjectStore, StorageStats, StoredObject};

#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn upload(
        &self,
        user: &str,
        filename: &str,
        content_base64: &str,
        content_type: &str,
        mut tags: BTreeMap<String, String>,
        source: FileSource,
    ) -> StorageResult<ObjectMetadata> {
        let body = STANDARD
            .decode(content_base64)
            .map_err(|e| StorageError::InvalidContent(format!("content is not base64: {e}")))?;

        let stored_key = key::build_key(user, source, filename)?;
        tags.entry("source".to_string()).or_insert_with(|| {
            match source {
                FileSource::User => "user",
                FileSource::Tool => "tool",
            }
            .to_string()
        });

        let metadata = ObjectMetadata {
            key: stored_key.clone(),
            filename: filename.to_string(),
            size: body.len() as u64,
            content_type: if content_type.is_empty() {
                "application/octet-stream".to_string()
            } else {
                content_type.to_string()
            },
            last_modified: Utc::now(),
            etag: format!("{:x}", body.len() ^ stored_key.len()),
            tags,
        };

        let object = StoredObject {
            metadata: metadata.clone(),
            content_base64: content_base64.to_string(),
        };
        self.objects.write().await.insert(stored_key.clone(), object);
        debug!(key = %stored_key, size = metadata.size, "stored object in memory");
        Ok(metadata)
    }

    async fn get(&self, user: &str, stored_key: &str) -> StorageResult<Option<StoredObject>> {
        key::ensure_owner(user, stored_key)?;
        Ok(self.objects.read().await.get(stored_key).cloned())
    }

    async fn list(&self, user: &str, filter: ListFilter) -> StorageResult<Vec<ObjectMetadata>> {
        let prefix = format!("users/{user}/");
        let objects = self.objects.read().await;
        let mut entries: Vec<ObjectMetadata> = objects
            .values()
            .filter(|o| o.metadata.key.starts_with(&prefix))
            .filter(|o| match filter.source {
                Some(source) => o.metadata.source() == Some(source),
                None => true,
            })
            .map(|o| o.metadata.clone())
            .collect();
        entries.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        if let Some(limit) = filter.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    async fn delete(&self, user: &str, stored_key: &str) -> StorageResult<bool> {
        key::ensure_owner(user, stored_key)?;
        Ok(self.objects.write().await.remove(stored_key).is_some())
    }

    async fn stats(&self, user: &str) -> StorageResult<StorageStats> {
        let entries = self.list(user, ListFilter::default()).await?;
        let mut stats = StorageStats::default();
        for entry in entries {
            stats.total_files += 1;
            stats.total_bytes += entry.size;
            match entry.source() {
                Some(FileSource::User) => stats.upload_files += 1,
                Some(FileSource::Tool) => stats.generated_files += 1,
                None => {}
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(data: &[u8]) -> String {
        STANDARD.encode(data)
    }

    #[tokio::test]
    async fn upload_then_get_round_trips_bytes() {
        let store = InMemoryObjectStore::new();
        let meta = store
            .upload(
                "a@b.c",
                "notes.txt",
                &b64(b"hello world"),
                "text/plain",
                BTreeMap::new(),
                FileSource::User,
            )
            .await
            .unwrap();

        assert!(meta.key.starts_with("users/a@b.c/uploads/"));
        assert_eq!(meta.size, 11);
        assert_eq!(meta.tags["source"], "user");

        let object = store.get("a@b.c", &meta.key).await.unwrap().unwrap();
        assert_eq!(
            STANDARD.decode(&object.content_base64).unwrap(),
            b"hello world"
        );
    }

    #[tokio::test]
    async fn cross_user_access_is_denied() {
        let store = InMemoryObjectStore::new();
        let meta = store
            .upload(
                "a@b.c",
                "x.txt",
                &b64(b"x"),
                "text/plain",
                BTreeMap::new(),
                FileSource::User,
            )
            .await
            .unwrap();

        assert!(matches!(
            store.get("mallory@b.c", &meta.key).await,
            Err(StorageError::AccessDenied(_))
        ));
        assert!(matches!(
            store.delete("mallory@b.c", &meta.key).await,
            Err(StorageError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn list_filters_by_source_and_stats_aggregate() {
        let store = InMemoryObjectStore::new();
        store
            .upload("a@b.c", "up.txt", &b64(b"12345"), "text/plain", BTreeMap::new(), FileSource::User)
            .await
            .unwrap();
        store
            .upload("a@b.c", "gen.png", &b64(b"123"), "image/png", BTreeMap::new(), FileSource::Tool)
            .await
            .unwrap();
        store
            .upload("other@b.c", "o.txt", &b64(b"1"), "text/plain", BTreeMap::new(), FileSource::User)
            .await
            .unwrap();

        let all = store.list("a@b.c", ListFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let generated = store
            .list(
                "a@b.c",
                ListFilter {
                    source: Some(FileSource::Tool),
                    limit: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(generated.len(), 1);
        assert_eq!(generated[0].filename, "gen.png");

        let stats = store.stats("a@b.c").await.unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.upload_files, 1);
        assert_eq!(stats.generated_files, 1);
        assert_eq!(stats.total_bytes, 8);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = InMemoryObjectStore::new();
        let meta = store
            .upload("a@b.c", "x.txt", &b64(b"x"), "text/plain", BTreeMap::new(), FileSource::User)
            .await
            .unwrap();
        assert!(store.delete("a@b.c", &meta.key).await.unwrap());
        assert!(!store.delete("a@b.c", &meta.key).await.unwrap());
        assert!(store.get("a@b.c", &meta.key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_base64_is_rejected() {
        let store = InMemoryObjectStore::new();
        let result = store
            .upload("a@b.c", "x.bin", "not base64!!!", "", BTreeMap::new(), FileSource::User)
            .await;
        assert!(matches!(result, Err(StorageError::InvalidContent(_))));
    }
}
