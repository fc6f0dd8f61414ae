//! HTTP object-store backend.
//!
//! Talks to the per-user file service: `POST /files` to upload,
//! `GET /files/{key}` to fetch, `GET /files` to list, `DELETE /files/{key}`
//! to remove. The service authenticates callers by bearer identity, so the
//! client forwards the acting user on every request. Ownership is also
//! pre-checked locally so a bad key never leaves the process.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use confab_core::types::session::FileSource;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::key;
use crate::store::{ListFilter, ObjectMetadata, ObjectStore, StorageStats, StoredObject};

pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    files: Vec<ObjectMetadata>,
}

impl HttpObjectStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> StorageResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Backend(format!("client setup: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn object_url(&self, stored_key: &str) -> String {
        // Keys keep their path separators; everything else is escaped.
        let encoded = stored_key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/files/{}", self.base_url, encoded)
    }

    fn bearer(&self, user: &str) -> String {
        format!("Bearer {user}")
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload(
        &self,
        user: &str,
        filename: &str,
        content_base64: &str,
        content_type: &str,
        mut tags: BTreeMap<String, String>,
        source: FileSource,
    ) -> StorageResult<ObjectMetadata> {
        tags.entry("source".to_string()).or_insert_with(|| {
            match source {
                FileSource::User => "user",
                FileSource::Tool => "tool",
            }
            .to_string()
        });

        let payload = json!({
            "filename": key::sanitize_filename(filename),
            "content_base64": content_base64,
            "content_type": if content_type.is_empty() { "application/octet-stream" } else { content_type },
            "tags": tags,
        });

        let response = self
            .client
            .post(format!("{}/files", self.base_url))
            .header("authorization", self.bearer(user))
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Backend(format!(
                "upload failed with status {status}: {body}"
            )));
        }

        let metadata: ObjectMetadata = response.json().await?;
        key::validate_key(&metadata.key)?;
        debug!(user, size = metadata.size, "uploaded object");
        Ok(metadata)
    }

    async fn get(&self, user: &str, stored_key: &str) -> StorageResult<Option<StoredObject>> {
        key::ensure_owner(user, stored_key)?;

        let response = self
            .client
            .get(self.object_url(stored_key))
            .header("authorization", self.bearer(user))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(Some(response.json().await?)),
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            reqwest::StatusCode::FORBIDDEN => Err(StorageError::AccessDenied(
                "file service refused access".to_string(),
            )),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(StorageError::Backend(format!(
                    "get failed with status {status}: {body}"
                )))
            }
        }
    }

    async fn list(&self, user: &str, filter: ListFilter) -> StorageResult<Vec<ObjectMetadata>> {
        let mut request = self
            .client
            .get(format!("{}/files", self.base_url))
            .header("authorization", self.bearer(user));
        if let Some(limit) = filter.limit {
            request = request.query(&[("limit", limit.to_string())]);
        }
        if let Some(source) = filter.source {
            let file_type = match source {
                FileSource::User => "user",
                FileSource::Tool => "tool",
            };
            request = request.query(&[("file_type", file_type)]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(StorageError::Backend(format!(
                "list failed with status {status}"
            )));
        }
        let listing: ListResponse = response.json().await?;
        Ok(listing.files)
    }

    async fn delete(&self, user: &str, stored_key: &str) -> StorageResult<bool> {
        key::ensure_owner(user, stored_key)?;

        let response = self
            .client
            .delete(self.object_url(stored_key))
            .header("authorization", self.bearer(user))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            status => Err(StorageError::Backend(format!(
                "delete failed with status {status}"
            ))),
        }
    }

    async fn stats(&self, user: &str) -> StorageResult<StorageStats> {
        // The file service has no stats endpoint; aggregate from a listing.
        let entries = self.list(user, ListFilter::default()).await?;
        let mut stats = StorageStats::default();
        for entry in entries {
            stats.total_files += 1;
            stats.total_bytes += entry.size;
            match entry.source() {
                Some(FileSource::User) => stats.upload_files += 1,
                Some(FileSource::Tool) => stats.generated_files += 1,
                None => warn!(key = %entry.key, "object without a recognizable source"),
            }
        }
        Ok(stats)
    }
}
