//! RAG client.
//!
//! One HTTP call per query: `POST {endpoint}/query` with the user, the data
//! source, and the conversation so far. Failures are never fatal to a turn;
//! callers degrade to the non-RAG path.

use std::time::Duration;

use async_trait::async_trait;
use confab_core::Message;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::{LlmError, LlmResult};

/// Retrieval interface injected into the caller. A trait so the LLM<->RAG
/// relationship stays acyclic and tests can stub retrieval.
#[async_trait]
pub trait RagRetriever: Send + Sync {
    async fn query(
        &self,
        user: &str,
        data_source: &str,
        messages: &[Message],
    ) -> LlmResult<RagResponse>;
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RagResponse {
    pub content: String,

    #[serde(default)]
    pub metadata: Option<RagMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RagMetadata {
    #[serde(default)]
    pub data_source: String,

    #[serde(default)]
    pub processing_ms: u64,

    #[serde(default)]
    pub documents: Vec<RagDocument>,

    #[serde(default)]
    pub total_searched: u64,

    #[serde(default)]
    pub retrieval_method: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RagDocument {
    pub source: String,

    #[serde(default)]
    pub confidence: f64,

    #[serde(default)]
    pub content_type: String,
}

impl RagMetadata {
    /// Human-readable footer appended to RAG-enriched answers.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        if !self.documents.is_empty() {
            let docs = self
                .documents
                .iter()
                .map(|d| format!("{} ({:.0}%)", d.source, d.confidence * 100.0))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("Sources: {docs}"));
        }
        if self.total_searched > 0 {
            lines.push(format!("Documents searched: {}", self.total_searched));
        }
        if !self.retrieval_method.is_empty() {
            lines.push(format!("Method: {}", self.retrieval_method));
        }
        if self.processing_ms > 0 {
            lines.push(format!("Processing: {}ms", self.processing_ms));
        }
        lines.join("\n")
    }
}

pub struct HttpRagClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRagClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> LlmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Rag(format!("client setup: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RagRetriever for HttpRagClient {
    async fn query(
        &self,
        user: &str,
        data_source: &str,
        messages: &[Message],
    ) -> LlmResult<RagResponse> {
        let payload = json!({
            "user": user,
            "data_source": data_source,
            "messages": messages,
        });

        let response = self
            .client
            .post(format!("{}/query", self.endpoint))
            .json(&payload)
            .send()
            .await
            .map_err(|e| LlmError::Rag(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Rag(format!(
                "query failed with status {status}: {body}"
            )));
        }

        let parsed: RagResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Rag(format!("malformed response: {e}")))?;
        debug!(
            data_source,
            documents = parsed.metadata.as_ref().map(|m| m.documents.len()).unwrap_or(0),
            "RAG query succeeded"
        );
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_summary_lists_sources() {
        let metadata = RagMetadata {
            data_source: "docs".into(),
            processing_ms: 120,
            documents: vec![
                RagDocument {
                    source: "handbook.pdf".into(),
                    confidence: 0.92,
                    content_type: "pdf".into(),
                },
                RagDocument {
                    source: "faq.md".into(),
                    confidence: 0.66,
                    content_type: "markdown".into(),
                },
            ],
            total_searched: 40,
            retrieval_method: "hybrid".into(),
        };
        let summary = metadata.summary();
        assert!(summary.contains("handbook.pdf (92%)"));
        assert!(summary.contains("Documents searched: 40"));
        assert!(summary.contains("Method: hybrid"));
        assert!(summary.contains("Processing: 120ms"));
    }

    #[test]
    fn empty_metadata_produces_empty_summary() {
        assert!(RagMetadata::default().summary().is_empty());
    }
}
