//! The calling surface the router and agent loop depend on.

use async_trait::async_trait;
use confab_core::{Message, ToolCallRequest};
use confab_core::schema::ToolSchema;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::LlmResult;

/// Tool-choice directive passed to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    Required,
    None,
}

impl ToolChoice {
    pub fn as_value(&self) -> Value {
        match self {
            ToolChoice::Auto => Value::String("auto".to_string()),
            ToolChoice::Required => Value::String("required".to_string()),
            ToolChoice::None => Value::String("none".to_string()),
        }
    }
}

/// Assistant output from a tool-enabled call.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl LlmResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn text(&self) -> String {
        self.content.clone().unwrap_or_default()
    }
}

/// Unified call surface over the model catalog.
///
/// The plain and RAG text paths accept a per-turn temperature override;
/// `None` falls back to the catalog entry's default.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn call_plain(
        &self,
        model: &str,
        messages: &[Message],
        temperature: Option<f32>,
    ) -> LlmResult<String>;

    /// Stream deltas into `on_delta`; returns the full text. Implementations
    /// fall back to the non-streaming call when the stream fails.
    async fn call_plain_streaming(
        &self,
        model: &str,
        messages: &[Message],
        temperature: Option<f32>,
        on_delta: UnboundedSender<String>,
    ) -> LlmResult<String>;

    async fn call_with_tools(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolSchema],
        tool_choice: ToolChoice,
    ) -> LlmResult<LlmResponse>;

    /// Retrieve context for the first data source, then `call_plain` over
    /// the enriched conversation. RAG failure degrades to plain.
    async fn call_with_rag(
        &self,
        model: &str,
        messages: &[Message],
        user: &str,
        data_sources: &[String],
        temperature: Option<f32>,
    ) -> LlmResult<String>;

    /// Retrieve context, then `call_with_tools` over the enriched
    /// conversation. RAG failure degrades to the tools-only call.
    async fn call_with_rag_and_tools(
        &self,
        model: &str,
        messages: &[Message],
        user: &str,
        data_sources: &[String],
        tools: &[ToolSchema],
        tool_choice: ToolChoice,
    ) -> LlmResult<LlmResponse>;
}
