//! HTTP implementation of the calling surface.
//!
//! Speaks the OpenAI chat-completions dialect against whatever endpoint the
//! catalog entry names. API keys are attached as bearer tokens and never
//! logged; `extra_headers` ride along verbatim.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use confab_core::schema::ToolSchema;
use confab_core::Message;
use futures::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::backend::{LlmBackend, LlmResponse, ToolChoice};
use crate::catalog::{LlmCatalog, ModelConfig};
use crate::error::{LlmError, LlmResult};
use crate::rag::{RagMetadata, RagRetriever};
use crate::wire::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};

pub struct HttpLlmCaller {
    catalog: Arc<LlmCatalog>,
    client: reqwest::Client,
    rag: Option<Arc<dyn RagRetriever>>,
}

impl HttpLlmCaller {
    pub fn new(catalog: Arc<LlmCatalog>, timeout: Duration) -> LlmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Network(format!("client setup: {e}")))?;
        Ok(Self {
            catalog,
            client,
            rag: None,
        })
    }

    /// Inject the retrieval dependency. Kept as a constructor parameter so
    /// the LLM<->RAG relationship stays acyclic.
    pub fn with_rag(mut self, rag: Arc<dyn RagRetriever>) -> Self {
        self.rag = Some(rag);
        self
    }

    fn completions_url(config: &ModelConfig) -> String {
        format!("{}/chat/completions", config.model_url.trim_end_matches('/'))
    }

    fn build_request(
        &self,
        config: &ModelConfig,
        body: &ChatCompletionRequest,
    ) -> reqwest::RequestBuilder {
        let mut request = self.client.post(Self::completions_url(config)).json(body);
        if !config.api_key.is_empty() && !config.api_key_unresolved() {
            request = request.bearer_auth(&config.api_key);
        }
        for (name, value) in &config.extra_headers {
            request = request.header(name, value);
        }
        request
    }

    fn chat_body(
        config: &ModelConfig,
        messages: &[Message],
        tools: &[ToolSchema],
        tool_choice: Option<ToolChoice>,
        temperature: Option<f32>,
        stream: bool,
    ) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: config.qualified_model(),
            messages: messages.to_vec(),
            max_tokens: config.max_tokens.or(Some(1000)),
            temperature: temperature.or(config.temperature).or(Some(0.7)),
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.to_vec())
            },
            // tool_choice without tools is rejected by providers.
            tool_choice: if tools.is_empty() {
                None
            } else {
                tool_choice.map(|c| c.as_value())
            },
            stream,
        }
    }

    async fn execute(
        &self,
        config: &ModelConfig,
        body: &ChatCompletionRequest,
    ) -> LlmResult<ChatCompletionResponse> {
        let response = self.build_request(config, body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider {
                status: status.as_u16(),
                message: truncate(&message, 500),
            });
        }
        Ok(response.json().await?)
    }

    /// Query the first data source and splice its context in as a system
    /// message just before the latest user message.
    async fn enrich_with_rag(
        &self,
        user: &str,
        data_sources: &[String],
        messages: &[Message],
    ) -> LlmResult<(Vec<Message>, Option<RagMetadata>)> {
        let rag = self
            .rag
            .as_ref()
            .ok_or_else(|| LlmError::Rag("no retriever configured".to_string()))?;
        let data_source = data_sources
            .first()
            .ok_or_else(|| LlmError::Rag("no data source selected".to_string()))?;

        let response = rag.query(user, data_source, messages).await?;
        let context = Message::system(format!(
            "Retrieved context from {data_source}:\n\n{}\n\nUse this context to inform your response.",
            response.content
        ));

        let mut enriched = messages.to_vec();
        let insert_at = enriched.len().saturating_sub(1);
        enriched.insert(insert_at, context);
        Ok((enriched, response.metadata))
    }
}

#[async_trait]
impl LlmBackend for HttpLlmCaller {
    async fn call_plain(
        &self,
        model: &str,
        messages: &[Message],
        temperature: Option<f32>,
    ) -> LlmResult<String> {
        let config = self.catalog.get(model)?;
        let body = Self::chat_body(config, messages, &[], None, temperature, false);
        debug!(model, messages = messages.len(), "plain LLM call");
        let response = self.execute(config, &body).await?;
        let choice = response.choices.into_iter().next().ok_or(LlmError::EmptyResponse)?;
        Ok(choice.message.content.unwrap_or_default())
    }

    async fn call_plain_streaming(
        &self,
        model: &str,
        messages: &[Message],
        temperature: Option<f32>,
        on_delta: UnboundedSender<String>,
    ) -> LlmResult<String> {
        let config = self.catalog.get(model)?;
        let body = Self::chat_body(config, messages, &[], None, temperature, true);

        let result = async {
            let response = self.build_request(config, &body).send().await?;
            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(LlmError::Provider {
                    status: status.as_u16(),
                    message: truncate(&message, 500),
                });
            }

            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut content = String::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| LlmError::Stream(e.to_string()))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() || data == "[DONE]" {
                        continue;
                    }
                    let parsed: ChatCompletionChunk = serde_json::from_str(data)
                        .map_err(|e| LlmError::Stream(format!("malformed chunk: {e}")))?;
                    for choice in parsed.choices {
                        if let Some(delta) = choice.delta.content {
                            content.push_str(&delta);
                            // Receiver gone means the client stopped
                            // listening; keep accumulating for history.
                            let _ = on_delta.send(delta);
                        }
                    }
                }
            }
            Ok(content)
        }
        .await;

        match result {
            Ok(content) => Ok(content),
            Err(e) => {
                warn!(model, "streaming failed, falling back to non-streaming: {e}");
                self.call_plain(model, messages, temperature).await
            }
        }
    }

    async fn call_with_tools(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolSchema],
        tool_choice: ToolChoice,
    ) -> LlmResult<LlmResponse> {
        let config = self.catalog.get(model)?;
        let body = Self::chat_body(config, messages, tools, Some(tool_choice), None, false);
        debug!(model, tools = tools.len(), ?tool_choice, "tool-enabled LLM call");

        let response = match self.execute(config, &body).await {
            Ok(response) => response,
            // Some providers reject `tool_choice: required`; retry with auto.
            Err(LlmError::Provider { status: 400, .. }) if tool_choice == ToolChoice::Required => {
                info!(model, "provider rejected required tool choice, retrying with auto");
                let body =
                    Self::chat_body(config, messages, tools, Some(ToolChoice::Auto), None, false);
                self.execute(config, &body).await?
            }
            Err(other) => return Err(other),
        };

        let choice = response.choices.into_iter().next().ok_or(LlmError::EmptyResponse)?;
        Ok(LlmResponse {
            content: choice.message.content,
            tool_calls: choice.message.tool_calls.unwrap_or_default(),
        })
    }

    async fn call_with_rag(
        &self,
        model: &str,
        messages: &[Message],
        user: &str,
        data_sources: &[String],
        temperature: Option<f32>,
    ) -> LlmResult<String> {
        match self.enrich_with_rag(user, data_sources, messages).await {
            Ok((enriched, metadata)) => {
                let mut answer = self.call_plain(model, &enriched, temperature).await?;
                if let Some(metadata) = metadata {
                    let summary = metadata.summary();
                    if !summary.is_empty() {
                        answer.push_str("\n\n---\n**Sources & Processing:**\n");
                        answer.push_str(&summary);
                    }
                }
                Ok(answer)
            }
            Err(e) => {
                warn!(model, "RAG enrichment failed, degrading to plain call: {e}");
                self.call_plain(model, messages, temperature).await
            }
        }
    }

    async fn call_with_rag_and_tools(
        &self,
        model: &str,
        messages: &[Message],
        user: &str,
        data_sources: &[String],
        tools: &[ToolSchema],
        tool_choice: ToolChoice,
    ) -> LlmResult<LlmResponse> {
        match self.enrich_with_rag(user, data_sources, messages).await {
            Ok((enriched, _metadata)) => {
                self.call_with_tools(model, &enriched, tools, tool_choice).await
            }
            Err(e) => {
                warn!(model, "RAG enrichment failed, degrading to tools-only call: {e}");
                self.call_with_tools(model, messages, tools, tool_choice).await
            }
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}
