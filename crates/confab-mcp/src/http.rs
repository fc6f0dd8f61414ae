//! HTTP and SSE transports.
//!
//! Both POST each JSON-RPC message to the server endpoint. The response
//! body is either a plain JSON message or a `text/event-stream`; for SSE
//! servers the stream form is the norm, for streamable-HTTP servers it is
//! negotiated via the `Accept` header. Incoming messages are queued so
//! `recv` can hand them back one at a time.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::trace;

use crate::error::{McpError, McpResult};
use crate::protocol::JsonRpcMessage;
use crate::transport::Transport;

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    sse: bool,
    inbox: VecDeque<JsonRpcMessage>,
}

impl HttpTransport {
    pub fn new(endpoint: String, sse: bool, timeout: Duration) -> McpResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| McpError::connection(format!("client setup: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            sse,
            inbox: VecDeque::new(),
        })
    }

    /// Parse every `data:` event in an SSE body into messages.
    fn parse_sse_body(body: &str) -> McpResult<Vec<JsonRpcMessage>> {
        let mut messages = Vec::new();
        for line in body.lines() {
            let line = line.trim();
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() || data == "[DONE]" {
                continue;
            }
            let message = serde_json::from_str(data)
                .map_err(|e| McpError::protocol(format!("malformed SSE event: {e}")))?;
            messages.push(message);
        }
        Ok(messages)
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&mut self, message: JsonRpcMessage) -> McpResult<()> {
        let is_notification = matches!(
            &message,
            JsonRpcMessage::Request(request) if request.is_notification()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("accept", "application/json, text/event-stream")
            .json(&message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::connection(format!(
                "server returned {status}: {body}"
            )));
        }

        // Notifications get no reply worth queueing.
        if is_notification {
            return Ok(());
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(());
        }

        if content_type.starts_with("text/event-stream") || self.sse {
            for message in Self::parse_sse_body(&body)? {
                self.inbox.push_back(message);
            }
        } else {
            let message = serde_json::from_str(&body)
                .map_err(|e| McpError::protocol(format!("malformed response body: {e}")))?;
            self.inbox.push_back(message);
        }
        trace!(queued = self.inbox.len(), "http transport queued replies");
        Ok(())
    }

    async fn recv(&mut self) -> McpResult<JsonRpcMessage> {
        self.inbox.pop_front().ok_or(McpError::ConnectionClosed)
    }

    async fn close(&mut self) -> McpResult<()> {
        self.inbox.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_bodies_parse_into_messages() {
        let body = concat!(
            "event: message\n",
            "data: {\"jsonrpc\":\"2.0\",\"result\":{\"tools\":[]},\"id\":1}\n",
            "\n",
            "data: [DONE]\n",
        );
        let messages = HttpTransport::parse_sse_body(body).unwrap();
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            JsonRpcMessage::Response(resp) => assert!(resp.error.is_none()),
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn malformed_sse_data_is_an_error() {
        assert!(HttpTransport::parse_sse_body("data: {broken\n").is_err());
    }
}
