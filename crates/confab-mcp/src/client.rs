//! Per-server MCP client with per-call session scope.
//!
//! Every RPC opens a fresh transport, performs the initialize handshake,
//! runs the exchange, and closes the transport on all exit paths. This
//! trades connection reuse for failure isolation: a server that wedges
//! mid-call affects only that call, and the next call starts clean.

use std::path::PathBuf;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::McpServerConfig;
use crate::error::{McpError, McpResult};
use crate::protocol::{
    methods, CallToolParams, CallToolResult, ClientInfo, GetPromptParams, GetPromptResult,
    InitializeParams, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, ListPromptsResult,
    ListToolsResult, McpPromptInfo, McpToolInfo, METHOD_NOT_FOUND, PROTOCOL_VERSION,
};
use crate::transport::{self, Transport};

#[derive(Clone)]
pub struct McpClient {
    server_name: String,
    config: McpServerConfig,
    project_root: PathBuf,
    rpc_timeout: Duration,
}

impl McpClient {
    pub fn new(
        server_name: impl Into<String>,
        config: McpServerConfig,
        project_root: PathBuf,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            config,
            project_root,
            rpc_timeout,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    pub async fn list_tools(&self) -> McpResult<Vec<McpToolInfo>> {
        let mut session = self.open_session().await?;
        let result = session
            .request::<ListToolsResult>(methods::TOOLS_LIST, None)
            .await;
        session.close().await;
        Ok(result?.tools)
    }

    /// List prompts; servers without prompt support yield an empty list.
    pub async fn list_prompts(&self) -> McpResult<Vec<McpPromptInfo>> {
        let mut session = self.open_session().await?;
        let result = session
            .request::<ListPromptsResult>(methods::PROMPTS_LIST, None)
            .await;
        session.close().await;
        match result {
            Ok(listing) => Ok(listing.prompts),
            Err(McpError::Server { code, .. }) if code == METHOD_NOT_FOUND => Ok(Vec::new()),
            Err(other) => Err(other),
        }
    }

    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> McpResult<CallToolResult> {
        let params = CallToolParams {
            name: tool_name.to_string(),
            arguments,
        };
        let mut session = self.open_session().await?;
        let result = session
            .request::<CallToolResult>(methods::TOOLS_CALL, Some(serde_json::to_value(&params)?))
            .await;
        session.close().await;
        result
    }

    pub async fn get_prompt(
        &self,
        prompt_name: &str,
        arguments: Option<Value>,
    ) -> McpResult<GetPromptResult> {
        let params = GetPromptParams {
            name: prompt_name.to_string(),
            arguments,
        };
        let mut session = self.open_session().await?;
        let result = session
            .request::<GetPromptResult>(methods::PROMPTS_GET, Some(serde_json::to_value(&params)?))
            .await;
        session.close().await;
        result
    }

    async fn open_session(&self) -> McpResult<Session> {
        let transport =
            transport::connect(&self.config, &self.project_root, self.rpc_timeout).await?;
        let mut session = Session {
            server_name: self.server_name.clone(),
            transport,
            rpc_timeout: self.rpc_timeout,
        };
        session.initialize().await?;
        Ok(session)
    }
}

struct Session {
    server_name: String,
    transport: Box<dyn Transport>,
    rpc_timeout: Duration,
}

impl Session {
    async fn initialize(&mut self) -> McpResult<()> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: json!({}),
            client_info: ClientInfo::default(),
        };
        let _: Value = self
            .request(methods::INITIALIZE, Some(serde_json::to_value(&params)?))
            .await?;
        self.transport
            .send(JsonRpcMessage::Request(JsonRpcRequest::notification(
                methods::INITIALIZED,
                None,
            )))
            .await?;
        debug!(server = %self.server_name, "MCP session initialized");
        Ok(())
    }

    /// Send one request and wait for its response, answering server pings
    /// and skipping unrelated traffic along the way.
    async fn request<T: DeserializeOwned>(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> McpResult<T> {
        let id = Value::String(Uuid::new_v4().to_string());
        let request = JsonRpcRequest::new(id.clone(), method, params);
        self.transport.send(JsonRpcMessage::Request(request)).await?;

        let deadline = tokio::time::Instant::now() + self.rpc_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(McpError::Timeout(self.rpc_timeout.as_secs()));
            }
            let message = tokio::time::timeout(remaining, self.transport.recv())
                .await
                .map_err(|_| McpError::Timeout(self.rpc_timeout.as_secs()))??;

            match message {
                JsonRpcMessage::Response(response) if response.id.as_ref() == Some(&id) => {
                    return Self::unwrap_response(response);
                }
                JsonRpcMessage::Response(other) => {
                    debug!(server = %self.server_name, "skipping response for unknown id: {:?}", other.id);
                }
                JsonRpcMessage::Request(server_request) => {
                    self.answer_server_request(server_request).await?;
                }
            }
        }
    }

    fn unwrap_response<T: DeserializeOwned>(response: JsonRpcResponse) -> McpResult<T> {
        if let Some(error) = response.error {
            return Err(McpError::Server {
                code: error.code,
                message: error.message,
            });
        }
        let result = response.result.unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|e| McpError::protocol(format!("unexpected result shape: {e}")))
    }

    async fn answer_server_request(&mut self, request: JsonRpcRequest) -> McpResult<()> {
        let Some(id) = request.id else {
            // Notification; nothing to answer.
            return Ok(());
        };
        let response = if request.method == methods::PING {
            JsonRpcResponse::success(Some(id), json!({}))
        } else {
            warn!(server = %self.server_name, method = %request.method, "unsupported server request");
            JsonRpcResponse::failure(Some(id), METHOD_NOT_FOUND, "Method not found")
        };
        self.transport.send(JsonRpcMessage::Response(response)).await
    }

    async fn close(mut self) {
        if let Err(e) = self.transport.close().await {
            warn!(server = %self.server_name, "error closing transport: {e}");
        }
    }
}
