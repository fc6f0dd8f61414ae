//! Transport abstraction for MCP sessions.
//!
//! A transport moves JSON-RPC messages to and from one server. Sessions are
//! short-lived: the client opens a transport, runs one RPC exchange, and
//! closes it, so transports optimize for clean setup/teardown rather than
//! connection reuse.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{McpServerConfig, TransportKind};
use crate::error::McpResult;
use crate::http::HttpTransport;
use crate::protocol::JsonRpcMessage;
use crate::stdio::StdioTransport;

#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, message: JsonRpcMessage) -> McpResult<()>;

    async fn recv(&mut self) -> McpResult<JsonRpcMessage>;

    async fn close(&mut self) -> McpResult<()>;
}

/// Open a transport for a server according to its configuration.
pub async fn connect(
    config: &McpServerConfig,
    project_root: &Path,
    timeout: Duration,
) -> McpResult<Box<dyn Transport>> {
    match config.transport_kind()? {
        TransportKind::Stdio => {
            let transport = StdioTransport::spawn(config, project_root).await?;
            Ok(Box::new(transport))
        }
        TransportKind::Http => {
            let transport = HttpTransport::new(config.endpoint()?, false, timeout)?;
            Ok(Box::new(transport))
        }
        TransportKind::Sse => {
            let transport = HttpTransport::new(config.endpoint()?, true, timeout)?;
            Ok(Box::new(transport))
        }
    }
}
