//! Error types for MCP transports, clients, and the manager.

use confab_core::GatewayError;
use thiserror::Error;

pub type McpResult<T> = Result<T, McpError>;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Request timeout after {0}s")]
    Timeout(u64),

    #[error("Server error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("Unknown server: {0}")]
    UnknownServer(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Server misconfigured: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl McpError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<reqwest::Error> for McpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            McpError::Timeout(0)
        } else {
            McpError::Connection(err.to_string())
        }
    }
}

impl From<McpError> for GatewayError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::UnknownTool(name) => {
                GatewayError::validation(format!("unknown tool: {name}"))
            }
            other => GatewayError::upstream("mcp", other.to_string()),
        }
    }
}
