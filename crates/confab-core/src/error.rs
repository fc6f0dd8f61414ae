//! Error handling for the Confab workspace.
//!
//! `GatewayError` is the canonical error type crossing crate boundaries. It
//! groups failures by how the gateway reacts to them rather than by where
//! they originate: validation and protocol errors bounce back to the client,
//! upstream errors trigger fallback paths at the mode-router boundary, tool
//! errors are packaged into tool results and fed back to the model, and rate
//! limiting carries the retry hint the client needs.
//!
//! Convenience constructors mirror the common call sites so most code can
//! write `GatewayError::validation("...")` instead of spelling out variants.

use thiserror::Error;

/// Canonical result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Bad input from the client: missing fields, malformed values.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or invalid identity, or the user lacks a required group.
    #[error("Authorization error: {0}")]
    Auth(String),

    /// The caller exceeded the request budget for the current window.
    #[error("Rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    /// A backend the gateway depends on failed (LLM, RAG, object store,
    /// MCP server).
    #[error("Upstream error from {service}: {message}")]
    Upstream { service: String, message: String },

    /// A tool raised or returned a non-OK result.
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Unknown frame type or otherwise malformed client traffic.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Anything unexpected. Reaching this variant is a bug.
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn rate_limited(retry_after: u64) -> Self {
        Self::RateLimited { retry_after }
    }

    pub fn upstream(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn tool_execution(msg: impl Into<String>) -> Self {
        Self::ToolExecution(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the mode router may silently fall back to a degraded path
    /// (RAG -> plain, streaming -> non-streaming) instead of failing the turn.
    pub fn is_recoverable_upstream(&self) -> bool {
        matches!(self, Self::Upstream { .. })
    }

    /// Message safe to show to the end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Internal(_) => "An internal server error occurred.".to_string(),
            other => other.to_string(),
        }
    }
}
