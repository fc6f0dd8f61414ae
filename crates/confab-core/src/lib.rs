//! # Confab Core
//!
//! Shared data model for the Confab chat gateway.
//!
//! This crate defines the vocabulary every other Confab crate speaks:
//!
//! - **Messages**: role-tagged conversation entries with the ordering rules
//!   the gateway enforces (a `tool` message may only follow an `assistant`
//!   message carrying the matching tool call).
//! - **Tool calls and results**: the OpenAI-style function-call wire shape
//!   the LLM produces, plus the parsed form the tool layer dispatches, and
//!   the artifacts tools hand back.
//! - **Client protocol frames**: the JSON frames exchanged with WebSocket
//!   clients (`chat`, `reset_session`, `download_file` inbound;
//!   `chat_response`, `intermediate_update`, tool and agent events outbound).
//! - **Session file references**: pointers from a live session to objects in
//!   per-user storage. Sessions never hold file bytes, only references.
//! - **Canvas policy**: the single table deciding which file kinds are
//!   rendered in the canvas display channel.
//! - **Errors**: the `GatewayError` hierarchy used across the workspace.
//!
//! The crate is deliberately free of I/O; everything here is plain data and
//! pure functions so the transport, storage, and orchestration crates can
//! depend on it without dragging in a runtime.

pub mod canvas;
pub mod error;
pub mod schema;
pub mod types;

pub use error::{GatewayError, GatewayResult};
pub use types::frames::{ChatRequest, ClientFrame, ServerFrame, UpdateType};
pub use types::message::{Message, MessageHistory, Role};
pub use types::session::{FileSource, SessionFileRef};
pub use types::tool::{
    Artifact, DisplayConfig, FunctionCall, ToolCall, ToolCallRequest, ToolResult,
};
