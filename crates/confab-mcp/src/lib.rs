//! # Confab MCP
//!
//! Model Context Protocol plumbing for the Confab gateway.
//!
//! The gateway is an MCP *client*: each configured tool server gets one
//! `McpClient` whose transport is chosen by the explicit `transport` field
//! or inferred from the config (a command means stdio, a URL with a scheme
//! means HTTP, a URL ending in `/sse` means SSE). Client lifetime is scoped
//! per call: every RPC opens a fresh session, performs the exchange, and
//! releases the transport on all exit paths, so a wedged server never holds
//! gateway resources across turns.
//!
//! `McpManager` owns the server table and the tool/prompt registries keyed
//! by fully-qualified `{server}_{tool}` names. It filters servers by group
//! authorization, synthesizes the `canvas_canvas` pseudo-tool, applies the
//! exclusive-server rule, and exports schemas in the OpenAI
//! function-calling form the LLM layer expects.
//!
//! Failure isolation is the design center: a transport error on one server
//! surfaces as a failed tool result for that call and never poisons other
//! servers or the registries.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod manager;
pub mod protocol;
pub mod stdio;
pub mod transport;

pub use client::McpClient;
pub use config::{McpServerConfig, McpServerTable, TransportKind};
pub use error::{McpError, McpResult};
pub use manager::{McpManager, RegisteredPrompt, RegisteredTool, ToolDispatcher};
pub use protocol::{CallToolResult, McpPromptInfo, McpToolInfo};
