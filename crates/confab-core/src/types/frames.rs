//! Client-facing protocol frames.
//!
//! Every frame is a JSON object tagged by `type`. Inbound frames are the
//! three the session state machine accepts; anything else fails to parse and
//! is answered with an `error` frame without closing the connection.
//! Outbound frames cover the terminal responses (`chat_response`,
//! `agent_final_response`, `error`) and the intermediate events emitted
//! while a turn is processed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames received from the client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Chat(ChatRequest),
    ResetSession,
    DownloadFile { filename: String },
}

/// Payload of a `chat` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub selected_tools: Vec<String>,

    #[serde(default)]
    pub selected_prompts: Vec<String>,

    #[serde(default)]
    pub selected_data_sources: Vec<String>,

    #[serde(default)]
    pub only_rag: bool,

    #[serde(default)]
    pub tool_choice_required: bool,

    #[serde(default)]
    pub agent_mode: bool,

    pub agent_max_steps: Option<u32>,

    pub temperature: Option<f32>,

    /// Logical filename -> base64 body, uploaded before classification.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

/// Kinds of `intermediate_update` payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    FilesUpdate,
    CanvasFiles,
    CanvasContent,
    ToolSynthesis,
}

/// Frames sent to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Terminal frame for a normal turn.
    ChatResponse {
        message: String,
        model: String,
        session_id: String,
    },

    IntermediateUpdate {
        update_type: UpdateType,
        data: Value,
    },

    ToolStart {
        tool_call_id: String,
        tool: String,
    },

    ToolComplete {
        tool_call_id: String,
        tool: String,
    },

    ToolError {
        tool_call_id: String,
        tool: String,
        error: String,
    },

    /// Progress across a multi-call batch.
    ToolProgress {
        completed: usize,
        total: usize,
    },

    AgentStart {
        max_steps: u32,
        tool_count: usize,
    },

    AgentTurnStart {
        step: u32,
        max_steps: u32,
    },

    AgentLlmCall {
        step: u32,
        message_count: usize,
        tool_count: usize,
    },

    AgentToolCall {
        step: u32,
        tool: String,
        arguments: Value,
    },

    AgentToolResults {
        step: u32,
        count: usize,
    },

    AgentCompletionDetected {
        step: u32,
    },

    AgentCompletion {
        step: u32,
    },

    AgentMaxSteps {
        max_steps: u32,
    },

    AgentError {
        step: u32,
        error: String,
    },

    /// Terminal frame for an agent turn.
    AgentFinalResponse {
        message: String,
        steps_taken: u32,
        max_steps: u32,
    },

    SessionReset {
        session_id: String,
    },

    FileDownload {
        filename: String,
        content_base64: String,
        content_type: String,
    },

    /// Terminal frame for a failed turn. The session stays open.
    Error {
        message: String,
    },
}

impl ServerFrame {
    /// Whether this frame ends a turn (exactly one per turn reaches the
    /// client).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerFrame::ChatResponse { .. }
                | ServerFrame::AgentFinalResponse { .. }
                | ServerFrame::Error { .. }
        )
    }
}
