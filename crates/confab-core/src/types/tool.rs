//! Tool calls, results, and artifacts.
//!
//! Two shapes exist for a tool call: the wire form the LLM emits
//! (`ToolCallRequest`, arguments as a raw JSON string) and the dispatch form
//! the tool layer executes (`ToolCall`, arguments as a parsed object map).
//! The executor owns the conversion, including the lenient parsing rules for
//! malformed argument strings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tool call as produced by the model, OpenAI function-calling shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,

    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,

    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Fully-qualified `{server}_{tool}` name.
    pub name: String,

    /// Raw JSON text; may be empty or malformed.
    #[serde(default)]
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Parse the argument string leniently: non-object JSON values are
    /// wrapped as `{"_value": x}`, parse failures collapse to `{}`.
    pub fn parsed_arguments(&self) -> Map<String, Value> {
        let raw = self.function.arguments.trim();
        if raw.is_empty() {
            return Map::new();
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                let mut map = Map::new();
                map.insert("_value".to_string(), other);
                map
            }
            Err(_) => Map::new(),
        }
    }
}

/// Tool call in dispatch form: arguments already parsed and injected.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// Result of executing one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,

    /// Textual payload fed back to the model.
    pub content: String,

    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplayConfig>,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            success: true,
            error: None,
            artifacts: Vec::new(),
            display: None,
        }
    }

    pub fn failure(tool_call_id: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            tool_call_id: tool_call_id.into(),
            content: format!("Tool execution failed: {error}"),
            success: false,
            error: Some(error),
            artifacts: Vec::new(),
            display: None,
        }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<Artifact>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_display(mut self, display: DisplayConfig) -> Self {
        self.display = Some(display);
        self
    }
}

/// A file produced by a tool. Exactly one of `b64`/`url` is authoritative;
/// the gateway upgrades inline base64 bodies to stored objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,

    #[serde(default = "octet_stream")]
    pub mime: String,

    #[serde(default)]
    pub size: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub b64: Option<String>,

    /// Backend-relative download URL (`/api/files/download/{key}`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer: Option<String>,
}

fn octet_stream() -> String {
    "application/octet-stream".to_string()
}

/// Display hints attached to a tool result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default)]
    pub open_canvas: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_file: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_argument_parsing() {
        let object = ToolCallRequest::new("c1", "srv_t", r#"{"a": 1}"#);
        assert_eq!(object.parsed_arguments()["a"], 1);

        let scalar = ToolCallRequest::new("c2", "srv_t", "42");
        assert_eq!(scalar.parsed_arguments()["_value"], 42);

        let broken = ToolCallRequest::new("c3", "srv_t", "{nope");
        assert!(broken.parsed_arguments().is_empty());

        let empty = ToolCallRequest::new("c4", "srv_t", "");
        assert!(empty.parsed_arguments().is_empty());
    }

    #[test]
    fn failure_result_carries_error_text() {
        let result = ToolResult::failure("c1", "connection refused");
        assert!(!result.success);
        assert!(result.content.contains("connection refused"));
        assert_eq!(result.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn artifact_defaults_fill_mime() {
        let artifact: Artifact = serde_json::from_value(serde_json::json!({
            "name": "out.png",
            "b64": "aGk=",
        }))
        .unwrap();
        assert_eq!(artifact.mime, "application/octet-stream");
        assert_eq!(artifact.size, 0);
    }
}
