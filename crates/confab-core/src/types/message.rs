//! Conversation messages and ordered history.
//!
//! History is an append-only sequence of role-tagged messages. The only
//! structural rule the gateway enforces is the tool-ordering invariant: a
//! `tool` message must answer a tool call announced by the closest preceding
//! `assistant` message. Everything else (alternation, system placement) is
//! left to the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::types::tool::ToolCallRequest;

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single conversation entry. Immutable once appended to history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    /// May be empty when `tool_calls` is present.
    #[serde(default)]
    pub content: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,

    /// Required for `tool` messages, rejected for every other role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant message announcing tool calls; content may be empty.
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            metadata: None,
        }
    }

    /// Tool result message. The id must name a call announced by the
    /// preceding assistant message; `MessageHistory::push` checks this.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            metadata: None,
        }
    }
}

/// Ordered, append-only message history for a session.
#[derive(Debug, Clone, Default)]
pub struct MessageHistory {
    messages: Vec<Message>,
}

impl MessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, enforcing the tool-ordering invariant.
    pub fn push(&mut self, message: Message) -> GatewayResult<()> {
        match message.role {
            Role::Tool => {
                let id = message.tool_call_id.as_deref().ok_or_else(|| {
                    GatewayError::validation("tool message requires a tool_call_id")
                })?;
                if !self.pending_tool_call_ids().iter().any(|p| p.as_str() == id) {
                    return Err(GatewayError::validation(format!(
                        "tool message answers unknown tool_call_id {id}"
                    )));
                }
            }
            _ => {
                if message.tool_call_id.is_some() {
                    return Err(GatewayError::validation(
                        "tool_call_id is only valid on tool messages",
                    ));
                }
            }
        }
        self.messages.push(message);
        Ok(())
    }

    /// Tool-call ids announced by the most recent assistant message, if it
    /// is the tail of the conversation (possibly followed by tool replies).
    fn pending_tool_call_ids(&self) -> Vec<String> {
        for message in self.messages.iter().rev() {
            match message.role {
                Role::Tool => continue,
                Role::Assistant => {
                    return message
                        .tool_calls
                        .iter()
                        .flatten()
                        .map(|tc| tc.id.clone())
                        .collect();
                }
                _ => break,
            }
        }
        Vec::new()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn first(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn count_role(&self, role: Role) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }

    /// Install or replace the leading system prompt. The one sanctioned
    /// mutation of appended history: custom prompts selected on the first
    /// turn swap out the default system message.
    pub fn set_system_prompt(&mut self, content: impl Into<String>) {
        match self.messages.first_mut() {
            Some(message) if message.role == Role::System => message.content = content.into(),
            _ => self.messages.insert(0, Message::system(content)),
        }
    }

    /// Snapshot of the history for an LLM call.
    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tool::{FunctionCall, ToolCallRequest};

    fn call(id: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: "srv_tool".to_string(),
                arguments: "{}".to_string(),
            },
        }
    }

    #[test]
    fn tool_message_requires_matching_assistant_call() {
        let mut history = MessageHistory::new();
        history.push(Message::user("run it")).unwrap();

        // No assistant tool calls yet: tool message is rejected.
        assert!(history.push(Message::tool("c1", "out")).is_err());

        history
            .push(Message::assistant_with_tool_calls("", vec![call("c1")]))
            .unwrap();
        history.push(Message::tool("c1", "out")).unwrap();

        // A second reply to an unknown id still fails.
        assert!(history.push(Message::tool("c9", "out")).is_err());
    }

    #[test]
    fn tool_call_id_rejected_on_non_tool_roles() {
        let mut history = MessageHistory::new();
        let mut bad = Message::user("hello");
        bad.tool_call_id = Some("c1".to_string());
        assert!(history.push(bad).is_err());
    }

    #[test]
    fn role_counts_track_appends() {
        let mut history = MessageHistory::new();
        history.push(Message::system("sys")).unwrap();
        history.push(Message::user("hi")).unwrap();
        history.push(Message::assistant("hello")).unwrap();
        assert_eq!(history.count_role(Role::User), 1);
        assert_eq!(history.count_role(Role::Assistant), 1);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn system_prompt_replaces_or_prepends() {
        let mut history = MessageHistory::new();
        history.push(Message::user("hi")).unwrap();
        history.set_system_prompt("custom");
        assert_eq!(history.first().unwrap().content, "custom");
        assert_eq!(history.len(), 2);

        history.set_system_prompt("replaced");
        assert_eq!(history.first().unwrap().content, "replaced");
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn roles_serialize_lowercase() {
        let msg = Message::assistant("ok");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "assistant");
        assert!(value.get("tool_call_id").is_none());
    }
}
