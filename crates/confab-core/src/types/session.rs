//! Session file references.
//!
//! A session tracks files by logical name only; the bytes live in per-user
//! object storage. Resetting a session drops these references, never the
//! stored objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who put a file into the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSource {
    User,
    Tool,
}

impl FileSource {
    /// Storage key segment for this source (`uploads` or `generated`).
    pub fn key_segment(&self) -> &'static str {
        match self {
            FileSource::User => "uploads",
            FileSource::Tool => "generated",
        }
    }
}

/// Reference from a session to a stored object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFileRef {
    /// Object-store key; empty only when `incomplete` is set.
    #[serde(default)]
    pub key: String,

    #[serde(default)]
    pub content_type: String,

    #[serde(default)]
    pub size: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,

    pub source: FileSource,

    /// Tool call that produced the file, when `source` is `Tool`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Set when a tool named a file but supplied no content.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub incomplete: bool,
}

impl SessionFileRef {
    pub fn incomplete(source: FileSource) -> Self {
        Self {
            key: String::new(),
            content_type: String::new(),
            size: 0,
            last_modified: None,
            source,
            tool_call_id: None,
            incomplete: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_maps_to_key_segment() {
        assert_eq!(FileSource::User.key_segment(), "uploads");
        assert_eq!(FileSource::Tool.key_segment(), "generated");
    }

    #[test]
    fn incomplete_flag_only_serialized_when_set() {
        let complete = SessionFileRef {
            key: "users/a@b/uploads/1_deadbeef_x.txt".into(),
            content_type: "text/plain".into(),
            size: 3,
            last_modified: None,
            source: FileSource::User,
            tool_call_id: None,
            incomplete: false,
        };
        let value = serde_json::to_value(&complete).unwrap();
        assert!(value.get("incomplete").is_none());

        let partial = SessionFileRef::incomplete(FileSource::Tool);
        let value = serde_json::to_value(&partial).unwrap();
        assert_eq!(value["incomplete"], true);
    }
}
