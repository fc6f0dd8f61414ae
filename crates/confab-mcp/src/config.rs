//! MCP server configuration and transport inference.
//!
//! The server table comes from a JSON file mapping server names to entries.
//! Transport selection follows a fixed priority: the explicit `transport`
//! field wins; otherwise a `command` implies stdio, a URL with a scheme
//! implies HTTP (SSE when it ends in `/sse`), and a URL without a scheme is
//! treated as HTTP with `http://` prepended.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{McpError, McpResult};

/// Transport for a configured server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
    Sse,
}

/// One entry in the MCP server table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Explicit transport override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportKind>,

    /// Executable for stdio servers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Working directory, resolved relative to the project root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Endpoint for HTTP/SSE servers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Groups a user must intersect to use this server; empty means public.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,

    /// An exclusive server suppresses all non-exclusive peers for the turn
    /// and forces required tool choice.
    #[serde(default)]
    pub is_exclusive: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl McpServerConfig {
    /// Decide the transport per the inference rules.
    pub fn transport_kind(&self) -> McpResult<TransportKind> {
        if let Some(kind) = self.transport {
            return Ok(kind);
        }
        if self.command.is_some() {
            return Ok(TransportKind::Stdio);
        }
        if let Some(url) = &self.url {
            if url.starts_with("http://") || url.starts_with("https://") {
                if url.trim_end_matches('/').ends_with("/sse") {
                    return Ok(TransportKind::Sse);
                }
                return Ok(TransportKind::Http);
            }
            // Scheme-less URL: HTTP with http:// prepended at connect time.
            return Ok(TransportKind::Http);
        }
        Err(McpError::config(
            "server has neither command nor url".to_string(),
        ))
    }

    /// Endpoint URL with a scheme, for HTTP/SSE transports.
    pub fn endpoint(&self) -> McpResult<String> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| McpError::config("http server requires a url"))?;
        if url.starts_with("http://") || url.starts_with("https://") {
            Ok(url.to_string())
        } else {
            Ok(format!("http://{url}"))
        }
    }

    /// Resolve `cwd` against the project root. A configured but missing
    /// directory is an error; the manager skips the server rather than
    /// failing startup.
    pub fn resolved_cwd(&self, project_root: &Path) -> McpResult<Option<PathBuf>> {
        let Some(cwd) = &self.cwd else {
            return Ok(None);
        };
        let path = if Path::new(cwd).is_absolute() {
            PathBuf::from(cwd)
        } else {
            project_root.join(cwd)
        };
        if !path.is_dir() {
            return Err(McpError::config(format!(
                "working directory does not exist: {}",
                path.display()
            )));
        }
        Ok(Some(path))
    }
}

/// The full server table, as loaded from `mcp.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpServerTable {
    #[serde(default)]
    pub servers: BTreeMap<String, McpServerConfig>,
}

impl McpServerTable {
    pub fn from_json(raw: &str) -> McpResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
