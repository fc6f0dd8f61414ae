//! Server, tool, and prompt registries.
//!
//! The manager owns one `McpClient` per configured server and two registries
//! keyed by fully-qualified `{server}_{tool}` names. Registries are
//! read-mostly: they are written during (re-)initialization and read on
//! every turn, so they sit behind `std::sync::RwLock` rather than an async
//! lock.
//!
//! The `canvas` pseudo-server is synthesized here: selecting it adds the
//! `canvas_canvas` tool schema without any backing server; execution of that
//! tool is handled by the tool executor, which forwards the content to the
//! display channel.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use confab_core::schema::ToolSchema;
use confab_core::{GatewayError, GatewayResult};
use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::client::McpClient;
use crate::config::{McpServerConfig, McpServerTable};
use crate::error::{McpError, McpResult};
use crate::protocol::CallToolResult;

/// Pseudo-server providing the canvas display tool.
pub const CANVAS_SERVER: &str = "canvas";
/// Fully-qualified name of the canvas pseudo-tool.
pub const CANVAS_TOOL: &str = "canvas_canvas";

/// A discovered tool, registered under its fully-qualified name.
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    pub server: String,
    pub tool: String,
    pub fq_name: String,
    pub description: String,
    pub parameters: Value,
}

/// A discovered prompt, registered under its fully-qualified name.
#[derive(Debug, Clone)]
pub struct RegisteredPrompt {
    pub server: String,
    pub name: String,
    pub fq_name: String,
    pub description: String,
}

/// Resolution and execution surface the tool executor depends on. Kept as a
/// trait so the executor and agent loop are testable without live servers.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Input schema of a registered tool (canvas included).
    fn tool_parameters(&self, fq_name: &str) -> Option<Value>;

    /// Execute a tool call and return its textual payload.
    async fn dispatch(&self, fq_name: &str, arguments: Value) -> GatewayResult<String>;
}

pub struct McpManager {
    servers: BTreeMap<String, McpServerConfig>,
    clients: BTreeMap<String, McpClient>,
    tools: RwLock<BTreeMap<String, RegisteredTool>>,
    prompts: RwLock<BTreeMap<String, RegisteredPrompt>>,
}

impl McpManager {
    /// Build clients for every usable server. A stdio server whose working
    /// directory does not exist is skipped, not fatal.
    pub fn new(table: McpServerTable, project_root: PathBuf, rpc_timeout: Duration) -> Self {
        let mut clients = BTreeMap::new();
        for (name, config) in &table.servers {
            if let Err(e) = config.resolved_cwd(&project_root) {
                warn!(server = %name, "skipping server: {e}");
                continue;
            }
            if let Err(e) = config.transport_kind() {
                warn!(server = %name, "skipping server: {e}");
                continue;
            }
            clients.insert(
                name.clone(),
                McpClient::new(name.clone(), config.clone(), project_root.clone(), rpc_timeout),
            );
        }
        Self {
            servers: table.servers,
            clients,
            tools: RwLock::new(BTreeMap::new()),
            prompts: RwLock::new(BTreeMap::new()),
        }
    }

    // Registry locks recover from poisoning: the maps hold plain data, so
    // whatever a panicking writer left behind is still a usable registry
    // and the next re-initialization replaces it wholesale.
    fn tools_read(&self) -> RwLockReadGuard<'_, BTreeMap<String, RegisteredTool>> {
        self.tools.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn tools_write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, RegisteredTool>> {
        self.tools.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn prompts_read(&self) -> RwLockReadGuard<'_, BTreeMap<String, RegisteredPrompt>> {
        self.prompts.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn prompts_write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, RegisteredPrompt>> {
        self.prompts.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Discover tools and prompts from every server, concurrently. Failures
    /// are aggregated per server and never poison the others; calling this
    /// again performs a clean re-discovery.
    pub async fn initialize(&self) {
        let discoveries = self.clients.values().map(|client| async move {
            let tools = client.list_tools().await;
            let prompts = client.list_prompts().await;
            (client.server_name().to_string(), tools, prompts)
        });
        let results = join_all(discoveries).await;

        let mut tools = BTreeMap::new();
        let mut prompts = BTreeMap::new();
        for (server, tool_result, prompt_result) in results {
            match tool_result {
                Ok(server_tools) => {
                    info!(server = %server, count = server_tools.len(), "discovered tools");
                    for tool in server_tools {
                        let fq_name = format!("{server}_{}", tool.name);
                        tools.insert(
                            fq_name.clone(),
                            RegisteredTool {
                                server: server.clone(),
                                tool: tool.name,
                                fq_name,
                                description: tool.description.unwrap_or_default(),
                                parameters: if tool.input_schema.is_null() {
                                    json!({"type": "object", "properties": {}})
                                } else {
                                    tool.input_schema
                                },
                            },
                        );
                    }
                }
                Err(e) => error!(server = %server, "tool discovery failed: {e}"),
            }
            match prompt_result {
                Ok(server_prompts) => {
                    for prompt in server_prompts {
                        let fq_name = format!("{server}_{}", prompt.name);
                        prompts.insert(
                            fq_name.clone(),
                            RegisteredPrompt {
                                server: server.clone(),
                                name: prompt.name,
                                fq_name,
                                description: prompt.description.unwrap_or_default(),
                            },
                        );
                    }
                }
                Err(e) => error!(server = %server, "prompt discovery failed: {e}"),
            }
        }

        *self.tools_write() = tools;
        *self.prompts_write() = prompts;
    }

    pub fn available_servers(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    pub fn server_info(&self, name: &str) -> Option<&McpServerConfig> {
        self.servers.get(name)
    }

    /// Servers the user may select: a server is authorized iff it requires
    /// no groups or at least one required group matches the user's.
    pub fn authorized_servers(&self, user_groups: &[String]) -> Vec<String> {
        self.servers
            .iter()
            .filter(|(_, config)| {
                config.groups.is_empty()
                    || config.groups.iter().any(|g| user_groups.contains(g))
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn is_exclusive(&self, server: &str) -> bool {
        self.servers
            .get(server)
            .map(|config| config.is_exclusive)
            .unwrap_or(false)
    }

    /// Apply the exclusive-server rule to a selection: when any exclusive
    /// server is present, only exclusive servers survive and tool choice is
    /// forced to required.
    pub fn apply_exclusivity(&self, servers: Vec<String>) -> (Vec<String>, bool) {
        if servers.iter().any(|s| self.is_exclusive(s)) {
            let exclusive: Vec<String> = servers
                .into_iter()
                .filter(|s| self.is_exclusive(s))
                .collect();
            (exclusive, true)
        } else {
            (servers, false)
        }
    }

    /// Map selected fully-qualified tool names to the servers providing
    /// them, preserving first-seen order. The canvas pseudo-tool maps to the
    /// canvas pseudo-server.
    pub fn servers_for_tools(&self, selected_tools: &[String]) -> Vec<String> {
        let registry = self.tools_read();
        let mut servers = Vec::new();
        for fq_name in selected_tools {
            let server = if fq_name == CANVAS_TOOL {
                Some(CANVAS_SERVER.to_string())
            } else {
                registry.get(fq_name).map(|tool| tool.server.clone())
            };
            if let Some(server) = server {
                if !servers.contains(&server) {
                    servers.push(server);
                }
            } else {
                warn!(tool = %fq_name, "selected tool is not registered");
            }
        }
        servers
    }

    /// Schemas for all tools of the given servers, in canonical OpenAI
    /// function form, plus the fq-name -> registration mapping.
    pub fn tools_for_servers(
        &self,
        servers: &[String],
    ) -> (Vec<ToolSchema>, BTreeMap<String, RegisteredTool>) {
        let registry = self.tools_read();
        let mut schemas = Vec::new();
        let mut mapping = BTreeMap::new();

        for server in servers {
            if server == CANVAS_SERVER {
                let canvas = canvas_tool();
                schemas.push(ToolSchema::function(
                    canvas.fq_name.clone(),
                    canvas.description.clone(),
                    canvas.parameters.clone(),
                ));
                mapping.insert(canvas.fq_name.clone(), canvas);
                continue;
            }
            for tool in registry.values().filter(|t| &t.server == server) {
                schemas.push(ToolSchema::function(
                    tool.fq_name.clone(),
                    tool.description.clone(),
                    tool.parameters.clone(),
                ));
                mapping.insert(tool.fq_name.clone(), tool.clone());
            }
        }
        (schemas, mapping)
    }

    /// Look up a registered prompt by fully-qualified name.
    pub fn prompt(&self, fq_name: &str) -> Option<RegisteredPrompt> {
        self.prompts_read().get(fq_name).cloned()
    }

    /// Prompts available from the given servers.
    pub fn prompts_for_servers(&self, servers: &[String]) -> Vec<RegisteredPrompt> {
        let registry = self.prompts_read();
        registry
            .values()
            .filter(|p| servers.contains(&p.server))
            .cloned()
            .collect()
    }

    /// Fetch a prompt's rendered text from its server.
    pub async fn get_prompt(
        &self,
        server: &str,
        prompt_name: &str,
        arguments: Option<Value>,
    ) -> McpResult<String> {
        let client = self
            .clients
            .get(server)
            .ok_or_else(|| McpError::UnknownServer(server.to_string()))?;
        let result = client.get_prompt(prompt_name, arguments).await?;
        let text = result
            .messages
            .iter()
            .map(|m| m.content.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(text)
    }

    /// Execute a tool by fully-qualified name. Resolution goes through the
    /// registry, never through name-splitting conventions.
    pub async fn call_tool(&self, fq_name: &str, arguments: Value) -> McpResult<CallToolResult> {
        let registration = self
            .tools_read()
            .get(fq_name)
            .cloned()
            .ok_or_else(|| McpError::UnknownTool(fq_name.to_string()))?;
        let client = self
            .clients
            .get(&registration.server)
            .ok_or_else(|| McpError::UnknownServer(registration.server.clone()))?;
        client.call_tool(&registration.tool, arguments).await
    }

    #[cfg(test)]
    fn register_tool_for_test(&self, tool: RegisteredTool) {
        self.tools_write().insert(tool.fq_name.clone(), tool);
    }
}

/// Schema of the synthesized canvas pseudo-tool.
pub fn canvas_tool() -> RegisteredTool {
    RegisteredTool {
        server: CANVAS_SERVER.to_string(),
        tool: "canvas".to_string(),
        fq_name: CANVAS_TOOL.to_string(),
        description: "Display final rendered content in a visual canvas panel. \
                      Put the actual content in the canvas, keep discussions in chat."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The content to display in the canvas. Can be markdown, code, or plain text."
                }
            },
            "required": ["content"]
        }),
    }
}

#[async_trait]
impl ToolDispatcher for McpManager {
    fn tool_parameters(&self, fq_name: &str) -> Option<Value> {
        if fq_name == CANVAS_TOOL {
            return Some(canvas_tool().parameters);
        }
        self.tools_read()
            .get(fq_name)
            .map(|tool| tool.parameters.clone())
    }

    async fn dispatch(&self, fq_name: &str, arguments: Value) -> GatewayResult<String> {
        let result = self.call_tool(fq_name, arguments).await?;
        let text = result.text();
        if result.is_error {
            Err(GatewayError::tool_execution(if text.is_empty() {
                format!("{fq_name} reported an error")
            } else {
                text
            }))
        } else {
            Ok(text)
        }
    }
}
