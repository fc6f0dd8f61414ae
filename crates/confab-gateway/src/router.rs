//! Mode routing.
//!
//! Classifies a turn by the user's selections and drives the matching flow:
//! RAG-only, plain LLM, RAG-enriched, tool-enabled, RAG+tools, or the agent
//! loop (driven from the pipeline). Tool selection is validated against
//! group authorization, the exclusive-server rule is applied, and when tool
//! calls come back they are executed and synthesized into a final answer -
//! unless the only tool called was the canvas, whose content is already on
//! screen.

use std::sync::Arc;

use confab_auth::GroupChecker;
use confab_core::schema::ToolSchema;
use confab_core::types::session::SessionFileRef;
use confab_core::{GatewayError, GatewayResult, Message, ServerFrame, UpdateType};
use confab_llm::{LlmBackend, LlmResponse, RagRetriever, ToolChoice};
use confab_mcp::manager::CANVAS_TOOL;
use confab_mcp::McpManager;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::executor::{ToolExecutor, UpdateSender};
use crate::session::Session;

const SYNTHESIS_PROMPT: &str = "Using the tool results above, compose the final answer to the \
user's request: \"{question}\". Summarize what was done and present the outcome clearly. Do not \
repeat raw tool output verbatim unless the user asked for it.";

/// What the router needs to know about servers and tools. `McpManager`
/// implements this; tests substitute a stub.
pub trait ToolRegistry: Send + Sync {
    fn servers_for_tools(&self, selected_tools: &[String]) -> Vec<String>;

    fn server_groups(&self, server: &str) -> Vec<String>;

    fn apply_exclusivity(&self, servers: Vec<String>) -> (Vec<String>, bool);

    fn tools_for_servers(&self, servers: &[String]) -> Vec<ToolSchema>;
}

impl ToolRegistry for McpManager {
    fn servers_for_tools(&self, selected_tools: &[String]) -> Vec<String> {
        McpManager::servers_for_tools(self, selected_tools)
    }

    fn server_groups(&self, server: &str) -> Vec<String> {
        self.server_info(server)
            .map(|config| config.groups.clone())
            .unwrap_or_default()
    }

    fn apply_exclusivity(&self, servers: Vec<String>) -> (Vec<String>, bool) {
        McpManager::apply_exclusivity(self, servers)
    }

    fn tools_for_servers(&self, servers: &[String]) -> Vec<ToolSchema> {
        McpManager::tools_for_servers(self, servers).0
    }
}

/// Per-turn routing input.
#[derive(Debug, Clone)]
pub struct RouteContext {
    pub model: String,
    pub content: String,
    pub selected_tools: Vec<String>,
    pub data_sources: Vec<String>,
    pub only_rag: bool,
    pub tool_choice_required: bool,
    pub temperature: Option<f32>,
}

/// Routing result: the assistant text plus metadata recorded on the
/// assistant message.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub response: String,
    pub metadata: Option<serde_json::Value>,
}

pub struct ModeRouter {
    backend: Arc<dyn LlmBackend>,
    rag: Option<Arc<dyn RagRetriever>>,
    registry: Arc<dyn ToolRegistry>,
    groups: Arc<dyn GroupChecker>,
    executor: Arc<ToolExecutor>,
}

impl ModeRouter {
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        rag: Option<Arc<dyn RagRetriever>>,
        registry: Arc<dyn ToolRegistry>,
        groups: Arc<dyn GroupChecker>,
        executor: Arc<ToolExecutor>,
    ) -> Self {
        Self {
            backend,
            rag,
            registry,
            groups,
            executor,
        }
    }

    /// Route and execute one turn. `messages` is the prompt snapshot
    /// (history plus the ephemeral files manifest).
    pub async fn route(
        &self,
        session: &mut Session,
        ctx: &RouteContext,
        messages: Vec<Message>,
        updates: &UpdateSender,
    ) -> GatewayResult<RouteOutcome> {
        let has_tools = !ctx.selected_tools.is_empty();
        let has_rag = !ctx.data_sources.is_empty();

        if ctx.only_rag && has_rag {
            return self.rag_only(session, ctx, &messages).await;
        }
        if !has_tools && !has_rag {
            let response = self
                .backend
                .call_plain(&ctx.model, &messages, ctx.temperature)
                .await?;
            return Ok(RouteOutcome {
                response,
                metadata: None,
            });
        }
        if !has_tools {
            let response = self
                .backend
                .call_with_rag(
                    &ctx.model,
                    &messages,
                    &session.user,
                    &ctx.data_sources,
                    ctx.temperature,
                )
                .await?;
            return Ok(RouteOutcome {
                response,
                metadata: Some(json!({ "data_sources": ctx.data_sources })),
            });
        }
        self.tools_mode(session, ctx, messages, updates).await
    }

    /// RAG-only: the retrieval result is the answer. Failures here are
    /// terminal for the turn; there is nothing to degrade to.
    async fn rag_only(
        &self,
        session: &mut Session,
        ctx: &RouteContext,
        messages: &[Message],
    ) -> GatewayResult<RouteOutcome> {
        let rag = self
            .rag
            .as_ref()
            .ok_or_else(|| GatewayError::upstream("rag", "no retrieval service configured"))?;
        let data_source = ctx
            .data_sources
            .first()
            .ok_or_else(|| GatewayError::validation("no data source selected"))?;

        let response = rag
            .query(&session.user, data_source, messages)
            .await
            .map_err(GatewayError::from)?;
        Ok(RouteOutcome {
            response: response.content,
            metadata: Some(json!({
                "data_sources": ctx.data_sources,
                "rag": response.metadata,
            })),
        })
    }

    /// Tool-enabled flow, optionally RAG-enriched.
    async fn tools_mode(
        &self,
        session: &mut Session,
        ctx: &RouteContext,
        mut messages: Vec<Message>,
        updates: &UpdateSender,
    ) -> GatewayResult<RouteOutcome> {
        let (schemas, forced_required) =
            self.resolve_tools(&session.user, &ctx.selected_tools)?;
        if schemas.is_empty() {
            warn!("no authorized tools in selection, answering without tools");
            let response = self
                .backend
                .call_plain(&ctx.model, &messages, ctx.temperature)
                .await?;
            return Ok(RouteOutcome {
                response,
                metadata: None,
            });
        }

        let tool_choice = if forced_required || ctx.tool_choice_required {
            ToolChoice::Required
        } else {
            ToolChoice::Auto
        };

        let has_rag = !ctx.data_sources.is_empty();
        let llm_response: LlmResponse = if has_rag {
            self.backend
                .call_with_rag_and_tools(
                    &ctx.model,
                    &messages,
                    &session.user,
                    &ctx.data_sources,
                    &schemas,
                    tool_choice,
                )
                .await?
        } else {
            self.backend
                .call_with_tools(&ctx.model, &messages, &schemas, tool_choice)
                .await?
        };

        let metadata = has_rag.then(|| json!({ "data_sources": ctx.data_sources }));

        if !llm_response.has_tool_calls() {
            return Ok(RouteOutcome {
                response: llm_response.text(),
                metadata,
            });
        }

        // Execute the calls and feed results back into the conversation.
        messages.push(Message::assistant_with_tool_calls(
            llm_response.text(),
            llm_response.tool_calls.clone(),
        ));
        let results = self
            .executor
            .execute_tool_calls(&llm_response.tool_calls, session, updates)
            .await;
        for result in &results {
            messages.push(Message::tool(
                result.tool_call_id.clone(),
                result.content.clone(),
            ));
        }

        // Canvas-only turns skip synthesis; the content is already shown.
        let only_canvas = llm_response
            .tool_calls
            .iter()
            .all(|call| call.function.name == CANVAS_TOOL);
        if only_canvas {
            let response = match llm_response.content {
                Some(content) if !content.trim().is_empty() => content,
                _ => "Content displayed in canvas.".to_string(),
            };
            return Ok(RouteOutcome {
                response,
                metadata,
            });
        }

        // Refresh the manifest so the synthesis sees files the tools added.
        if let Some(manifest) = files_manifest(&session.files) {
            messages.push(manifest);
        }
        messages.push(Message::system(
            SYNTHESIS_PROMPT.replace("{question}", &latest_user_question(&messages)),
        ));

        let synthesis = self
            .backend
            .call_plain(&ctx.model, &messages, ctx.temperature)
            .await?;
        if !synthesis.trim().is_empty() {
            let _ = updates.send(ServerFrame::IntermediateUpdate {
                update_type: UpdateType::ToolSynthesis,
                data: json!({ "message": synthesis }),
            });
        }
        info!(tools = llm_response.tool_calls.len(), "tool turn synthesized");
        Ok(RouteOutcome {
            response: synthesis,
            metadata,
        })
    }

    /// Validate the tool selection: resolve servers, drop unauthorized
    /// ones, apply exclusivity, and collect the schemas for the surviving
    /// selected tools.
    pub fn resolve_tools(
        &self,
        user: &str,
        selected_tools: &[String],
    ) -> GatewayResult<(Vec<ToolSchema>, bool)> {
        let servers = self.registry.servers_for_tools(selected_tools);
        let authorized: Vec<String> = servers
            .into_iter()
            .filter(|server| {
                let groups = self.registry.server_groups(server);
                let allowed = groups.is_empty()
                    || groups.iter().any(|g| self.groups.is_user_in_group(user, g));
                if !allowed {
                    warn!(user, server, "dropping unauthorized server from selection");
                }
                allowed
            })
            .collect();

        let (servers, forced_required) = self.registry.apply_exclusivity(authorized);
        let schemas = self
            .registry
            .tools_for_servers(&servers)
            .into_iter()
            .filter(|schema| selected_tools.contains(&schema.function.name))
            .collect();
        Ok((schemas, forced_required))
    }
}

/// Ephemeral system message listing the session's known file names, without
/// contents.
pub fn files_manifest(files: &BTreeMap<String, SessionFileRef>) -> Option<Message> {
    if files.is_empty() {
        return None;
    }
    let listing = files
        .keys()
        .map(|name| format!("- {name}"))
        .collect::<Vec<_>>()
        .join("\n");
    Some(Message::system(format!(
        "Available session files:\n{listing}\n\n(You can ask to open or analyze any of these by \
         name. Their contents are not in this prompt; tools can fetch them.)"
    )))
}

fn latest_user_question(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| matches!(m.role, confab_core::Role::User) && !m.content.is_empty())
        .map(|m| m.content.clone())
        .unwrap_or_else(|| "the user's last request".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_core::types::session::FileSource;

    #[test]
    fn manifest_lists_names_only() {
        let mut files = BTreeMap::new();
        assert!(files_manifest(&files).is_none());

        files.insert(
            "report.pdf".to_string(),
            SessionFileRef::incomplete(FileSource::User),
        );
        files.insert(
            "data.csv".to_string(),
            SessionFileRef::incomplete(FileSource::Tool),
        );
        let manifest = files_manifest(&files).unwrap();
        assert!(matches!(manifest.role, confab_core::Role::System));
        assert!(manifest.content.contains("- report.pdf"));
        assert!(manifest.content.contains("- data.csv"));
    }

    #[test]
    fn latest_user_question_walks_backwards() {
        let messages = vec![
            Message::user("first"),
            Message::assistant("answer"),
            Message::user("second"),
            Message::system("manifest"),
        ];
        assert_eq!(latest_user_question(&messages), "second");
        assert_eq!(latest_user_question(&[]), "the user's last request");
    }
}
