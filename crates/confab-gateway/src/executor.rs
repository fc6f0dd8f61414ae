//! Tool execution.
//!
//! Takes the tool calls an LLM produced, prepares their arguments
//! (lenient JSON parsing, schema-gated username injection, rewriting
//! session filenames into tokenized download URLs), dispatches them through
//! the MCP layer, and post-processes results: artifacts are persisted via
//! the object store, surfaced as `files_update` / `canvas_files` events,
//! and large inline base64 is filtered before the result re-enters the LLM
//! context.
//!
//! Two pseudo-tools never reach a server: `canvas_canvas` forwards its
//! content to the display channel, and the agent completion tool just
//! acknowledges.

use std::collections::BTreeMap;
use std::sync::Arc;

use confab_auth::TokenMinter;
use confab_core::canvas;
use confab_core::schema;
use confab_core::types::session::{FileSource, SessionFileRef};
use confab_core::{Artifact, DisplayConfig, ServerFrame, ToolCallRequest, ToolResult, UpdateType};
use confab_mcp::manager::CANVAS_TOOL;
use confab_mcp::ToolDispatcher;
use confab_storage::ObjectStore;
use futures::future::join_all;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::agent::COMPLETION_TOOL;
use crate::filter::filter_large_content;
use crate::session::Session;

/// Channel for intermediate frames flowing to the client.
pub type UpdateSender = UnboundedSender<ServerFrame>;

/// Artifacts beyond this count are dropped to bound context growth.
pub const MAX_ARTIFACTS: usize = 10;

lazy_static! {
    static ref DOWNLOAD_URL_KEY: Regex =
        Regex::new(r"^/api/files/download/([^?]+)").expect("static regex");
}

pub struct ToolExecutor {
    dispatcher: Arc<dyn ToolDispatcher>,
    store: Arc<dyn ObjectStore>,
    minter: Arc<TokenMinter>,
}

impl ToolExecutor {
    pub fn new(
        dispatcher: Arc<dyn ToolDispatcher>,
        store: Arc<dyn ObjectStore>,
        minter: Arc<TokenMinter>,
    ) -> Self {
        Self {
            dispatcher,
            store,
            minter,
        }
    }

    /// Execute a batch of tool calls. Dispatch runs concurrently; results
    /// come back in the order of the LLM's tool_calls list, and artifact
    /// processing happens in that order too.
    pub async fn execute_tool_calls(
        &self,
        calls: &[ToolCallRequest],
        session: &mut Session,
        updates: &UpdateSender,
    ) -> Vec<ToolResult> {
        let total = calls.len();
        let prepared: Vec<Map<String, Value>> = calls
            .iter()
            .map(|call| self.prepare_arguments(call, &session.user, &session.files))
            .collect();

        for call in calls {
            emit(
                updates,
                ServerFrame::ToolStart {
                    tool_call_id: call.id.clone(),
                    tool: call.function.name.clone(),
                },
            );
        }

        let dispatches = calls.iter().zip(prepared.iter()).map(|(call, args)| {
            let name = call.function.name.clone();
            let args = Value::Object(args.clone());
            async move {
                if name == CANVAS_TOOL {
                    return Ok(canvas_ack(&args));
                }
                if name == COMPLETION_TOOL {
                    return Ok("All requested work is complete.".to_string());
                }
                self.dispatcher.dispatch(&name, args).await
            }
        });
        let outcomes = join_all(dispatches).await;

        let mut results = Vec::with_capacity(total);
        for (index, (call, outcome)) in calls.iter().zip(outcomes).enumerate() {
            let mut result = match outcome {
                Ok(text) => {
                    if call.function.name == CANVAS_TOOL {
                        // Forward the content to the display channel.
                        let content = prepared[index]
                            .get("content")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        emit(
                            updates,
                            ServerFrame::IntermediateUpdate {
                                update_type: UpdateType::CanvasContent,
                                data: json!({ "content": content }),
                            },
                        );
                    }
                    let filtered = filter_large_content(&text);
                    let (artifacts, display) = extract_artifacts(&filtered);
                    let mut result = ToolResult::success(call.id.clone(), filtered);
                    result.artifacts = artifacts;
                    result.display = display;
                    emit(
                        updates,
                        ServerFrame::ToolComplete {
                            tool_call_id: call.id.clone(),
                            tool: call.function.name.clone(),
                        },
                    );
                    result
                }
                Err(e) => {
                    error!(tool = %call.function.name, "tool execution failed: {e}");
                    emit(
                        updates,
                        ServerFrame::ToolError {
                            tool_call_id: call.id.clone(),
                            tool: call.function.name.clone(),
                            error: e.user_message(),
                        },
                    );
                    ToolResult::failure(call.id.clone(), e.user_message())
                }
            };

            if total > 1 {
                emit(
                    updates,
                    ServerFrame::ToolProgress {
                        completed: index + 1,
                        total,
                    },
                );
            }

            self.process_artifacts(&mut result, session, updates).await;
            results.push(result);
        }
        results
    }

    /// Argument-preparation pipeline, pure over its inputs.
    pub fn prepare_arguments(
        &self,
        call: &ToolCallRequest,
        user: &str,
        files: &BTreeMap<String, SessionFileRef>,
    ) -> Map<String, Value> {
        let mut args = call.parsed_arguments();

        // Inject the username only when the tool's schema declares it.
        if let Some(parameters) = self.dispatcher.tool_parameters(&call.function.name) {
            if schema::declares_property(&parameters, "username") {
                args.insert("username".to_string(), Value::String(user.to_string()));
            }
        }

        // Rewrite a session filename into a tokenized download URL so the
        // tool can fetch without cookies; preserve the logical name.
        if let Some(Value::String(filename)) = args.get("filename").cloned() {
            if let Some(reference) = files.get(&filename).filter(|r| !r.key.is_empty()) {
                let url = self.minter.download_url(user, &reference.key);
                args.entry("original_filename".to_string())
                    .or_insert_with(|| Value::String(filename.clone()));
                args.insert("filename".to_string(), Value::String(url.clone()));
                args.entry("file_url".to_string())
                    .or_insert_with(|| Value::String(url));
            }
        }

        // Element-wise for filename lists; unmapped names pass through.
        if let Some(Value::Array(names)) = args.get("file_names").cloned() {
            let mut originals = Vec::new();
            let mut urls = Vec::new();
            for name in names {
                let Value::String(name) = name else { continue };
                originals.push(Value::String(name.clone()));
                match files.get(&name).filter(|r| !r.key.is_empty()) {
                    Some(reference) => {
                        urls.push(Value::String(self.minter.download_url(user, &reference.key)))
                    }
                    None => urls.push(Value::String(name)),
                }
            }
            if !urls.is_empty() {
                args.entry("original_file_names".to_string())
                    .or_insert_with(|| Value::Array(originals));
                args.insert("file_names".to_string(), Value::Array(urls.clone()));
                args.entry("file_urls".to_string())
                    .or_insert_with(|| Value::Array(urls));
            }
        }

        args
    }

    /// Persist a result's artifacts and surface them to the client.
    async fn process_artifacts(
        &self,
        result: &mut ToolResult,
        session: &mut Session,
        updates: &UpdateSender,
    ) {
        if result.artifacts.is_empty() {
            return;
        }
        if result.artifacts.len() > MAX_ARTIFACTS {
            warn!(
                dropped = result.artifacts.len() - MAX_ARTIFACTS,
                "capping tool artifacts"
            );
            result.artifacts.truncate(MAX_ARTIFACTS);
        }

        let user = session.user.clone();
        let mut organized: Vec<Value> = Vec::new();

        for artifact in &result.artifacts {
            if let Some(b64) = &artifact.b64 {
                match self
                    .store
                    .upload(
                        &user,
                        &artifact.name,
                        b64,
                        &artifact.mime,
                        BTreeMap::new(),
                        FileSource::Tool,
                    )
                    .await
                {
                    Ok(metadata) => {
                        session.files.insert(
                            artifact.name.clone(),
                            SessionFileRef {
                                key: metadata.key.clone(),
                                content_type: metadata.content_type.clone(),
                                size: metadata.size,
                                last_modified: Some(metadata.last_modified),
                                source: FileSource::Tool,
                                tool_call_id: Some(result.tool_call_id.clone()),
                                incomplete: false,
                            },
                        );
                        organized.push(json!({
                            "filename": artifact.name,
                            "key": metadata.key,
                            "size": metadata.size,
                            "content_type": metadata.content_type,
                            "source": "tool",
                        }));
                    }
                    Err(e) => error!(name = %artifact.name, "failed to persist artifact: {e}"),
                }
            } else if let Some(url) = &artifact.url {
                // A backend URL references an already-stored object; verify
                // ownership and record the reference without re-upload.
                let Some(stored_key) = extract_download_key(url) else {
                    warn!(name = %artifact.name, "artifact URL is not a download URL");
                    continue;
                };
                match self.store.get(&user, &stored_key).await {
                    Ok(Some(object)) => {
                        session.files.insert(
                            artifact.name.clone(),
                            SessionFileRef {
                                key: stored_key.clone(),
                                content_type: object.metadata.content_type.clone(),
                                size: object.metadata.size,
                                last_modified: Some(object.metadata.last_modified),
                                source: FileSource::Tool,
                                tool_call_id: Some(result.tool_call_id.clone()),
                                incomplete: false,
                            },
                        );
                        organized.push(json!({
                            "filename": artifact.name,
                            "key": stored_key,
                            "size": object.metadata.size,
                            "content_type": object.metadata.content_type,
                            "source": "tool",
                        }));
                    }
                    Ok(None) => warn!(name = %artifact.name, "artifact URL names a missing object"),
                    Err(e) => warn!(name = %artifact.name, "artifact URL rejected: {e}"),
                }
            } else if !session.files.contains_key(&artifact.name) {
                session.files.insert(
                    artifact.name.clone(),
                    SessionFileRef::incomplete(FileSource::Tool),
                );
            }
        }

        if !organized.is_empty() {
            info!(count = organized.len(), "tool produced files");
            emit(
                updates,
                ServerFrame::IntermediateUpdate {
                    update_type: UpdateType::FilesUpdate,
                    data: json!({ "files": organized }),
                },
            );
        }

        self.notify_canvas_files(result, session, updates);
    }

    /// Emit `canvas_files` for the displayable subset, primary file first.
    fn notify_canvas_files(
        &self,
        result: &ToolResult,
        session: &Session,
        updates: &UpdateSender,
    ) {
        let Some(display) = &result.display else {
            return;
        };

        let mut canvas_files: Vec<Value> = result
            .artifacts
            .iter()
            .filter(|artifact| canvas::is_canvas_displayable(&artifact.name))
            .filter_map(|artifact| {
                let reference = session.files.get(&artifact.name)?;
                Some(json!({
                    "filename": artifact.name,
                    "viewer": canvas::viewer_for(&artifact.name),
                    "key": reference.key,
                    "size": reference.size,
                    "mime_type": artifact.mime,
                }))
            })
            .collect();

        if canvas_files.is_empty() {
            debug!("no canvas-displayable artifacts");
            return;
        }

        if let Some(primary) = &display.primary_file {
            canvas_files.sort_by_key(|f| {
                if f["filename"].as_str() == Some(primary.as_str()) {
                    0
                } else {
                    1
                }
            });
        }

        emit(
            updates,
            ServerFrame::IntermediateUpdate {
                update_type: UpdateType::CanvasFiles,
                data: json!({
                    "files": canvas_files,
                    "display": result.display,
                }),
            },
        );
    }
}

fn canvas_ack(args: &Value) -> String {
    let content = args.get("content").and_then(Value::as_str).unwrap_or_default();
    if content.len() > 100 {
        let mut end = 100;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        format!("Canvas content displayed: {}...", &content[..end])
    } else {
        format!("Canvas content displayed: {content}")
    }
}

/// Parse the stored-object key out of `/api/files/download/{key}?...`.
pub fn extract_download_key(url: &str) -> Option<String> {
    DOWNLOAD_URL_KEY
        .captures(url)
        .map(|caps| caps[1].to_string())
}

/// Parse `artifacts` and `display` blocks out of a tool's JSON payload.
fn extract_artifacts(text: &str) -> (Vec<Artifact>, Option<DisplayConfig>) {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) else {
        return (Vec::new(), None);
    };

    let artifacts = map
        .get("artifacts")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match serde_json::from_value::<Artifact>(item.clone()) {
                    Ok(artifact) => Some(artifact),
                    Err(e) => {
                        warn!("skipping malformed artifact: {e}");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let display = map
        .get("display")
        .and_then(|d| serde_json::from_value::<DisplayConfig>(d.clone()).ok());

    (artifacts, display)
}

/// Best-effort frame emission. A dropped receiver means the client is gone;
/// in-flight work continues and its results are discarded with the session.
fn emit(updates: &UpdateSender, frame: ServerFrame) {
    if updates.send(frame).is_err() {
        debug!("update channel closed, discarding frame");
    }
}
