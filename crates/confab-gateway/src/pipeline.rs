//! The per-connection message pipeline.
//!
//! A session is a state machine over incoming frames: `chat` runs the full
//! ingest -> classify -> execute -> respond flow, `reset_session` clears
//! state, `download_file` streams a stored object back, and anything else
//! earns an `error` frame without closing the connection. Frames for one
//! session are handled strictly in arrival order by the owning connection
//! task, so a reset requested mid-turn queues behind the turn.
//!
//! Exactly one terminal frame (`chat_response`, `agent_final_response`, or
//! `error`) is emitted per turn.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use confab_core::types::session::{FileSource, SessionFileRef};
use confab_core::{
    ChatRequest, ClientFrame, GatewayError, GatewayResult, Message, Role, ServerFrame, UpdateType,
};
use confab_mcp::McpManager;
use confab_storage::ObjectStore;
use serde_json::json;
use tracing::{error, info, warn};

use crate::agent::AgentLoop;
use crate::events::{EventDispatcher, EventPayload, SessionEvent};
use crate::executor::UpdateSender;
use crate::router::{files_manifest, ModeRouter, RouteContext};
use crate::session::Session;

/// Source of custom system prompts advertised by prompt servers.
#[async_trait]
pub trait PromptSource: Send + Sync {
    /// Rendered text of a prompt by fully-qualified name, `None` when
    /// unknown.
    async fn resolve_prompt(&self, fq_name: &str) -> GatewayResult<Option<String>>;
}

#[async_trait]
impl PromptSource for McpManager {
    async fn resolve_prompt(&self, fq_name: &str) -> GatewayResult<Option<String>> {
        let Some(registration) = self.prompt(fq_name) else {
            return Ok(None);
        };
        let text = self
            .get_prompt(&registration.server, &registration.name, None)
            .await?;
        Ok(Some(text))
    }
}

pub struct MessagePipeline {
    router: ModeRouter,
    agent: AgentLoop,
    store: Arc<dyn ObjectStore>,
    prompts: Arc<dyn PromptSource>,
    events: Arc<EventDispatcher>,
    default_agent_max_steps: u32,
}

impl MessagePipeline {
    pub fn new(
        router: ModeRouter,
        agent: AgentLoop,
        store: Arc<dyn ObjectStore>,
        prompts: Arc<dyn PromptSource>,
        events: Arc<EventDispatcher>,
        default_agent_max_steps: u32,
    ) -> Self {
        Self {
            router,
            agent,
            store,
            prompts,
            events,
            default_agent_max_steps,
        }
    }

    /// Handle one frame. Terminal frames are sent through `updates`; the
    /// session always survives frame-level failures.
    pub async fn handle_frame(
        &self,
        session: &mut Session,
        frame: ClientFrame,
        updates: &UpdateSender,
    ) {
        match frame {
            ClientFrame::Chat(request) => self.handle_chat(session, request, updates).await,
            ClientFrame::ResetSession => {
                session.reset();
                info!(session_id = %session.id, "session reset");
                let _ = updates.send(ServerFrame::SessionReset {
                    session_id: session.id.clone(),
                });
            }
            ClientFrame::DownloadFile { filename } => {
                self.handle_download(session, &filename, updates).await
            }
        }
    }

    /// A frame that failed to parse: answer with an error frame, keep the
    /// connection.
    pub fn handle_malformed(&self, detail: &str, updates: &UpdateSender) {
        let _ = updates.send(ServerFrame::Error {
            message: format!("Unsupported or malformed frame: {detail}"),
        });
    }

    async fn handle_chat(
        &self,
        session: &mut Session,
        request: ChatRequest,
        updates: &UpdateSender,
    ) {
        self.emit(
            session,
            SessionEvent::BeforeMessageProcessing,
            json!({ "model": request.model }),
        )
        .await;

        match self.process_chat(session, request, updates).await {
            Ok(terminal) => {
                self.emit(session, SessionEvent::BeforeResponseSend, json!({})).await;
                let _ = updates.send(terminal);
                self.emit(session, SessionEvent::AfterResponseSend, json!({})).await;
            }
            Err(e) => {
                error!(session_id = %session.id, "chat turn failed: {e}");
                self.emit(
                    session,
                    SessionEvent::MessageError,
                    json!({ "error": e.to_string() }),
                )
                .await;
                let _ = updates.send(ServerFrame::Error {
                    message: e.user_message(),
                });
            }
        }
    }

    async fn process_chat(
        &self,
        session: &mut Session,
        request: ChatRequest,
        updates: &UpdateSender,
    ) -> GatewayResult<ServerFrame> {
        if request.content.is_empty() || request.model.is_empty() {
            return Err(GatewayError::validation(
                "message content and model name are required",
            ));
        }

        session.touch();
        self.ingest_files(session, &request.files, updates).await;
        self.apply_custom_prompts(session, &request.selected_prompts).await;

        if request.agent_mode {
            return self.run_agent_turn(session, request, updates).await;
        }

        self.emit(
            session,
            SessionEvent::BeforeUserMessageAdded,
            json!({ "content_length": request.content.len() }),
        )
        .await;
        session.history.push(Message::user(&request.content))?;
        self.emit(session, SessionEvent::AfterUserMessageAdded, json!({})).await;

        let mut messages = session.history.to_vec();
        if let Some(manifest) = files_manifest(&session.files) {
            messages.push(manifest);
        }

        let ctx = RouteContext {
            model: request.model.clone(),
            content: request.content.clone(),
            selected_tools: request.selected_tools.clone(),
            data_sources: request.selected_data_sources.clone(),
            only_rag: request.only_rag,
            tool_choice_required: request.tool_choice_required,
            temperature: request.temperature,
        };

        self.emit(
            session,
            SessionEvent::BeforeLlmCall,
            json!({ "message_count": messages.len() }),
        )
        .await;
        let outcome = self.router.route(session, &ctx, messages, updates).await?;
        self.emit(session, SessionEvent::AfterLlmCall, json!({})).await;

        let mut assistant = Message::assistant(&outcome.response);
        if let Some(metadata) = outcome.metadata {
            assistant = assistant.with_metadata(metadata);
        }
        session.history.push(assistant)?;
        session.touch();
        self.emit(session, SessionEvent::AfterAssistantMessageAdded, json!({})).await;

        Ok(ServerFrame::ChatResponse {
            message: outcome.response,
            model: request.model,
            session_id: session.id.clone(),
        })
    }

    async fn run_agent_turn(
        &self,
        session: &mut Session,
        request: ChatRequest,
        updates: &UpdateSender,
    ) -> GatewayResult<ServerFrame> {
        let max_steps = request.agent_max_steps.unwrap_or(self.default_agent_max_steps);
        let (tools, _forced) = self
            .router
            .resolve_tools(&session.user, &request.selected_tools)?;

        // Snapshot before appending so the loop's own user message is the
        // only copy of the request in its prompt.
        let mut base_messages = session.history.to_vec();
        if let Some(manifest) = files_manifest(&session.files) {
            base_messages.push(manifest);
        }

        self.emit(session, SessionEvent::BeforeUserMessageAdded, json!({})).await;
        session.history.push(Message::user(&request.content))?;
        self.emit(session, SessionEvent::AfterUserMessageAdded, json!({})).await;

        self.emit(session, SessionEvent::BeforeLlmCall, json!({ "agent": true })).await;
        let outcome = self
            .agent
            .run(
                session,
                &request.model,
                &request.content,
                base_messages,
                tools,
                max_steps,
                updates,
            )
            .await;
        self.emit(session, SessionEvent::AfterLlmCall, json!({ "agent": true })).await;

        session.history.push(
            Message::assistant(&outcome.response)
                .with_metadata(json!({ "agent_steps": outcome.steps })),
        )?;
        session.touch();
        self.emit(session, SessionEvent::AfterAssistantMessageAdded, json!({})).await;

        info!(
            steps = outcome.steps,
            reason = ?outcome.reason,
            "agent turn finished"
        );
        Ok(ServerFrame::AgentFinalResponse {
            message: outcome.response,
            steps_taken: outcome.steps,
            max_steps,
        })
    }

    /// On the session's first turn, selected custom prompts replace the
    /// default system prompt. A prompt that cannot be fetched is skipped.
    async fn apply_custom_prompts(&self, session: &mut Session, selected_prompts: &[String]) {
        if selected_prompts.is_empty() || session.history.count_role(Role::User) > 0 {
            return;
        }
        let mut parts = Vec::new();
        for fq_name in selected_prompts {
            match self.prompts.resolve_prompt(fq_name).await {
                Ok(Some(text)) if !text.trim().is_empty() => parts.push(text),
                Ok(_) => warn!(prompt = %fq_name, "selected prompt is unknown or empty"),
                Err(e) => warn!(prompt = %fq_name, "could not fetch prompt: {e}"),
            }
        }
        if !parts.is_empty() {
            info!(count = parts.len(), "applying custom system prompts");
            session.history.set_system_prompt(parts.join("\n\n"));
        }
    }

    /// Upload user files attached to the frame before classification.
    async fn ingest_files(
        &self,
        session: &mut Session,
        files: &BTreeMap<String, String>,
        updates: &UpdateSender,
    ) {
        if files.is_empty() {
            return;
        }
        let mut organized = Vec::new();
        for (filename, content_base64) in files {
            match self
                .store
                .upload(
                    &session.user,
                    filename,
                    content_base64,
                    "",
                    BTreeMap::new(),
                    FileSource::User,
                )
                .await
            {
                Ok(metadata) => {
                    session.files.insert(
                        filename.clone(),
                        SessionFileRef {
                            key: metadata.key.clone(),
                            content_type: metadata.content_type.clone(),
                            size: metadata.size,
                            last_modified: Some(metadata.last_modified),
                            source: FileSource::User,
                            tool_call_id: None,
                            incomplete: false,
                        },
                    );
                    organized.push(json!({
                        "filename": filename,
                        "key": metadata.key,
                        "size": metadata.size,
                        "content_type": metadata.content_type,
                        "source": "user",
                    }));
                }
                Err(e) => error!(filename, "failed uploading user file: {e}"),
            }
        }
        if !organized.is_empty() {
            info!(count = organized.len(), "ingested user files");
            let _ = updates.send(ServerFrame::IntermediateUpdate {
                update_type: UpdateType::FilesUpdate,
                data: json!({ "files": organized }),
            });
        }
    }

    async fn handle_download(
        &self,
        session: &mut Session,
        filename: &str,
        updates: &UpdateSender,
    ) {
        let Some(reference) = session.files.get(filename).filter(|r| !r.key.is_empty()) else {
            let _ = updates.send(ServerFrame::Error {
                message: format!("Unknown session file: {filename}"),
            });
            return;
        };
        match self.store.get(&session.user, &reference.key).await {
            Ok(Some(object)) => {
                let _ = updates.send(ServerFrame::FileDownload {
                    filename: filename.to_string(),
                    content_base64: object.content_base64,
                    content_type: object.metadata.content_type,
                });
            }
            Ok(None) => {
                let _ = updates.send(ServerFrame::Error {
                    message: format!("File no longer available: {filename}"),
                });
            }
            Err(e) => {
                let _ = updates.send(ServerFrame::Error {
                    message: GatewayError::from(e).user_message(),
                });
            }
        }
    }

    async fn emit(&self, session: &Session, event: SessionEvent, data: serde_json::Value) {
        self.events
            .emit(
                event,
                EventPayload {
                    session_id: session.id.clone(),
                    user: session.user.clone(),
                    data,
                },
            )
            .await;
    }
}
