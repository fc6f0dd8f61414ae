//! Shared scripted doubles for pipeline tests: an LLM backend that replays
//! queued responses, a static tool registry/dispatcher pair, and a stub
//! retriever. All in-process; frames are read straight off the pipeline's
//! real update channel.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use confab_auth::{AllowAllGroups, TokenMinter};
use confab_core::schema::ToolSchema;
use confab_core::{GatewayError, GatewayResult, Message, ServerFrame, ToolCallRequest};
use confab_gateway::agent::AgentLoop;
use confab_gateway::events::EventDispatcher;
use confab_gateway::executor::ToolExecutor;
use confab_gateway::pipeline::MessagePipeline;
use confab_gateway::router::{ModeRouter, ToolRegistry};
use confab_llm::{LlmBackend, LlmResponse, LlmResult, RagMetadata, RagResponse, RagRetriever, ToolChoice};
use confab_mcp::ToolDispatcher;
use confab_storage::InMemoryObjectStore;
use serde_json::{json, Value};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// LLM double replaying queued responses.
#[derive(Default)]
pub struct ScriptedBackend {
    plain: Mutex<VecDeque<String>>,
    tool: Mutex<VecDeque<LlmResponse>>,
    pub llm_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_plain(&self, response: impl Into<String>) {
        self.plain.lock().unwrap().push_back(response.into());
    }

    pub fn queue_tools(&self, response: LlmResponse) {
        self.tool.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.llm_calls.load(Ordering::SeqCst)
    }

    fn next_plain(&self) -> String {
        self.plain
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "ok".to_string())
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn call_plain(
        &self,
        _model: &str,
        _messages: &[Message],
        _temperature: Option<f32>,
    ) -> LlmResult<String> {
        self.llm_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.next_plain())
    }

    async fn call_plain_streaming(
        &self,
        model: &str,
        messages: &[Message],
        temperature: Option<f32>,
        on_delta: UnboundedSender<String>,
    ) -> LlmResult<String> {
        let text = self.call_plain(model, messages, temperature).await?;
        let _ = on_delta.send(text.clone());
        Ok(text)
    }

    async fn call_with_tools(
        &self,
        _model: &str,
        _messages: &[Message],
        _tools: &[ToolSchema],
        _tool_choice: ToolChoice,
    ) -> LlmResult<LlmResponse> {
        self.llm_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tool.lock().unwrap().pop_front().unwrap_or_else(|| {
            LlmResponse {
                content: Some(self.next_plain()),
                tool_calls: Vec::new(),
            }
        }))
    }

    async fn call_with_rag(
        &self,
        model: &str,
        messages: &[Message],
        _user: &str,
        _data_sources: &[String],
        temperature: Option<f32>,
    ) -> LlmResult<String> {
        self.call_plain(model, messages, temperature).await
    }

    async fn call_with_rag_and_tools(
        &self,
        model: &str,
        messages: &[Message],
        _user: &str,
        _data_sources: &[String],
        tools: &[ToolSchema],
        tool_choice: ToolChoice,
    ) -> LlmResult<LlmResponse> {
        self.call_with_tools(model, messages, tools, tool_choice).await
    }
}

/// Retrieval stub: fixed content or scripted failure.
pub struct StubRetriever {
    pub fail: bool,
}

#[async_trait]
impl RagRetriever for StubRetriever {
    async fn query(
        &self,
        _user: &str,
        data_source: &str,
        _messages: &[Message],
    ) -> LlmResult<RagResponse> {
        if self.fail {
            return Err(confab_llm::LlmError::Rag("retrieval service down".into()));
        }
        Ok(RagResponse {
            content: "CTX".to_string(),
            metadata: Some(RagMetadata {
                data_source: data_source.to_string(),
                ..RagMetadata::default()
            }),
        })
    }
}

/// Static registry + dispatcher double. Tools are `{server}_{tool}` entries
/// with a schema and a canned dispatch payload.
#[derive(Default)]
pub struct StaticTools {
    schemas: BTreeMap<String, Value>,
    payloads: BTreeMap<String, Result<String, String>>,
    prompts: BTreeMap<String, String>,
    pub dispatched: Mutex<Vec<(String, Value)>>,
}

impl StaticTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(
        mut self,
        fq_name: &str,
        schema: Value,
        payload: Result<String, String>,
    ) -> Self {
        self.schemas.insert(fq_name.to_string(), schema);
        self.payloads.insert(fq_name.to_string(), payload);
        self
    }

    pub fn with_prompt(mut self, fq_name: &str, text: &str) -> Self {
        self.prompts.insert(fq_name.to_string(), text.to_string());
        self
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatched.lock().unwrap().len()
    }

    pub fn dispatched_args(&self, index: usize) -> Value {
        self.dispatched.lock().unwrap()[index].1.clone()
    }
}

impl ToolRegistry for StaticTools {
    fn servers_for_tools(&self, selected_tools: &[String]) -> Vec<String> {
        let mut servers = Vec::new();
        for fq in selected_tools {
            let server = if fq == confab_mcp::manager::CANVAS_TOOL {
                Some(confab_mcp::manager::CANVAS_SERVER.to_string())
            } else if self.schemas.contains_key(fq) {
                fq.rsplit_once('_').map(|(s, _)| s.to_string())
            } else {
                None
            };
            if let Some(server) = server {
                if !servers.contains(&server) {
                    servers.push(server);
                }
            }
        }
        servers
    }

    fn server_groups(&self, _server: &str) -> Vec<String> {
        Vec::new()
    }

    fn apply_exclusivity(&self, servers: Vec<String>) -> (Vec<String>, bool) {
        (servers, false)
    }

    fn tools_for_servers(&self, servers: &[String]) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = Vec::new();
        if servers.iter().any(|s| s == confab_mcp::manager::CANVAS_SERVER) {
            let canvas = confab_mcp::manager::canvas_tool();
            schemas.push(ToolSchema::function(
                canvas.fq_name,
                canvas.description,
                canvas.parameters,
            ));
        }
        schemas.extend(
            self.schemas
                .iter()
                .filter(|(fq, _)| {
                    fq.rsplit_once('_')
                        .map(|(s, _)| servers.contains(&s.to_string()))
                        .unwrap_or(false)
                })
                .map(|(fq, schema)| ToolSchema::function(fq.clone(), "test tool", schema.clone())),
        );
        schemas
    }
}

#[async_trait]
impl confab_gateway::pipeline::PromptSource for StaticTools {
    async fn resolve_prompt(&self, fq_name: &str) -> confab_core::GatewayResult<Option<String>> {
        Ok(self.prompts.get(fq_name).cloned())
    }
}

#[async_trait]
impl ToolDispatcher for StaticTools {
    fn tool_parameters(&self, fq_name: &str) -> Option<Value> {
        self.schemas.get(fq_name).cloned()
    }

    async fn dispatch(&self, fq_name: &str, arguments: Value) -> GatewayResult<String> {
        self.dispatched
            .lock()
            .unwrap()
            .push((fq_name.to_string(), arguments));
        match self.payloads.get(fq_name) {
            Some(Ok(payload)) => Ok(payload.clone()),
            Some(Err(error)) => Err(GatewayError::tool_execution(error.clone())),
            None => Err(GatewayError::validation(format!("unknown tool: {fq_name}"))),
        }
    }
}

pub struct Harness {
    pub pipeline: MessagePipeline,
    pub backend: Arc<ScriptedBackend>,
    pub tools: Arc<StaticTools>,
    pub store: Arc<InMemoryObjectStore>,
    pub updates: confab_gateway::executor::UpdateSender,
    pub outbox: UnboundedReceiver<ServerFrame>,
}

pub fn harness_with(tools: StaticTools, retriever: Option<Arc<dyn RagRetriever>>) -> Harness {
    let backend = Arc::new(ScriptedBackend::new());
    let tools = Arc::new(tools);
    let store = Arc::new(InMemoryObjectStore::new());
    let minter = Arc::new(TokenMinter::new(b"test-secret".to_vec()));
    let executor = Arc::new(ToolExecutor::new(tools.clone(), store.clone(), minter));

    let router = ModeRouter::new(
        backend.clone(),
        retriever,
        tools.clone(),
        Arc::new(AllowAllGroups),
        executor.clone(),
    );
    let agent = AgentLoop::new(backend.clone(), executor);
    let pipeline = MessagePipeline::new(
        router,
        agent,
        store.clone(),
        tools.clone(),
        Arc::new(EventDispatcher::new()),
        10,
    );

    let (updates, outbox) = unbounded_channel();
    Harness {
        pipeline,
        backend,
        tools,
        store,
        updates,
        outbox,
    }
}

pub fn harness() -> Harness {
    harness_with(StaticTools::new(), None)
}

impl Harness {
    /// Drain every frame currently buffered.
    pub fn frames(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbox.try_recv() {
            frames.push(serde_json::to_value(&frame).unwrap());
        }
        frames
    }
}

pub fn chat_frame(body: Value) -> confab_core::ClientFrame {
    let mut frame = json!({ "type": "chat" });
    for (key, value) in body.as_object().unwrap() {
        frame[key] = value.clone();
    }
    serde_json::from_value(frame).unwrap()
}

pub fn text_response(text: &str) -> LlmResponse {
    LlmResponse {
        content: Some(text.to_string()),
        tool_calls: Vec::new(),
    }
}

pub fn tool_call_response(calls: &[(&str, &str, &str)]) -> LlmResponse {
    LlmResponse {
        content: None,
        tool_calls: calls
            .iter()
            .map(|(id, name, args)| ToolCallRequest::new(*id, *name, *args))
            .collect(),
    }
}

pub fn frame_types(frames: &[Value]) -> Vec<String> {
    frames
        .iter()
        .map(|f| f["type"].as_str().unwrap_or("?").to_string())
        .collect()
}
