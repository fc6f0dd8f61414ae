//! Process-wide application state.
//!
//! Built once at startup: configuration, the capability-token minter, the
//! rate limiter, the object store, the MCP manager, the LLM caller with its
//! injected RAG retriever, and the message pipeline they compose into.

use std::sync::Arc;

use anyhow::Context;
use confab_auth::{AllowAllGroups, GroupChecker, OriginPolicy, RateLimiter, StaticGroups, TokenMinter};
use confab_llm::{HttpLlmCaller, HttpRagClient, LlmBackend, RagRetriever};
use confab_mcp::McpManager;
use confab_storage::{HttpObjectStore, InMemoryObjectStore, ObjectStore};
use std::time::Duration;
use tracing::{info, warn};

use crate::agent::AgentLoop;
use crate::config::{AppSettings, ConfigManager};
use crate::events::EventDispatcher;
use crate::executor::ToolExecutor;
use crate::pipeline::MessagePipeline;
use crate::router::ModeRouter;
use crate::session::SessionManager;

pub struct AppState {
    pub settings: AppSettings,
    pub config: Arc<ConfigManager>,
    pub sessions: Arc<SessionManager>,
    pub events: Arc<EventDispatcher>,
    pub pipeline: Arc<MessagePipeline>,
    pub store: Arc<dyn ObjectStore>,
    pub minter: Arc<TokenMinter>,
    pub limiter: Arc<RateLimiter>,
    pub origins: OriginPolicy,
    pub groups: Arc<dyn GroupChecker>,
    pub manager: Arc<McpManager>,
}

impl AppState {
    pub async fn build(settings: AppSettings) -> anyhow::Result<Arc<Self>> {
        if settings.capability_secret.is_empty() && !settings.debug {
            anyhow::bail!("CONFAB_CAPABILITY_SECRET must be set outside debug mode");
        }
        let secret = if settings.capability_secret.is_empty() {
            warn!("using an ephemeral capability secret (debug mode)");
            format!("debug-{}", uuid::Uuid::new_v4())
        } else {
            settings.capability_secret.clone()
        };
        let minter = Arc::new(
            TokenMinter::new(secret.into_bytes()).with_ttl(settings.capability_ttl()),
        );

        let store: Arc<dyn ObjectStore> = if settings.storage_use_memory {
            info!("using in-memory object store");
            Arc::new(InMemoryObjectStore::new())
        } else {
            Arc::new(
                HttpObjectStore::new(settings.storage_endpoint.clone(), settings.storage_timeout())
                    .context("building object store client")?,
            )
        };

        let config = Arc::new(ConfigManager::new(settings.clone()));

        let rag: Option<Arc<dyn RagRetriever>> = match &settings.rag_endpoint {
            Some(endpoint) => Some(Arc::new(
                HttpRagClient::new(endpoint.clone(), settings.rag_timeout())
                    .context("building RAG client")?,
            )),
            None => None,
        };

        let catalog = config.llm_catalog();
        let mut caller = HttpLlmCaller::new(catalog, settings.llm_timeout())
            .context("building LLM caller")?;
        if let Some(rag) = &rag {
            caller = caller.with_rag(rag.clone());
        }
        let backend: Arc<dyn LlmBackend> = Arc::new(caller);

        let manager = Arc::new(McpManager::new(
            (*config.mcp_table()).clone(),
            settings.project_root.clone(),
            settings.tool_timeout(),
        ));

        let groups = group_checker(&settings);
        let executor = Arc::new(ToolExecutor::new(
            manager.clone(),
            store.clone(),
            minter.clone(),
        ));
        let router = ModeRouter::new(
            backend.clone(),
            rag,
            manager.clone(),
            groups.clone(),
            executor.clone(),
        );
        let agent = AgentLoop::new(backend, executor);

        let events = Arc::new(EventDispatcher::new());
        let pipeline = Arc::new(MessagePipeline::new(
            router,
            agent,
            store.clone(),
            manager.clone(),
            events.clone(),
            settings.agent_max_steps,
        ));

        Ok(Arc::new(Self {
            origins: OriginPolicy::allowlist(settings.allowed_origins.clone()),
            limiter: Arc::new(RateLimiter::new(
                settings.rate_limit_rpm,
                Duration::from_secs(settings.rate_limit_window_secs),
                settings.rate_limit_per_path,
            )),
            sessions: Arc::new(SessionManager::new()),
            events,
            pipeline,
            store,
            minter,
            groups,
            manager,
            config,
            settings,
        }))
    }
}

/// Group membership source. Debug mode grants everything; otherwise a
/// static table parsed from `CONFAB_USER_GROUPS`
/// (`user@a=group1|group2,user@b=group3`).
fn group_checker(settings: &AppSettings) -> Arc<dyn GroupChecker> {
    if settings.debug {
        return Arc::new(AllowAllGroups);
    }
    let raw = std::env::var("CONFAB_USER_GROUPS").unwrap_or_default();
    Arc::new(parse_static_groups(&raw))
}

fn parse_static_groups(raw: &str) -> StaticGroups {
    let mut groups = StaticGroups::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((user, group_list)) = entry.split_once('=') else {
            warn!(entry, "ignoring malformed group grant");
            continue;
        };
        for group in group_list.split('|').map(str::trim).filter(|g| !g.is_empty()) {
            groups = groups.grant(user.trim(), group);
        }
    }
    groups
}
