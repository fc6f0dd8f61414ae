//! Settings and configuration loading.
//!
//! Three inputs: process environment (app settings), the YAML LLM catalog,
//! and the JSON MCP server table. Catalog files are searched in
//! `{root}/config/overrides`, then `{root}/config/defaults`, then the root
//! itself; first found wins. Malformed files log an error and yield empty
//! but valid objects so startup degrades instead of crashing. Reload drops
//! the cached objects.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use confab_llm::LlmCatalog;
use confab_mcp::McpServerTable;
use tracing::{error, info, warn};

/// Application settings, every field environment-addressable.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub port: u16,
    pub debug: bool,
    /// Identity used when the trusted header is absent in debug mode.
    pub debug_user: String,
    pub admin_group: String,

    pub rate_limit_rpm: u32,
    pub rate_limit_window_secs: u64,
    pub rate_limit_per_path: bool,
    pub allowed_origins: Vec<String>,

    pub capability_secret: String,
    pub capability_ttl_secs: u64,

    pub storage_endpoint: String,
    /// Use the in-memory store instead of the remote file service.
    pub storage_use_memory: bool,
    pub rag_endpoint: Option<String>,

    pub llm_timeout_secs: u64,
    pub rag_timeout_secs: u64,
    pub storage_timeout_secs: u64,
    pub tool_timeout_secs: u64,

    pub agent_max_steps: u32,

    pub llm_config_file: String,
    pub mcp_config_file: String,
    pub project_root: PathBuf,
    pub json_logs: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            port: 8080,
            debug: false,
            debug_user: "dev@localhost".to_string(),
            admin_group: "confab-admins".to_string(),
            rate_limit_rpm: 120,
            rate_limit_window_secs: 60,
            rate_limit_per_path: false,
            allowed_origins: Vec::new(),
            capability_secret: String::new(),
            capability_ttl_secs: 3600,
            storage_endpoint: "http://localhost:9000".to_string(),
            storage_use_memory: false,
            rag_endpoint: None,
            llm_timeout_secs: 30,
            rag_timeout_secs: 20,
            storage_timeout_secs: 30,
            tool_timeout_secs: 30,
            agent_max_steps: 10,
            llm_config_file: "llm-config.yaml".to_string(),
            mcp_config_file: "mcp.json".to_string(),
            project_root: PathBuf::from("."),
            json_logs: false,
        }
    }
}

impl AppSettings {
    /// Read settings from `CONFAB_*` environment variables, falling back to
    /// defaults field by field.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("CONFAB_PORT", defaults.port),
            debug: env_flag("CONFAB_DEBUG", defaults.debug),
            debug_user: env_string("CONFAB_DEBUG_USER", defaults.debug_user),
            admin_group: env_string("CONFAB_ADMIN_GROUP", defaults.admin_group),
            rate_limit_rpm: env_parse("CONFAB_RATE_LIMIT_RPM", defaults.rate_limit_rpm),
            rate_limit_window_secs: env_parse(
                "CONFAB_RATE_LIMIT_WINDOW_SECS",
                defaults.rate_limit_window_secs,
            ),
            rate_limit_per_path: env_flag("CONFAB_RATE_LIMIT_PER_PATH", defaults.rate_limit_per_path),
            allowed_origins: env_list("CONFAB_ALLOWED_ORIGINS"),
            capability_secret: env_string("CONFAB_CAPABILITY_SECRET", defaults.capability_secret),
            capability_ttl_secs: env_parse("CONFAB_CAPABILITY_TTL_SECS", defaults.capability_ttl_secs),
            storage_endpoint: env_string("CONFAB_STORAGE_ENDPOINT", defaults.storage_endpoint),
            storage_use_memory: env_flag("CONFAB_STORAGE_USE_MEMORY", defaults.storage_use_memory),
            rag_endpoint: std::env::var("CONFAB_RAG_ENDPOINT").ok().filter(|v| !v.is_empty()),
            llm_timeout_secs: env_parse("CONFAB_LLM_TIMEOUT_SECS", defaults.llm_timeout_secs),
            rag_timeout_secs: env_parse("CONFAB_RAG_TIMEOUT_SECS", defaults.rag_timeout_secs),
            storage_timeout_secs: env_parse(
                "CONFAB_STORAGE_TIMEOUT_SECS",
                defaults.storage_timeout_secs,
            ),
            tool_timeout_secs: env_parse("CONFAB_TOOL_TIMEOUT_SECS", defaults.tool_timeout_secs),
            agent_max_steps: env_parse("CONFAB_AGENT_MAX_STEPS", defaults.agent_max_steps),
            llm_config_file: env_string("CONFAB_LLM_CONFIG_FILE", defaults.llm_config_file),
            mcp_config_file: env_string("CONFAB_MCP_CONFIG_FILE", defaults.mcp_config_file),
            project_root: PathBuf::from(env_string(
                "CONFAB_PROJECT_ROOT",
                defaults.project_root.display().to_string(),
            )),
            json_logs: env_flag("CONFAB_JSON_LOGS", defaults.json_logs),
        }
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn rag_timeout(&self) -> Duration {
        Duration::from_secs(self.rag_timeout_secs)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn capability_ttl(&self) -> Duration {
        Duration::from_secs(self.capability_ttl_secs)
    }
}

fn env_string(name: &str, default: String) -> String {
    std::env::var(name).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var = name, "unparseable value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Lazily loads and caches the LLM catalog and MCP server table.
pub struct ConfigManager {
    settings: AppSettings,
    llm: RwLock<Option<Arc<LlmCatalog>>>,
    mcp: RwLock<Option<Arc<McpServerTable>>>,
}

impl ConfigManager {
    pub fn new(settings: AppSettings) -> Self {
        Self {
            settings,
            llm: RwLock::new(None),
            mcp: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    /// Candidate locations for a config file, override dir first.
    fn search_paths(&self, file_name: &str) -> Vec<PathBuf> {
        let root = &self.settings.project_root;
        vec![
            root.join("config").join("overrides").join(file_name),
            root.join("config").join("defaults").join(file_name),
            root.join(file_name),
        ]
    }

    fn read_first(&self, file_name: &str) -> Option<(PathBuf, String)> {
        for path in self.search_paths(file_name) {
            match std::fs::read_to_string(&path) {
                Ok(raw) => {
                    info!(path = %path.display(), "loaded config file");
                    return Some((path, raw));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    error!(path = %path.display(), "failed reading config file: {e}");
                    continue;
                }
            }
        }
        warn!(file = file_name, "config file not found in any search path");
        None
    }

    /// The LLM catalog; a malformed or missing file yields an empty catalog.
    pub fn llm_catalog(&self) -> Arc<LlmCatalog> {
        // Cache locks recover from poisoning; worst case is a reload.
        if let Some(catalog) = self
            .llm
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return catalog.clone();
        }
        let catalog = match self.read_first(&self.settings.llm_config_file) {
            Some((path, raw)) => match LlmCatalog::from_yaml(&raw) {
                Ok(catalog) => {
                    info!(models = catalog.len(), "loaded LLM catalog");
                    catalog
                }
                Err(e) => {
                    error!(path = %path.display(), "malformed LLM catalog: {e}");
                    LlmCatalog::default()
                }
            },
            None => LlmCatalog::default(),
        };
        let catalog = Arc::new(catalog);
        *self.llm.write().unwrap_or_else(PoisonError::into_inner) = Some(catalog.clone());
        catalog
    }

    /// The MCP server table; a malformed or missing file yields an empty
    /// table.
    pub fn mcp_table(&self) -> Arc<McpServerTable> {
        if let Some(table) = self
            .mcp
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return table.clone();
        }
        let table = match self.read_first(&self.settings.mcp_config_file) {
            Some((path, raw)) => match McpServerTable::from_json(&raw) {
                Ok(table) => {
                    info!(servers = table.servers.len(), "loaded MCP server table");
                    table
                }
                Err(e) => {
                    error!(path = %path.display(), "malformed MCP server table: {e}");
                    McpServerTable::default()
                }
            },
            None => McpServerTable::default(),
        };
        let table = Arc::new(table);
        *self.mcp.write().unwrap_or_else(PoisonError::into_inner) = Some(table.clone());
        table
    }

    /// Drop the cached catalogs; the next access reloads from disk.
    pub fn reload(&self) {
        *self.llm.write().unwrap_or_else(PoisonError::into_inner) = None;
        *self.mcp.write().unwrap_or_else(PoisonError::into_inner) = None;
        info!("configuration caches dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn settings_with_root(root: &Path) -> AppSettings {
        AppSettings {
            project_root: root.to_path_buf(),
            ..AppSettings::default()
        }
    }

    #[test]
    fn override_dir_wins_over_defaults_and_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("config/overrides")).unwrap();
        std::fs::create_dir_all(root.join("config/defaults")).unwrap();
        std::fs::write(
            root.join("config/overrides/llm-config.yaml"),
            "models:\n  winner:\n    model_name: a\n    model_url: http://x/v1\n",
        )
        .unwrap();
        std::fs::write(
            root.join("config/defaults/llm-config.yaml"),
            "models:\n  loser:\n    model_name: b\n    model_url: http://x/v1\n",
        )
        .unwrap();

        let manager = ConfigManager::new(settings_with_root(root));
        let catalog = manager.llm_catalog();
        assert!(catalog.get("winner").is_ok());
        assert!(catalog.get("loser").is_err());
    }

    #[test]
    fn malformed_files_degrade_to_empty() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("llm-config.yaml"), ":: not yaml ::[").unwrap();
        std::fs::write(tmp.path().join("mcp.json"), "{broken").unwrap();

        let manager = ConfigManager::new(settings_with_root(tmp.path()));
        assert!(manager.llm_catalog().is_empty());
        assert!(manager.mcp_table().servers.is_empty());
    }

    #[test]
    fn reload_picks_up_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mcp.json");
        std::fs::write(&path, r#"{"servers": {}}"#).unwrap();

        let manager = ConfigManager::new(settings_with_root(tmp.path()));
        assert!(manager.mcp_table().servers.is_empty());

        std::fs::write(&path, r#"{"servers": {"calc": {"command": "python3"}}}"#).unwrap();
        // Cached until reload drops it.
        assert!(manager.mcp_table().servers.is_empty());
        manager.reload();
        assert_eq!(manager.mcp_table().servers.len(), 1);
    }

    #[test]
    fn env_helpers_parse_and_default() {
        std::env::set_var("CONFAB_TEST_FLAG_Q", "true");
        assert!(env_flag("CONFAB_TEST_FLAG_Q", false));
        std::env::set_var("CONFAB_TEST_LIST_Q", "https://a.example, https://b.example");
        assert_eq!(
            env_list("CONFAB_TEST_LIST_Q"),
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(env_parse("CONFAB_TEST_UNSET_Q", 42u32), 42);
    }
}
