//! The model catalog.
//!
//! Loaded from YAML, either a map of name -> entry or a list of entries
//! carrying their own `model_name`. API keys may be `${ENVVAR}` references;
//! expansion happens at load time and unresolved references stay as-is so a
//! missing variable is visible in diagnostics without ever logging the
//! resolved value.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{LlmError, LlmResult};

lazy_static! {
    static ref ENV_REF: Regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex");
}

/// One model entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider-side model identifier.
    pub model_name: String,

    /// Endpoint base URL; also drives provider qualification.
    pub model_url: String,

    /// May be a `${ENVVAR}` reference.
    #[serde(default)]
    pub api_key: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_headers: BTreeMap<String, String>,
}

impl ModelConfig {
    /// Provider-qualified identifier, decided by the endpoint URL.
    pub fn qualified_model(&self) -> String {
        let url = self.model_url.as_str();
        for provider in ["openrouter", "openai", "anthropic", "google"] {
            if url.contains(provider) {
                return format!("{provider}/{}", self.model_name);
            }
        }
        self.model_name.clone()
    }

    /// Whether the endpoint is a custom OpenAI-compatible deployment rather
    /// than a recognized provider.
    pub fn is_custom_endpoint(&self) -> bool {
        !["openrouter", "api.openai.com", "api.anthropic.com"]
            .iter()
            .any(|p| self.model_url.contains(p))
    }

    /// True when the api key still holds an unresolved `${ENVVAR}`.
    pub fn api_key_unresolved(&self) -> bool {
        ENV_REF.is_match(&self.api_key)
    }
}

/// All configured models, keyed by the user-facing name.
#[derive(Debug, Clone, Default)]
pub struct LlmCatalog {
    models: BTreeMap<String, ModelConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Map { models: BTreeMap<String, ModelConfig> },
    List { models: Vec<ModelConfig> },
}

impl LlmCatalog {
    pub fn new(models: BTreeMap<String, ModelConfig>) -> Self {
        let mut catalog = Self { models };
        catalog.expand_env();
        catalog
    }

    /// Parse catalog YAML, accepting both the map and list layouts.
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        let file: CatalogFile = serde_yaml::from_str(raw)?;
        let models = match file {
            CatalogFile::Map { models } => models,
            CatalogFile::List { models } => models
                .into_iter()
                .map(|m| (m.model_name.clone(), m))
                .collect(),
        };
        Ok(Self::new(models))
    }

    pub fn get(&self, model: &str) -> LlmResult<&ModelConfig> {
        self.models
            .get(model)
            .ok_or_else(|| LlmError::ModelNotFound(model.to_string()))
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Expand `${ENVVAR}` in api keys and extra headers. Unresolved
    /// references are left untouched and flagged in logs by name only.
    fn expand_env(&mut self) {
        for (name, config) in self.models.iter_mut() {
            config.api_key = expand(&config.api_key);
            for value in config.extra_headers.values_mut() {
                *value = expand(value);
            }
            if config.api_key_unresolved() {
                warn!(model = %name, "api key references an unset environment variable");
            }
        }
    }
}

fn expand(value: &str) -> String {
    ENV_REF
        .replace_all(value, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_map_and_list_layouts_both_parse() {
        let map_form = r#"
models:
  fast:
    model_name: gpt-4o-mini
    model_url: https://api.openai.com/v1
    api_key: sk-test
"#;
        let catalog = LlmCatalog::from_yaml(map_form).unwrap();
        assert_eq!(catalog.get("fast").unwrap().model_name, "gpt-4o-mini");

        let list_form = r#"
models:
  - model_name: local-llama
    model_url: http://llm.internal:8000/v1
    api_key: none
    max_tokens: 2048
"#;
        let catalog = LlmCatalog::from_yaml(list_form).unwrap();
        assert_eq!(catalog.get("local-llama").unwrap().max_tokens, Some(2048));
    }

    #[test]
    fn provider_qualification_follows_endpoint() {
        let openrouter = ModelConfig {
            model_name: "mistral-7b".into(),
            model_url: "https://openrouter.ai/api/v1".into(),
            api_key: String::new(),
            description: None,
            max_tokens: None,
            temperature: None,
            extra_headers: BTreeMap::new(),
        };
        assert_eq!(openrouter.qualified_model(), "openrouter/mistral-7b");
        assert!(!openrouter.is_custom_endpoint());

        let custom = ModelConfig {
            model_url: "http://llm.internal:8000/v1".into(),
            ..openrouter.clone()
        };
        assert_eq!(custom.qualified_model(), "mistral-7b");
        assert!(custom.is_custom_endpoint());
    }

    #[test]
    fn env_references_expand_and_unset_ones_survive() {
        std::env::set_var("CONFAB_TEST_KEY_X", "resolved-secret");
        let yaml = r#"
models:
  a:
    model_name: m
    model_url: http://x/v1
    api_key: ${CONFAB_TEST_KEY_X}
  b:
    model_name: m2
    model_url: http://x/v1
    api_key: ${CONFAB_TEST_KEY_MISSING}
"#;
        let catalog = LlmCatalog::from_yaml(yaml).unwrap();
        assert_eq!(catalog.get("a").unwrap().api_key, "resolved-secret");
        assert!(!catalog.get("a").unwrap().api_key_unresolved());
        assert_eq!(catalog.get("b").unwrap().api_key, "${CONFAB_TEST_KEY_MISSING}");
        assert!(catalog.get("b").unwrap().api_key_unresolved());
    }

    #[test]
    fn unknown_model_errors() {
        let catalog = LlmCatalog::default();
        assert!(matches!(
            catalog.get("ghost"),
            Err(LlmError::ModelNotFound(_))
        ));
    }
}
