use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use super::http_client::HttpClient;
use super::{OpenAiProvider, ProviderRouter};
use crate::domain::{DomainError, LlmProvider};

/// Wire protocol spoken by a configured provider
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Any OpenAI-compatible `/v1/chat/completions` endpoint
    #[default]
    OpenAi,
}

/// One configured model provider
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    /// Prefix used in step model ids (`<id>:<model>`)
    pub id: String,
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    120
}

impl ProviderSettings {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ProviderKind::OpenAi,
            base_url: None,
            api_key: None,
            api_key_env: None,
            timeout_secs: default_request_timeout(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Inline key first, then the named environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_ref()
                .and_then(|name| std::env::var(name).ok())
        })
    }
}

/// Provider section of the application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    /// Provider used for model ids without a known prefix
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub entries: Vec<ProviderSettings>,
}

/// Factory for creating LLM providers
#[derive(Debug)]
pub struct LlmProviderFactory;

impl LlmProviderFactory {
    pub fn create(settings: &ProviderSettings) -> Result<Arc<dyn LlmProvider>, DomainError> {
        let client = HttpClient::with_timeout(Duration::from_secs(settings.timeout_secs))?;

        match settings.kind {
            ProviderKind::OpenAi => {
                let api_key = settings.resolve_api_key().unwrap_or_default();

                if api_key.is_empty() && settings.base_url.is_none() {
                    warn!(provider = %settings.id, "OpenAI provider configured without an API key");
                }

                let provider = match &settings.base_url {
                    Some(url) => OpenAiProvider::with_base_url(client, api_key, url),
                    None => OpenAiProvider::new(client, api_key),
                };

                Ok(Arc::new(provider.with_name(&settings.id)))
            }
        }
    }

    /// Build a router over every configured provider
    pub fn build_router(config: &ProvidersConfig) -> Result<ProviderRouter, DomainError> {
        let mut router = ProviderRouter::new();

        for settings in &config.entries {
            info!(provider = %settings.id, kind = ?settings.kind, "Registering model provider");
            router.register(settings.id.clone(), Self::create(settings)?);
        }

        if let Some(default) = &config.default {
            if !config.entries.iter().any(|entry| &entry.id == default) {
                return Err(DomainError::configuration(format!(
                    "Default provider '{}' is not configured",
                    default
                )));
            }
            router = router.with_default(default.clone());
        }

        Ok(router)
    }
}
