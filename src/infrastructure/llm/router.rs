//! Provider Router
//!
//! Routes `providerId:model` ids to the registered provider. Ids without a
//! known provider prefix go to the default provider unchanged.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{DomainError, LlmProvider, LlmRequest, LlmResponse};

#[derive(Debug, Default)]
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    default_provider: Option<String>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under `id`. The first registration becomes the default.
    pub fn register(&mut self, id: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        let id = id.into();

        if self.default_provider.is_none() {
            self.default_provider = Some(id.clone());
        }

        self.providers.insert(id, provider);
    }

    pub fn with_provider(mut self, id: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        self.register(id, provider);
        self
    }

    pub fn with_default(mut self, id: impl Into<String>) -> Self {
        self.default_provider = Some(id.into());
        self
    }

    pub fn provider_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Split a model id into its provider and the provider-local model name
    pub fn route<'a>(
        &self,
        model_id: &'a str,
    ) -> Result<(&Arc<dyn LlmProvider>, &'a str), DomainError> {
        if let Some((prefix, model)) = model_id.split_once(':') {
            if let Some(provider) = self.providers.get(prefix) {
                return Ok((provider, model));
            }
        }

        self.default_provider
            .as_ref()
            .and_then(|id| self.providers.get(id))
            .map(|provider| (provider, model_id))
            .ok_or_else(|| {
                DomainError::provider(
                    "router",
                    format!("No provider configured for model '{}'", model_id),
                )
            })
    }
}

#[async_trait]
impl LlmProvider for ProviderRouter {
    async fn chat(&self, model: &str, request: LlmRequest) -> Result<LlmResponse, DomainError> {
        let (provider, local_model) = self.route(model)?;

        debug!(
            provider = %provider.provider_name(),
            model = %local_model,
            "Routing chat request"
        );

        provider.chat(local_model, request).await
    }

    fn provider_name(&self) -> &str {
        "router"
    }
}
