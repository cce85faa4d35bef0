//! LLM provider implementations

mod factory;
mod http_client;
mod openai;
mod router;

pub use factory::{LlmProviderFactory, ProviderKind, ProviderSettings, ProvidersConfig};
pub use http_client::{HttpClient, HttpClientTrait};
pub use openai::OpenAiProvider;
pub use router::ProviderRouter;
