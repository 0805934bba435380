mod convert;
#[cfg(feature = "registry")]
mod register;
mod stream;
mod types;

use std::sync::Arc;

use bldr_llm::{
    LanguageModel, LanguageModelBackend, ModelProvider, ModelProviderBackend, ModelRequest,
    PlanResponse,
};

#[cfg(feature = "registry")]
pub use register::{register, register_compatible};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Configuration for an OpenAI-compatible provider.
pub struct OpenAIConfig {
    /// Provider id reported by models created from this config.
    pub name: String,
    pub api_key: String,
    pub base_url: String,
    /// Send `reasoning_effort` for thinking requests. Models without
    /// reasoning support reject the parameter.
    pub reasoning: bool,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            name: "openai".into(),
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.into(),
            reasoning: false,
        }
    }
}

/// Create an OpenAI-compatible provider with the given config.
pub fn provider(config: OpenAIConfig) -> ModelProvider {
    ModelProvider::new(OpenAIProvider {
        state: Arc::new(ProviderState {
            client: reqwest::Client::new(),
            config,
        }),
    })
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

struct ProviderState {
    client: reqwest::Client,
    config: OpenAIConfig,
}

struct OpenAIProvider {
    state: Arc<ProviderState>,
}

impl ModelProviderBackend for OpenAIProvider {
    fn name(&self) -> &str {
        &self.state.config.name
    }

    fn model(&self, model_id: &str) -> LanguageModel {
        LanguageModel::new(OpenAIModel {
            model_id: model_id.to_string(),
            state: Arc::clone(&self.state),
        })
    }
}

struct OpenAIModel {
    model_id: String,
    state: Arc<ProviderState>,
}

impl LanguageModelBackend for OpenAIModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn provider(&self) -> &str {
        &self.state.config.name
    }

    fn plan(&self, request: &ModelRequest) -> PlanResponse {
        let reasoning = self.state.config.reasoning;
        let body = convert::to_chat_request(&self.model_id, request, reasoning);
        let state = Arc::clone(&self.state);
        PlanResponse::new(stream::open(state, body))
    }
}
