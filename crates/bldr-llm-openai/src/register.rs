//! Registry integration for OpenAI and OpenAI-compatible providers.

use bldr_llm_registry::{ProviderOptions, ProviderRegistration, Registry};

use crate::{DEFAULT_BASE_URL, OpenAIConfig, provider};

/// OpenAI-compatible services that share the Chat Completions shape:
/// `(id, display name, endpoint, key env var, default model)`.
const COMPATIBLE_PROVIDERS: &[(&str, &str, &str, &str, &str)] = &[
    ("xai", "xAI", "https://api.x.ai/v1", "XAI_API_KEY", "grok-3"),
    (
        "groq",
        "Groq",
        "https://api.groq.com/openai/v1",
        "GROQ_API_KEY",
        "llama-3.3-70b-versatile",
    ),
    (
        "deepseek",
        "DeepSeek",
        "https://api.deepseek.com/v1",
        "DEEPSEEK_API_KEY",
        "deepseek-chat",
    ),
];

/// Register the `openai` provider and its reasoning variant
/// `openai-reasoning` (both `OPENAI_API_KEY`).
pub fn register(registry: &mut Registry) {
    registry.add_provider(
        ProviderRegistration::new("openai", "OpenAI", "gpt-4.1")
            .with_endpoint(DEFAULT_BASE_URL)
            .with_credential_env("OPENAI_API_KEY"),
        factory,
    );
    registry.add_provider(
        ProviderRegistration::new("openai-reasoning", "OpenAI reasoning", "o4-mini")
            .with_endpoint(DEFAULT_BASE_URL)
            .with_credential_env("OPENAI_API_KEY")
            .with_reasoning(),
        factory,
    );
}

/// Register every known OpenAI-compatible provider.
pub fn register_compatible(registry: &mut Registry) {
    for &(id, name, endpoint, env, model) in COMPATIBLE_PROVIDERS {
        registry.add_provider(
            ProviderRegistration::new(id, name, model)
                .with_endpoint(endpoint)
                .with_credential_env(env),
            factory,
        );
    }
}

fn factory(
    options: ProviderOptions,
) -> Result<bldr_llm::ModelProvider, bldr_llm_registry::Error> {
    Ok(provider(OpenAIConfig {
        name: options.id,
        api_key: options.api_key.unwrap_or_default(),
        base_url: options
            .api_endpoint
            .unwrap_or_else(|| DEFAULT_BASE_URL.into()),
        reasoning: options.reasoning,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_openai_and_compatible_ids() {
        let mut registry = Registry::new();
        register(&mut registry);
        register_compatible(&mut registry);

        for id in ["openai", "openai-reasoning", "xai", "groq", "deepseek"] {
            assert!(registry.has_provider(id), "missing {id}");
        }
        let reasoning: Vec<String> = registry
            .known_providers()
            .into_iter()
            .filter_map(|p| registry.registration(&p.id))
            .filter(|r| r.reasoning)
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(reasoning, vec!["openai-reasoning".to_string()]);
        assert_eq!(
            registry
                .registration("openai")
                .map(|r| r.credential_hint()),
            Some("OPENAI_API_KEY".to_string())
        );
    }
}
