//! The core registry: maps provider ids to factories and dispatches requests.

use std::collections::HashMap;
use std::sync::Arc;

use bldr_llm::{LanguageModel, ModelProvider, ModelRequest, PlanResponse};
use parking_lot::Mutex;

use crate::auth::{CredentialRequest, CredentialResolver, EnvCredentialResolver};
use crate::error::Error;
use crate::factory::{ProviderFactory, ProviderOptions};
use crate::provider::ProviderRegistration;

/// A registered provider as presented to users.
#[derive(Debug, Clone)]
pub struct KnownProvider {
    pub id: String,
    pub name: String,
    pub default_model: String,
    /// Whether a credential is currently resolvable.
    pub configured: bool,
}

struct ProviderEntry {
    registration: ProviderRegistration,
    factory: Box<dyn ProviderFactory>,
    /// Lazily constructed on first dispatch.
    instance: Mutex<Option<Arc<ModelProvider>>>,
}

/// Central registry that maps provider ids (e.g. `"openai"`) to the factory
/// that knows the provider's request/response shape.
///
/// Credential resolvers are consulted in registration order, with the
/// process environment as the final fallback.
pub struct Registry {
    providers: HashMap<String, ProviderEntry>,
    resolvers: Vec<Arc<dyn CredentialResolver>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            resolvers: Vec::new(),
        }
    }

    /// Register a provider. Re-registering an id replaces the previous entry.
    pub fn add_provider(
        &mut self,
        registration: ProviderRegistration,
        factory: impl ProviderFactory + 'static,
    ) {
        self.providers.insert(
            registration.id.clone(),
            ProviderEntry {
                registration,
                factory: Box::new(factory),
                instance: Mutex::new(None),
            },
        );
    }

    /// Add a credential source consulted before environment variables.
    pub fn add_credential_resolver(&mut self, resolver: Arc<dyn CredentialResolver>) {
        self.resolvers.push(resolver);
    }

    /// Check whether a provider id is registered.
    pub fn has_provider(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    pub fn registration(&self, id: &str) -> Option<&ProviderRegistration> {
        self.providers.get(id).map(|entry| &entry.registration)
    }

    /// List registered providers, sorted by id.
    pub fn known_providers(&self) -> Vec<KnownProvider> {
        let mut result: Vec<KnownProvider> = self
            .providers
            .values()
            .map(|entry| {
                let reg = &entry.registration;
                let configured = reg.credential_env.is_empty()
                    || matches!(self.resolve_credential(reg), Ok(Some(_)));
                KnownProvider {
                    id: reg.id.clone(),
                    name: reg.name.clone(),
                    default_model: reg.default_model.clone(),
                    configured,
                }
            })
            .collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        result
    }

    /// Drop the cached provider instance so the next dispatch re-resolves
    /// credentials (e.g. after the user stored a new API key).
    pub fn reset(&self, id: &str) {
        if let Some(entry) = self.providers.get(id) {
            *entry.instance.lock() = None;
        }
    }

    /// Obtain a model handle for the given provider and model id.
    pub fn model(&self, provider_id: &str, model_id: &str) -> Result<LanguageModel, Error> {
        let provider = self.instance(provider_id)?;
        Ok(provider.model(model_id))
    }

    /// Send a request to a provider's default model.
    ///
    /// Construction failures (unknown provider, missing credential) are
    /// returned immediately; transport failures surface from the returned
    /// stream.
    pub fn dispatch(&self, provider_id: &str, request: &ModelRequest) -> Result<PlanResponse, Error> {
        let entry = self
            .providers
            .get(provider_id)
            .ok_or_else(|| Error::ProviderNotFound(provider_id.to_string()))?;
        let model = self.model(provider_id, &entry.registration.default_model)?;
        tracing::debug!(
            provider = provider_id,
            model = model.model_id(),
            history = request.context.conversation_history.len(),
            "dispatching plan request"
        );
        Ok(model.plan(request))
    }

    fn instance(&self, provider_id: &str) -> Result<Arc<ModelProvider>, Error> {
        let entry = self
            .providers
            .get(provider_id)
            .ok_or_else(|| Error::ProviderNotFound(provider_id.to_string()))?;

        let mut slot = entry.instance.lock();
        if let Some(instance) = slot.as_ref() {
            return Ok(Arc::clone(instance));
        }

        let reg = &entry.registration;
        let api_key = self.resolve_credential(reg)?;
        if api_key.is_none() && !reg.credential_env.is_empty() {
            return Err(Error::MissingCredential {
                provider: reg.name.clone(),
                hint: reg.credential_hint(),
            });
        }

        let instance = Arc::new(entry.factory.create(ProviderOptions {
            id: reg.id.clone(),
            api_key,
            api_endpoint: reg.api_endpoint.clone(),
            reasoning: reg.reasoning,
        })?);
        *slot = Some(Arc::clone(&instance));
        Ok(instance)
    }

    fn resolve_credential(&self, reg: &ProviderRegistration) -> Result<Option<String>, Error> {
        let request = CredentialRequest {
            provider_id: reg.id.clone(),
            provider_name: reg.name.clone(),
            env_candidates: reg.credential_env.clone(),
        };
        for resolver in &self.resolvers {
            if let Some(key) = resolver.resolve(&request)? {
                return Ok(Some(key));
            }
        }
        EnvCredentialResolver.resolve(&request)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bldr_llm::{LanguageModelBackend, ModelProviderBackend, Plan};

    struct EchoProvider {
        name: String,
    }

    struct EchoModel {
        provider: String,
        model_id: String,
    }

    impl ModelProviderBackend for EchoProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn model(&self, model_id: &str) -> LanguageModel {
            LanguageModel::new(EchoModel {
                provider: self.name.clone(),
                model_id: model_id.to_string(),
            })
        }
    }

    impl LanguageModelBackend for EchoModel {
        fn model_id(&self) -> &str {
            &self.model_id
        }

        fn provider(&self) -> &str {
            &self.provider
        }

        fn plan(&self, request: &ModelRequest) -> PlanResponse {
            PlanResponse::from_plan(Plan {
                content: format!("{}/{}: {}", self.provider, self.model_id, request.message),
                ..Default::default()
            })
        }
    }

    fn echo_factory(options: ProviderOptions) -> Result<ModelProvider, Error> {
        Ok(ModelProvider::new(EchoProvider { name: options.id }))
    }

    struct FixedKey(&'static str);

    impl CredentialResolver for FixedKey {
        fn resolve(&self, _request: &CredentialRequest) -> Result<Option<String>, Error> {
            Ok(Some(self.0.to_string()))
        }
    }

    #[tokio::test]
    async fn dispatch_routes_by_provider_id() {
        let mut registry = Registry::new();
        registry.add_provider(ProviderRegistration::new("a", "A", "small"), echo_factory);
        registry.add_provider(ProviderRegistration::new("b", "B", "large"), echo_factory);

        let request = bldr_llm::request("hi").build();
        let plan_a = registry
            .dispatch("a", &request)
            .expect("dispatch a")
            .into_plan()
            .await
            .expect("plan a");
        let plan_b = registry
            .dispatch("b", &request)
            .expect("dispatch b")
            .into_plan()
            .await
            .expect("plan b");

        assert_eq!(plan_a.content, "a/small: hi");
        assert_eq!(plan_b.content, "b/large: hi");
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let registry = Registry::new();
        let request = bldr_llm::request("hi").build();
        assert!(matches!(
            registry.dispatch("nope", &request),
            Err(Error::ProviderNotFound(_))
        ));
    }

    #[test]
    fn missing_credential_names_the_env_var() {
        let mut registry = Registry::new();
        registry.add_provider(
            ProviderRegistration::new("locked", "Locked", "m")
                .with_credential_env("BLDR_TEST_UNSET_API_KEY_7F3A"),
            echo_factory,
        );
        let request = bldr_llm::request("hi").build();
        let err = registry.dispatch("locked", &request).err().expect("error");
        assert!(matches!(err, Error::MissingCredential { .. }));
        assert!(err.to_string().contains("BLDR_TEST_UNSET_API_KEY_7F3A"));

        let known = registry.known_providers();
        assert!(!known[0].configured);
    }

    #[test]
    fn custom_resolver_satisfies_credentials() {
        let mut registry = Registry::new();
        registry.add_credential_resolver(Arc::new(FixedKey("sk-test")));
        registry.add_provider(
            ProviderRegistration::new("locked", "Locked", "m")
                .with_credential_env("BLDR_TEST_UNSET_API_KEY_7F3A"),
            |options: ProviderOptions| {
                assert_eq!(options.api_key.as_deref(), Some("sk-test"));
                echo_factory(options)
            },
        );
        let request = bldr_llm::request("hi").build();
        assert!(registry.dispatch("locked", &request).is_ok());
        assert!(registry.known_providers()[0].configured);
    }
}
