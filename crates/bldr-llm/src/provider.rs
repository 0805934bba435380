use crate::model::LanguageModel;

/// A concrete, type-erased model provider.
///
/// Wraps a [`ModelProviderBackend`] behind a `Box<dyn ...>` so that callers
/// never need generic parameters and providers can be swapped freely.
pub struct ModelProvider {
    inner: Box<dyn ModelProviderBackend>,
}

impl ModelProvider {
    /// Wrap any backend implementation into a provider.
    pub fn new(backend: impl ModelProviderBackend + 'static) -> Self {
        Self {
            inner: Box::new(backend),
        }
    }

    /// The provider name (e.g. `"openai"`).
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Create a model handle for the given model ID.
    pub fn model(&self, model_id: &str) -> LanguageModel {
        self.inner.model(model_id)
    }
}

/// Trait that provider crates implement.
pub trait ModelProviderBackend: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self, model_id: &str) -> LanguageModel;
}
