use crate::request::ModelRequest;
use crate::response::PlanResponse;

/// A concrete, type-erased model handle.
///
/// Wraps a [`LanguageModelBackend`] so callers never need generics.
pub struct LanguageModel {
    inner: Box<dyn LanguageModelBackend>,
}

impl LanguageModel {
    /// Wrap any backend implementation into a model.
    pub fn new(backend: impl LanguageModelBackend + 'static) -> Self {
        Self {
            inner: Box::new(backend),
        }
    }

    /// The model identifier (e.g. `"gpt-4.1"`).
    pub fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    /// The provider name this model belongs to.
    pub fn provider(&self) -> &str {
        self.inner.provider()
    }

    /// Ask the model for a plan. The response streams.
    pub fn plan(&self, request: &ModelRequest) -> PlanResponse {
        self.inner.plan(request)
    }
}

/// Trait that provider crates implement for a specific model.
pub trait LanguageModelBackend: Send + Sync {
    fn model_id(&self) -> &str;
    fn provider(&self) -> &str;
    fn plan(&self, request: &ModelRequest) -> PlanResponse;
}
