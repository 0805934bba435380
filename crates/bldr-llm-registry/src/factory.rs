//! Provider factory trait and configuration options.

use bldr_llm::ModelProvider;

use crate::error::Error;

/// Options passed to a [`ProviderFactory`] when constructing a provider.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    /// The provider identifier (e.g. `"openai"`).
    pub id: String,

    /// API key resolved through the credential resolvers.
    pub api_key: Option<String>,

    /// Base API endpoint. `None` means the provider should use its built-in
    /// default.
    pub api_endpoint: Option<String>,

    /// Copied from [`ProviderRegistration::reasoning`](crate::ProviderRegistration::reasoning).
    pub reasoning: bool,
}

/// A factory that can construct a [`ModelProvider`] from
/// [`ProviderOptions`].
///
/// Implement this trait for concrete provider integrations, or pass a closure
/// to [`Registry::add_provider`](crate::Registry::add_provider).
pub trait ProviderFactory: Send + Sync {
    /// Create a provider instance from the given options.
    fn create(&self, options: ProviderOptions) -> Result<ModelProvider, Error>;
}

/// Blanket impl: any `Fn(ProviderOptions) -> Result<ModelProvider, Error>`
/// is a factory.
impl<F> ProviderFactory for F
where
    F: Fn(ProviderOptions) -> Result<ModelProvider, Error> + Send + Sync,
{
    fn create(&self, options: ProviderOptions) -> Result<ModelProvider, Error> {
        (self)(options)
    }
}
