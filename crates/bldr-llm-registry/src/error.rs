/// Errors produced by the provider registry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A provider with the given name was not found in the registry.
    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    /// No API key could be resolved for the provider.
    #[error("no API key configured for {provider}; set {hint}")]
    MissingCredential { provider: String, hint: String },

    /// The provider factory returned an error during construction.
    #[error("provider factory error: {0}")]
    Factory(Box<dyn std::error::Error + Send + Sync>),

    /// The credential resolver failed.
    #[error("credential lookup failed: {0}")]
    Credential(String),
}

impl From<Error> for bldr_llm::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::MissingCredential { provider, .. } => {
                bldr_llm::Error::MissingCredential { provider }
            }
            other => bldr_llm::Error::Other(other.to_string()),
        }
    }
}
