/// Errors that can occur when asking a model provider for a plan.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("http error: {0}")]
    Http(Box<dyn std::error::Error + Send + Sync>),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sse error: {0}")]
    Sse(String),

    #[error("api error ({code}): {message}")]
    Api { code: String, message: String },

    #[error("missing API key credential for provider '{provider}'")]
    MissingCredential { provider: String },

    #[error("model provider did not answer within {0} seconds")]
    Timeout(u64),

    #[error("malformed plan: {0}")]
    MalformedPlan(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the failure is an authentication problem the user has to fix
    /// (missing key, rejected key).
    pub fn is_credential(&self) -> bool {
        match self {
            Error::MissingCredential { .. } => true,
            Error::Api { code, .. } => code == "401" || code == "403",
            _ => false,
        }
    }

    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(_) | Error::Sse(_) | Error::Timeout(_) => true,
            Error::Api { code, .. } => code == "429" || code.starts_with('5'),
            _ => false,
        }
    }
}
