//! Credential resolution for providers.

use crate::error::Error;

/// Request passed to a credential resolver.
#[derive(Debug, Clone)]
pub struct CredentialRequest {
    pub provider_id: String,
    pub provider_name: String,
    pub env_candidates: Vec<String>,
}

/// External hook used to resolve API keys (credential table, keychain, ...).
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, request: &CredentialRequest) -> Result<Option<String>, Error>;
}

/// Resolves keys from the process environment: the first candidate variable
/// that is set and non-empty wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialResolver;

impl CredentialResolver for EnvCredentialResolver {
    fn resolve(&self, request: &CredentialRequest) -> Result<Option<String>, Error> {
        Ok(request
            .env_candidates
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.trim().is_empty()))
    }
}
