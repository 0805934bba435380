//! Provider registration metadata.

/// Provider registration metadata.
#[derive(Debug, Clone)]
pub struct ProviderRegistration {
    pub id: String,
    pub name: String,
    pub api_endpoint: Option<String>,
    /// Candidate environment variable names for this provider's API key.
    pub credential_env: Vec<String>,
    /// Model used when a request does not name one.
    pub default_model: String,
    /// The provider's models accept an explicit reasoning effort.
    pub reasoning: bool,
}

impl ProviderRegistration {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            api_endpoint: None,
            credential_env: Vec::new(),
            default_model: default_model.into(),
            reasoning: false,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.api_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_credential_env(mut self, var: impl Into<String>) -> Self {
        self.credential_env.push(var.into());
        self
    }

    pub fn with_reasoning(mut self) -> Self {
        self.reasoning = true;
        self
    }

    /// The remediation shown to users when no key is configured.
    pub fn credential_hint(&self) -> String {
        match self.credential_env.as_slice() {
            [] => format!("an API key for {}", self.name),
            [one] => one.clone(),
            many => many.join(" or "),
        }
    }
}
