//! # bldr-llm-registry
//!
//! Maps provider identifiers to model backends.
//!
//! Every provider speaks its own wire format, but all of them answer with the
//! same [`bldr_llm::Plan`] shape, so callers can switch providers between
//! turns without touching conversation history.
//!
//! ```ignore
//! use bldr_llm_registry::{ProviderRegistration, Registry};
//!
//! let mut registry = Registry::new();
//! bldr_llm_openai::register(&mut registry);
//!
//! let request = bldr_llm::request("Build a todo app").provider("openai").build();
//! let plan = registry.dispatch("openai", &request)?.into_plan().await?;
//! ```

pub mod auth;
pub mod error;
pub mod factory;
pub mod provider;
pub mod registry;

pub use auth::{CredentialRequest, CredentialResolver, EnvCredentialResolver};
pub use error::Error;
pub use factory::{ProviderFactory, ProviderOptions};
pub use provider::ProviderRegistration;
pub use registry::{KnownProvider, Registry};
