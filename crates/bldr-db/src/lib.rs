//! SQLite persistence for bldr: conversations, checkpoints, build progress
//! and provider credentials.

pub mod builds;
pub mod conversations;
mod database;
pub mod error;
mod migration;
pub mod provider_credentials;
pub mod store;

pub use builds::Builds;
pub use conversations::Conversations;
pub use error::{Error, Result};
pub use provider_credentials::{ProviderCredential, ProviderCredentials};
pub use store::{SharedStore, Store};
