//! # bldr-core
//!
//! Turns one user prompt into an ordered, observable sequence of project
//! changes. The [`BuildCoordinator`] asks a model provider for a plan,
//! applies its actions with an [`ActionExecutor`], reports progress on a
//! [`ProgressHub`] and records the exchange in a [`ConversationStore`].

pub mod backends;
pub mod conversation;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod progress;
pub mod session;

#[cfg(test)]
mod testing;

pub use conversation::{
    Checkpoint, Conversation, ConversationStore, ConversationSummary, MemoryConversationStore,
    title_from_prompt,
};
pub use coordinator::{BuildCoordinator, BuildHandle, BuildRequest, BuildStart, CoordinatorConfig};
pub use error::{Error, Result};
pub use executor::{ActionExecutor, ActionOutcome, DirectoryProjects, ProjectResolver};
pub use progress::{
    BuildLookup, BuildProgress, BuildStatus, BuildStore, DEFAULT_POLL_INTERVAL, MemoryBuildStore,
    ProgressEvent, ProgressHub, ProgressTracker, follow_build,
};
pub use session::Session;
