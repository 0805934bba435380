use crate::progress::BuildStatus;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid project path '{0}'")]
    InvalidPath(String),

    #[error("invalid project id '{0}'")]
    InvalidProjectId(String),

    #[error("command timed out after {0} seconds")]
    CommandTimeout(u64),

    #[error("sandbox service unavailable: {0}")]
    Sandbox(String),

    #[error("no deployment target configured for '{0}'")]
    DeployUnavailable(String),

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("message '{message_id}' not found in conversation '{conversation_id}'")]
    MessageNotFound {
        conversation_id: String,
        message_id: String,
    },

    #[error("cannot roll back conversation '{conversation_id}' to index {index}; it has {len} messages")]
    InvalidRollback {
        conversation_id: String,
        index: usize,
        len: usize,
    },

    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("project '{project_id}' already has build '{build_id}' running in another process")]
    BuildInProgress {
        project_id: String,
        build_id: String,
    },

    #[error("invalid build status transition {from:?} -> {to:?}")]
    InvalidTransition { from: BuildStatus, to: BuildStatus },

    #[error("store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, Error>;
