#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

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
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for bldr_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::ConversationNotFound(id) => bldr_core::Error::ConversationNotFound(id),
            Error::MessageNotFound {
                conversation_id,
                message_id,
            } => bldr_core::Error::MessageNotFound {
                conversation_id,
                message_id,
            },
            Error::InvalidRollback {
                conversation_id,
                index,
                len,
            } => bldr_core::Error::InvalidRollback {
                conversation_id,
                index,
                len,
            },
            other => bldr_core::Error::Store(other.to_string()),
        }
    }
}
