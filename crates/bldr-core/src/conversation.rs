use std::collections::HashMap;

use bldr_llm::{Message, Role, now_ms};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const TITLE_MAX_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    /// Milliseconds since the Unix epoch.
    pub last_activity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    pub last_activity: i64,
}

/// A marker at a message index that a conversation can be rolled back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: String,
    pub conversation_id: String,
    pub message_index: usize,
    pub created_at_ms: i64,
}

/// Ordered message history per conversation.
///
/// Rollback only truncates history. Effects already applied to the project
/// stay in place.
pub trait ConversationStore: Send + Sync {
    /// Start a conversation. Without a title, the first user message becomes
    /// the title.
    fn create_conversation(&self, title: Option<&str>) -> Result<Conversation>;

    fn append(&self, conversation_id: &str, message: Message) -> Result<()>;

    /// Truncate to just before `message_id`. Returns the new message count.
    fn rollback(&self, conversation_id: &str, message_id: &str) -> Result<usize>;

    /// Keep exactly the first `index` messages. Checkpoints past the new end
    /// are dropped.
    fn rollback_to_index(&self, conversation_id: &str, index: usize) -> Result<()>;

    fn get(&self, conversation_id: &str) -> Result<Option<Conversation>>;

    /// Most recently active first.
    fn list(&self) -> Result<Vec<ConversationSummary>>;

    /// Mark the current end of the conversation.
    fn create_checkpoint(&self, conversation_id: &str) -> Result<Checkpoint>;

    fn checkpoints(&self, conversation_id: &str) -> Result<Vec<Checkpoint>>;
}

/// Derive a conversation title from a user prompt.
pub fn title_from_prompt(prompt: &str) -> String {
    let line = prompt.trim().lines().next().unwrap_or_default().trim();
    if line.chars().count() <= TITLE_MAX_CHARS {
        return line.to_string();
    }
    let mut title: String = line.chars().take(TITLE_MAX_CHARS - 1).collect();
    title.push('…');
    title
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

struct Entry {
    conversation: Conversation,
    checkpoints: Vec<Checkpoint>,
}

/// In-memory conversation store.
#[derive(Default)]
pub struct MemoryConversationStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entry<T>(
        &self,
        conversation_id: &str,
        f: impl FnOnce(&mut Conversation, &mut Vec<Checkpoint>) -> Result<T>,
    ) -> Result<T> {
        let mut entries = self.entries.lock();
        match entries.get_mut(conversation_id) {
            Some(entry) => f(&mut entry.conversation, &mut entry.checkpoints),
            None => Err(Error::ConversationNotFound(conversation_id.to_string())),
        }
    }
}

impl ConversationStore for MemoryConversationStore {
    fn create_conversation(&self, title: Option<&str>) -> Result<Conversation> {
        let conversation = Conversation {
            id: new_id(),
            title: title.map(title_from_prompt).unwrap_or_default(),
            messages: Vec::new(),
            last_activity: now_ms(),
        };
        self.entries.lock().insert(
            conversation.id.clone(),
            Entry {
                conversation: conversation.clone(),
                checkpoints: Vec::new(),
            },
        );
        Ok(conversation)
    }

    fn append(&self, conversation_id: &str, message: Message) -> Result<()> {
        self.with_entry(conversation_id, |conversation, _| {
            if conversation.title.is_empty() && message.role == Role::User {
                conversation.title = title_from_prompt(&message.content);
            }
            conversation.last_activity = now_ms();
            conversation.messages.push(message);
            Ok(())
        })
    }

    fn rollback(&self, conversation_id: &str, message_id: &str) -> Result<usize> {
        let index = self.with_entry(conversation_id, |conversation, _| {
            conversation
                .messages
                .iter()
                .position(|m| m.id == message_id)
                .ok_or_else(|| Error::MessageNotFound {
                    conversation_id: conversation_id.to_string(),
                    message_id: message_id.to_string(),
                })
        })?;
        self.rollback_to_index(conversation_id, index)?;
        Ok(index)
    }

    fn rollback_to_index(&self, conversation_id: &str, index: usize) -> Result<()> {
        self.with_entry(conversation_id, |conversation, checkpoints| {
            let len = conversation.messages.len();
            if index > len {
                return Err(Error::InvalidRollback {
                    conversation_id: conversation_id.to_string(),
                    index,
                    len,
                });
            }
            conversation.messages.truncate(index);
            checkpoints.retain(|c| c.message_index <= index);
            Ok(())
        })
    }

    fn get(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        Ok(self
            .entries
            .lock()
            .get(conversation_id)
            .map(|e| e.conversation.clone()))
    }

    fn list(&self) -> Result<Vec<ConversationSummary>> {
        let mut summaries: Vec<_> = self
            .entries
            .lock()
            .values()
            .map(|e| &e.conversation)
            .map(|c| ConversationSummary {
                id: c.id.clone(),
                title: c.title.clone(),
                message_count: c.messages.len(),
                last_activity: c.last_activity,
            })
            .collect();
        summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(summaries)
    }

    fn create_checkpoint(&self, conversation_id: &str) -> Result<Checkpoint> {
        self.with_entry(conversation_id, |conversation, checkpoints| {
            let checkpoint = Checkpoint {
                id: new_id(),
                conversation_id: conversation.id.clone(),
                message_index: conversation.messages.len(),
                created_at_ms: now_ms(),
            };
            checkpoints.push(checkpoint.clone());
            Ok(checkpoint)
        })
    }

    fn checkpoints(&self, conversation_id: &str) -> Result<Vec<Checkpoint>> {
        self.with_entry(conversation_id, |_, checkpoints| Ok(checkpoints.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(store: &MemoryConversationStore, n: usize) -> Conversation {
        let conversation = store.create_conversation(None).expect("create");
        for i in 0..n {
            let message = if i % 2 == 0 {
                Message::user(format!("prompt {i}"))
            } else {
                Message::assistant(format!("answer {i}"))
            };
            store.append(&conversation.id, message).expect("append");
            if i % 2 == 1 {
                store.create_checkpoint(&conversation.id).expect("checkpoint");
            }
        }
        store.get(&conversation.id).expect("get").expect("exists")
    }

    #[test]
    fn rollback_to_index_keeps_exactly_k_messages() {
        let store = MemoryConversationStore::new();
        let conversation = seeded(&store, 6);
        let other = seeded(&store, 4);

        for k in [6, 4, 1, 0] {
            store.rollback_to_index(&conversation.id, k).expect("rollback");
            let after = store.get(&conversation.id).expect("get").expect("exists");
            assert_eq!(after.messages.len(), k);
            assert_eq!(after.messages[..], conversation.messages[..k]);
            assert_eq!(after.title, conversation.title);
        }

        let untouched = store.get(&other.id).expect("get").expect("exists");
        assert_eq!(untouched, other);
    }

    #[test]
    fn rollback_by_message_id_truncates_before_it() {
        let store = MemoryConversationStore::new();
        let conversation = seeded(&store, 4);
        let target = &conversation.messages[2];

        let len = store.rollback(&conversation.id, &target.id).expect("rollback");

        assert_eq!(len, 2);
        let checkpoints = store.checkpoints(&conversation.id).expect("checkpoints");
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].message_index, 2);
    }

    #[test]
    fn invalid_rollbacks_are_rejected() {
        let store = MemoryConversationStore::new();
        let conversation = seeded(&store, 2);
        assert!(matches!(
            store.rollback_to_index(&conversation.id, 3),
            Err(Error::InvalidRollback { len: 2, .. })
        ));
        assert!(matches!(
            store.rollback(&conversation.id, "nope"),
            Err(Error::MessageNotFound { .. })
        ));
        assert!(matches!(
            store.append("missing", Message::user("hi")),
            Err(Error::ConversationNotFound(_))
        ));
    }

    #[test]
    fn title_comes_from_first_user_message() {
        let store = MemoryConversationStore::new();
        let conversation = store.create_conversation(None).expect("create");
        store
            .append(&conversation.id, Message::system("welcome"))
            .expect("append");
        store
            .append(&conversation.id, Message::user("  Build a todo app\nwith tags"))
            .expect("append");
        store
            .append(&conversation.id, Message::user("Add dark mode"))
            .expect("append");

        let loaded = store.get(&conversation.id).expect("get").expect("exists");
        assert_eq!(loaded.title, "Build a todo app");

        let long = "x".repeat(200);
        let title = title_from_prompt(&long);
        assert_eq!(title.chars().count(), 80);
        assert!(title.ends_with('…'));
    }
}
