use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::AbortHandle;

use crate::conversation::{Conversation, ConversationStore};
use crate::error::{Error, Result};

/// One client's view: which conversation is active and which build it is
/// currently following.
pub struct Session {
    conversations: Arc<dyn ConversationStore>,
    active: Mutex<Option<String>>,
    tracking: Mutex<Option<AbortHandle>>,
}

impl Session {
    pub fn new(conversations: Arc<dyn ConversationStore>) -> Self {
        Self {
            conversations,
            active: Mutex::new(None),
            tracking: Mutex::new(None),
        }
    }

    pub fn active_conversation(&self) -> Option<String> {
        self.active.lock().clone()
    }

    /// The active conversation, starting one if there is none yet.
    pub fn ensure_conversation(&self) -> Result<String> {
        let mut active = self.active.lock();
        if let Some(id) = active.as_ref() {
            return Ok(id.clone());
        }
        let conversation = self.conversations.create_conversation(None)?;
        *active = Some(conversation.id.clone());
        Ok(conversation.id)
    }

    /// Start a fresh conversation and make it active.
    pub fn new_conversation(&self) -> Result<Conversation> {
        let conversation = self.conversations.create_conversation(None)?;
        self.abandon_tracking();
        *self.active.lock() = Some(conversation.id.clone());
        Ok(conversation)
    }

    pub fn switch_to(&self, conversation_id: &str) -> Result<()> {
        if self.conversations.get(conversation_id)?.is_none() {
            return Err(Error::ConversationNotFound(conversation_id.to_string()));
        }
        self.abandon_tracking();
        *self.active.lock() = Some(conversation_id.to_string());
        Ok(())
    }

    /// Remember the task following the current build. Any previous one is
    /// abandoned.
    pub fn track(&self, task: &tokio::task::JoinHandle<()>) {
        if let Some(previous) = self.tracking.lock().replace(task.abort_handle()) {
            previous.abort();
        }
    }

    /// Stop following the current build. The build itself keeps running.
    pub fn abandon_tracking(&self) {
        if let Some(task) = self.tracking.lock().take() {
            tracing::debug!("abandoning build tracking");
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bldr_llm::{Action, Plan};
    use futures::StreamExt;

    use super::*;
    use crate::conversation::MemoryConversationStore;
    use crate::coordinator::{BuildCoordinator, BuildRequest, CoordinatorConfig};
    use crate::executor::ActionExecutor;
    use crate::progress::{BuildStatus, MemoryBuildStore};
    use crate::testing::{self, Journal, Script, Turn};

    #[test]
    fn new_conversation_becomes_active() {
        let store = Arc::new(MemoryConversationStore::new());
        let session = Session::new(store.clone());

        let first = session.ensure_conversation().expect("ensure");
        assert_eq!(session.ensure_conversation().expect("ensure"), first);

        let second = session.new_conversation().expect("new");
        assert_ne!(second.id, first);
        assert_eq!(session.active_conversation(), Some(second.id));
        assert_eq!(store.list().expect("list").len(), 2);

        session.switch_to(&first).expect("switch");
        assert_eq!(session.active_conversation(), Some(first));
        assert!(session.switch_to("missing").is_err());
    }

    #[tokio::test]
    async fn new_conversation_abandons_tracking_but_not_the_build() {
        let script = Script::new([Turn::Slow(
            Duration::from_millis(100),
            Plan {
                content: "ok".into(),
                actions: vec![Action::create_file("/a.txt", "a")],
                ..Default::default()
            },
        )]);
        let journal = Journal::default();
        let store = journal.clone();
        let conversations = Arc::new(MemoryConversationStore::new());
        let coordinator = BuildCoordinator::new(
            Arc::new(testing::registry(&script)),
            Arc::new(move |_: &str| -> crate::Result<Arc<ActionExecutor>> {
                let journal = Arc::new(store.clone());
                Ok(Arc::new(ActionExecutor::new(journal.clone(), journal)))
            }),
            conversations.clone(),
            Arc::new(MemoryBuildStore::new()),
            CoordinatorConfig::default(),
        );
        let session = Session::new(conversations);
        let conversation_id = session.ensure_conversation().expect("ensure");

        let handle = coordinator
            .start_build(BuildRequest::new("p", "scripted", "go").in_conversation(conversation_id))
            .expect("start")
            .into_handle();

        let events = coordinator.follow(&handle);
        let follower = tokio::spawn(async move {
            events.for_each(|_| async {}).await;
        });
        session.track(&follower);

        session.new_conversation().expect("new conversation");

        assert!(follower.await.expect_err("aborted").is_cancelled());
        let progress = handle.wait().await;
        assert_eq!(progress.status, BuildStatus::Completed);
        assert_eq!(journal.entries(), vec!["write /a.txt"]);
    }
}
