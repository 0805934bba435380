use std::path::Path;
use std::sync::Arc;

use bldr_core::{
    BuildProgress, BuildStore, Checkpoint, Conversation, ConversationStore, ConversationSummary,
};
use bldr_llm::Message;
use bldr_llm_registry::{CredentialRequest, CredentialResolver};
use parking_lot::Mutex;

use crate::builds::Builds;
use crate::conversations::Conversations;
use crate::database::Database;
use crate::error::Result;
use crate::provider_credentials::ProviderCredentials;

pub struct Store {
    db: Database,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            db: Database::open(path.as_ref())?,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Database::open_in_memory()?,
        })
    }

    pub fn conversations(&mut self) -> Conversations<'_> {
        Conversations { db: &mut self.db }
    }

    pub fn builds(&mut self) -> Builds<'_> {
        Builds { db: &mut self.db }
    }

    pub fn provider_credentials(&mut self) -> ProviderCredentials<'_> {
        ProviderCredentials { db: &mut self.db }
    }

    pub fn into_shared(self) -> SharedStore {
        SharedStore {
            inner: Arc::new(Mutex::new(self)),
        }
    }
}

/// A [`Store`] behind a mutex, shareable across tasks. Implements the
/// persistence seams of `bldr-core` and the registry's credential lookup.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<Store>>,
}

impl SharedStore {
    /// Run `f` with exclusive access to the store.
    pub fn with<T>(&self, f: impl FnOnce(&mut Store) -> T) -> T {
        f(&mut self.inner.lock())
    }
}

impl ConversationStore for SharedStore {
    fn create_conversation(&self, title: Option<&str>) -> bldr_core::Result<Conversation> {
        Ok(self.with(|s| s.conversations().create(title))?)
    }

    fn append(&self, conversation_id: &str, message: Message) -> bldr_core::Result<()> {
        Ok(self.with(|s| s.conversations().append(conversation_id, &message))?)
    }

    fn rollback(&self, conversation_id: &str, message_id: &str) -> bldr_core::Result<usize> {
        Ok(self.with(|s| s.conversations().rollback(conversation_id, message_id))?)
    }

    fn rollback_to_index(&self, conversation_id: &str, index: usize) -> bldr_core::Result<()> {
        Ok(self.with(|s| s.conversations().rollback_to_index(conversation_id, index))?)
    }

    fn get(&self, conversation_id: &str) -> bldr_core::Result<Option<Conversation>> {
        Ok(self.with(|s| s.conversations().get(conversation_id))?)
    }

    fn list(&self) -> bldr_core::Result<Vec<ConversationSummary>> {
        Ok(self.with(|s| s.conversations().list())?)
    }

    fn create_checkpoint(&self, conversation_id: &str) -> bldr_core::Result<Checkpoint> {
        Ok(self.with(|s| s.conversations().create_checkpoint(conversation_id))?)
    }

    fn checkpoints(&self, conversation_id: &str) -> bldr_core::Result<Vec<Checkpoint>> {
        Ok(self.with(|s| s.conversations().checkpoints(conversation_id))?)
    }
}

impl BuildStore for SharedStore {
    fn save(&self, progress: &BuildProgress) -> bldr_core::Result<()> {
        Ok(self.with(|s| s.builds().save(progress))?)
    }

    fn get(&self, build_id: &str) -> bldr_core::Result<Option<BuildProgress>> {
        Ok(self.with(|s| s.builds().get(build_id))?)
    }

    fn active_for_project(&self, project_id: &str) -> bldr_core::Result<Option<BuildProgress>> {
        Ok(self.with(|s| s.builds().active_for_project(project_id))?)
    }
}

/// Keys stored with `bldr providers set` take precedence over environment
/// variables.
impl CredentialResolver for SharedStore {
    fn resolve(
        &self,
        request: &CredentialRequest,
    ) -> std::result::Result<Option<String>, bldr_llm_registry::Error> {
        self.with(|s| s.provider_credentials().get(&request.provider_id))
            .map_err(|e| bldr_llm_registry::Error::Credential(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use bldr_core::BuildStatus;
    use bldr_llm::{Action, MessageMetadata, Role};

    use super::*;

    fn shared() -> SharedStore {
        Store::open_in_memory().expect("open").into_shared()
    }

    #[test]
    fn conversations_round_trip_through_sqlite() {
        let store = shared();
        let conversation = store.create_conversation(None).expect("create");

        let user = Message::user("Build a todo app");
        let assistant = Message::assistant("Done.")
            .with_actions(vec![Action::create_file("/src/App.tsx", "x")])
            .with_metadata(MessageMetadata {
                provider: Some("openai".into()),
                tokens_used: 42,
                ..Default::default()
            });
        store.append(&conversation.id, user.clone()).expect("append");
        store
            .append(&conversation.id, assistant.clone())
            .expect("append");

        let loaded = ConversationStore::get(&store, &conversation.id).expect("get").expect("exists");
        assert_eq!(loaded.title, "Build a todo app");
        assert_eq!(loaded.messages, vec![user, assistant]);
        assert_eq!(loaded.messages[1].role, Role::Assistant);

        let summaries = store.list().expect("list");
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].message_count, 2);
    }

    #[test]
    fn rollback_truncates_messages_and_later_checkpoints() {
        let store = shared();
        let conversation = store.create_conversation(Some("demo")).expect("create");
        let mut ids = Vec::new();
        for i in 0..4 {
            let message = Message::user(format!("m{i}"));
            ids.push(message.id.clone());
            store.append(&conversation.id, message).expect("append");
            store.create_checkpoint(&conversation.id).expect("checkpoint");
        }

        let len = store.rollback(&conversation.id, &ids[2]).expect("rollback");
        assert_eq!(len, 2);

        let loaded = ConversationStore::get(&store, &conversation.id).expect("get").expect("exists");
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.title, "demo");
        let indexes: Vec<usize> = store
            .checkpoints(&conversation.id)
            .expect("checkpoints")
            .iter()
            .map(|c| c.message_index)
            .collect();
        assert_eq!(indexes, vec![1, 2]);

        // Appending after a rollback continues at the truncation point.
        store
            .append(&conversation.id, Message::user("again"))
            .expect("append");
        let loaded = ConversationStore::get(&store, &conversation.id).expect("get").expect("exists");
        assert_eq!(loaded.messages[2].content, "again");
    }

    #[test]
    fn rollback_errors_map_to_core_errors() {
        let store = shared();
        let conversation = store.create_conversation(None).expect("create");
        assert!(matches!(
            store.rollback_to_index(&conversation.id, 1),
            Err(bldr_core::Error::InvalidRollback { len: 0, .. })
        ));
        assert!(matches!(
            store.rollback(&conversation.id, "missing"),
            Err(bldr_core::Error::MessageNotFound { .. })
        ));
        assert!(matches!(
            store.append("missing", Message::user("hi")),
            Err(bldr_core::Error::ConversationNotFound(_))
        ));
    }

    #[test]
    fn build_progress_is_upserted() {
        let store = shared();
        let mut progress = BuildProgress::new("b1", "p1");
        store.save(&progress).expect("save");

        progress
            .advance(BuildStatus::Completed, "done")
            .expect("advance");
        progress.set_percent(100);
        store.save(&progress).expect("save");

        let loaded = BuildStore::get(&store, "b1").expect("get").expect("exists");
        assert_eq!(loaded, progress);
        assert!(BuildStore::get(&store, "nope").expect("get").is_none());
    }

    #[test]
    fn interrupted_builds_are_failed_on_startup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/bldr.sqlite");
        {
            let mut store = Store::open(&path).expect("open");
            let mut running = BuildProgress::new("b1", "p1");
            running
                .advance(BuildStatus::Building, "Applying")
                .expect("advance");
            store.builds().save(&running).expect("save");
        }

        let mut store = Store::open(&path).expect("reopen");
        assert_eq!(store.builds().fail_interrupted("server restarted").expect("fail"), 1);
        let loaded = store
            .builds()
            .latest_for_project("p1")
            .expect("latest")
            .expect("exists");
        assert_eq!(loaded.status, BuildStatus::Error);
        assert_eq!(loaded.errors, vec!["server restarted"]);
    }

    #[test]
    fn second_connection_sees_a_running_build_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bldr.sqlite");
        let mut server = Store::open(&path).expect("open");
        let mut running = BuildProgress::new("b1", "p1");
        running
            .advance(BuildStatus::Building, "Applying")
            .expect("advance");
        server.builds().save(&running).expect("save");
        let mut done = BuildProgress::new("b0", "p1");
        done.advance(BuildStatus::Completed, "done").expect("advance");
        server.builds().save(&done).expect("save");

        let other = Store::open(&path).expect("open again").into_shared();
        let active = BuildStore::active_for_project(&other, "p1")
            .expect("active")
            .expect("running build");
        assert_eq!(active.build_id, "b1");
        assert_eq!(active.status, BuildStatus::Building);
        assert!(BuildStore::active_for_project(&other, "p2").expect("active").is_none());

        let still = server.builds().get("b1").expect("get").expect("exists");
        assert_eq!(still.status, BuildStatus::Building);
    }

    #[test]
    fn stored_credentials_resolve_before_env() {
        let store = shared();
        store.with(|s| {
            s.provider_credentials()
                .upsert("openai", "sk-stored")
                .expect("upsert")
        });

        let request = CredentialRequest {
            provider_id: "openai".into(),
            provider_name: "OpenAI".into(),
            env_candidates: vec!["OPENAI_API_KEY".into()],
        };
        assert_eq!(
            store.resolve(&request).expect("resolve").as_deref(),
            Some("sk-stored")
        );

        store.with(|s| s.provider_credentials().remove("openai").expect("remove"));
        assert_eq!(store.resolve(&request).expect("resolve"), None);
    }
}
