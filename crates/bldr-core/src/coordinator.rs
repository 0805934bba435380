//! The build coordinator: one prompt in, one applied plan out.
//!
//! A build runs as a spawned task. It asks the model provider for a plan,
//! applies the plan's actions in order through the project's
//! [`ActionExecutor`], and reports every step on the [`ProgressHub`]. The
//! user's message is stored before the model is called, and every build ends
//! with an assistant or system message in the conversation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bldr_llm::{
    Action, ActionKind, BuildMode, Message, MessageMetadata, ModelRequest, Plan, PlanEvent, now_ms,
};
use bldr_llm_registry::Registry;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use crate::conversation::{ConversationStore, new_id};
use crate::error::{Error, Result};
use crate::executor::{ActionExecutor, ProjectResolver};
use crate::progress::{
    BuildLookup, BuildProgress, BuildStatus, BuildStore, DEFAULT_POLL_INTERVAL, ProgressEvent,
    ProgressHub, follow_build,
};

const PERCENT_ANALYZING: u8 = 10;
const PERCENT_BUILDING: u8 = 20;
const PERCENT_BUILDING_END: u8 = 90;
const PERCENT_TESTING: u8 = 95;
const MAX_MODEL_ATTEMPTS: usize = 2;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Upper bound for one model call, including streaming the response.
    pub model_timeout: Duration,
    /// Number of prior messages sent along with the prompt.
    pub history_limit: usize,
    /// Polling interval used by followers once the push channel is gone.
    pub poll_interval: Duration,
    /// A stored build that has not been updated for this long no longer
    /// blocks new builds of its project.
    pub stale_build_after: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            model_timeout: Duration::from_secs(60),
            history_limit: 10,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stale_build_after: Duration::from_secs(600),
        }
    }
}

/// A request to build something in a project.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub project_id: String,
    /// Continue this conversation; a new one is started when `None`.
    pub conversation_id: Option<String>,
    pub prompt: String,
    pub mode: BuildMode,
    pub provider: String,
    pub thinking: bool,
    pub high_power: bool,
    pub web_search: bool,
}

impl BuildRequest {
    pub fn new(
        project_id: impl Into<String>,
        provider: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            conversation_id: None,
            prompt: prompt.into(),
            mode: BuildMode::default(),
            provider: provider.into(),
            thinking: false,
            high_power: false,
            web_search: false,
        }
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}

/// Result of [`BuildCoordinator::start_build`].
#[derive(Debug, Clone)]
pub enum BuildStart {
    Started(BuildHandle),
    /// The project already had a build running; this is its handle and the
    /// new prompt was not submitted.
    Attached(BuildHandle),
}

impl BuildStart {
    pub fn handle(&self) -> &BuildHandle {
        match self {
            BuildStart::Started(handle) | BuildStart::Attached(handle) => handle,
        }
    }

    pub fn into_handle(self) -> BuildHandle {
        match self {
            BuildStart::Started(handle) | BuildStart::Attached(handle) => handle,
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(self, BuildStart::Attached(_))
    }
}

struct HandleState {
    build_id: String,
    project_id: String,
    conversation_id: String,
    progress: watch::Sender<BuildProgress>,
    /// Assistant text streamed so far.
    draft: Mutex<String>,
}

/// Cheap, cloneable view of one build.
#[derive(Clone)]
pub struct BuildHandle {
    state: Arc<HandleState>,
}

impl fmt::Debug for BuildHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildHandle")
            .field("build_id", &self.state.build_id)
            .field("project_id", &self.state.project_id)
            .finish_non_exhaustive()
    }
}

impl BuildHandle {
    fn new(progress: BuildProgress, conversation_id: String) -> Self {
        Self {
            state: Arc::new(HandleState {
                build_id: progress.build_id.clone(),
                project_id: progress.project_id.clone(),
                conversation_id,
                progress: watch::Sender::new(progress),
                draft: Mutex::new(String::new()),
            }),
        }
    }

    pub fn build_id(&self) -> &str {
        &self.state.build_id
    }

    pub fn project_id(&self) -> &str {
        &self.state.project_id
    }

    pub fn conversation_id(&self) -> &str {
        &self.state.conversation_id
    }

    pub fn snapshot(&self) -> BuildProgress {
        self.state.progress.borrow().clone()
    }

    /// The streaming assistant text. Once the build completes this equals
    /// the stored message content.
    pub fn draft(&self) -> String {
        self.state.draft.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.state.progress.borrow().is_finished()
    }

    pub fn watch(&self) -> watch::Receiver<BuildProgress> {
        self.state.progress.subscribe()
    }

    /// Wait until the build reaches a terminal status.
    pub async fn wait(&self) -> BuildProgress {
        let mut receiver = self.watch();
        match receiver.wait_for(BuildProgress::is_finished).await {
            Ok(progress) => progress.clone(),
            Err(_) => self.snapshot(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut BuildProgress)) -> BuildProgress {
        self.state.progress.send_modify(f);
        self.snapshot()
    }
}

struct Inner {
    registry: Arc<Registry>,
    projects: Arc<dyn ProjectResolver>,
    conversations: Arc<dyn ConversationStore>,
    builds: Arc<dyn BuildStore>,
    hub: ProgressHub,
    config: CoordinatorConfig,
    /// At most one entry per project: the build currently running there.
    active: Mutex<HashMap<String, BuildHandle>>,
}

/// Owns the active-build table and runs builds.
#[derive(Clone)]
pub struct BuildCoordinator {
    inner: Arc<Inner>,
}

impl BuildCoordinator {
    pub fn new(
        registry: Arc<Registry>,
        projects: Arc<dyn ProjectResolver>,
        conversations: Arc<dyn ConversationStore>,
        builds: Arc<dyn BuildStore>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                projects,
                conversations,
                builds,
                hub: ProgressHub::new(),
                config,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn hub(&self) -> &ProgressHub {
        &self.inner.hub
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn conversations(&self) -> &Arc<dyn ConversationStore> {
        &self.inner.conversations
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Start a build, or attach to the one already running in the project.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_build(&self, request: BuildRequest) -> Result<BuildStart> {
        if request.prompt.trim().is_empty() {
            return Err(Error::EmptyPrompt);
        }

        let mut active = self.inner.active.lock();
        if let Some(handle) = active.get(&request.project_id)
            && !handle.is_finished()
        {
            tracing::info!(
                project_id = %request.project_id,
                build_id = handle.build_id(),
                "build already active, attaching"
            );
            return Ok(BuildStart::Attached(handle.clone()));
        }
        self.check_other_processes(&request.project_id)?;

        let executor = self.inner.projects.executor(&request.project_id)?;

        let conversations = &self.inner.conversations;
        let conversation = match &request.conversation_id {
            Some(id) => conversations
                .get(id)?
                .ok_or_else(|| Error::ConversationNotFound(id.clone()))?,
            None => conversations.create_conversation(None)?,
        };
        let history = conversation.messages;
        conversations.append(&conversation.id, Message::user(request.prompt.clone()))?;

        let mut progress = BuildProgress::new(new_id(), request.project_id.clone());
        progress.conversation_id = Some(conversation.id.clone());
        if let Err(e) = self.inner.builds.save(&progress) {
            tracing::warn!(error = %e, "failed to persist build progress");
        }
        let handle = BuildHandle::new(progress, conversation.id);
        active.insert(request.project_id.clone(), handle.clone());
        drop(active);

        tracing::info!(
            project_id = %request.project_id,
            build_id = handle.build_id(),
            provider = %request.provider,
            mode = request.mode.as_str(),
            "build started"
        );

        let build = Build {
            inner: Arc::clone(&self.inner),
            handle: handle.clone(),
            executor,
            request,
            history,
        };
        build.publish_status();
        tokio::spawn(build.run());

        Ok(BuildStart::Started(handle))
    }

    /// Refuse to start when the build store shows a live build of the
    /// project that this coordinator does not own.
    fn check_other_processes(&self, project_id: &str) -> Result<()> {
        let Some(stored) = self.inner.builds.active_for_project(project_id)? else {
            return Ok(());
        };
        let idle_ms = now_ms().saturating_sub(stored.updated_at_ms);
        let stale_ms =
            i64::try_from(self.inner.config.stale_build_after.as_millis()).unwrap_or(i64::MAX);
        if idle_ms > stale_ms {
            tracing::warn!(
                project_id,
                build_id = %stored.build_id,
                idle_ms,
                "ignoring stale unfinished build"
            );
            return Ok(());
        }
        Err(Error::BuildInProgress {
            project_id: project_id.to_string(),
            build_id: stored.build_id,
        })
    }

    /// The build currently running in `project_id`, if any.
    pub fn active_build(&self, project_id: &str) -> Option<BuildHandle> {
        self.inner
            .active
            .lock()
            .get(project_id)
            .filter(|handle| !handle.is_finished())
            .cloned()
    }

    /// Progress of a running or finished build.
    pub fn progress(&self, build_id: &str) -> Result<Option<BuildProgress>> {
        let running = self
            .inner
            .active
            .lock()
            .values()
            .find(|handle| handle.build_id() == build_id)
            .map(BuildHandle::snapshot);
        match running {
            Some(progress) => Ok(Some(progress)),
            None => self.inner.builds.get(build_id),
        }
    }

    pub fn subscribe(&self, project_id: &str) -> broadcast::Receiver<ProgressEvent> {
        self.inner.hub.subscribe(project_id)
    }

    /// Follow a build's events until it reaches a terminal status.
    pub fn follow(&self, handle: &BuildHandle) -> impl Stream<Item = ProgressEvent> + Send + use<> {
        let receiver = self.subscribe(handle.project_id());
        follow_build(
            Arc::new(self.clone()),
            Some(receiver),
            handle.project_id().to_string(),
            handle.build_id().to_string(),
            self.inner.config.poll_interval,
        )
    }
}

#[async_trait]
impl BuildLookup for BuildCoordinator {
    async fn build_progress(&self, build_id: &str) -> Result<Option<BuildProgress>> {
        self.progress(build_id)
    }
}

/// Why the model provider did not produce a usable plan.
#[derive(Debug)]
enum ProviderFailure {
    Registry(bldr_llm_registry::Error),
    Model(bldr_llm::Error),
}

impl ProviderFailure {
    fn is_transient(&self) -> bool {
        match self {
            ProviderFailure::Registry(_) => false,
            ProviderFailure::Model(e) => e.is_transient(),
        }
    }

    /// The system message left in the conversation.
    fn fallback_message(&self, provider: &str) -> String {
        match self {
            ProviderFailure::Registry(bldr_llm_registry::Error::ProviderNotFound(id)) => format!(
                "Unknown model provider '{id}'. Pick one of the configured providers and send your message again."
            ),
            ProviderFailure::Registry(e @ bldr_llm_registry::Error::MissingCredential { .. }) => {
                format!(
                    "I couldn't reach the {provider} model because its API key credential is missing: {e}. Add the key and send your message again."
                )
            }
            ProviderFailure::Model(e) if e.is_credential() => format!(
                "The {provider} model rejected the API key credential ({e}). Check the configured key and send your message again."
            ),
            ProviderFailure::Model(bldr_llm::Error::MalformedPlan(detail)) => format!(
                "The {provider} model returned a plan I couldn't use ({detail}), so nothing was changed. Try rephrasing the request or switching providers."
            ),
            other => format!(
                "The {provider} model is unavailable right now ({other}). Your message was saved; try again in a moment."
            ),
        }
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderFailure::Registry(e) => e.fmt(f),
            ProviderFailure::Model(e) => e.fmt(f),
        }
    }
}

/// One running build.
struct Build {
    inner: Arc<Inner>,
    handle: BuildHandle,
    executor: Arc<ActionExecutor>,
    request: BuildRequest,
    /// Conversation messages before this build's prompt.
    history: Vec<Message>,
}

impl Build {
    async fn run(self) {
        self.transition(BuildStatus::Analyzing, "Analyzing request", PERCENT_ANALYZING);

        let model_request = self.model_request();
        let plan = match self.request_plan(&model_request).await {
            Ok(plan) => plan,
            Err(failure) => {
                self.fail(failure);
                return;
            }
        };

        let mut actions = plan.actions.clone();
        self.handle.update(|p| p.tokens_used += plan.metadata.tokens_used);
        for reason in &plan.rejected {
            self.report_error(format!("skipped tool call: {reason}"));
        }
        self.apply_actions(&mut actions).await;
        self.verify_files(&actions).await;
        self.finish(plan, actions);
    }

    fn model_request(&self) -> ModelRequest {
        bldr_llm::request(self.request.prompt.clone())
            .mode(self.request.mode)
            .thinking(self.request.thinking)
            .high_power(self.request.high_power)
            .web_search(self.request.web_search)
            .provider(self.request.provider.clone())
            .history(&self.history, self.inner.config.history_limit)
            .build()
    }

    /// Ask the provider for a plan, retrying once on a transient failure.
    async fn request_plan(&self, request: &ModelRequest) -> std::result::Result<Plan, ProviderFailure> {
        let mut attempt = 1;
        loop {
            match self.plan_once(request).await {
                Ok(plan) if plan.is_usable() => return Ok(plan),
                Ok(_) => {
                    return Err(ProviderFailure::Model(bldr_llm::Error::MalformedPlan(
                        "the response had no content and no actions".into(),
                    )));
                }
                Err(failure) if failure.is_transient() && attempt < MAX_MODEL_ATTEMPTS => {
                    tracing::warn!(
                        build_id = self.handle.build_id(),
                        attempt,
                        error = %failure,
                        "model call failed, retrying"
                    );
                    self.discard_draft(&failure);
                    attempt += 1;
                }
                Err(failure) => return Err(failure),
            }
        }
    }

    /// Throw away the text streamed by a failed attempt.
    fn discard_draft(&self, failure: &ProviderFailure) {
        let had_text = {
            let mut draft = self.handle.state.draft.lock();
            let had_text = !draft.is_empty();
            draft.clear();
            had_text
        };
        if had_text {
            self.inner.hub.publish(ProgressEvent::Reset {
                project_id: self.handle.project_id().to_string(),
                build_id: self.handle.build_id().to_string(),
                reason: format!("retrying after: {failure}"),
            });
        }
    }

    async fn plan_once(&self, request: &ModelRequest) -> std::result::Result<Plan, ProviderFailure> {
        let provider = &self.request.provider;
        let response = self
            .inner
            .registry
            .dispatch(provider, request)
            .map_err(ProviderFailure::Registry)?;

        let timeout = self.inner.config.model_timeout;
        let mut plan = tokio::time::timeout(timeout, self.collect_plan(response))
            .await
            .map_err(|_| ProviderFailure::Model(bldr_llm::Error::Timeout(timeout.as_secs())))?
            .map_err(ProviderFailure::Model)?;

        if plan.metadata.model.is_none() {
            plan.metadata.model = self
                .inner
                .registry
                .registration(provider)
                .map(|r| r.default_model.clone());
        }
        Ok(plan)
    }

    /// Drain the response stream, forwarding text deltas as token events.
    async fn collect_plan(&self, response: bldr_llm::PlanResponse) -> std::result::Result<Plan, bldr_llm::Error> {
        let mut plan = Plan::default();
        let mut events = response.events();
        while let Some(event) = events.next().await {
            match event? {
                PlanEvent::TextDelta(delta) => {
                    self.handle.state.draft.lock().push_str(&delta);
                    self.inner.hub.publish(ProgressEvent::Token {
                        project_id: self.handle.project_id().to_string(),
                        build_id: self.handle.build_id().to_string(),
                        delta: delta.clone(),
                    });
                    plan.content.push_str(&delta);
                }
                PlanEvent::Action(action) => plan.actions.push(action),
                PlanEvent::Rejected(reason) => plan.rejected.push(reason),
                PlanEvent::Finish { usage } => {
                    plan.metadata.tokens_used = usage.map(|u| u.total()).unwrap_or_default();
                }
                PlanEvent::Error(message) => return Err(bldr_llm::Error::Sse(message)),
            }
        }
        plan.metadata.web_search_used = self.request.web_search;
        Ok(plan)
    }

    async fn apply_actions(&self, actions: &mut [Action]) {
        let total = actions.len();
        self.transition(
            BuildStatus::Building,
            format!("Applying {total} actions"),
            PERCENT_BUILDING,
        );

        for (index, action) in actions.iter_mut().enumerate() {
            let step = action.kind.summary();
            self.handle.update(|p| p.current_step_description = step.clone());

            let outcome = self.executor.apply(action).await;

            if !outcome.success {
                self.report_error(format!("{step}: {}", outcome.detail));
            }

            let span = u64::from(PERCENT_BUILDING_END - PERCENT_BUILDING);
            let percent = PERCENT_BUILDING + (span * (index as u64 + 1) / total as u64) as u8;
            self.handle.update(|p| {
                if outcome.file_written {
                    p.files_modified += 1;
                }
                p.lines_written += outcome.lines_written;
                p.set_percent(percent);
            });
            self.publish_progress();
            self.persist();
        }
    }

    /// Check that every file the plan wrote is present in the project.
    async fn verify_files(&self, actions: &[Action]) {
        let written: Vec<&str> = actions
            .iter()
            .filter(|a| a.completed)
            .filter_map(|a| match &a.kind {
                ActionKind::CreateFile { path, .. } => Some(path.as_str()),
                _ => None,
            })
            .collect();
        if written.is_empty() {
            return;
        }

        self.transition(BuildStatus::Testing, "Verifying files", PERCENT_TESTING);
        for path in written {
            match self.executor.store().exists(path).await {
                Ok(true) => {}
                Ok(false) => {
                    self.handle
                        .update(|p| p.record_error(format!("{path} is missing after it was written")));
                }
                Err(e) => {
                    self.handle
                        .update(|p| p.record_error(format!("could not verify {path}: {e}")));
                }
            }
        }
    }

    fn finish(&self, plan: Plan, actions: Vec<Action>) {
        let mut tools_used = plan.metadata.tools_used.clone();
        for action in &actions {
            let name = action.kind.name().to_string();
            if !tools_used.contains(&name) {
                tools_used.push(name);
            }
        }
        let metadata = MessageMetadata {
            mode: Some(self.request.mode),
            provider: Some(self.request.provider.clone()),
            tokens_used: plan.metadata.tokens_used,
            effort_score: plan.metadata.effort_score,
            web_search_used: plan.metadata.web_search_used,
            tools_used,
        };
        let message = Message::assistant(plan.content.clone())
            .with_actions(actions)
            .with_metadata(metadata);
        *self.handle.state.draft.lock() = plan.content;

        self.append_and_checkpoint(message);

        self.handle.update(|p| p.set_percent(100));
        self.publish_progress();
        let snapshot = self.handle.snapshot();
        self.inner.hub.publish(ProgressEvent::Complete {
            project_id: snapshot.project_id.clone(),
            build_id: snapshot.build_id.clone(),
            files_created: snapshot.files_modified,
        });
        self.transition(BuildStatus::Completed, "Build complete", 100);

        let snapshot = self.handle.snapshot();
        tracing::info!(
            build_id = %snapshot.build_id,
            files_modified = snapshot.files_modified,
            errors = snapshot.errors.len(),
            "build completed"
        );
        self.release();
    }

    fn fail(&self, failure: ProviderFailure) {
        tracing::error!(
            build_id = self.handle.build_id(),
            provider = %self.request.provider,
            error = %failure,
            "model provider failed"
        );
        let content = failure.fallback_message(&self.request.provider);
        let message = Message::system(content).with_metadata(MessageMetadata {
            mode: Some(self.request.mode),
            provider: Some(self.request.provider.clone()),
            ..Default::default()
        });
        let conversation_id = self.handle.conversation_id();
        if let Err(e) = self.inner.conversations.append(conversation_id, message) {
            tracing::error!(conversation_id, error = %e, "failed to store fallback message");
        }

        self.handle.update(|p| p.record_error(failure.to_string()));
        let percent = self.handle.snapshot().progress_percent;
        self.transition(BuildStatus::Error, failure.to_string(), percent);
        self.release();
    }

    fn append_and_checkpoint(&self, message: Message) {
        let conversations = &self.inner.conversations;
        let conversation_id = self.handle.conversation_id();
        if let Err(e) = conversations.append(conversation_id, message) {
            tracing::error!(conversation_id, error = %e, "failed to store assistant message");
            self.handle
                .update(|p| p.record_error(format!("failed to store assistant message: {e}")));
            return;
        }
        match conversations.create_checkpoint(conversation_id) {
            Ok(_) => {
                self.handle.update(|p| p.checkpoints_created += 1);
            }
            Err(e) => tracing::warn!(conversation_id, error = %e, "failed to create checkpoint"),
        }
    }

    /// Record a non-fatal failure and tell followers about it.
    fn report_error(&self, message: String) {
        self.handle.update(|p| p.record_error(message.clone()));
        self.inner.hub.publish(ProgressEvent::Error {
            project_id: self.handle.project_id().to_string(),
            build_id: self.handle.build_id().to_string(),
            message,
        });
    }

    fn transition(&self, status: BuildStatus, description: impl Into<String>, percent: u8) {
        let description = description.into();
        self.handle.update(|p| {
            if let Err(e) = p.advance(status, description) {
                tracing::warn!(error = %e, "ignoring build status change");
            }
            p.set_percent(percent);
        });
        self.publish_progress();
        self.publish_status();
        self.persist();
    }

    fn publish_progress(&self) {
        let snapshot = self.handle.snapshot();
        self.inner.hub.publish(ProgressEvent::Progress {
            project_id: snapshot.project_id,
            build_id: snapshot.build_id,
            step: snapshot.current_step_description,
            progress: snapshot.progress_percent,
        });
    }

    fn publish_status(&self) {
        let snapshot = self.handle.snapshot();
        self.inner.hub.publish(ProgressEvent::Status {
            project_id: snapshot.project_id,
            build_id: snapshot.build_id,
            status: snapshot.status,
            message: snapshot.current_step_description,
        });
    }

    fn persist(&self) {
        if let Err(e) = self.inner.builds.save(&self.handle.snapshot()) {
            tracing::warn!(build_id = self.handle.build_id(), error = %e, "failed to persist build progress");
        }
    }

    /// Remove this build from the active table.
    fn release(&self) {
        let mut active = self.inner.active.lock();
        if active
            .get(self.handle.project_id())
            .is_some_and(|h| h.build_id() == self.handle.build_id())
        {
            active.remove(self.handle.project_id());
        }
        drop(active);
        self.inner.hub.prune(self.handle.project_id());
    }
}
