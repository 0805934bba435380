//! Build progress records and the per-project push channel.
//!
//! Producers publish [`ProgressEvent`]s on a [`ProgressHub`]. Consumers
//! follow one build with [`follow_build`], which reads the push channel and
//! falls back to polling the [`BuildProgress`] record when the channel drops
//! out. A [`ProgressTracker`] sits in between so a consumer never sees the
//! percentage go backwards or a terminal status twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bldr_llm::now_ms;
use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{Error, Result};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Initializing,
    Analyzing,
    Building,
    Testing,
    Completed,
    Error,
}

impl BuildStatus {
    fn rank(self) -> u8 {
        match self {
            BuildStatus::Initializing => 0,
            BuildStatus::Analyzing => 1,
            BuildStatus::Building => 2,
            BuildStatus::Testing => 3,
            BuildStatus::Completed | BuildStatus::Error => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BuildStatus::Completed | BuildStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Initializing => "initializing",
            BuildStatus::Analyzing => "analyzing",
            BuildStatus::Building => "building",
            BuildStatus::Testing => "testing",
            BuildStatus::Completed => "completed",
            BuildStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "initializing" => BuildStatus::Initializing,
            "analyzing" => BuildStatus::Analyzing,
            "building" => BuildStatus::Building,
            "testing" => BuildStatus::Testing,
            "completed" => BuildStatus::Completed,
            "error" => BuildStatus::Error,
            other => return Err(Error::Store(format!("unknown build status '{other}'"))),
        })
    }
}

/// The state of one build of one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildProgress {
    pub build_id: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub status: BuildStatus,
    pub progress_percent: u8,
    pub current_step_description: String,
    pub files_modified: u32,
    pub lines_written: u64,
    pub tokens_used: u64,
    pub checkpoints_created: u32,
    pub errors: Vec<String>,
    pub started_at_ms: i64,
    pub updated_at_ms: i64,
}

impl BuildProgress {
    pub fn new(build_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            build_id: build_id.into(),
            project_id: project_id.into(),
            conversation_id: None,
            status: BuildStatus::Initializing,
            progress_percent: 0,
            current_step_description: "Initializing".into(),
            files_modified: 0,
            lines_written: 0,
            tokens_used: 0,
            checkpoints_created: 0,
            errors: Vec::new(),
            started_at_ms: now,
            updated_at_ms: now,
        }
    }

    /// Move to `status`. Staying in the current status is allowed, going
    /// back to an earlier one (or leaving a terminal one) is not.
    pub fn advance(&mut self, status: BuildStatus, description: impl Into<String>) -> Result<()> {
        let revisit = status != self.status
            && (self.status.is_terminal() || status.rank() < self.status.rank());
        if revisit {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.current_step_description = description.into();
        self.touch();
        Ok(())
    }

    /// Raise the percentage. Lower values are ignored.
    pub fn set_percent(&mut self, percent: u8) {
        self.progress_percent = self.progress_percent.max(percent.min(100));
        self.touch();
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
        self.touch();
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    fn touch(&mut self) {
        self.updated_at_ms = now_ms();
    }
}

/// One message on the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    Progress {
        project_id: String,
        build_id: String,
        step: String,
        progress: u8,
    },
    Status {
        project_id: String,
        build_id: String,
        status: BuildStatus,
        message: String,
    },
    /// Incremental model output.
    Token {
        project_id: String,
        build_id: String,
        delta: String,
    },
    /// Text streamed so far is void; a retried model call streams anew.
    Reset {
        project_id: String,
        build_id: String,
        reason: String,
    },
    /// A non-fatal failure, e.g. one action that could not be applied.
    Error {
        project_id: String,
        build_id: String,
        message: String,
    },
    Complete {
        project_id: String,
        build_id: String,
        files_created: u32,
    },
}

impl ProgressEvent {
    pub fn project_id(&self) -> &str {
        match self {
            ProgressEvent::Progress { project_id, .. }
            | ProgressEvent::Status { project_id, .. }
            | ProgressEvent::Token { project_id, .. }
            | ProgressEvent::Reset { project_id, .. }
            | ProgressEvent::Error { project_id, .. }
            | ProgressEvent::Complete { project_id, .. } => project_id,
        }
    }

    pub fn build_id(&self) -> &str {
        match self {
            ProgressEvent::Progress { build_id, .. }
            | ProgressEvent::Status { build_id, .. }
            | ProgressEvent::Token { build_id, .. }
            | ProgressEvent::Reset { build_id, .. }
            | ProgressEvent::Error { build_id, .. }
            | ProgressEvent::Complete { build_id, .. } => build_id,
        }
    }

    /// Whether this is the final status event of a build.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Status { status, .. } if status.is_terminal())
    }
}

/// Per-project broadcast channels, created on first use.
#[derive(Clone, Default)]
pub struct ProgressHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<ProgressEvent>>>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, project_id: &str) -> broadcast::Sender<ProgressEvent> {
        self.channels
            .lock()
            .entry(project_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    pub fn subscribe(&self, project_id: &str) -> broadcast::Receiver<ProgressEvent> {
        self.sender(project_id).subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ProgressEvent) {
        let sender = self.sender(event.project_id());
        let _ = sender.send(event);
    }

    /// Drop the project's channel if nobody is listening. A later subscriber
    /// or publisher recreates it.
    pub fn prune(&self, project_id: &str) -> bool {
        let mut channels = self.channels.lock();
        let idle = channels
            .get(project_id)
            .is_some_and(|sender| sender.receiver_count() == 0);
        if idle {
            channels.remove(project_id);
        }
        idle
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }
}

/// Consumer-side filter for one build's events.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    max_percent: Option<u8>,
    last_status: Option<BuildStatus>,
    complete_seen: bool,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the event if the consumer should see it; stale progress and
    /// repeated statuses are dropped.
    pub fn observe(&mut self, event: ProgressEvent) -> Option<ProgressEvent> {
        if self.is_finished() && !matches!(event, ProgressEvent::Token { .. }) {
            return None;
        }
        match &event {
            ProgressEvent::Progress { progress, .. } => {
                if self.max_percent.is_some_and(|max| *progress < max) {
                    return None;
                }
                self.max_percent = Some(*progress);
            }
            ProgressEvent::Status { status, .. } => {
                if self
                    .last_status
                    .is_some_and(|last| *status == last || status.rank() < last.rank())
                {
                    return None;
                }
                self.last_status = Some(*status);
            }
            ProgressEvent::Complete { .. } => {
                if self.complete_seen {
                    return None;
                }
                self.complete_seen = true;
            }
            ProgressEvent::Token { .. }
            | ProgressEvent::Reset { .. }
            | ProgressEvent::Error { .. } => {}
        }
        Some(event)
    }

    /// Translate a polled record into the events the consumer has not seen
    /// yet: at most one progress, one complete and one status event.
    pub fn observe_snapshot(&mut self, snapshot: &BuildProgress) -> Vec<ProgressEvent> {
        let project_id = &snapshot.project_id;
        let build_id = &snapshot.build_id;
        let mut candidates = Vec::with_capacity(3);

        if self.max_percent != Some(snapshot.progress_percent) {
            candidates.push(ProgressEvent::Progress {
                project_id: project_id.clone(),
                build_id: build_id.clone(),
                step: snapshot.current_step_description.clone(),
                progress: snapshot.progress_percent,
            });
        }
        if snapshot.status == BuildStatus::Completed {
            candidates.push(ProgressEvent::Complete {
                project_id: project_id.clone(),
                build_id: build_id.clone(),
                files_created: snapshot.files_modified,
            });
        }
        candidates.push(ProgressEvent::Status {
            project_id: project_id.clone(),
            build_id: build_id.clone(),
            status: snapshot.status,
            message: snapshot.current_step_description.clone(),
        });

        candidates
            .into_iter()
            .filter_map(|event| self.observe(event))
            .collect()
    }

    /// A terminal status has been observed.
    pub fn is_finished(&self) -> bool {
        self.last_status.is_some_and(BuildStatus::is_terminal)
    }
}

/// Point lookup of a build's progress record, used for polling.
#[async_trait]
pub trait BuildLookup: Send + Sync {
    async fn build_progress(&self, build_id: &str) -> Result<Option<BuildProgress>>;
}

/// Persistence for build progress records.
pub trait BuildStore: Send + Sync {
    fn save(&self, progress: &BuildProgress) -> Result<()>;
    fn get(&self, build_id: &str) -> Result<Option<BuildProgress>>;
    /// The most recently started build of `project_id` that has not reached
    /// a terminal status.
    fn active_for_project(&self, project_id: &str) -> Result<Option<BuildProgress>>;
}

#[derive(Default)]
pub struct MemoryBuildStore {
    builds: Mutex<HashMap<String, BuildProgress>>,
}

impl MemoryBuildStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BuildStore for MemoryBuildStore {
    fn save(&self, progress: &BuildProgress) -> Result<()> {
        self.builds
            .lock()
            .insert(progress.build_id.clone(), progress.clone());
        Ok(())
    }

    fn get(&self, build_id: &str) -> Result<Option<BuildProgress>> {
        Ok(self.builds.lock().get(build_id).cloned())
    }

    fn active_for_project(&self, project_id: &str) -> Result<Option<BuildProgress>> {
        Ok(self
            .builds
            .lock()
            .values()
            .filter(|b| b.project_id == project_id && !b.is_finished())
            .max_by_key(|b| b.started_at_ms)
            .cloned())
    }
}

#[async_trait]
impl<T: BuildStore + ?Sized> BuildLookup for T {
    async fn build_progress(&self, build_id: &str) -> Result<Option<BuildProgress>> {
        self.get(build_id)
    }
}

/// Follow one build until it reaches a terminal status.
///
/// Subscribe to the push channel *before* calling this so no event falls in
/// the gap between the initial snapshot and the first received event. With
/// no receiver (or once the channel closes) the build record is polled every
/// `poll_interval`. The terminal status is yielded exactly once, and the
/// stream ends right after it.
pub fn follow_build(
    lookup: Arc<dyn BuildLookup>,
    receiver: Option<broadcast::Receiver<ProgressEvent>>,
    project_id: String,
    build_id: String,
    poll_interval: Duration,
) -> impl Stream<Item = ProgressEvent> + Send {
    async_stream::stream! {
        let mut tracker = ProgressTracker::new();

        match lookup.build_progress(&build_id).await {
            Ok(Some(snapshot)) => {
                for event in tracker.observe_snapshot(&snapshot) {
                    yield event;
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(build_id = %build_id, error = %e, "initial progress lookup failed"),
        }
        if tracker.is_finished() {
            return;
        }

        if let Some(mut receiver) = receiver {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if event.build_id() != build_id {
                            continue;
                        }
                        if let Some(event) = tracker.observe(event) {
                            yield event;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(build_id = %build_id, skipped, "push channel lagged, resyncing");
                        if let Ok(Some(snapshot)) = lookup.build_progress(&build_id).await {
                            for event in tracker.observe_snapshot(&snapshot) {
                                yield event;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::warn!(build_id = %build_id, "push channel closed, falling back to polling");
                        break;
                    }
                }
                if tracker.is_finished() {
                    return;
                }
            }
        }

        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let failure = match lookup.build_progress(&build_id).await {
                Ok(Some(snapshot)) => {
                    for event in tracker.observe_snapshot(&snapshot) {
                        yield event;
                    }
                    if tracker.is_finished() {
                        return;
                    }
                    continue;
                }
                Ok(None) => format!("build {build_id} not found"),
                Err(e) => format!("progress polling failed: {e}"),
            };
            tracing::error!(build_id = %build_id, %failure, "lost track of build");
            if let Some(event) = tracker.observe(ProgressEvent::Status {
                project_id: project_id.clone(),
                build_id: build_id.clone(),
                status: BuildStatus::Error,
                message: failure,
            }) {
                yield event;
            }
            return;
        }
    }
}
