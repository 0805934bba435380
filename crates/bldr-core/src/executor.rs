use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bldr_llm::{Action, ActionKind};

use crate::backends::{
    CommandPackageManager, CommandRunner, Deployer, LocalCommandRunner, LocalProjectStore,
    PackageManager, ProjectStore, RemoteCommandRunner, UnconfiguredDeployer,
};
use crate::error::{Error, Result};

/// What happened when one action was applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutcome {
    pub success: bool,
    pub detail: String,
    pub lines_written: u64,
    /// The action wrote a file (counts towards `filesModified`).
    pub file_written: bool,
}

impl ActionOutcome {
    fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
            ..Default::default()
        }
    }

    fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
            ..Default::default()
        }
    }
}

/// Applies actions against one project.
///
/// The executor never fails as a whole: every external error is folded into
/// an unsuccessful [`ActionOutcome`] so the caller can record it and move on
/// to the next action.
pub struct ActionExecutor {
    store: Arc<dyn ProjectStore>,
    commands: Arc<dyn CommandRunner>,
    packages: Arc<dyn PackageManager>,
    deployer: Arc<dyn Deployer>,
}

impl ActionExecutor {
    /// Packages are installed with `npm` through `commands`; deploys fail
    /// until a deployer is configured.
    pub fn new(store: Arc<dyn ProjectStore>, commands: Arc<dyn CommandRunner>) -> Self {
        let packages = Arc::new(CommandPackageManager::npm(Arc::clone(&commands)));
        Self {
            store,
            commands,
            packages,
            deployer: Arc::new(UnconfiguredDeployer),
        }
    }

    pub fn with_packages(mut self, packages: Arc<dyn PackageManager>) -> Self {
        self.packages = packages;
        self
    }

    pub fn with_deployer(mut self, deployer: Arc<dyn Deployer>) -> Self {
        self.deployer = deployer;
        self
    }

    pub fn store(&self) -> &Arc<dyn ProjectStore> {
        &self.store
    }

    /// Apply one action. Completed actions are skipped; a successful apply
    /// marks the action completed.
    pub async fn apply(&self, action: &mut Action) -> ActionOutcome {
        if action.completed {
            tracing::debug!(action = action.kind.name(), "action already applied, skipping");
            return ActionOutcome::ok("already applied");
        }

        let outcome = match self.run(&action.kind).await {
            Ok(outcome) => outcome,
            Err(e) => ActionOutcome::failed(e.to_string()),
        };

        if outcome.success {
            action.mark_completed();
            tracing::debug!(action = action.kind.name(), detail = %outcome.detail, "action applied");
        } else {
            tracing::warn!(action = action.kind.name(), detail = %outcome.detail, "action failed");
        }
        outcome
    }

    async fn run(&self, kind: &ActionKind) -> Result<ActionOutcome> {
        match kind {
            ActionKind::CreateFile { path, content } => {
                self.store.write_file(path, content).await?;
                let lines = content.lines().count() as u64;
                Ok(ActionOutcome {
                    success: true,
                    detail: format!("wrote {} bytes to {path}", content.len()),
                    lines_written: lines,
                    file_written: true,
                })
            }
            ActionKind::CreateFolder { path } => {
                self.store.create_folder(path).await?;
                Ok(ActionOutcome::ok(format!("created folder {path}")))
            }
            ActionKind::InstallPackage { packages } => {
                if packages.is_empty() {
                    return Ok(ActionOutcome::ok("no packages to install"));
                }
                let report = self.packages.install(packages).await?;
                if report.failed.is_empty() {
                    return Ok(ActionOutcome::ok(format!(
                        "installed {}",
                        report.installed.join(", ")
                    )));
                }
                let failures = report
                    .failed
                    .iter()
                    .map(|(package, reason)| format!("{package}: {reason}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                Ok(ActionOutcome::failed(format!(
                    "failed to install {} of {} packages ({failures})",
                    report.failed.len(),
                    packages.len()
                )))
            }
            ActionKind::RunCommand { command } => {
                let output = self.commands.run(command).await?;
                if output.success() {
                    return Ok(ActionOutcome::ok(format!(
                        "`{command}` exited with 0 in {} ms",
                        output.runtime_ms
                    )));
                }
                let code = output
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown".into());
                let mut detail = format!("`{command}` exited with {code}");
                let stderr = output.stderr.trim();
                if !stderr.is_empty() {
                    detail.push_str(": ");
                    detail.push_str(stderr);
                }
                Ok(ActionOutcome::failed(detail))
            }
            ActionKind::Deploy { target } => {
                let location = self.deployer.deploy(target).await?;
                Ok(ActionOutcome::ok(format!("deployed to {location}")))
            }
        }
    }
}

/// Hands out the executor for a project id.
pub trait ProjectResolver: Send + Sync {
    fn executor(&self, project_id: &str) -> Result<Arc<ActionExecutor>>;
}

impl<F> ProjectResolver for F
where
    F: Fn(&str) -> Result<Arc<ActionExecutor>> + Send + Sync,
{
    fn executor(&self, project_id: &str) -> Result<Arc<ActionExecutor>> {
        (self)(project_id)
    }
}

/// Projects laid out as `<root>/<project_id>` on local disk. Commands run
/// locally unless a remote sandbox is configured.
pub struct DirectoryProjects {
    root: PathBuf,
    sandbox: Option<RemoteCommandRunner>,
    command_timeout: Duration,
}

impl DirectoryProjects {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sandbox: None,
            command_timeout: crate::backends::DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_sandbox(mut self, sandbox: RemoteCommandRunner) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, project_id: &str) -> Result<PathBuf> {
        validate_project_id(project_id)?;
        Ok(self.root.join(project_id))
    }
}

impl ProjectResolver for DirectoryProjects {
    fn executor(&self, project_id: &str) -> Result<Arc<ActionExecutor>> {
        let dir = self.project_dir(project_id)?;
        let commands: Arc<dyn CommandRunner> = match &self.sandbox {
            Some(sandbox) => Arc::new(sandbox.clone()),
            None => Arc::new(LocalCommandRunner::new(&dir).with_timeout(self.command_timeout)),
        };
        Ok(Arc::new(ActionExecutor::new(
            Arc::new(LocalProjectStore::new(dir)),
            commands,
        )))
    }
}

fn validate_project_id(project_id: &str) -> Result<()> {
    let valid = !project_id.is_empty()
        && project_id.len() <= 128
        && project_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidProjectId(project_id.to_string()))
    }
}
