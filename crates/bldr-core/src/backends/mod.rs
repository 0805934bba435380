//! The external collaborators an [`ActionExecutor`](crate::ActionExecutor)
//! drives: the project file store, the package manager, the command sandbox
//! and the deployment target.

mod command;
mod deploy;
mod fs;
mod memory;
mod packages;
mod sandbox;

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::{Error, Result};

pub use command::{DEFAULT_COMMAND_TIMEOUT, LocalCommandRunner};
pub use deploy::UnconfiguredDeployer;
pub use fs::LocalProjectStore;
pub use memory::MemoryProjectStore;
pub use packages::CommandPackageManager;
pub use sandbox::RemoteCommandRunner;

/// Project file storage. Writes are upserts: writing the same path twice
/// leaves the second content in place.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;
    async fn create_folder(&self, path: &str) -> Result<()>;
    async fn read_file(&self, path: &str) -> Result<Option<String>>;
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Output of one sandboxed command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub runtime_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<CommandOutput>;
}

/// Per-package result of an install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageReport {
    pub installed: Vec<String>,
    /// `(package, reason)` pairs.
    pub failed: Vec<(String, String)>,
}

#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn install(&self, packages: &[String]) -> Result<PackageReport>;
}

#[async_trait]
pub trait Deployer: Send + Sync {
    /// Deploy the project and return a human-readable location or summary.
    async fn deploy(&self, target: &str) -> Result<String>;
}

/// Turn an action path (`"/src/App.tsx"`, `"src/App.tsx"`) into a path
/// relative to the project root. Rejects paths that would escape the root.
pub(crate) fn relative_path(path: &str) -> Result<PathBuf> {
    let trimmed = path.trim().trim_start_matches(['/', '\\']);
    let mut out = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return Err(Error::InvalidPath(path.to_string())),
        }
    }
    if out.as_os_str().is_empty() {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(out)
}

/// Quote a single shell word with single quotes.
pub(crate) fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}
