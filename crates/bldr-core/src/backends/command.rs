use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use super::{CommandOutput, CommandRunner};
use crate::error::{Error, Result};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs commands with `bash -c` inside the project directory.
#[derive(Debug, Clone)]
pub struct LocalCommandRunner {
    workdir: PathBuf,
    timeout: Duration,
}

impl LocalCommandRunner {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CommandRunner for LocalCommandRunner {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        tokio::fs::create_dir_all(&self.workdir).await?;

        let started = Instant::now();
        let child = Command::new("bash")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                tracing::warn!(command, timeout_secs = self.timeout.as_secs(), "command timed out");
                return Err(Error::CommandTimeout(self.timeout.as_secs()));
            }
        };

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            runtime_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_exit_code_and_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = LocalCommandRunner::new(dir.path());

        let ok = runner.run("echo hello").await.expect("run");
        assert!(ok.success());
        assert_eq!(ok.stdout.trim(), "hello");

        let failed = runner.run("echo oops >&2; exit 3").await.expect("run");
        assert_eq!(failed.exit_code, Some(3));
        assert_eq!(failed.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn runs_inside_the_project_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = LocalCommandRunner::new(dir.path());
        runner.run("touch marker").await.expect("run");
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn long_commands_time_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner =
            LocalCommandRunner::new(dir.path()).with_timeout(Duration::from_millis(200));
        let err = runner.run("sleep 5").await.expect_err("timeout");
        assert!(matches!(err, Error::CommandTimeout(_)));
    }
}
