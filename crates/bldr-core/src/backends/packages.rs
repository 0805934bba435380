use std::sync::Arc;

use async_trait::async_trait;

use super::{CommandRunner, PackageManager, PackageReport, shell_quote};
use crate::error::Result;

/// Installs packages one at a time with a shell command such as
/// `npm install <pkg>`.
pub struct CommandPackageManager {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl CommandPackageManager {
    pub fn npm(runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(runner, "npm install")
    }

    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }
}

#[async_trait]
impl PackageManager for CommandPackageManager {
    async fn install(&self, packages: &[String]) -> Result<PackageReport> {
        let mut report = PackageReport::default();
        for package in packages {
            let command = format!("{} {}", self.program, shell_quote(package));
            match self.runner.run(&command).await {
                Ok(output) if output.success() => report.installed.push(package.clone()),
                Ok(output) => {
                    let reason = match output.stderr.trim() {
                        "" => format!("exit code {:?}", output.exit_code),
                        stderr => stderr.to_string(),
                    };
                    report.failed.push((package.clone(), reason));
                }
                Err(e) => report.failed.push((package.clone(), e.to_string())),
            }
        }
        Ok(report)
    }
}
