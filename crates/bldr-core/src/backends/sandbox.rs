use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{CommandOutput, CommandRunner};
use crate::error::{Error, Result};

const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct RunRequest<'a> {
    language: &'a str,
    code: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    output: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    exit_code: Option<i32>,
    /// Milliseconds.
    #[serde(default)]
    runtime: u64,
}

/// Executes commands through a remote sandbox service.
#[derive(Debug, Clone)]
pub struct RemoteCommandRunner {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteCommandRunner {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()
            .map_err(|e| Error::Sandbox(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Whether the sandbox service answers its health check.
    pub async fn health(&self) -> bool {
        match self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "sandbox health check failed");
                false
            }
        }
    }
}

#[async_trait]
impl CommandRunner for RemoteCommandRunner {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        let resp = self
            .client
            .post(format!("{}/run", self.base_url))
            .json(&RunRequest {
                language: "bash",
                code: command,
            })
            .send()
            .await
            .map_err(|e| Error::Sandbox(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Sandbox(format!("HTTP {status}: {body}")));
        }

        let body: RunResponse = resp
            .json()
            .await
            .map_err(|e| Error::Sandbox(e.to_string()))?;

        let exit_code = body
            .exit_code
            .or(Some(if body.success { 0 } else { 1 }));
        Ok(CommandOutput {
            exit_code,
            stdout: body.output,
            stderr: body.error.unwrap_or_default(),
            runtime_ms: body.runtime,
        })
    }
}
