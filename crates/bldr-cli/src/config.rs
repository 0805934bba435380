use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use bldr_core::CoordinatorConfig;
use bldr_llm::BuildMode;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bldr", version, about = "Turn prompts into applied project changes")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Serve the HTTP API and the WebSocket progress channel.
    Serve(ServeArgs),
    /// Run one build in a project and follow it to completion.
    Build(BuildArgs),
    /// List model providers, or manage their stored API keys.
    Providers {
        #[command(subcommand)]
        action: Option<ProvidersAction>,
    },
    /// Inspect and roll back conversations.
    Conversations {
        #[command(subcommand)]
        action: ConversationsAction,
    },
}

/// Settings shared by every subcommand.
#[derive(Args, Clone)]
pub struct GlobalArgs {
    /// SQLite database path. Defaults to the user data directory.
    #[arg(long, global = true, env = "BLDR_DB")]
    pub db: Option<PathBuf>,

    /// Directory holding one subdirectory per project.
    #[arg(long, global = true, env = "BLDR_PROJECTS_DIR")]
    pub projects_dir: Option<PathBuf>,

    /// Upper bound for one model call, in seconds.
    #[arg(long, global = true, env = "BLDR_MODEL_TIMEOUT_SECS", default_value_t = 60)]
    pub model_timeout_secs: u64,

    /// Polling interval used when the push channel is unavailable, in seconds.
    #[arg(long, global = true, env = "BLDR_POLL_INTERVAL_SECS", default_value_t = 2)]
    pub poll_interval_secs: u64,

    /// Number of prior messages sent with each prompt.
    #[arg(long, global = true, env = "BLDR_HISTORY_LIMIT", default_value_t = 10)]
    pub history_limit: usize,

    /// Seconds after which an unfinished build nobody updates stops
    /// blocking new builds of its project.
    #[arg(long, global = true, env = "BLDR_STALE_BUILD_SECS", default_value_t = 600)]
    pub stale_build_secs: u64,

    /// Remote sandbox service for commands. Commands run locally when unset.
    #[arg(long, global = true, env = "SANDBOX_SERVICE_URL")]
    pub sandbox_url: Option<String>,

    /// Timeout for locally executed commands, in seconds.
    #[arg(long, global = true, env = "SANDBOX_TIMEOUT_SEC", default_value_t = 30)]
    pub sandbox_timeout_sec: u64,
}

impl GlobalArgs {
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            model_timeout: Duration::from_secs(self.model_timeout_secs),
            history_limit: self.history_limit,
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            stale_build_after: Duration::from_secs(self.stale_build_secs),
        }
    }
}

#[derive(Args)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "BLDR_LISTEN", default_value = "127.0.0.1:8787")]
    pub listen: SocketAddr,

    /// Provider used when a request does not name one.
    #[arg(long, env = "BLDR_PROVIDER", default_value = "openai")]
    pub provider: String,
}

#[derive(Args)]
pub struct BuildArgs {
    /// Project id (a directory under the projects dir).
    pub project: String,

    /// What to build.
    #[arg(required = true, num_args = 1..)]
    pub prompt: Vec<String>,

    #[arg(long, env = "BLDR_PROVIDER", default_value = "openai")]
    pub provider: String,

    #[arg(long, default_value = "agent")]
    pub mode: BuildMode,

    /// Continue an existing conversation.
    #[arg(long)]
    pub conversation: Option<String>,

    #[arg(long)]
    pub thinking: bool,

    #[arg(long)]
    pub high_power: bool,

    #[arg(long)]
    pub web_search: bool,
}

#[derive(Subcommand)]
pub enum ProvidersAction {
    /// Store an API key for a provider. Reads from stdin when not a terminal.
    Set { provider: String },
    /// Remove a stored API key.
    Remove { provider: String },
}

#[derive(Subcommand)]
pub enum ConversationsAction {
    /// List conversations, most recent first.
    List,
    /// Print a conversation's messages.
    Show { id: String },
    /// Drop a message and everything after it.
    Rollback { id: String, message_id: String },
}
