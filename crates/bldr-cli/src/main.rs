mod app;
mod commands;
mod config;
mod server;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::config::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // JSON logs when BLDR_LOG_JSON=1, human-readable otherwise.
    let json_logs = std::env::var("BLDR_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bldr=info"));
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let cli = Cli::parse();
    let app = App::open(&cli.global)?;

    match cli.command {
        Command::Serve(args) => server::serve(app, args).await,
        Command::Build(args) => commands::build(&app, args).await,
        Command::Providers { action } => commands::providers(&app, action),
        Command::Conversations { action } => commands::conversations(&app, action),
    }
}
