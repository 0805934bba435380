use std::io::{self, BufRead, IsTerminal, Write};
use std::pin::pin;

use anyhow::{Result, bail};
use bldr_core::{BuildRequest, BuildStatus, ProgressEvent};
use futures::StreamExt;

use crate::app::App;
use crate::config::{BuildArgs, ConversationsAction, ProvidersAction};

/// Start (or attach to) a build and stream its progress to the terminal.
/// Model output goes to stdout, everything else to stderr.
pub async fn build(app: &App, args: BuildArgs) -> Result<()> {
    let mut request = BuildRequest::new(args.project, args.provider, args.prompt.join(" "));
    request.mode = args.mode;
    request.thinking = args.thinking;
    request.high_power = args.high_power;
    request.web_search = args.web_search;
    if let Some(id) = args.conversation {
        request = request.in_conversation(id);
    }

    let start = app.coordinator.start_build(request)?;
    if start.is_attached() {
        eprintln!("a build is already running in this project, following it instead");
    }
    let handle = start.into_handle();
    eprintln!(
        "build {} (conversation {})",
        handle.build_id(),
        handle.conversation_id()
    );

    let mut events = pin!(app.coordinator.follow(&handle));
    let mut streamed = false;
    while let Some(event) = events.next().await {
        match event {
            ProgressEvent::Token { delta, .. } => {
                streamed = true;
                print!("{delta}");
                io::stdout().flush()?;
            }
            ProgressEvent::Progress { step, progress, .. } => {
                if streamed {
                    println!();
                    streamed = false;
                }
                eprintln!("[{progress:>3}%] {step}");
            }
            ProgressEvent::Status {
                status, message, ..
            } => eprintln!("{}: {message}", status.as_str()),
            ProgressEvent::Reset { reason, .. } => {
                if streamed {
                    println!();
                    streamed = false;
                }
                eprintln!("discarding the partial answer, {reason}");
            }
            ProgressEvent::Error { message, .. } => eprintln!("error: {message}"),
            ProgressEvent::Complete { files_created, .. } => {
                eprintln!("{files_created} file(s) written");
            }
        }
    }

    let progress = handle.wait().await;
    if progress.status == BuildStatus::Error {
        let last = app
            .coordinator
            .conversations()
            .get(handle.conversation_id())?
            .and_then(|c| c.messages.last().map(|m| m.content.clone()));
        if let Some(content) = last {
            eprintln!("{content}");
        }
        bail!("build {} failed", progress.build_id);
    }
    eprintln!(
        "done: {} file(s), {} line(s), {} error(s)",
        progress.files_modified,
        progress.lines_written,
        progress.errors.len()
    );
    Ok(())
}

pub fn providers(app: &App, action: Option<ProvidersAction>) -> Result<()> {
    match action {
        None => {
            for provider in app.registry().known_providers() {
                let status = if provider.configured {
                    "configured"
                } else {
                    "needs key"
                };
                println!(
                    "{:<10} {:<10} {:<28} {}",
                    provider.id, provider.name, provider.default_model, status
                );
            }
        }
        Some(ProvidersAction::Set { provider }) => {
            let Some(registration) = app.registry().registration(&provider) else {
                bail!("unknown provider '{provider}'");
            };
            let prompt = format!("Enter API key for {}: ", registration.name);
            let value = read_secret(&prompt)?;
            if value.trim().is_empty() {
                bail!("no API key provided for {}", registration.name);
            }
            app.store
                .with(|s| s.provider_credentials().upsert(&provider, value.trim()))?;
            app.registry().reset(&provider);
            eprintln!("stored API key for {}", registration.name);
        }
        Some(ProvidersAction::Remove { provider }) => {
            let removed = app
                .store
                .with(|s| s.provider_credentials().remove(&provider))?;
            app.registry().reset(&provider);
            if removed {
                eprintln!("removed stored API key for {provider}");
            } else {
                eprintln!("no stored API key for {provider}");
            }
        }
    }
    Ok(())
}

fn read_secret(prompt: &str) -> Result<String> {
    if io::stdin().is_terminal() {
        return Ok(rpassword::prompt_password(prompt)?);
    }
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

pub fn conversations(app: &App, action: ConversationsAction) -> Result<()> {
    let store = app.coordinator.conversations();
    match action {
        ConversationsAction::List => {
            for summary in store.list()? {
                println!(
                    "{}  {:>3} msg  {}",
                    summary.id, summary.message_count, summary.title
                );
            }
        }
        ConversationsAction::Show { id } => {
            let Some(conversation) = store.get(&id)? else {
                bail!("conversation not found: {id}");
            };
            println!("# {}", conversation.title);
            for message in &conversation.messages {
                println!("\n[{}] {} ({})", message.role.as_str(), message.id, message.timestamp);
                println!("{}", message.content);
                for action in &message.actions {
                    let mark = if action.completed { "x" } else { " " };
                    println!("  [{mark}] {}", action.kind.summary());
                }
            }
        }
        ConversationsAction::Rollback { id, message_id } => {
            let remaining = store.rollback(&id, &message_id)?;
            eprintln!("conversation now has {remaining} message(s)");
        }
    }
    Ok(())
}
