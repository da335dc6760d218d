//! Terminal client: chat with one agent from stdin.
//!
//! Each line is sent as a turn and the reply is printed as it streams.
//! Commands: `/cancel`, `/history`, `/quit`.
//!
//! All tracing output goes to stderr so stdout carries only the conversation.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use voxchat::{ChatConfig, Role, SessionEvent, SubmitOutcome, TurnStatus, VoiceSession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("voxchat=info")),
        )
        .init();

    let config = load_config().context("loading configuration")?;
    let mut session = VoiceSession::from_config(&config).context("starting session")?;
    tracing::info!(
        agent = %config.chat.agent_id,
        session = %session.snapshot().id(),
        "voxchat ready"
    );

    let printer = tokio::spawn(print_replies(session.controller().subscribe()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/cancel" => {
                if !session.cancel() {
                    eprintln!("nothing to cancel");
                }
            }
            "/history" => print_history(&session),
            text => {
                let controller = session.controller().clone();
                let text = text.to_owned();
                tokio::spawn(async move {
                    match controller.submit(&text).await {
                        Ok(SubmitOutcome::Busy) => eprintln!("still answering; /cancel to abort"),
                        Ok(SubmitOutcome::Finished(_)) => {}
                        Err(e) => eprintln!("{}", e.message()),
                    }
                });
            }
        }
    }

    session.shutdown().await;
    printer.abort();
    Ok(())
}

fn load_config() -> anyhow::Result<ChatConfig> {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(ChatConfig::default_config_path);

    let mut config = if path.exists() {
        ChatConfig::from_file(&path)?
    } else {
        tracing::info!("no config at {}, using defaults", path.display());
        ChatConfig::default()
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

async fn print_replies(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::ContentAppended { delta, .. }) => {
                print!("{delta}");
                let _ = std::io::stdout().flush();
            }
            Ok(SessionEvent::TurnUpdated { turn, .. }) if turn.role == Role::Assistant => {
                println!();
                if let Some(failure) = turn.failure {
                    eprintln!("[{:?}] {}", failure.kind, failure.message);
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("display lagged, {n} events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn print_history(session: &VoiceSession) {
    let snapshot = session.snapshot();
    for turn in snapshot.history() {
        let who = match turn.role {
            Role::User => "you",
            Role::Assistant => "agent",
        };
        let mark = match turn.status {
            TurnStatus::Failed => " (failed)",
            TurnStatus::Streaming | TurnStatus::Pending => " …",
            TurnStatus::Complete => "",
        };
        println!("{who}{mark}: {}", turn.text);
    }
    if let Some(thread) = snapshot.thread_id() {
        println!("thread: {thread}");
    }
}
