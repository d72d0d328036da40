//! medchat - Medical consultation chat client
//!
//! Line-oriented terminal client for the medical assistant backend.
//! Conversations are kept in SQLite between runs.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/medchat/medchat.db (~/.local/share/medchat/medchat.db)
//! - Logs: $XDG_STATE_HOME/medchat/medchat.log (~/.local/state/medchat/medchat.log)
//! - Config: $XDG_CONFIG_HOME/medchat/config.toml (~/.config/medchat/config.toml)

mod input;
mod render;

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use medchat_core::{
    ChatClient, ChatHandle, Config, KvStore, MemoryKvStore, SendOutcome, SqliteKvStore,
};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::input::{resolve_conversation, Input};
use crate::render::Transcript;

#[derive(Parser)]
#[command(name = "medchat")]
#[command(about = "Chat with the medical consultation assistant")]
#[command(version)]
struct Args {
    /// Chat server URL (overrides `server.url`)
    #[arg(long, value_name = "URL")]
    server_url: Option<String>,

    /// User id sent with every message (overrides `server.user_id`)
    #[arg(long)]
    user_id: Option<String>,

    /// Configuration file to use instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Keep conversations in memory only
    #[arg(long)]
    ephemeral: bool,

    /// Open a consultation seeded with a suspected disease and send it
    #[arg(long, value_name = "DISEASE")]
    finding: Option<String>,

    /// Print the resolved configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };
    if let Some(url) = args.server_url {
        config.server.url = url;
    }
    if let Some(user_id) = args.user_id {
        config.server.user_id = Some(user_id);
    }
    config.validate().context("invalid configuration")?;

    if args.check_config {
        print_config(&config, args.ephemeral);
        return Ok(());
    }

    // Logs go to a file; stdout belongs to the conversation
    let _log_guard =
        medchat_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(server = %config.server.url, "medchat starting");

    let storage: Box<dyn KvStore> = if args.ephemeral {
        Box::new(MemoryKvStore::new())
    } else {
        let db_path = config.resolved_database_path();
        tracing::info!(path = %db_path.display(), "Opening database");
        Box::new(SqliteKvStore::open(&db_path).context("failed to open conversation database")?)
    };

    let chat = ChatClient::start(&config, storage).context("failed to start chat client")?;
    if let Some(finding) = args.finding {
        // Seed the welcome text first, then send the finding as the opening message
        chat.start_medical_consultation(Some(finding.clone()))
            .await
            .context("failed to start consultation")?;
        let status = chat
            .wait_until_settled(config.server.connect_timeout())
            .await
            .context("failed to wait for connection")?;
        tracing::debug!(status = status.as_str(), "Connection settled");
        chat.send_message(finding)
            .await
            .context("failed to send finding")?;
    }

    println!("medchat - {} (/help for commands)", config.server.url);
    let result = run(&chat).await;

    chat.shutdown().await.context("failed to shut down")?;
    tracing::info!("medchat shutting down");

    result
}

fn print_config(config: &Config, ephemeral: bool) {
    println!("Server: {}", config.server.url);
    println!("Socket.IO path: {}", config.server.socketio_path);
    let transports: Vec<_> = config.server.transports.iter().map(|t| t.as_str()).collect();
    println!("Transports: {}", transports.join(", "));
    if ephemeral {
        println!("Database: (in memory)");
    } else {
        println!("Database: {}", config.resolved_database_path().display());
    }
    println!("Log: {}", Config::log_path().display());
}

/// Interleave typed input with published state until EOF, `/quit` or Ctrl-C.
async fn run(chat: &ChatHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut updates = chat.subscribe();
    let mut transcript = Transcript::new();
    let mut stdout = io::stdout();

    let initial = updates.borrow_and_update().clone();
    transcript.update(&initial, &mut stdout)?;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                transcript.update(&snapshot, &mut stdout)?;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read input")? else {
                    break;
                };
                match input::parse(&line) {
                    Ok(Input::Quit) => break,
                    Ok(command) => {
                        execute(chat, command, &mut stdout).await?;
                        transcript.update(&chat.snapshot(), &mut stdout)?;
                    }
                    Err(message) => writeln!(stdout, "{}", message)?,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }
    Ok(())
}

async fn execute(chat: &ChatHandle, command: Input, out: &mut impl Write) -> Result<()> {
    match command {
        Input::Message(text) => match chat.send_message(text).await? {
            SendOutcome::Duplicate => writeln!(out, "(same message just sent, ignored)")?,
            SendOutcome::Deferred => writeln!(out, "(waiting for the reply, will send after)")?,
            SendOutcome::Ignored | SendOutcome::Sent | SendOutcome::Queued => {}
        },
        Input::New => {
            chat.start_new_conversation().await?;
        }
        Input::Consult(seed) => {
            chat.start_medical_consultation(seed).await?;
        }
        Input::List => render::write_conversation_list(&chat.snapshot(), out)?,
        Input::Switch(target) => match resolve_conversation(&chat.snapshot(), &target) {
            Some(id) => {
                chat.switch_conversation(id).await?;
            }
            None => writeln!(out, "no conversation matches '{}'", target)?,
        },
        Input::Delete(target) => match resolve_conversation(&chat.snapshot(), &target) {
            Some(id) => {
                if chat.delete_conversation(id).await? {
                    writeln!(out, "conversation deleted")?;
                }
            }
            None => writeln!(out, "no conversation matches '{}'", target)?,
        },
        Input::Clear => {
            chat.clear_all_conversations().await?;
            writeln!(out, "all conversations deleted")?;
        }
        Input::Reconnect => chat.reconnect().await?,
        Input::Status => render::write_status(&chat.snapshot(), out)?,
        Input::Help => writeln!(out, "{}", input::HELP)?,
        Input::Quit | Input::Empty => {}
    }
    out.flush()?;
    Ok(())
}
