use std::future::Future;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use cag_chat::api::{ApiClient, CagApi};
use cag_chat::config::Config;
use cag_chat::models::Message;
use cag_chat::render;
use cag_chat::service::{ChatService, RejectReason, SubmitOutcome};
use cag_chat::state::{storage_path, AppState, ChatStore};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "cag-chat", version, about = "Terminal chat for the restaurant CAG assistant")]
struct Cli {
    /// Base URL of the CAG backend (overrides CAG_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Directory holding the persisted conversation (overrides CAG_STORAGE_DIR)
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    /// Use the blocking /query endpoint instead of async jobs
    #[arg(long, global = true)]
    sync: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat (default)
    Chat,
    /// Ask a single question and print the reply
    Ask {
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
    /// Check the backend's /health endpoint
    Health,
    /// Print the saved conversation
    History,
    /// Forget the saved conversation and start a new session
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Reads .env as well, so it must run before the log filter is built
    let mut config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cag_chat=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(url) = cli.api_url {
        config.api_url = url;
    }
    if let Some(dir) = cli.storage_dir {
        config.storage_dir = dir;
    }

    // ── State ─────────────────────────────────────────────────────────────────
    let storage = storage_path(&config.storage_dir);
    let state = AppState::new(load_store(&storage));

    // ── Backend ───────────────────────────────────────────────────────────────
    let api = ApiClient::new(&config.api_url, config.request_timeout)
        .context("Failed to set up the HTTP client")?;
    let service = ChatService::new(api, config.poll);
    info!("Using CAG backend at {}", config.api_url);

    let code = match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => {
            repl(&service, &state, &storage, cli.sync).await?;
            ExitCode::SUCCESS
        }
        Command::Ask { question } => {
            let question = question.join(" ");
            let reply = ask(&service, &state, &question, cli.sync).await;
            persist(&state, &storage);
            match reply {
                Some(message) if !message.error => {
                    println!("{}", message.content);
                    ExitCode::SUCCESS
                }
                Some(message) => {
                    eprintln!("{}", message.content);
                    ExitCode::FAILURE
                }
                None => ExitCode::FAILURE,
            }
        }
        Command::Health => health(&service).await,
        Command::History => {
            println!("{}", render::render_history(&state.messages()));
            ExitCode::SUCCESS
        }
        Command::Clear => {
            state.clear_messages();
            persist(&state, &storage);
            println!("Started new session {}", state.session_id());
            ExitCode::SUCCESS
        }
    };

    Ok(code)
}

/// Loads the saved conversation, starting over if the record is unreadable.
fn load_store(path: &Path) -> ChatStore {
    match ChatStore::load(path) {
        Ok(store) => store,
        Err(e) => {
            warn!("Ignoring saved conversation at {}: {e}", path.display());
            ChatStore::new()
        }
    }
}

fn persist(state: &AppState, path: &Path) {
    if let Err(e) = state.save(path) {
        warn!("Failed to save conversation to {}: {e}", path.display());
    }
}

async fn health(service: &ChatService<ApiClient>) -> ExitCode {
    match service.api().health().await {
        Ok(body) => {
            let pretty = serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string());
            println!("{pretty}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

/// Runs one submission with a live status line; Ctrl-C abandons it.
///
/// Returns the settled assistant message, if one was produced.
async fn ask(
    service: &ChatService<ApiClient>,
    state: &AppState,
    question: &str,
    sync: bool,
) -> Option<Message> {
    let started = Instant::now();
    let progress = |status: &str| {
        let mut err = std::io::stderr();
        let _ = write!(err, "\r{}", render::progress_line(status, started.elapsed()));
        let _ = err.flush();
    };

    let submission = async {
        if sync {
            service.submit_sync(state, question).await
        } else {
            service.submit(state, question, progress).await
        }
    };

    let outcome = tokio::select! {
        outcome = submission => Some(outcome),
        _ = tokio::signal::ctrl_c() => None,
    };
    // Wipe the status line
    eprint!("\r\x1b[2K");

    match outcome {
        Some(SubmitOutcome::Rejected(RejectReason::Busy)) => {
            eprintln!("Still waiting for the previous answer.");
            None
        }
        Some(SubmitOutcome::Rejected(RejectReason::EmptyInput)) => None,
        Some(SubmitOutcome::Rejected(RejectReason::Conflict)) => {
            eprintln!("Could not record the question; please try again.");
            None
        }
        Some(outcome) => outcome
            .message_id()
            .and_then(|id| state.read(|s| s.message(id).cloned())),
        None => {
            eprintln!("Cancelled.");
            state.read(|s| s.messages().last().cloned())
        }
    }
}

enum Input {
    Line(String),
    Closed,
    Interrupted,
}

/// Reads stdin on a plain thread so a pending read never holds up shutdown.
///
/// The runtime waits for its blocking pool on exit, which a parked `tokio::io::stdin`
/// read would keep alive until the next newline.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn next_input<I, E>(lines: &mut mpsc::UnboundedReceiver<String>, interrupt: I) -> Input
where
    I: Future<Output = Result<(), E>>,
{
    tokio::select! {
        line = lines.recv() => line.map_or(Input::Closed, Input::Line),
        _ = interrupt => Input::Interrupted,
    }
}

async fn repl(
    service: &ChatService<ApiClient>,
    state: &AppState,
    storage: &Path,
    sync: bool,
) -> anyhow::Result<()> {
    println!("{}", render::BANNER);
    println!("Connected to {} (session {})", service.api().base_url(), state.session_id());
    println!("Type 'help' for available commands or 'quit' to exit\n");

    let history = state.messages();
    if !history.is_empty() {
        println!("{}\n", render::render_history(&history));
    }

    let mut lines = spawn_stdin_reader();
    loop {
        print!("\n🍕 Ask me anything about the menu > ");
        std::io::stdout().flush().context("Failed to write prompt")?;

        let line = match next_input(&mut lines, tokio::signal::ctrl_c()).await {
            Input::Line(line) => line,
            Input::Closed | Input::Interrupted => break,
        };
        let input = line.trim();

        match input.to_lowercase().as_str() {
            "" => continue,
            "quit" | "exit" | "q" => break,
            "help" => println!("\n{}", render::HELP),
            "history" => println!("\n{}", render::render_history(&state.messages())),
            "clear" => {
                state.clear_messages();
                persist(state, storage);
                println!("\nStarted a new conversation (session {})", state.session_id());
            }
            "health" => {
                health(service).await;
            }
            _ => {
                if let Some(reply) = ask(service, state, input, sync).await {
                    println!("\n{}", render::render_message(&reply));
                }
                persist(state, storage);
            }
        }
    }

    persist(state, storage);
    println!("\n👋 Goodbye!");
    Ok(())
}
