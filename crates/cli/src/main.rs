mod approval;
mod config;
mod console;
mod embedder;
mod error;
mod tools;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use runtime::{AnthropicBackend, DirectoryArtifactSink, Dispatcher, Outcome, Session, ToolIndex};
use storage::{Event, EventKind, EventStore, Role};
use tokio::io::Stdin;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use approval::ConsoleApproval;
use config::Config;
use console::Console;
use embedder::ConfiguredEmbedder;
use error::{Error, Result};

type ToolgateSession = Session<AnthropicBackend, ConfiguredEmbedder>;

#[derive(Parser)]
#[command(name = "toolgate")]
#[command(about = "Answer requests with a model that only sees the tools it needs", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "toolgate.toml")]
    config: PathBuf,

    /// Log run progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single request
    Ask {
        /// The request text
        query: String,
    },
    /// Start an interactive chat session
    Chat,
    /// Show which tools the index selects for a request
    Lookup {
        /// The request text
        query: String,
        /// Number of index entries to show
        #[arg(short, default_value = "3")]
        k: usize,
    },
    /// List all sessions
    Sessions {
        /// Show only the last N sessions
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show event logs for a session
    Logs {
        /// Session ID (prefix match supported)
        #[arg(short, long)]
        session: String,
        /// Filter by event kind (message, tool_call, tool_result, run_end, ...)
        #[arg(short, long)]
        kind: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Ask { query }) => cmd_ask(&cli.config, &query).await,
        Some(Commands::Chat) | None => cmd_chat(&cli.config).await,
        Some(Commands::Lookup { query, k }) => cmd_lookup(&cli.config, &query, k).await,
        Some(Commands::Sessions { limit }) => cmd_sessions(limit),
        Some(Commands::Logs { session, kind }) => cmd_logs(&session, kind.as_deref()),
    }
}

async fn build_index(config: &Config) -> Result<ToolIndex<ConfiguredEmbedder>> {
    let embedder = config.embedding.embedder();
    info!(%embedder, "building tool index");
    Ok(ToolIndex::build(
        embedder,
        config.corpus()?,
        config.dispatcher.similarity_floor,
    )
    .await?)
}

/// Wire config, demo tools, index and journal into a session.
async fn open_session(config_path: &Path, console: Arc<Console<Stdin>>) -> Result<ToolgateSession> {
    let config = Config::load_or_default(config_path)?;
    let auth = config.auth()?;
    let backend = AnthropicBackend::builder(auth, &config.backend.model).build();
    info!(%backend, "backend ready");

    let data_dir = data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let dispatcher = Dispatcher::builder(
        backend,
        Arc::new(tools::catalog()?),
        Arc::new(build_index(&config).await?),
    )
    .policy(config.policy.clone())
    .approvals(Arc::new(ConsoleApproval::new(console)))
    .artifacts(Arc::new(DirectoryArtifactSink::new(
        data_dir.join("artifacts"),
    )))
    .config(config.dispatcher.to_runtime())
    .build()?;

    let store = EventStore::open(data_dir.join("events.db"))?;
    Ok(Session::new(store, Arc::new(dispatcher))?)
}

/// Run one request; Ctrl+C cancels it.
async fn ask(session: &mut ToolgateSession, query: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let result = session.ask_with_cancel(query, &cancel).await;
    watcher.abort();

    match result? {
        Outcome::Done { answer } => println!("\n{answer}\n"),
        Outcome::Aborted { reason } => eprintln!("\nRun aborted: {reason}\n"),
    }
    Ok(())
}

async fn cmd_ask(config_path: &Path, query: &str) -> Result<()> {
    let mut session = open_session(config_path, Arc::new(Console::stdin())).await?;
    let result = ask(&mut session, query).await;
    session.end()?;
    result
}

async fn cmd_chat(config_path: &Path) -> Result<()> {
    println!("toolgate v{}", env!("CARGO_PKG_VERSION"));

    let console = Arc::new(Console::stdin());
    let mut session = open_session(config_path, Arc::clone(&console)).await?;
    println!("Session ID: {}", session.id);
    println!("Type 'quit' or Ctrl+D to exit.\n");

    while let Some(line) = console.read_line("> ").await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        if let Err(e) = ask(&mut session, input).await {
            eprintln!("Error: {e}\n");
        }
    }

    session.end()?;
    println!("\nSession ended.");
    Ok(())
}

async fn cmd_lookup(config_path: &Path, query: &str, k: usize) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let index = build_index(&config).await?;
    let matches = index.lookup_scored(query, k).await?;

    if matches.is_empty() {
        println!(
            "No index entry scores at or above {:.2}; the model would see no tools.",
            index.similarity_floor()
        );
        return Ok(());
    }

    println!("{:<7}  {:<48}  TOOLS", "SCORE", "PATTERN");
    println!("{}", "-".repeat(80));
    for m in matches {
        let tools: Vec<&str> = m.tools.iter().map(|t| t.as_str()).collect();
        println!(
            "{:<7.3}  {:<48}  {}",
            m.score,
            truncate(&m.query_pattern, 48),
            tools.join(", ")
        );
    }
    Ok(())
}

fn cmd_sessions(limit: usize) -> Result<()> {
    let store = open_store()?;
    let sessions = store.list_sessions()?;

    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<20}  {:<6}  {:<6}  STATUS",
        "SESSION ID", "STARTED", "RUNS", "MSGS"
    );
    println!("{}", "-".repeat(88));

    for summary in sessions.into_iter().take(limit) {
        let started = Local
            .from_utc_datetime(&summary.started_at.naive_utc())
            .format("%Y-%m-%d %H:%M");
        let status = if summary.ended_at.is_some() {
            "ended"
        } else {
            "active"
        };
        println!(
            "{:<36}  {:<20}  {:<6}  {:<6}  {status}",
            summary.id, started, summary.run_count, summary.message_count
        );
    }

    Ok(())
}

fn cmd_logs(session_prefix: &str, kind_filter: Option<&str>) -> Result<()> {
    let store = open_store()?;

    // Find session by prefix
    let sessions = store.list_sessions()?;
    let matching: Vec<_> = sessions
        .iter()
        .filter(|s| s.id.to_string().starts_with(session_prefix))
        .collect();

    let session_id = match matching.len() {
        0 => {
            return Err(Error::SessionNotFound {
                prefix: session_prefix.to_string(),
            });
        }
        1 => matching[0].id,
        _ => {
            return Err(Error::AmbiguousSession {
                prefix: session_prefix.to_string(),
                matches: matching.iter().map(|s| s.id.to_string()).collect(),
            });
        }
    };

    let events = store.load_events(session_id, kind_filter)?;

    if events.is_empty() {
        println!("No events found for session {session_id}");
        return Ok(());
    }

    println!("Session: {session_id}\n");

    for event in events {
        print_event(&event);
    }

    Ok(())
}

fn print_event(event: &Event) {
    let time = Local
        .from_utc_datetime(&event.timestamp.naive_utc())
        .format("%H:%M:%S");

    match &event.kind {
        EventKind::SessionStart => {
            println!("[{time}] === Session started ===");
        }
        EventKind::SessionEnd => {
            println!("[{time}] === Session ended ===");
        }
        EventKind::RunStart { query } => {
            println!("[{time}] --- Run: {} ---", truncate(query, 200));
        }
        EventKind::ToolsSelected { tools } => {
            if tools.is_empty() {
                println!("[{time}] TOOLS: (none)");
            } else {
                println!("[{time}] TOOLS: {}", tools.join(", "));
            }
        }
        EventKind::Message { role, content } => {
            let role_str = match role {
                Role::User => "USER",
                Role::Assistant => "ASSISTANT",
            };
            println!("[{time}] {role_str}: {}", truncate(content, 200));
        }
        EventKind::ToolCall { id, name, input } => {
            println!("[{time}] TOOL CALL {id}: {name} {input}");
        }
        EventKind::ToolResult {
            id,
            name,
            output,
            is_error,
        } => {
            let label = if *is_error { "TOOL ERROR" } else { "TOOL RESULT" };
            println!(
                "[{time}] {label} {id}: {name} {}",
                truncate(&output.to_string(), 200)
            );
        }
        EventKind::RunEnd { outcome, detail } => match detail {
            Some(detail) => println!("[{time}] --- {outcome}: {detail} ---"),
            None => println!("[{time}] --- {outcome} ---"),
        },
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

fn open_store() -> Result<EventStore> {
    let db_path = data_dir().join("events.db");

    if !db_path.exists() {
        return Err(Error::DatabaseNotFound { path: db_path });
    }

    Ok(EventStore::open(&db_path)?)
}

fn data_dir() -> PathBuf {
    dirs_data_dir().unwrap_or_else(|| ".toolgate".into())
}

fn dirs_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share/toolgate"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("toolgate"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|h| PathBuf::from(h).join("toolgate"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
}
