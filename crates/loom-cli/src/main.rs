//! Loom - conversation orchestration from the command line
//!
//! - `loom new` creates a conversation (running the startup hook)
//! - `loom send` runs one turn against a scripted model
//! - `loom log` / `loom list` / `loom delete` inspect and manage the store
//! - `loom tools` prints the registered tool definitions

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use loom_core::ai::ScriptedProvider;
use loom_core::{
    paths, tools, ConversationStore, LoomConfig, OrchestratorConfig, OrchestratorServices,
    ToolRegistry, TurnOrchestrator,
};

mod render;

/// Loom - conversation and tool orchestration engine
#[derive(Parser)]
#[command(name = "loom")]
#[command(about = "Drive model/tool conversations backed by a durable message log", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.config/loom/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding config and LOOM_DB_PATH
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a conversation and print its id
    New {
        /// Working directory for tools and the startup hook
        #[arg(long)]
        cwd: Option<PathBuf>,
    },

    /// Send a user message and run the turn to completion, creating the
    /// conversation if the id is new
    ///
    /// The model is replaced by a script: a JSON array of responses
    /// (`{"text": .., "tool_calls": [..]}`) and failures (`{"error": {"kind": "network"}}`).
    Send {
        conversation: String,
        text: String,
        #[arg(long)]
        script: PathBuf,
    },

    /// Print a conversation's messages in sequence order
    Log {
        conversation: String,
        /// First sequence id to print
        #[arg(long, default_value_t = 1)]
        from: i64,
        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },

    /// List conversations, newest first
    List,

    /// Delete a conversation and all of its messages
    Delete { conversation: String },

    /// Print registered tool definitions
    Tools,
}

fn init_logging() {
    let log_dir = paths::logs_dir();
    let writer = match std::fs::create_dir_all(&log_dir)
        .and_then(|_| std::fs::File::create(log_dir.join("loom.log")))
    {
        Ok(file) => BoxMakeWriter::new(std::sync::Mutex::new(file)),
        Err(e) => {
            eprintln!("Failed to create log file: {}, logging to stderr", e);
            BoxMakeWriter::new(std::io::stderr)
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<LoomConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = LoomConfig::load_file(path)?;
            config.apply_env(|key| std::env::var(key).ok());
            config
        }
        None => LoomConfig::load()?,
    };
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    Ok(config)
}

fn build_registry(config: &LoomConfig) -> Result<ToolRegistry> {
    let mut builder = ToolRegistry::builder().default_timeout(config.tool_timeout());
    tools::register_builtin_tools(&mut builder).context("Failed to register built-in tools")?;
    Ok(builder.build())
}

async fn open_store(config: &LoomConfig) -> Result<ConversationStore> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    ConversationStore::open(&config.db_path)
        .await
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))
}

fn orchestrator(
    config: &LoomConfig,
    store: ConversationStore,
    script: Option<&Path>,
) -> Result<TurnOrchestrator> {
    let provider = match script {
        Some(path) => ScriptedProvider::from_file(path)?,
        None => ScriptedProvider::new(Vec::new()),
    };
    Ok(TurnOrchestrator::new(
        OrchestratorServices {
            provider: Arc::new(provider),
            tools: Arc::new(build_registry(config)?),
            store,
        },
        OrchestratorConfig::from(config),
    ))
}

/// Cancel the returned token on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling turn");
            trigger.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = load_config(&cli)?;

    match &cli.command {
        Commands::New { cwd } => {
            let cwd = match cwd {
                Some(dir) => Some(
                    std::fs::canonicalize(dir)
                        .with_context(|| format!("Invalid working directory {}", dir.display()))?,
                ),
                None => std::env::current_dir().ok(),
            };
            let store = open_store(&config).await?;
            let orchestrator = orchestrator(&config, store, None)?;
            let conversation = orchestrator
                .start_conversation(cwd.as_deref(), &cancel_on_ctrl_c())
                .await?;
            println!("{}", conversation.id);
        }
        Commands::Send {
            conversation,
            text,
            script,
        } => {
            let store = open_store(&config).await?;
            let from = store.last_sequence_id(conversation).await? + 1;
            let orchestrator = orchestrator(&config, store.clone(), Some(script))?;

            let result = orchestrator
                .run_turn(conversation, text, cancel_on_ctrl_c())
                .await;

            // Whatever happened, show what the turn recorded.
            for message in store.read(conversation, from).await? {
                println!("{}", render::render_message(&message));
            }
            let outcome = result?;
            tracing::info!(conversation_id = %conversation, status = ?outcome.status, "Turn complete");
        }
        Commands::Log {
            conversation,
            from,
            json,
        } => {
            let store = open_store(&config).await?;
            store.require_conversation(conversation).await?;
            for message in store.read(conversation, *from).await? {
                if *json {
                    println!("{}", serde_json::to_string(&message)?);
                } else {
                    println!("{}", render::render_message(&message));
                }
            }
        }
        Commands::List => {
            let store = open_store(&config).await?;
            for conversation in store.list_conversations().await? {
                let count = store.message_count(&conversation.id).await?;
                println!("{}", render::render_conversation(&conversation, count));
            }
        }
        Commands::Delete { conversation } => {
            let store = open_store(&config).await?;
            if !store.delete_conversation(conversation).await? {
                anyhow::bail!("Conversation '{}' not found", conversation);
            }
            println!("Deleted {}", conversation);
        }
        Commands::Tools => {
            let registry = build_registry(&config)?;
            println!("{}", serde_json::to_string_pretty(&registry.ai_tools())?);
        }
    }

    Ok(())
}
