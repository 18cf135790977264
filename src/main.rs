//! # Inkvault CLI (`ink`)
//!
//! The `ink` binary drives the writing app's AI core from the command
//! line: database initialization, tool health checks, one-shot and
//! streaming generation, and reference-vault ingestion.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ink init` | Create the SQLite database and run schema migrations |
//! | `ink status` | Probe the external generation tool |
//! | `ink generate "<prompt>"` | One-shot generation via the batch engine |
//! | `ink stream "<prompt>"` | Streaming generation, chunks printed as they arrive |
//! | `ink ingest <file>` | Upload a file into the vault and extract it |
//! | `ink items` | List vault items and their extraction status |

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use inkvault::config::{self, Config};
use inkvault::embed::HttpEmbeddingClient;
use inkvault::generate::InvocationEngine;
use inkvault::models::GenerationRequest;
use inkvault::pipeline::{FsObjectStore, Pipeline};
use inkvault::stream::StreamEngine;
use inkvault::{db, migrate, pipeline, proc};

/// Inkvault — AI generation and reference-vault ingestion core for a
/// writing app.
#[derive(Parser)]
#[command(
    name = "ink",
    about = "Inkvault — AI generation and reference-vault ingestion core",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ink.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the vault tables. Idempotent —
    /// running it multiple times is safe.
    Init,

    /// Probe the external generation tool.
    ///
    /// Runs `<tool> --version` and reports whether it is installed,
    /// authenticated, and ready.
    Status,

    /// Run a one-shot generation through the batch engine.
    Generate {
        /// The task prompt.
        prompt: String,

        /// Optional context payload passed alongside the prompt.
        #[arg(long)]
        context: Option<String>,

        /// Per-request timeout override in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Run a streaming generation, printing chunks as they arrive.
    Stream {
        /// The task prompt.
        prompt: String,

        /// Optional context payload passed alongside the prompt.
        #[arg(long)]
        context: Option<String>,

        /// Per-request timeout override in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Upload a file into the vault and run extraction on it.
    ///
    /// Runs the full pipeline: store the bytes, extract text, chunk it,
    /// embed the chunks, and persist everything in SQLite.
    Ingest {
        /// Path to the file to ingest (pdf, docx, txt, md).
        file: PathBuf,

        /// Declared file type; defaults to the file extension.
        #[arg(long)]
        file_type: Option<String>,
    },

    /// List vault items and their extraction status.
    Items,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Status only needs the tool command; run it even without a config file.
    if matches!(cli.command, Commands::Status) {
        let cfg = config::load_config(&cli.config).unwrap_or_else(|_| Config::minimal());
        return run_status(&cfg).await;
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Status => unreachable!(),
        Commands::Generate {
            prompt,
            context,
            timeout_secs,
        } => {
            let engine = InvocationEngine::new(cfg.generation.clone());
            let mut request = GenerationRequest::new(prompt);
            if let Some(context) = context {
                request = request.with_context(context);
            }
            if let Some(secs) = timeout_secs {
                request = request.with_timeout(Duration::from_secs(secs));
            }

            let response = engine.generate(request).await?;
            match response.error {
                None => println!("{}", response.content),
                Some(err) => {
                    if response.partial {
                        println!("{}", response.content);
                        eprintln!("(partial output; generation failed)");
                    }
                    if let Some(suggestion) = &err.suggestion {
                        eprintln!("hint: {}", suggestion);
                    }
                    anyhow::bail!("generation failed ({}): {}", err.kind, err.message);
                }
            }
        }
        Commands::Stream {
            prompt,
            context,
            timeout_secs,
        } => {
            let engine = StreamEngine::new(cfg.streaming.clone());
            let mut request = GenerationRequest::new(prompt);
            if let Some(context) = context {
                request = request.with_context(context);
            }
            if let Some(secs) = timeout_secs {
                request = request.with_timeout(Duration::from_secs(secs));
            }

            let (_handle, mut rx) = engine.start(request)?;
            while let Some(chunk) = rx.recv().await {
                if chunk.done {
                    println!();
                    if let Some(err) = chunk.error {
                        anyhow::bail!("stream failed ({}): {}", err.kind, err.message);
                    }
                    break;
                }
                print!("{}", chunk.content);
                std::io::stdout().flush()?;
            }
        }
        Commands::Ingest { file, file_type } => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;
            let store = Arc::new(FsObjectStore::new(cfg.storage.root.clone()));
            let embedder = Arc::new(HttpEmbeddingClient::new(&cfg.embedding)?);
            let pipeline = Pipeline::new(pool, store, embedder, cfg.clone());

            let item = pipeline.ingest_file(&file, file_type.as_deref()).await?;
            println!("Ingested {} ({})", item.file_name, item.id);
            println!("  status: {}", item.extraction_status);
            println!("  chunks: {}", item.chunk_count);
            if let Some(err) = item.extraction_error {
                println!("  error:  {}", err);
            }
        }
        Commands::Items => {
            let pool = db::connect(&cfg.db).await?;
            let items = pipeline::list_items(&pool).await?;
            if items.is_empty() {
                println!("No vault items.");
            } else {
                println!("{:<38} {:<10} {:<8} {}", "ID", "STATUS", "CHUNKS", "FILE");
                for item in items {
                    println!(
                        "{:<38} {:<10} {:<8} {}",
                        item.id, item.extraction_status, item.chunk_count, item.file_name
                    );
                }
            }
        }
    }

    Ok(())
}

async fn run_status(cfg: &Config) -> anyhow::Result<()> {
    let status = proc::probe_tool_status(&cfg.generation.command).await;
    println!("tool:    {}", cfg.generation.command);
    println!("state:   {:?}", status.state);
    if let Some(version) = status.version {
        println!("version: {}", version);
    }
    if let Some(message) = status.message {
        println!("note:    {}", message);
    }
    Ok(())
}
