//! # Notebase CLI (`nbx`)
//!
//! The `nbx` binary is the primary interface for Notebase. It provides
//! commands for database initialization, enqueueing and running ingestion
//! jobs, asking questions, and starting the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! nbx --config ./config/nbx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nbx init` | Create the SQLite database and run schema migrations |
//! | `nbx enqueue <path>` | Queue a document for ingestion |
//! | `nbx run` | Process pending ingestion jobs |
//! | `nbx ask "<message>"` | Answer a question against ingested documents |
//! | `nbx files` | List file records |
//! | `nbx jobs` | List ingestion jobs |
//! | `nbx serve` | Start the JSON HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! nbx init --config ./config/nbx.toml
//!
//! # Queue a PDF and process it
//! nbx enqueue ./notes.pdf --user u1 --class biology
//! nbx run
//!
//! # Ask a question scoped to one class
//! nbx ask "What is the Krebs cycle?" --user u1 --class biology
//!
//! # Start the HTTP server
//! nbx serve --config ./config/nbx.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use notebase::config;
use notebase::models::IngestJob;
use notebase::{answer, db, extract, files, ingest, jobs, migrate, server};

/// Notebase CLI — a document ingestion and question-answering pipeline.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/nbx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "nbx",
    about = "Notebase — a document ingestion and question-answering pipeline",
    version,
    long_about = "Notebase ingests documents (PDF, image, plain text) through a queued, \
    page-batched pipeline — extraction, chunking, embedding, vector indexing — and answers \
    questions with per-user retrieval, parallel synthesis, and globally reconciled citations."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/nbx.toml`. All database, storage, embedding,
    /// LLM, and server settings are read from this file.
    #[arg(long, global = true, default_value = "./config/nbx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (files, jobs, doc_chunks, chunk_vectors). This command is
    /// idempotent — running it multiple times is safe.
    Init,

    /// Queue a document for ingestion.
    ///
    /// Records a pending job pointing at the document's storage path.
    /// The document is fetched and processed when the job runs
    /// (`nbx run`, or the server's background poller).
    Enqueue {
        /// Storage path of the document: an HTTP(S) URL, an absolute
        /// path, or a path relative to `[storage].root`.
        path: String,

        /// Owning user id. Retrieval is always scoped to this user.
        #[arg(long)]
        user: String,

        /// Class the document belongs to.
        #[arg(long)]
        class: String,

        /// Optional folder id.
        #[arg(long)]
        folder: Option<String>,

        /// Display name. Defaults to the last path segment.
        #[arg(long)]
        name: Option<String>,

        /// MIME type. Defaults to a guess from the file extension.
        #[arg(long)]
        mime: Option<String>,
    },

    /// Process pending ingestion jobs.
    ///
    /// Claims pending jobs one at a time and runs each through the full
    /// pipeline: fetch, extract, chunk, embed, index, finalize.
    Run {
        /// Maximum number of jobs to process in this run.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Answer a question against ingested documents.
    ///
    /// Decomposes the message into sub-questions, retrieves and
    /// synthesizes each in parallel, and prints the merged answer with
    /// its numbered sources.
    Ask {
        /// The question (or multi-question message).
        message: String,

        /// Requesting user id.
        #[arg(long)]
        user: String,

        /// Restrict retrieval to one class.
        #[arg(long)]
        class: Option<String>,
    },

    /// List file records.
    Files {
        /// Only show files owned by this user.
        #[arg(long)]
        user: Option<String>,
    },

    /// List ingestion jobs and their status.
    Jobs,

    /// Start the JSON HTTP server.
    ///
    /// Binds to `[server].bind`, serves the query and job endpoints, and
    /// polls the job queue in the background.
    Serve,
}

/// Guess a MIME type from a file extension. Used only when `--mime` is
/// not given; the pipeline itself trusts the recorded MIME type.
fn guess_mime(path: &str) -> String {
    let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => extract::MIME_PDF.to_string(),
        "png" => "image/png".to_string(),
        "jpg" | "jpeg" => "image/jpeg".to_string(),
        "gif" => "image/gif".to_string(),
        "webp" => "image/webp".to_string(),
        "md" => "text/markdown".to_string(),
        "csv" => "text/csv".to_string(),
        _ => "text/plain".to_string(),
    }
}

fn display_name(path: &str) -> String {
    path.rsplit(['/', '\\'])
        .next()
        .unwrap_or(path)
        .to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Enqueue {
            path,
            user,
            class,
            folder,
            name,
            mime,
        } => {
            let pool = db::connect(&cfg.db).await?;

            // Size is informational; only local files can report it here.
            let size = std::fs::metadata(&path).map(|m| m.len() as i64).unwrap_or(0);

            let job = IngestJob {
                id: String::new(),
                storage_path: path.clone(),
                user_id: user,
                class_id: class,
                folder_id: folder,
                original_name: name.unwrap_or_else(|| display_name(&path)),
                mime_type: mime.unwrap_or_else(|| guess_mime(&path)),
                size,
            };

            let job_id = jobs::enqueue_job(&pool, &job).await?;
            println!("Enqueued job {} — {}", job_id, job.original_name);
        }
        Commands::Run { limit } => {
            ingest::run_pending(&cfg, limit).await?;
        }
        Commands::Ask {
            message,
            user,
            class,
        } => {
            let pool = db::connect(&cfg.db).await?;
            let (response, sources) =
                answer::run_query(&cfg, &pool, &message, &user, class.as_deref()).await?;

            println!("{}", response);
            if !sources.is_empty() {
                println!("\nSources:");
                for source in &sources {
                    println!(
                        "  [{}] {} (page {})",
                        source.number, source.file.name, source.page_number
                    );
                }
            }
        }
        Commands::Files { user } => {
            let pool = db::connect(&cfg.db).await?;
            let records = files::list(&pool, user.as_deref()).await?;
            if records.is_empty() {
                println!("No files.");
            }
            for record in records {
                println!(
                    "{}  {}  {}  pages={}",
                    record.id,
                    record.status,
                    record.display_name,
                    record
                        .page_count
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }
        Commands::Jobs => {
            let pool = db::connect(&cfg.db).await?;
            let listing = jobs::list_jobs(&pool).await?;
            if listing.is_empty() {
                println!("No jobs.");
            }
            for (id, name, status, error) in listing {
                match error {
                    Some(err) => println!("{}  {}  {}  error: {}", id, status, name, err),
                    None => println!("{}  {}  {}", id, status, name),
                }
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
