//! # Transcript RAG CLI (`trag`)
//!
//! ## Usage
//!
//! ```bash
//! trag --config ./config/trag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trag index build` | Embed episode chunks into the core and longtail indexes |
//! | `trag search "<query>"` | Show ranked retrieval results without synthesis |
//! | `trag ask "<query>"` | Answer a question with citations |
//! | `trag stats` | Summarize the built indexes |
//! | `trag serve` | Start the HTTP API |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use transcript_rag::config::load_config;
use transcript_rag::embedding::create_embedder;
use transcript_rag::logging::init_logging;
use transcript_rag::{ask, ingest, search, server, stats};

/// Transcript RAG: confidence-gated answers from podcast transcripts.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/trag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "trag",
    about = "Transcript RAG — confidence-gated answers from podcast transcripts",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/trag.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or inspect the vector indexes.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Retrieve ranked transcript excerpts for a query.
    ///
    /// Runs expansion, both tiers, parent expansion and dedup, but no
    /// confidence filter or synthesis.
    Search {
        /// Search query.
        query: String,

        /// Always search the longtail (anecdote) index too.
        #[arg(long)]
        longtail: bool,

        /// Disable rule-based query expansion.
        #[arg(long)]
        no_expand: bool,

        /// Maximum number of results to print.
        #[arg(long, default_value = "10")]
        limit: usize,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer a question.
    Ask {
        /// The question.
        query: String,

        /// Continue an existing session (only meaningful within one process).
        #[arg(long)]
        session: Option<String>,

        /// Always search the longtail (anecdote) index too.
        #[arg(long)]
        longtail: bool,

        /// Use the deep synthesis budget.
        #[arg(long)]
        deep: bool,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show index statistics.
    Stats,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum IndexAction {
    /// Read `[corpus].chunks_dir`, embed, and write the index files.
    Build {
        /// Validate the corpus and print counts without embedding.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Index { action } => match action {
            IndexAction::Build { dry_run } => {
                let embedder = create_embedder(&config.embedding, config.index.dims)?;
                ingest::run_index_build(&config, embedder, dry_run).await?;
            }
        },
        Commands::Search {
            query,
            longtail,
            no_expand,
            limit,
            json,
        } => {
            search::run_search(&config, &query, longtail, !no_expand, limit, json).await?;
        }
        Commands::Ask {
            query,
            session,
            longtail,
            deep,
            json,
        } => {
            ask::run_ask(&config, &query, session, longtail, deep, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&config).await?;
        }
        Commands::Serve => {
            server::run_server(&config).await?;
        }
    }

    Ok(())
}
