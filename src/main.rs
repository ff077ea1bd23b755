//! # Context Fusion CLI (`cfx`)
//!
//! ## Usage
//!
//! ```bash
//! cfx --config ./config/cfx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cfx init` | Create the SQLite database and run schema migrations |
//! | `cfx retrieve "<query>"` | Fused retrieval, printed as JSON |
//! | `cfx index "<text>"` | Embed and add a text to the vector index |
//! | `cfx cache stats` | Cache occupancy summary |
//! | `cfx cache cleanup` | Remove expired cache entries |
//! | `cfx cache invalidate <key>` | Remove every entry for a key |
//! | `cfx cache key "<query>"` | Print the cache key a query maps to |
//! | `cfx serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! cfx init
//! cfx retrieve "What is the capital of France?"
//! cfx retrieve "my biology goals" --user u1 --mode personal --context course=bio-101
//! CFX_LOG=debug cfx cache stats
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use context_fusion::commands::{self, CacheCommand};
use context_fusion::{config, logging, migrate, server};

/// Context Fusion CLI: cache-aware retrieval over personal, external, and
/// vector-similarity knowledge.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cfx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cfx",
    about = "Context Fusion: cache-aware knowledge retrieval for AI assistants",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cfx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Retrieve fused context for a query and print it as JSON.
    Retrieve {
        /// Query text.
        query: String,

        /// User whose personal records may be consulted.
        #[arg(long, default_value = "cli")]
        user: String,

        /// Query mode: `personal` or `general`.
        #[arg(long, default_value = "general")]
        mode: String,

        /// Extra cache-key context as KEY=VALUE (repeatable).
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,
    },

    /// Embed a text and append it to the vector index.
    Index {
        text: String,

        /// Metadata as KEY=VALUE (repeatable).
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },

    /// Inspect and maintain the query cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry counts.
    Stats {
        /// Print the raw stats as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Remove expired entries.
    Cleanup,
    /// Remove every entry stored under a key.
    Invalidate { key: String },
    /// Print the cache key for a query.
    Key {
        query: String,
        #[arg(long, default_value = "cli")]
        user: String,
        #[arg(long, default_value = "general")]
        mode: String,
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Retrieve {
            query,
            user,
            mode,
            context,
        } => {
            let query = commands::build_query(&query, &user, &mode, &context)?;
            commands::run_retrieve(&cfg, &query).await?;
        }
        Commands::Index { text, meta } => {
            commands::run_index(&cfg, &text, &meta).await?;
        }
        Commands::Cache { action } => {
            let command = match action {
                CacheAction::Stats { json } => CacheCommand::Stats { json },
                CacheAction::Cleanup => CacheCommand::Cleanup,
                CacheAction::Invalidate { key } => CacheCommand::Invalidate { key },
                CacheAction::Key {
                    query,
                    user,
                    mode,
                    context,
                } => CacheCommand::Key {
                    query: commands::build_query(&query, &user, &mode, &context)?,
                },
            };
            commands::run_cache(&cfg, command).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
