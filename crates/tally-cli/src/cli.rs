//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI
//! arguments. The actual command implementations are in the `commands`
//! module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tally - Understand and optimize your cloud spend
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Self-hosted cloud cost intelligence", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "tally.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set TALLY_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Pull billing data and run a full analytics pass
    Sync {
        /// Days of billing history to fetch
        #[arg(short, long, default_value = "30")]
        days: i64,
    },

    /// Import a billing CSV export
    Import {
        /// CSV file to import
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show the account-wide cost summary
    Summary,

    /// List current optimization insights
    Insights {
        /// Filter by category: cost-optimization, right-sizing,
        /// resource-cleanup, architecture-optimization
        #[arg(short, long)]
        category: Option<String>,

        /// Filter by priority: high, medium, low
        #[arg(short, long)]
        priority: Option<String>,

        /// Maximum insights to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Ask a question about your cloud spend
    Ask {
        /// The question to answer
        question: String,
    },

    /// Generate a markdown cost optimization report
    Report {
        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show database and engine status
    Status,

    /// Start the API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Disable authentication (for local development only)
        ///
        /// WARNING: Do not use this flag when exposing the server to a
        /// network. By default, the server requires a bearer API key from
        /// TALLY_API_KEYS.
        #[arg(long)]
        no_auth: bool,
    },

    /// Clear all ingested data, insights, and history
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}
