//! Tally CLI - Cloud cost intelligence
//!
//! Usage:
//!   tally init                  Initialize database
//!   tally sync --days 30        Pull billing data and run the analysis pass
//!   tally import --file CSV     Ingest a billing export file
//!   tally ask "why did S3 go up"  Ask a question about your spend
//!   tally serve --port 3000     Start the API server

mod cli;
mod commands;

#[cfg(test)]
mod tests;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Sync { days } => commands::cmd_sync(&cli.db, days, cli.no_encrypt).await,
        Commands::Import { file } => commands::cmd_import(&cli.db, &file, cli.no_encrypt).await,
        Commands::Summary => {
            let engine = commands::build_engine(&cli.db, cli.no_encrypt)?;
            commands::cmd_summary(&engine)
        }
        Commands::Insights {
            category,
            priority,
            limit,
        } => {
            let engine = commands::build_engine(&cli.db, cli.no_encrypt)?;
            commands::cmd_insights(&engine, category.as_deref(), priority.as_deref(), limit)
        }
        Commands::Ask { question } => {
            let engine = commands::build_engine(&cli.db, cli.no_encrypt)?;
            commands::cmd_ask(&engine, &question).await
        }
        Commands::Report { output } => {
            let engine = commands::build_engine(&cli.db, cli.no_encrypt)?;
            commands::cmd_report(&engine, output.as_deref()).await
        }
        Commands::Status => commands::cmd_status(&cli.db, cli.no_encrypt).await,
        Commands::Serve {
            port,
            host,
            no_auth,
        } => commands::cmd_serve(&cli.db, &host, port, no_auth, cli.no_encrypt).await,
        Commands::Clear { yes } => {
            let engine = commands::build_engine(&cli.db, cli.no_encrypt)?;
            commands::cmd_clear(&engine, yes)
        }
    }
}
