//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` / `build_engine` - shared setup for every engine-backed command
//! - `cmd_init` - initialize the database
//! - `cmd_sync` - pull billing data and run a full pass
//! - `cmd_import` - ingest a billing CSV export
//! - `cmd_clear` - wipe ingested data

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tally_core::billing::{BillingSource, HttpBillingSource, MockBillingSource};
use tally_core::{AIClient, CostEngine, Database, EngineConfig};

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path must be valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Build the engine over an opened database.
///
/// The AI backend and billing source come from the environment; commands
/// that never fetch or generate work fine with the fallbacks.
pub fn engine_for(db: Database) -> Result<CostEngine> {
    let ai = match AIClient::from_env() {
        Some(client) => client,
        None => {
            println!("   💡 Tip: Set OLLAMA_HOST for model-backed answers and narratives");
            AIClient::mock()
        }
    };

    let billing: Arc<dyn BillingSource> = match HttpBillingSource::from_env() {
        Some(source) => Arc::new(source),
        None => Arc::new(MockBillingSource::empty()),
    };

    let config = EngineConfig::load().context("Failed to load engine config")?;
    CostEngine::new(db, ai, billing, config).context("Failed to build engine")
}

pub fn build_engine(db_path: &Path, no_encrypt: bool) -> Result<CostEngine> {
    let db = open_db(db_path, no_encrypt)?;
    engine_for(db)
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let _db = open_db(db_path, no_encrypt)?;

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Pull billing data: tally sync (set BILLING_API_URL)");
    println!("     or import an export: tally import --file costs.csv");
    println!("  2. See what it found: tally insights");

    Ok(())
}

pub async fn cmd_sync(db_path: &Path, days: i64, no_encrypt: bool) -> Result<()> {
    if HttpBillingSource::from_env().is_none() {
        anyhow::bail!(
            "BILLING_API_URL is not set. Point it at your billing export API, \
             or ingest a file with 'tally import --file costs.csv'."
        );
    }

    println!("🔄 Syncing the last {} days of billing data...", days);

    let engine = build_engine(db_path, no_encrypt)?;
    let outcome = engine.sync(days).await?;

    print_pass_outcome(&outcome);
    Ok(())
}

pub async fn cmd_import(db_path: &Path, file: &Path, no_encrypt: bool) -> Result<()> {
    println!("📥 Importing billing CSV from {}...", file.display());

    let engine = build_engine(db_path, no_encrypt)?;
    let outcome = engine.import_csv(file).await?;

    print_pass_outcome(&outcome);
    Ok(())
}

fn print_pass_outcome(outcome: &tally_core::SyncOutcome) {
    use tally_core::SyncStatus;

    match outcome.status {
        SyncStatus::Skipped => {
            println!("⏭️  Another sync is already running; this one was skipped.");
        }
        _ => {
            println!();
            println!("📊 Pass Results");
            println!("   ─────────────────────────────");
            println!("   Records ingested: {}", outcome.records_ingested);
            println!("   Insights generated: {}", outcome.insights_generated);

            if outcome.insights_generated > 0 {
                println!();
                println!(
                    "💡 {} optimization insights found. Run 'tally insights' to see them.",
                    outcome.insights_generated
                );
            } else {
                println!();
                println!("✅ No optimization insights. Spending looks steady.");
            }
        }
    }
}

pub fn cmd_clear(engine: &CostEngine, yes: bool) -> Result<()> {
    use std::io::{self, Write};

    if !yes {
        print!("⚠️  This will delete all cost records, insights, index entries,\n");
        print!("   chat history, and sync history. Configuration is preserved.\n\n");
        print!("Are you sure? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    engine.clear()?;

    println!("✅ Data cleared.");
    println!("   Run 'tally sync' or 'tally import' to rebuild from your billing source.");
    Ok(())
}
