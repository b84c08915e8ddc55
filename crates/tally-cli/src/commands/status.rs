//! Engine status command

use std::path::Path;

use anyhow::Result;

use super::core::{engine_for, open_db};

pub async fn cmd_status(db_path: &Path, no_encrypt: bool) -> Result<()> {
    use std::fs;
    use tally_core::db::DB_KEY_ENV;

    println!();
    println!("📊 Tally Status");
    println!("   ─────────────────────────────────────────────────────────────");

    println!("   Database: {}", db_path.display());

    if db_path.exists() {
        if let Ok(metadata) = fs::metadata(db_path) {
            let size_kb = metadata.len() as f64 / 1024.0;
            if size_kb < 1024.0 {
                println!("   Size: {:.1} KB", size_kb);
            } else {
                println!("   Size: {:.1} MB", size_kb / 1024.0);
            }
        }
    } else {
        println!("   Size: (database not initialized)");
    }

    let has_key = std::env::var(DB_KEY_ENV).is_ok();
    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else if has_key {
        println!("   🔒 Encryption: ENABLED ({}=***)", DB_KEY_ENV);
    } else {
        println!("   ❌ Encryption: REQUIRED but {} not set", DB_KEY_ENV);
    }

    if !db_path.exists() {
        println!();
        println!("   Run 'tally init' to create the database.");
        println!();
        return Ok(());
    }

    match open_db(db_path, no_encrypt) {
        Ok(db) => {
            let engine = engine_for(db)?;
            let summary = engine.get_summary()?;

            println!();
            println!("   Cost records: {}", summary.record_count);
            println!("   Services: {}", summary.service_count);
            println!("   Insights: {}", summary.total_insights);
            println!("   Index entries: {}", engine.index_size());

            match engine.last_sync()? {
                Some(last) => {
                    println!();
                    println!(
                        "   Last sync: {} ({})",
                        last.started_at.format("%Y-%m-%d %H:%M UTC"),
                        last.status.as_str()
                    );
                    if let Some(err) = &last.error {
                        println!("      {}", err);
                    }
                    for run in engine.sync_history(5)?.iter().skip(1) {
                        println!(
                            "      {} {} ({} records, {} insights)",
                            run.started_at.format("%Y-%m-%d %H:%M"),
                            run.status.as_str(),
                            run.records_ingested,
                            run.insights_generated
                        );
                    }
                }
                None => {
                    println!();
                    println!("   Last sync: never");
                }
            }

            println!();
            println!("   Model: {} @ {}", engine.ai_model(), engine.ai_host());
            if engine.ai_healthy().await {
                println!("   ✅ Model backend reachable");
            } else {
                println!("   ⚠️  Model backend unreachable (answers will degrade to stored data)");
            }
        }
        Err(e) => {
            println!();
            println!("   ❌ Error opening database: {}", e);
            if !no_encrypt && !has_key {
                println!("      Set {} or use --no-encrypt", DB_KEY_ENV);
            } else if has_key {
                println!("      (Check if {} is correct)", DB_KEY_ENV);
            }
        }
    }

    println!();
    Ok(())
}
