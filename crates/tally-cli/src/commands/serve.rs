//! Server command implementation

use std::path::Path;

use anyhow::Result;

use super::core::{engine_for, open_db};

pub async fn cmd_serve(
    db_path: &Path,
    host: &str,
    port: u16,
    no_auth: bool,
    no_encrypt: bool,
) -> Result<()> {
    println!("🚀 Starting Tally API server...");
    println!("   Database: {}", db_path.display());
    println!("   Listening: http://{}:{}", host, port);

    // API keys come from the environment, comma-separated
    let api_keys: Vec<String> = std::env::var("TALLY_API_KEYS")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if no_auth {
        println!();
        println!("   ⚠️  Authentication DISABLED - do not expose to network!");
    } else if api_keys.is_empty() {
        println!("   ❌ Authentication: no keys configured");
        println!("      Set TALLY_API_KEYS (comma-separated) or pass --no-auth for local use");
        anyhow::bail!("refusing to start with auth enabled and no API keys");
    } else {
        println!(
            "   🔑 Authentication: {} API key(s) configured (TALLY_API_KEYS)",
            api_keys.len()
        );
    }
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }
    println!();
    println!("   Press Ctrl+C to stop");

    let db = open_db(db_path, no_encrypt)?;
    let engine = engine_for(db)?;

    let config = tally_server::ServerConfig {
        require_auth: !no_auth,
        allowed_origins: vec![],
        api_keys,
    };

    tally_server::serve(engine, host, port, config).await?;

    Ok(())
}
