//! CLI command tests
//!
//! This module contains all tests for the CLI commands.

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use tally_core::{
    AIClient, CostEngine, Database, EngineConfig, MockBillingSource, PromptLibrary,
};
use tempfile::{tempdir, NamedTempFile};

use crate::cli::{Cli, Commands};
use crate::commands;

fn test_engine() -> CostEngine {
    let db = Database::in_memory().unwrap();
    CostEngine::with_prompts(
        db,
        AIClient::mock(),
        Arc::new(MockBillingSource::empty()),
        EngineConfig::default(),
        PromptLibrary::embedded_only(),
    )
    .unwrap()
}

/// Write a small billing CSV to a temp file
fn sample_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "service,amount,period_start,period_end,region").unwrap();
    writeln!(file, "AmazonEC2,600,2024-06-01,2024-06-02,us-east-1").unwrap();
    writeln!(file, "AmazonS3,150,2024-06-01,2024-06-02,us-east-1").unwrap();
    writeln!(file, "AmazonEC2,610,2024-06-02,2024-06-03,us-east-1").unwrap();
    file
}

async fn seeded_engine() -> CostEngine {
    let engine = test_engine();
    let csv = sample_csv();
    engine.import_csv(csv.path()).await.unwrap();
    engine
}

// ========== Argument Parsing Tests ==========

#[test]
fn test_parse_defaults() {
    let cli = Cli::try_parse_from(["tally", "summary"]).unwrap();
    assert_eq!(cli.db, std::path::PathBuf::from("tally.db"));
    assert!(!cli.verbose);
    assert!(!cli.no_encrypt);
    assert!(matches!(cli.command, Commands::Summary));
}

#[test]
fn test_parse_sync_days() {
    let cli = Cli::try_parse_from(["tally", "sync"]).unwrap();
    assert!(matches!(cli.command, Commands::Sync { days: 30 }));

    let cli = Cli::try_parse_from(["tally", "sync", "--days", "7"]).unwrap();
    assert!(matches!(cli.command, Commands::Sync { days: 7 }));
}

#[test]
fn test_parse_insights_filters() {
    let cli = Cli::try_parse_from([
        "tally",
        "insights",
        "--category",
        "right-sizing",
        "--priority",
        "high",
        "--limit",
        "5",
    ])
    .unwrap();

    match cli.command {
        Commands::Insights {
            category,
            priority,
            limit,
        } => {
            assert_eq!(category.as_deref(), Some("right-sizing"));
            assert_eq!(priority.as_deref(), Some("high"));
            assert_eq!(limit, Some(5));
        }
        _ => panic!("expected insights command"),
    }
}

#[test]
fn test_parse_serve_defaults() {
    let cli = Cli::try_parse_from(["tally", "serve"]).unwrap();
    match cli.command {
        Commands::Serve {
            port,
            host,
            no_auth,
        } => {
            assert_eq!(port, 3000);
            assert_eq!(host, "127.0.0.1");
            assert!(!no_auth);
        }
        _ => panic!("expected serve command"),
    }
}

#[test]
fn test_parse_global_db_flag() {
    let cli = Cli::try_parse_from(["tally", "--db", "/tmp/other.db", "status"]).unwrap();
    assert_eq!(cli.db, std::path::PathBuf::from("/tmp/other.db"));
    assert!(matches!(cli.command, Commands::Status));
}

#[test]
fn test_parse_ask_question() {
    let cli = Cli::try_parse_from(["tally", "ask", "why did S3 grow last week?"]).unwrap();
    match cli.command {
        Commands::Ask { question } => assert_eq!(question, "why did S3 grow last week?"),
        _ => panic!("expected ask command"),
    }
}

// ========== Core Command Tests ==========

#[test]
fn test_cmd_init() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");

    let result = commands::cmd_init(&db_path, true);
    assert!(result.is_ok());
    assert!(db_path.exists());
}

#[test]
fn test_cmd_init_twice_is_ok() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");

    commands::cmd_init(&db_path, true).unwrap();
    let result = commands::cmd_init(&db_path, true);
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_cmd_sync_requires_billing_url() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");

    let result = commands::cmd_sync(&db_path, 30, true).await;
    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("BILLING_API_URL is not set"));
}

#[tokio::test]
async fn test_cmd_import() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let csv = sample_csv();

    let result = commands::cmd_import(&db_path, csv.path(), true).await;
    assert!(result.is_ok());

    let engine = commands::build_engine(&db_path, true).unwrap();
    let summary = engine.get_summary().unwrap();
    assert_eq!(summary.record_count, 3);
    assert_eq!(summary.service_count, 2);
}

#[tokio::test]
async fn test_cmd_import_missing_file() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");

    let result = commands::cmd_import(&db_path, &dir.path().join("absent.csv"), true).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_cmd_clear() {
    let engine = seeded_engine().await;
    assert!(engine.get_summary().unwrap().record_count > 0);

    let result = commands::cmd_clear(&engine, true);
    assert!(result.is_ok());

    assert_eq!(engine.get_summary().unwrap().record_count, 0);
    assert_eq!(engine.index_size(), 0);
}

// ========== Report Command Tests ==========

#[test]
fn test_cmd_summary_empty() {
    let engine = test_engine();
    let result = commands::cmd_summary(&engine);
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_cmd_summary_with_data() {
    let engine = seeded_engine().await;
    let result = commands::cmd_summary(&engine);
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_cmd_insights_with_filters() {
    let engine = seeded_engine().await;

    let result = commands::cmd_insights(&engine, None, None, None);
    assert!(result.is_ok());

    let result = commands::cmd_insights(&engine, Some("cost-optimization"), Some("high"), Some(5));
    assert!(result.is_ok());
}

#[test]
fn test_cmd_insights_invalid_category() {
    let engine = test_engine();
    let result = commands::cmd_insights(&engine, Some("bogus"), None, None);
    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("Unknown insight category"));
}

#[test]
fn test_cmd_insights_invalid_priority() {
    let engine = test_engine();
    let result = commands::cmd_insights(&engine, None, Some("urgent"), None);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("Unknown priority"));
}

#[tokio::test]
async fn test_cmd_report_stdout() {
    let engine = seeded_engine().await;
    let result = commands::cmd_report(&engine, None).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_cmd_report_to_file() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("report.md");

    let engine = seeded_engine().await;
    let result = commands::cmd_report(&engine, Some(&out)).await;
    assert!(result.is_ok());
    assert!(out.exists());

    let contents = std::fs::read_to_string(&out).unwrap();
    assert!(contents.starts_with("# Cloud Cost Optimization Report"));
    // The mock backend is healthy, so the narrative section is appended
    assert!(contents.contains("## Narrative"));
}

// ========== Ask Command Tests ==========

#[tokio::test]
async fn test_cmd_ask() {
    let engine = seeded_engine().await;
    let result = commands::cmd_ask(&engine, "what is driving spend?").await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_cmd_ask_on_empty_database() {
    let engine = test_engine();
    let result = commands::cmd_ask(&engine, "where does my money go?").await;
    assert!(result.is_ok());
}

// ========== Status Command Tests ==========

#[tokio::test]
async fn test_cmd_status_missing_db() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");

    let result = commands::cmd_status(&db_path, true).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_cmd_status_with_data() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let csv = sample_csv();

    commands::cmd_init(&db_path, true).unwrap();
    commands::cmd_import(&db_path, csv.path(), true)
        .await
        .unwrap();

    let result = commands::cmd_status(&db_path, true).await;
    assert!(result.is_ok());
}
