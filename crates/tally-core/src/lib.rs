//! Tally Core Library
//!
//! Shared functionality for the Tally cloud cost tool:
//! - Database access and migrations
//! - Billing sources (HTTP cost-and-usage API, CSV exports)
//! - Normalization of raw usage into canonical cost records
//! - Trend, anomaly, and forecast analytics
//! - Rule-based insight generation with ranking and dedup
//! - In-memory semantic index over records and insights
//! - Pluggable local AI backends (Ollama, OpenAI-compatible, mock)
//! - Prompt library for customizable AI prompts
//! - Query orchestration for natural-language cost questions

pub mod ai;
pub mod analytics;
pub mod billing;
pub mod config;
pub mod context;
pub mod db;
pub mod engine;
pub mod error;
pub mod index;
pub mod insights;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod prompts;

pub use ai::{AIBackend, AIClient, MockBackend, MockReply, OllamaBackend, OpenAICompatibleBackend};
pub use billing::{BillingSource, CsvBillingSource, Granularity, HttpBillingSource, MockBillingSource};
pub use config::{AnalyticsConfig, EngineConfig, IngestionConfig, InsightConfig, QueryConfig};
pub use context::{AssembledContext, ContextRecord};
pub use db::Database;
pub use engine::CostEngine;
pub use error::{Error, Result};
pub use index::{EntryKind, IndexEntry, IndexSnapshot, SearchHit, SemanticIndex};
pub use insights::{Insight, InsightCategory, InsightFilter, InsightGenerator, Priority, SignalRef};
pub use models::{
    AnomalyEvent, ChatMessage, ChatRole, CostRecord, CostSummary, ForecastPoint, ServiceForecast,
    ServiceSpend, SyncOutcome, SyncRecord, SyncStatus, TrendDirection, TrendSignal,
};
pub use normalize::{RateTable, RawBatch, RawUsageEntry};
pub use orchestrator::{AskResponse, QueryOrchestrator, QueryState, SupportingData};
pub use prompts::{Prompt, PromptId, PromptLibrary};
