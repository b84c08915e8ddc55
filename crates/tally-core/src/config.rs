//! Engine configuration
//!
//! Threshold constants (deviation threshold, trend percentage, savings
//! breakpoints) are empirically chosen, so they live in configuration
//! rather than code. Config is loaded with a two-layer resolution:
//! 1. Check for override in data dir (~/.local/share/tally/config/engine.toml)
//! 2. Fall back to embedded defaults (compiled into binary)
//!
//! A handful of values can additionally be overridden via TALLY_* environment
//! variables for container deployments.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/engine.toml");

/// Ingestion and currency settings
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Currency every record is converted to before analytics
    pub reporting_currency: String,
    /// Bounded retry attempts for transient billing source failures
    pub sync_retry_attempts: u32,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            reporting_currency: "USD".to_string(),
            sync_retry_attempts: 3,
        }
    }
}

/// Analytics thresholds
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// Window length for trend bucketing, in days
    pub window_size_days: i64,
    /// Observations required before a service's baseline is trusted
    pub min_history: usize,
    /// Standardized deviation required to flag an anomaly
    pub anomaly_threshold: f64,
    /// Score at or above which an anomaly is medium severity
    pub severity_medium: f64,
    /// Score at or above which an anomaly is high severity
    pub severity_high: f64,
    /// Score assigned when a flat (zero variance) baseline departs
    pub flat_baseline_score: f64,
    /// Percent change treated as noise when classifying trend direction
    pub stable_band_pct: f64,
    /// Periods projected forward by the forecaster
    pub forecast_horizon: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            window_size_days: 7,
            min_history: 7,
            anomaly_threshold: 2.5,
            severity_medium: 3.0,
            severity_high: 4.0,
            flat_baseline_score: 1000.0,
            stable_band_pct: 5.0,
            forecast_horizon: 30,
        }
    }
}

/// Insight generation rules
#[derive(Debug, Clone)]
pub struct InsightConfig {
    /// Minimum increasing delta_pct before a right-sizing insight is emitted
    pub trend_pct_threshold: f64,
    /// Savings at or above which an insight is High priority
    pub savings_high: Decimal,
    /// Savings at or above which an insight is Medium priority
    pub savings_medium: Decimal,
    /// Fraction of a window-over-window increase considered recoverable
    pub right_sizing_fraction: Decimal,
    /// Fraction of the top service's spend flagged for optimization review
    pub concentration_fraction: Decimal,
    /// Fraction of a widely-spread service's spend flagged for consolidation
    pub spread_fraction: Decimal,
    /// Regions a service must span before the spread rule fires
    pub spread_region_threshold: usize,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            trend_pct_threshold: 15.0,
            savings_high: Decimal::new(100, 0),
            savings_medium: Decimal::new(25, 0),
            right_sizing_fraction: Decimal::new(30, 2),
            concentration_fraction: Decimal::new(15, 2),
            spread_fraction: Decimal::new(10, 2),
            spread_region_threshold: 3,
        }
    }
}

/// Query orchestration settings
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Nearest neighbors fetched from the semantic index per question
    pub retrieval_k: usize,
    /// Current insights always included in the context, by rank
    pub top_insights: usize,
    /// Upper bound on assembled context size, in characters
    pub context_budget_chars: usize,
    /// Prior conversation turns included in the prompt
    pub history_turns: usize,
    /// Timeout for a single language model call
    pub generation_timeout: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            retrieval_k: 8,
            top_insights: 5,
            context_budget_chars: 6000,
            history_turns: 6,
            generation_timeout: Duration::from_secs(30),
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub ingestion: IngestionConfig,
    pub analytics: AnalyticsConfig,
    pub insights: InsightConfig,
    pub query: QueryConfig,
}

impl EngineConfig {
    /// Load config with default resolution (override file, then embedded),
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = load_config(None)?;
        config.apply_env();
        Ok(config)
    }

    /// Load config from an explicit file path
    pub fn with_path(path: PathBuf) -> Result<Self> {
        let mut config = load_config(Some(&path))?;
        config.apply_env();
        Ok(config)
    }

    /// Apply TALLY_* environment variable overrides
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a lookup function (testable without process env)
    fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TALLY_REPORTING_CURRENCY") {
            if !v.trim().is_empty() {
                self.ingestion.reporting_currency = v.trim().to_uppercase();
            }
        }
        if let Some(v) = lookup("TALLY_ANOMALY_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.analytics.anomaly_threshold = v;
        }
        if let Some(v) = lookup("TALLY_MIN_HISTORY").and_then(|v| v.parse().ok()) {
            self.analytics.min_history = v;
        }
        if let Some(v) = lookup("TALLY_WINDOW_SIZE_DAYS").and_then(|v| v.parse().ok()) {
            self.analytics.window_size_days = v;
        }
        if let Some(v) = lookup("TALLY_FORECAST_HORIZON").and_then(|v| v.parse().ok()) {
            self.analytics.forecast_horizon = v;
        }
        if let Some(v) = lookup("TALLY_TREND_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.insights.trend_pct_threshold = v;
        }
        if let Some(v) = lookup("TALLY_RETRIEVAL_K").and_then(|v| v.parse().ok()) {
            self.query.retrieval_k = v;
        }
        if let Some(v) = lookup("TALLY_GENERATION_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.query.generation_timeout = Duration::from_secs(v);
        }
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("tally").join("config").join("engine.toml"))
}

/// Load configuration (override first, then default)
fn load_config(override_path: Option<&PathBuf>) -> Result<EngineConfig> {
    let content = if let Some(path) = override_path {
        if path.exists() {
            fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?
        } else {
            DEFAULT_CONFIG.to_string()
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            fs::read_to_string(&default_path)
                .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?
        } else {
            DEFAULT_CONFIG.to_string()
        }
    } else {
        DEFAULT_CONFIG.to_string()
    };

    parse_config(&content)
}

/// Raw config structure for TOML parsing
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    ingestion: Option<RawIngestion>,
    analytics: Option<RawAnalytics>,
    insights: Option<RawInsights>,
    query: Option<RawQuery>,
}

#[derive(Debug, Default, Deserialize)]
struct RawIngestion {
    reporting_currency: Option<String>,
    sync_retry_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct RawAnalytics {
    window_size_days: Option<i64>,
    min_history: Option<usize>,
    anomaly_threshold: Option<f64>,
    severity_medium: Option<f64>,
    severity_high: Option<f64>,
    flat_baseline_score: Option<f64>,
    stable_band_pct: Option<f64>,
    forecast_horizon: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RawInsights {
    trend_pct_threshold: Option<f64>,
    savings_high: Option<Decimal>,
    savings_medium: Option<Decimal>,
    right_sizing_fraction: Option<Decimal>,
    concentration_fraction: Option<Decimal>,
    spread_fraction: Option<Decimal>,
    spread_region_threshold: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RawQuery {
    retrieval_k: Option<usize>,
    top_insights: Option<usize>,
    context_budget_chars: Option<usize>,
    history_turns: Option<usize>,
    generation_timeout_secs: Option<u64>,
}

/// Parse TOML content into a full config, filling gaps with defaults
fn parse_config(content: &str) -> Result<EngineConfig> {
    let raw: RawConfig = toml::from_str(content)
        .map_err(|e| Error::Config(format!("Invalid engine config: {}", e)))?;

    let mut config = EngineConfig::default();

    if let Some(ingestion) = raw.ingestion {
        if let Some(v) = ingestion.reporting_currency {
            config.ingestion.reporting_currency = v;
        }
        if let Some(v) = ingestion.sync_retry_attempts {
            config.ingestion.sync_retry_attempts = v;
        }
    }

    if let Some(analytics) = raw.analytics {
        if let Some(v) = analytics.window_size_days {
            config.analytics.window_size_days = v;
        }
        if let Some(v) = analytics.min_history {
            config.analytics.min_history = v;
        }
        if let Some(v) = analytics.anomaly_threshold {
            config.analytics.anomaly_threshold = v;
        }
        if let Some(v) = analytics.severity_medium {
            config.analytics.severity_medium = v;
        }
        if let Some(v) = analytics.severity_high {
            config.analytics.severity_high = v;
        }
        if let Some(v) = analytics.flat_baseline_score {
            config.analytics.flat_baseline_score = v;
        }
        if let Some(v) = analytics.stable_band_pct {
            config.analytics.stable_band_pct = v;
        }
        if let Some(v) = analytics.forecast_horizon {
            config.analytics.forecast_horizon = v;
        }
    }

    if let Some(insights) = raw.insights {
        if let Some(v) = insights.trend_pct_threshold {
            config.insights.trend_pct_threshold = v;
        }
        if let Some(v) = insights.savings_high {
            config.insights.savings_high = v;
        }
        if let Some(v) = insights.savings_medium {
            config.insights.savings_medium = v;
        }
        if let Some(v) = insights.right_sizing_fraction {
            config.insights.right_sizing_fraction = v;
        }
        if let Some(v) = insights.concentration_fraction {
            config.insights.concentration_fraction = v;
        }
        if let Some(v) = insights.spread_fraction {
            config.insights.spread_fraction = v;
        }
        if let Some(v) = insights.spread_region_threshold {
            config.insights.spread_region_threshold = v;
        }
    }

    if let Some(query) = raw.query {
        if let Some(v) = query.retrieval_k {
            config.query.retrieval_k = v;
        }
        if let Some(v) = query.top_insights {
            config.query.top_insights = v;
        }
        if let Some(v) = query.context_budget_chars {
            config.query.context_budget_chars = v;
        }
        if let Some(v) = query.history_turns {
            config.query.history_turns = v;
        }
        if let Some(v) = query.generation_timeout_secs {
            config.query.generation_timeout = Duration::from_secs(v);
        }
    }

    Ok(config)
}
