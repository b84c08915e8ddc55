//! Domain models for Tally

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One canonical observation of spend for a service over a billing period.
///
/// Records are immutable once created. Re-ingesting a period replaces the
/// stored record under the same key rather than mutating it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    /// Canonical cloud-service name (non-empty)
    pub service: String,
    /// Spend amount in the reporting currency, never negative
    pub amount: Decimal,
    /// ISO currency code the amount is expressed in
    pub currency: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    /// Region, account, tag key/value pairs. Ordered map so the derived
    /// record key is independent of insertion order.
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
    pub source_ingested_at: DateTime<Utc>,
}

impl CostRecord {
    /// Stable identity for `(service, period_start, period_end, dimension-set)`.
    ///
    /// Used as the storage key (re-ingestion replaces by this key) and as the
    /// semantic index entity id for the record.
    pub fn record_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.service.as_bytes());
        hasher.update(b"|");
        hasher.update(self.period_start.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.period_end.to_string().as_bytes());
        for (k, v) in &self.dimensions {
            hasher.update(b"|");
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Days covered by the billing period, inclusive of both endpoints.
    pub fn period_days(&self) -> i64 {
        (self.period_end - self.period_start).num_days() + 1
    }

    /// Text form embedded into the semantic index.
    pub fn embedding_text(&self) -> String {
        let mut text = format!(
            "{} cost {} {} from {} to {}",
            self.service, self.amount, self.currency, self.period_start, self.period_end
        );
        for (k, v) in &self.dimensions {
            text.push_str(&format!(" {}: {}", k, v));
        }
        text
    }

    /// Convenience accessor for the region dimension, when present.
    pub fn region(&self) -> Option<&str> {
        self.dimensions.get("region").map(String::as_str)
    }
}

/// Direction of a window-over-window spend change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Increasing => "increasing",
            Self::Decreasing => "decreasing",
            Self::Stable => "stable",
        }
    }
}

impl std::str::FromStr for TrendDirection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "increasing" => Ok(Self::Increasing),
            "decreasing" => Ok(Self::Decreasing),
            "stable" => Ok(Self::Stable),
            _ => Err(format!("Unknown trend direction: {}", s)),
        }
    }
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-service change between two adjacent analytics windows.
///
/// Derived on every analytics pass, never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSignal {
    pub service: String,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    /// Later window total minus earlier window total
    pub delta_amount: Decimal,
    /// Percent change relative to the earlier window
    pub delta_pct: f64,
    pub direction: TrendDirection,
}

/// Severity of an anomalous observation, from thresholding its score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Numeric rank for ordering (higher = more severe)
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A statistically unusual observation against a service's rolling baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub service: String,
    /// The billing period the observation refers to
    pub observed_at: NaiveDate,
    pub observed_amount: Decimal,
    /// Baseline mean over the trailing history window
    pub expected_amount: Decimal,
    /// Days covered by the observation's billing period
    pub period_days: i64,
    /// Signed z-score against the baseline
    pub deviation_score: f64,
    pub severity: Severity,
}

/// One projected observation in a service forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    /// Projected spend, clamped at zero
    pub amount: Decimal,
}

/// Linear projection of a service's spend over the forecast horizon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceForecast {
    pub service: String,
    pub points: Vec<ForecastPoint>,
    pub projected_total: Decimal,
}

/// Spend rollup for one service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpend {
    pub service: String,
    pub total: Decimal,
    /// Share of total spend, in percent
    pub share_pct: f64,
}

/// Spend rollup for one region dimension value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionSpend {
    pub region: String,
    pub total: Decimal,
}

/// Account-wide summary returned by `get_summary`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostSummary {
    pub record_count: usize,
    pub total_spend: Decimal,
    pub currency: String,
    pub total_insights: usize,
    pub total_potential_savings: Decimal,
    pub service_count: usize,
    pub first_period_start: Option<NaiveDate>,
    pub last_period_end: Option<NaiveDate>,
    pub top_services: Vec<ServiceSpend>,
    pub regions: Vec<RegionSpend>,
}

/// Outcome status of a sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Completed,
    /// Another pass held the sync lock; this trigger was coalesced
    Skipped,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "completed" => Ok(Self::Completed),
            "skipped" => Ok(Self::Skipped),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown sync status: {}", s)),
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a `sync` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub status: SyncStatus,
    pub records_ingested: usize,
    pub insights_generated: usize,
}

impl SyncOutcome {
    /// Outcome for a trigger coalesced into an already-running pass
    pub fn skipped() -> Self {
        Self {
            status: SyncStatus::Skipped,
            records_ingested: 0,
            insights_generated: 0,
        }
    }
}

/// One recorded sync pass (most recent 100 are kept)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRecord {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub records_ingested: usize,
    pub insights_generated: usize,
    pub error: Option<String>,
}

/// Role of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for ChatRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(format!("Unknown chat role: {}", s)),
        }
    }
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One stored conversation turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub conversation_id: String,
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
