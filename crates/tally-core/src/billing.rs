//! Billing sources: where raw cost and usage data comes from
//!
//! The engine pulls raw batches through the `BillingSource` trait. Three
//! implementations: an HTTP JSON cost-and-usage endpoint, a local billing
//! CSV export, and a scripted mock for tests. Transient fetch failures are
//! retried with bounded backoff by the engine, not here.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::normalize::{parse_billing_csv, RawBatch};

/// Reporting granularity of a fetched batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Granularity {
    Daily,
    Monthly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "DAILY",
            Self::Monthly => "MONTHLY",
        }
    }
}

/// A provider of raw cost and usage data
#[async_trait]
pub trait BillingSource: Send + Sync {
    /// Fetch raw usage for the inclusive window `[start, end]`
    async fn fetch_cost_and_usage(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        granularity: Granularity,
    ) -> Result<RawBatch>;
}

/// Billing source backed by an HTTP JSON endpoint.
///
/// Sends `POST {base}/cost-and-usage` with the window and granularity and
/// expects a `RawBatch` JSON body in return.
#[derive(Clone)]
pub struct HttpBillingSource {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct CostAndUsageRequest {
    start: NaiveDate,
    end: NaiveDate,
    granularity: Granularity,
}

impl HttpBillingSource {
    pub fn new(base_url: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    /// Create from `BILLING_API_URL` (and optional `BILLING_API_KEY`).
    /// Returns None if the URL is not set.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("BILLING_API_URL").ok()?;
        let mut source = Self::new(&base_url);
        if let Ok(key) = std::env::var("BILLING_API_KEY") {
            if !key.is_empty() {
                source.api_key = Some(key);
            }
        }
        Some(source)
    }

    pub fn host(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl BillingSource for HttpBillingSource {
    async fn fetch_cost_and_usage(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        granularity: Granularity,
    ) -> Result<RawBatch> {
        let url = format!("{}/cost-and-usage", self.base_url);
        debug!(%url, %start, %end, granularity = granularity.as_str(), "Fetching billing data");

        let mut request = self.http_client.post(&url).json(&CostAndUsageRequest {
            start,
            end,
            granularity,
        });
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::Http(response.error_for_status().unwrap_err()));
        }

        let batch: RawBatch = response.json().await?;
        debug!(entries = batch.entries.len(), "Fetched billing batch");
        Ok(batch)
    }
}

/// Billing source reading a local billing CSV export.
///
/// Rows carry their own period columns where present; the requested window
/// only applies to rows without dates, so the file is returned whole rather
/// than filtered.
#[derive(Clone)]
pub struct CsvBillingSource {
    path: PathBuf,
}

impl CsvBillingSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl BillingSource for CsvBillingSource {
    async fn fetch_cost_and_usage(
        &self,
        _start: NaiveDate,
        _end: NaiveDate,
        _granularity: Granularity,
    ) -> Result<RawBatch> {
        let file = std::fs::File::open(&self.path)?;
        let entries = parse_billing_csv(file)?;
        debug!(
            path = %self.path.display(),
            entries = entries.len(),
            "Read billing CSV export"
        );
        Ok(RawBatch { entries })
    }
}

/// Scripted billing source for tests.
///
/// Returns the configured batch on every fetch; can be told to fail the
/// first N fetches to exercise the engine's retry path.
#[derive(Clone, Default)]
pub struct MockBillingSource {
    batch: Arc<Mutex<RawBatch>>,
    failures_remaining: Arc<Mutex<usize>>,
    calls: Arc<AtomicUsize>,
}

impl MockBillingSource {
    pub fn new(batch: RawBatch) -> Self {
        Self {
            batch: Arc::new(Mutex::new(batch)),
            failures_remaining: Arc::new(Mutex::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Fail the next `n` fetches before succeeding
    pub fn with_failures(self, n: usize) -> Self {
        if let Ok(mut failures) = self.failures_remaining.lock() {
            *failures = n;
        }
        self
    }

    /// Replace the batch returned by subsequent fetches
    pub fn set_batch(&self, batch: RawBatch) {
        if let Ok(mut current) = self.batch.lock() {
            *current = batch;
        }
    }

    /// Number of fetches made, including failed ones
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BillingSource for MockBillingSource {
    async fn fetch_cost_and_usage(
        &self,
        _start: NaiveDate,
        _end: NaiveDate,
        _granularity: Granularity,
    ) -> Result<RawBatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        {
            let mut failures = self
                .failures_remaining
                .lock()
                .map_err(|_| Error::InvalidData("Failed to acquire mock failure lock".into()))?;
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::BillingSource("scripted fetch failure".into()));
            }
        }

        let batch = self
            .batch
            .lock()
            .map_err(|_| Error::InvalidData("Failed to acquire mock batch lock".into()))?
            .clone();
        Ok(batch)
    }
}
