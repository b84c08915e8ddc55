//! CostEngine: the facade the CLI and server talk to
//!
//! Owns storage, the semantic index, the AI client and the prompt library,
//! and runs the full ingestion pass: fetch, normalize, persist, analytics,
//! insights, reindex. One pass runs at a time behind a `try_lock` sync lock;
//! a trigger arriving mid-pass is coalesced and reported as skipped, not
//! queued. Queries never take the sync lock and observe either the previous
//! or the new snapshot.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::ai::{AIBackend, AIClient};
use crate::analytics;
use crate::billing::{BillingSource, CsvBillingSource, Granularity};
use crate::config::EngineConfig;
use crate::context::{insight_bullets, render_report, render_summary};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::index::{EntryKind, IndexEntry, IndexSnapshot, SemanticIndex};
use crate::insights::{Insight, InsightFilter, InsightGenerator};
use crate::models::{CostRecord, CostSummary, SyncOutcome, SyncRecord, SyncStatus};
use crate::normalize::{normalize, RateTable, RawBatch};
use crate::orchestrator::{AskResponse, QueryOrchestrator};
use crate::prompts::{PromptId, PromptLibrary};

/// Services shown in the summary's top-spend list
const SUMMARY_TOP_SERVICES: usize = 5;

/// Default batch period applied to CSV rows that carry no dates of their own
const DEFAULT_IMPORT_WINDOW_DAYS: i64 = 30;

/// Base delay between billing fetch retries, scaled by attempt number
const RETRY_BACKOFF_MS: u64 = 100;

pub struct CostEngine {
    db: Database,
    index: Arc<SemanticIndex>,
    ai: AIClient,
    prompts: Arc<RwLock<PromptLibrary>>,
    billing: Arc<dyn BillingSource>,
    config: EngineConfig,
    orchestrator: QueryOrchestrator,
    sync_lock: tokio::sync::Mutex<()>,
}

impl CostEngine {
    /// Build an engine and load the persisted index snapshot
    pub fn new(
        db: Database,
        ai: AIClient,
        billing: Arc<dyn BillingSource>,
        config: EngineConfig,
    ) -> Result<Self> {
        Self::with_prompts(db, ai, billing, config, PromptLibrary::new())
    }

    /// Build an engine with an explicit prompt library (tests use the
    /// embedded-only library to stay off the data dir)
    pub fn with_prompts(
        db: Database,
        ai: AIClient,
        billing: Arc<dyn BillingSource>,
        config: EngineConfig,
        prompts: PromptLibrary,
    ) -> Result<Self> {
        let index = Arc::new(SemanticIndex::new());
        let prompts = Arc::new(RwLock::new(prompts));
        let orchestrator = QueryOrchestrator::new(
            db.clone(),
            index.clone(),
            ai.clone(),
            prompts.clone(),
            &config,
        );

        let engine = Self {
            db,
            index,
            ai,
            prompts,
            billing,
            config,
            orchestrator,
            sync_lock: tokio::sync::Mutex::new(()),
        };
        engine.rebuild_index()?;
        Ok(engine)
    }

    /// Pull the last `days` days from the billing source and run a full pass.
    ///
    /// A sync triggered while another runs is coalesced: it records a skipped
    /// entry and returns immediately instead of queueing.
    pub async fn sync(&self, days: i64) -> Result<SyncOutcome> {
        let Ok(_guard) = self.sync_lock.try_lock() else {
            info!("Sync already running, coalescing trigger");
            let now = Utc::now();
            self.db
                .record_sync(now, Some(now), SyncStatus::Skipped, 0, 0, None)?;
            return Ok(SyncOutcome::skipped());
        };

        let end = Utc::now().date_naive();
        let start = end - chrono::Duration::days(days);
        let attempts = self.config.ingestion.sync_retry_attempts.max(1);
        self.recorded_pass(self.billing.clone(), start, end, attempts)
            .await
    }

    /// Ingest a billing CSV export through the same pass as `sync`
    pub async fn import_csv(&self, path: impl Into<PathBuf>) -> Result<SyncOutcome> {
        let Ok(_guard) = self.sync_lock.try_lock() else {
            info!("Sync already running, coalescing import");
            let now = Utc::now();
            self.db
                .record_sync(now, Some(now), SyncStatus::Skipped, 0, 0, None)?;
            return Ok(SyncOutcome::skipped());
        };

        let end = Utc::now().date_naive();
        let start = end - chrono::Duration::days(DEFAULT_IMPORT_WINDOW_DAYS);
        let source: Arc<dyn BillingSource> = Arc::new(CsvBillingSource::new(path));
        // A missing file will not heal between attempts
        self.recorded_pass(source, start, end, 1).await
    }

    /// Run one pass and log its outcome to sync history
    async fn recorded_pass(
        &self,
        source: Arc<dyn BillingSource>,
        start: NaiveDate,
        end: NaiveDate,
        attempts: u32,
    ) -> Result<SyncOutcome> {
        let started_at = Utc::now();
        match self.run_pass(source.as_ref(), start, end, attempts).await {
            Ok(outcome) => {
                self.db.record_sync(
                    started_at,
                    Some(Utc::now()),
                    SyncStatus::Completed,
                    outcome.records_ingested,
                    outcome.insights_generated,
                    None,
                )?;
                Ok(outcome)
            }
            Err(e) => {
                // A failed history write must not mask the pass error
                if let Err(log_err) = self.db.record_sync(
                    started_at,
                    Some(Utc::now()),
                    SyncStatus::Failed,
                    0,
                    0,
                    Some(&e.to_string()),
                ) {
                    warn!(error = %log_err, "Failed to record sync failure");
                }
                Err(e)
            }
        }
    }

    /// Fetch, normalize, persist, then the analytics pass
    async fn run_pass(
        &self,
        source: &dyn BillingSource,
        start: NaiveDate,
        end: NaiveDate,
        attempts: u32,
    ) -> Result<SyncOutcome> {
        info!(%start, %end, "Starting sync pass");

        let batch = self.fetch_with_retry(source, start, end, attempts).await?;
        let rates = RateTable::identity(&self.config.ingestion.reporting_currency);
        let records = normalize(&batch.entries, (start, end), &rates)?;
        self.db.upsert_records(&records)?;

        let insights_generated = self.run_analytics_pass().await?;
        Ok(SyncOutcome {
            status: SyncStatus::Completed,
            records_ingested: records.len(),
            insights_generated,
        })
    }

    async fn fetch_with_retry(
        &self,
        source: &dyn BillingSource,
        start: NaiveDate,
        end: NaiveDate,
        attempts: u32,
    ) -> Result<RawBatch> {
        let mut last_err = None;
        for attempt in 1..=attempts {
            match source
                .fetch_cost_and_usage(start, end, Granularity::Daily)
                .await
            {
                Ok(batch) => return Ok(batch),
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Billing fetch failed");
                    last_err = Some(e);
                    if attempt < attempts {
                        let delay = RETRY_BACKOFF_MS * u64::from(attempt);
                        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    }
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| Error::BillingSource("no fetch attempts were made".into())))
    }

    /// Analytics over the full record set: signals, insights, reindex.
    ///
    /// The new insight set and index snapshot are built off to the side and
    /// swapped in whole, so concurrent queries never see a partial state.
    async fn run_analytics_pass(&self) -> Result<usize> {
        let records = self.db.list_records()?;
        let trends = analytics::trend(&records, &self.config.analytics);
        let anomalies = analytics::detect_anomalies(&records, &self.config.analytics);
        let insights =
            InsightGenerator::new().generate(&trends, &anomalies, &records, &self.config.insights);

        self.db.replace_insights(&insights)?;
        let index_size = self.reindex(&records, &insights).await?;

        info!(
            records = records.len(),
            trends = trends.len(),
            anomalies = anomalies.len(),
            insights = insights.len(),
            index_size,
            "Analytics pass complete"
        );
        Ok(insights.len())
    }

    /// Re-embed every live record and insight, persist the entries, and swap
    /// the in-memory snapshot.
    ///
    /// An entity whose embedding fails is left out and logged; the index is a
    /// rebuildable cache and queries degrade rather than the pass failing.
    async fn reindex(&self, records: &[CostRecord], insights: &[Insight]) -> Result<usize> {
        let mut entries = Vec::with_capacity(records.len() + insights.len());

        for record in records {
            let text = record.embedding_text();
            match self.ai.embed(&text).await {
                Ok(embedding) => entries.push(IndexEntry {
                    entity_id: record.record_key(),
                    kind: EntryKind::Record,
                    text,
                    embedding,
                }),
                Err(e) => warn!(
                    service = %record.service,
                    period_start = %record.period_start,
                    error = %e,
                    "Embedding failed, record left out of the index"
                ),
            }
        }
        for insight in insights {
            let text = insight.embedding_text();
            match self.ai.embed(&text).await {
                Ok(embedding) => entries.push(IndexEntry {
                    entity_id: insight.id.clone(),
                    kind: EntryKind::Insight,
                    text,
                    embedding,
                }),
                Err(e) => warn!(
                    insight_id = %insight.id,
                    error = %e,
                    "Embedding failed, insight left out of the index"
                ),
            }
        }

        self.db.upsert_index_entries(&entries)?;
        let size = entries.len();
        self.index.swap(IndexSnapshot::new(entries));
        Ok(size)
    }

    /// Account-wide rollup
    pub fn get_summary(&self) -> Result<CostSummary> {
        let records = self.db.list_records()?;
        let total_insights = self.db.count_insights()? as usize;
        let total_savings = self.db.total_potential_savings()?;
        Ok(analytics::summarize(
            &records,
            total_insights,
            total_savings,
            &self.config.ingestion.reporting_currency,
            SUMMARY_TOP_SERVICES,
        ))
    }

    /// Current insights in rank order, optionally filtered and limited
    pub fn list_insights(
        &self,
        filter: &InsightFilter,
        limit: Option<usize>,
    ) -> Result<Vec<Insight>> {
        self.db.list_insights(filter, limit)
    }

    /// Answer a question over the current data
    pub async fn ask(&self, question: &str, conversation_id: &str) -> Result<AskResponse> {
        self.orchestrator.ask(question, conversation_id).await
    }

    /// Deterministic markdown rollup of the current insight and forecast set
    pub fn generate_report(&self) -> Result<String> {
        let summary = self.get_summary()?;
        let insights = self.db.list_insights(&InsightFilter::default(), None)?;
        let records = self.db.list_records()?;
        let forecasts = analytics::forecast(&records, &self.config.analytics);
        Ok(render_report(&summary, &insights, &forecasts, Utc::now()))
    }

    /// One-sentence language-model summary for the top of a report
    pub async fn report_narrative(&self) -> Result<String> {
        let summary = self.get_summary()?;
        let insights = self.db.top_insights(self.config.query.top_insights)?;

        let prompt = {
            let mut prompts = self
                .prompts
                .write()
                .map_err(|_| Error::InvalidData("Failed to acquire prompt library lock".into()))?;
            let template = prompts.get(PromptId::ReportNarrative)?;

            let summary_text = render_summary(&summary);
            let bullets = insight_bullets(&insights);
            let mut vars: HashMap<&str, &str> = HashMap::new();
            vars.insert("summary", &summary_text);
            if !insights.is_empty() {
                vars.insert("insights", &bullets);
            }
            template.render(&vars)
        };

        let timeout = self.config.query.generation_timeout;
        match tokio::time::timeout(timeout, self.ai.generate(&prompt)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Generation(format!(
                "generation timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Load persisted index entries into a fresh snapshot
    pub fn rebuild_index(&self) -> Result<usize> {
        let entries = self.db.load_index_entries()?;
        let size = entries.len();
        self.index.swap(IndexSnapshot::new(entries));
        debug!(size, "Semantic index loaded from storage");
        Ok(size)
    }

    /// Soft reset: drop records, insights, index entries and history while
    /// keeping configuration
    pub fn clear(&self) -> Result<()> {
        self.db.soft_reset()?;
        self.index.swap(IndexSnapshot::default());
        Ok(())
    }

    pub fn last_sync(&self) -> Result<Option<SyncRecord>> {
        self.db.last_sync()
    }

    pub fn sync_history(&self, limit: usize) -> Result<Vec<SyncRecord>> {
        self.db.sync_history(limit)
    }

    pub fn index_size(&self) -> usize {
        self.index.len()
    }

    pub async fn ai_healthy(&self) -> bool {
        self.ai.health_check().await
    }

    pub fn ai_model(&self) -> &str {
        self.ai.model()
    }

    pub fn ai_host(&self) -> &str {
        self.ai.host()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MockBackend;
    use crate::billing::MockBillingSource;
    use crate::normalize::RawUsageEntry;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn entry(service: &str, amount: rust_decimal::Decimal, days_ago: i64) -> RawUsageEntry {
        let date = Utc::now().date_naive() - chrono::Duration::days(days_ago);
        RawUsageEntry {
            service: service.to_string(),
            amount,
            currency: None,
            period_start: Some(date),
            period_end: Some(date),
            dimensions: Default::default(),
        }
    }

    fn sample_batch() -> RawBatch {
        RawBatch {
            entries: vec![
                entry("AmazonEC2", dec!(600), 2),
                entry("AmazonS3", dec!(150), 2),
                entry("AmazonEC2", dec!(610), 1),
            ],
        }
    }

    fn engine_with(source: Arc<MockBillingSource>) -> CostEngine {
        CostEngine::with_prompts(
            Database::in_memory().unwrap(),
            AIClient::mock(),
            source,
            EngineConfig::default(),
            PromptLibrary::embedded_only(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_sync_runs_full_pass() {
        let source = Arc::new(MockBillingSource::new(sample_batch()));
        let engine = engine_with(source.clone());

        let outcome = engine.sync(30).await.unwrap();

        assert_eq!(outcome.status, SyncStatus::Completed);
        assert_eq!(outcome.records_ingested, 3);
        assert!(outcome.insights_generated > 0);

        // Records, insights, and index entries all persisted
        assert_eq!(engine.db.count_records().unwrap(), 3);
        assert!(engine.db.count_insights().unwrap() > 0);
        assert_eq!(
            engine.index_size() as i64,
            engine.db.count_index_entries().unwrap()
        );

        let last = engine.last_sync().unwrap().unwrap();
        assert_eq!(last.status, SyncStatus::Completed);
        assert_eq!(last.records_ingested, 3);
    }

    #[tokio::test]
    async fn test_sync_retries_transient_fetch_failures() {
        let source = Arc::new(MockBillingSource::new(sample_batch()).with_failures(2));
        let engine = engine_with(source.clone());

        let outcome = engine.sync(30).await.unwrap();

        assert_eq!(outcome.status, SyncStatus::Completed);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_sync_fails_after_retries_exhausted() {
        let source = Arc::new(MockBillingSource::new(sample_batch()).with_failures(10));
        let engine = engine_with(source.clone());

        let err = engine.sync(30).await.unwrap_err();
        assert!(matches!(err, Error::BillingSource(_)));
        // Default retry budget is three attempts
        assert_eq!(source.calls(), 3);

        let last = engine.last_sync().unwrap().unwrap();
        assert_eq!(last.status, SyncStatus::Failed);
        assert!(last.error.unwrap().contains("scripted fetch failure"));
    }

    #[tokio::test]
    async fn test_concurrent_sync_is_coalesced() {
        let source = Arc::new(MockBillingSource::new(sample_batch()));
        let engine = engine_with(source.clone());

        // Hold the sync lock as a running pass would
        let _guard = engine.sync_lock.try_lock().unwrap();

        let outcome = engine.sync(30).await.unwrap();

        assert_eq!(outcome.status, SyncStatus::Skipped);
        assert_eq!(outcome.records_ingested, 0);
        assert_eq!(source.calls(), 0);

        let last = engine.last_sync().unwrap().unwrap();
        assert_eq!(last.status, SyncStatus::Skipped);
    }

    #[tokio::test]
    async fn test_import_csv_ingests_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "service,amount,period_start,period_end,region").unwrap();
        writeln!(file, "AmazonEC2,100.00,2024-01-01,2024-01-07,us-east-1").unwrap();
        writeln!(file, "AmazonS3,25.00,2024-01-01,2024-01-07,us-west-2").unwrap();

        let engine = engine_with(Arc::new(MockBillingSource::empty()));
        let outcome = engine.import_csv(file.path()).await.unwrap();

        assert_eq!(outcome.status, SyncStatus::Completed);
        assert_eq!(outcome.records_ingested, 2);
        assert_eq!(engine.db.count_records().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_import_csv_missing_file_is_recorded() {
        let engine = engine_with(Arc::new(MockBillingSource::empty()));

        let err = engine.import_csv("/nonexistent/costs.csv").await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));

        let last = engine.last_sync().unwrap().unwrap();
        assert_eq!(last.status, SyncStatus::Failed);
    }

    #[tokio::test]
    async fn test_get_summary_reflects_pass() {
        let source = Arc::new(MockBillingSource::new(sample_batch()));
        let engine = engine_with(source);
        engine.sync(30).await.unwrap();

        let summary = engine.get_summary().unwrap();

        assert_eq!(summary.record_count, 3);
        assert_eq!(summary.service_count, 2);
        assert_eq!(summary.total_spend, dec!(1360));
        assert_eq!(summary.top_services[0].service, "AmazonEC2");
        assert!(summary.total_insights > 0);
    }

    #[tokio::test]
    async fn test_generate_report_lists_insights() {
        let source = Arc::new(MockBillingSource::new(sample_batch()));
        let engine = engine_with(source);
        engine.sync(30).await.unwrap();

        let report = engine.generate_report().unwrap();

        assert!(report.starts_with("# Cloud Cost Optimization Report"));
        assert!(report.contains("Priority Actions"));
        assert!(report.contains("AmazonEC2"));
        // Two days of history is too thin for a projection
        assert!(report.contains("## Spend Forecast"));
        assert!(report.contains("- AmazonEC2: no forecast available"));
    }

    #[tokio::test]
    async fn test_report_narrative_uses_backend() {
        let source = Arc::new(MockBillingSource::new(sample_batch()));
        let backend = MockBackend::new().with_canned("Spend is concentrated in compute.");
        let engine = CostEngine::with_prompts(
            Database::in_memory().unwrap(),
            AIClient::Mock(backend),
            source,
            EngineConfig::default(),
            PromptLibrary::embedded_only(),
        )
        .unwrap();
        engine.sync(30).await.unwrap();

        let narrative = engine.report_narrative().await.unwrap();
        assert_eq!(narrative, "Spend is concentrated in compute.");
    }

    #[tokio::test]
    async fn test_clear_resets_data_and_index() {
        let source = Arc::new(MockBillingSource::new(sample_batch()));
        let engine = engine_with(source);
        engine.sync(30).await.unwrap();
        assert!(engine.index_size() > 0);

        engine.clear().unwrap();

        assert_eq!(engine.db.count_records().unwrap(), 0);
        assert_eq!(engine.db.count_insights().unwrap(), 0);
        assert_eq!(engine.index_size(), 0);
        assert!(engine.last_sync().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_index_rebuilt_from_storage_on_startup() {
        let db = Database::in_memory().unwrap();
        let source = Arc::new(MockBillingSource::new(sample_batch()));

        let first = CostEngine::with_prompts(
            db.clone(),
            AIClient::mock(),
            source.clone(),
            EngineConfig::default(),
            PromptLibrary::embedded_only(),
        )
        .unwrap();
        first.sync(30).await.unwrap();
        let size = first.index_size();
        assert!(size > 0);
        drop(first);

        let second = CostEngine::with_prompts(
            db,
            AIClient::mock(),
            source,
            EngineConfig::default(),
            PromptLibrary::embedded_only(),
        )
        .unwrap();

        assert_eq!(second.index_size(), size);
    }

    #[tokio::test]
    async fn test_ask_answers_over_synced_data() {
        let source = Arc::new(MockBillingSource::new(sample_batch()));
        let engine = engine_with(source);
        engine.sync(30).await.unwrap();

        let response = engine
            .ask("What is my highest cost service?", "conv-engine")
            .await
            .unwrap();

        assert!(!response.response_text.is_empty());
        assert!(!response.degraded);
    }
}
