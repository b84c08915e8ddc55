//! Background task scheduler for automatic billing syncs
//!
//! Provides optional scheduled sync functionality that can be enabled
//! via environment variables:
//!
//! - `TALLY_SYNC_INTERVAL_HOURS`: Interval in hours (e.g., "24" for daily)
//! - `TALLY_SYNC_WINDOW_DAYS`: How many days of history each pass pulls (default: 30)
//!
//! Scheduled passes share the engine's sync lock, so a tick that lands
//! while a manual sync is running is recorded as skipped rather than
//! ingesting the same window twice.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info, warn};

use tally_core::{CostEngine, SyncStatus};

/// Configuration for scheduled syncs
#[derive(Debug, Clone)]
pub struct SyncScheduleConfig {
    /// Interval between syncs in hours
    pub interval_hours: u64,
    /// Days of billing history each pass pulls
    pub window_days: i64,
}

impl SyncScheduleConfig {
    /// Parse configuration from environment variables
    ///
    /// Returns None if scheduling is not configured (TALLY_SYNC_INTERVAL_HOURS not set)
    pub fn from_env() -> Option<Self> {
        let interval_hours: u64 = std::env::var("TALLY_SYNC_INTERVAL_HOURS")
            .ok()
            .and_then(|s| s.parse().ok())?;

        if interval_hours == 0 {
            warn!("TALLY_SYNC_INTERVAL_HOURS is 0, automatic syncs disabled");
            return None;
        }

        let window_days = std::env::var("TALLY_SYNC_WINDOW_DAYS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Some(Self {
            interval_hours,
            window_days,
        })
    }
}

/// Start the sync scheduler as a background task
///
/// This function spawns a tokio task that runs indefinitely, pulling
/// billing data at the configured interval.
pub fn start_sync_scheduler(engine: Arc<CostEngine>, config: SyncScheduleConfig) {
    info!(
        "Starting sync scheduler: every {} hours, {}-day window",
        config.interval_hours, config.window_days
    );

    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(config.interval_hours * 3600));

        // Skip the first immediate tick - we don't want to sync on startup
        ticker.tick().await;

        loop {
            ticker.tick().await;

            info!("Running scheduled sync...");

            match engine.sync(config.window_days).await {
                Ok(outcome) if outcome.status == SyncStatus::Skipped => {
                    info!("Scheduled sync skipped; another pass was already running");
                }
                Ok(outcome) => {
                    info!(
                        "Scheduled sync completed: {} records, {} insights",
                        outcome.records_ingested, outcome.insights_generated
                    );
                }
                Err(e) => {
                    error!("Scheduled sync failed: {}", e);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env_not_set() {
        // When TALLY_SYNC_INTERVAL_HOURS is not set, should return None
        std::env::remove_var("TALLY_SYNC_INTERVAL_HOURS");
        assert!(SyncScheduleConfig::from_env().is_none());
    }

    #[test]
    fn test_config_from_env_zero() {
        // When TALLY_SYNC_INTERVAL_HOURS is 0, should return None
        std::env::set_var("TALLY_SYNC_INTERVAL_HOURS", "0");
        assert!(SyncScheduleConfig::from_env().is_none());
        std::env::remove_var("TALLY_SYNC_INTERVAL_HOURS");
    }
}
