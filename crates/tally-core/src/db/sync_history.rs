//! Sync pass log
//!
//! Every sync records one row, including coalesced (skipped) triggers and
//! failures. The table is pruned on insert so it never grows past
//! `SYNC_HISTORY_CAP` rows.

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{format_datetime, parse_datetime, Database};
use crate::error::Result;
use crate::models::{SyncRecord, SyncStatus};

/// Most recent sync entries retained
pub const SYNC_HISTORY_CAP: usize = 100;

impl Database {
    /// Record the outcome of one sync pass and prune old entries
    pub fn record_sync(
        &self,
        started_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        status: SyncStatus,
        records_ingested: usize,
        insights_generated: usize,
        error: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO sync_history (
                started_at, completed_at, status,
                records_ingested, insights_generated, error
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                format_datetime(started_at),
                completed_at.map(format_datetime),
                status.as_str(),
                records_ingested as i64,
                insights_generated as i64,
                error,
            ],
        )?;
        let id = conn.last_insert_rowid();

        conn.execute(
            "DELETE FROM sync_history WHERE id NOT IN \
             (SELECT id FROM sync_history ORDER BY id DESC LIMIT ?)",
            params![SYNC_HISTORY_CAP as i64],
        )?;

        Ok(id)
    }

    /// The most recent sync entry, if any
    pub fn last_sync(&self) -> Result<Option<SyncRecord>> {
        Ok(self.sync_history(1)?.into_iter().next())
    }

    /// Recent sync entries, newest first
    pub fn sync_history(&self, limit: usize) -> Result<Vec<SyncRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, started_at, completed_at, status,
                   records_ingested, insights_generated, error
            FROM sync_history
            ORDER BY id DESC
            LIMIT ?
            "#,
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            let started_str: String = row.get(1)?;
            let completed_str: Option<String> = row.get(2)?;
            let status_str: String = row.get(3)?;
            let records: i64 = row.get(4)?;
            let insights: i64 = row.get(5)?;
            Ok(SyncRecord {
                id: row.get(0)?,
                started_at: parse_datetime(&started_str),
                completed_at: completed_str.map(|s| parse_datetime(&s)),
                status: status_str.parse().unwrap_or(SyncStatus::Failed),
                records_ingested: records.max(0) as usize,
                insights_generated: insights.max(0) as usize,
                error: row.get(6)?,
            })
        })?;

        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_last_sync() {
        let db = Database::in_memory().unwrap();

        let started = Utc::now();
        db.record_sync(started, Some(started), SyncStatus::Completed, 12, 3, None)
            .unwrap();

        let last = db.last_sync().unwrap().unwrap();
        assert_eq!(last.status, SyncStatus::Completed);
        assert_eq!(last.records_ingested, 12);
        assert_eq!(last.insights_generated, 3);
        assert!(last.error.is_none());
        assert!(last.completed_at.is_some());
    }

    #[test]
    fn test_failed_sync_keeps_error() {
        let db = Database::in_memory().unwrap();

        db.record_sync(
            Utc::now(),
            None,
            SyncStatus::Failed,
            0,
            0,
            Some("billing source unreachable"),
        )
        .unwrap();

        let last = db.last_sync().unwrap().unwrap();
        assert_eq!(last.status, SyncStatus::Failed);
        assert_eq!(last.error.as_deref(), Some("billing source unreachable"));
    }

    #[test]
    fn test_history_newest_first() {
        let db = Database::in_memory().unwrap();

        db.record_sync(Utc::now(), None, SyncStatus::Completed, 1, 0, None)
            .unwrap();
        db.record_sync(Utc::now(), None, SyncStatus::Skipped, 0, 0, None)
            .unwrap();

        let history = db.sync_history(10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, SyncStatus::Skipped);
        assert_eq!(history[1].status, SyncStatus::Completed);
    }

    #[test]
    fn test_history_capped() {
        let db = Database::in_memory().unwrap();

        for i in 0..(SYNC_HISTORY_CAP + 20) {
            db.record_sync(Utc::now(), None, SyncStatus::Completed, i, 0, None)
                .unwrap();
        }

        let history = db.sync_history(SYNC_HISTORY_CAP * 2).unwrap();
        assert_eq!(history.len(), SYNC_HISTORY_CAP);
        // Newest entry survived the prune
        assert_eq!(history[0].records_ingested, SYNC_HISTORY_CAP + 19);
    }

    #[test]
    fn test_last_sync_empty() {
        let db = Database::in_memory().unwrap();
        assert!(db.last_sync().unwrap().is_none());
    }
}
