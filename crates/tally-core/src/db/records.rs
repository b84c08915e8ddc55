//! Canonical cost record storage
//!
//! Records are keyed by their content hash (service + period + dimensions),
//! so re-ingesting the same billing window replaces rather than duplicates.
//! Amended amounts from late-arriving billing data overwrite in place.

use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::params;
use rust_decimal::Decimal;

use super::{format_datetime, parse_datetime, Database};
use crate::error::Result;
use crate::models::CostRecord;

impl Database {
    /// Upsert a batch of canonical records in one transaction
    ///
    /// Each record replaces any existing row with the same key. The semantic
    /// index entry for a replaced record is removed in the same transaction,
    /// so a reindex pass never serves stale text for an amended amount.
    pub fn upsert_records(&self, records: &[CostRecord]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        for record in records {
            let key = record.record_key();
            let dimensions_json = serde_json::to_string(&record.dimensions)?;

            tx.execute(
                r#"
                INSERT INTO cost_records (
                    record_key, service, amount, currency,
                    period_start, period_end, dimensions, source_ingested_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(record_key) DO UPDATE SET
                    amount = excluded.amount,
                    currency = excluded.currency,
                    dimensions = excluded.dimensions,
                    source_ingested_at = excluded.source_ingested_at
                "#,
                params![
                    key,
                    record.service,
                    record.amount.to_string(),
                    record.currency,
                    record.period_start.format("%Y-%m-%d").to_string(),
                    record.period_end.format("%Y-%m-%d").to_string(),
                    dimensions_json,
                    format_datetime(record.source_ingested_at),
                ],
            )?;

            // Superseded content must not linger in the index
            tx.execute(
                "DELETE FROM index_entries WHERE kind = 'record' AND entity_id = ?",
                params![key],
            )?;
        }

        tx.commit()?;
        Ok(records.len())
    }

    /// List all canonical records ordered by period, then service
    pub fn list_records(&self) -> Result<Vec<CostRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT service, amount, currency, period_start, period_end,
                   dimensions, source_ingested_at
            FROM cost_records
            ORDER BY period_start, service
            "#,
        )?;

        let rows = stmt.query_map([], |row| self.row_to_cost_record(row))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Get a single record by its canonical key
    pub fn get_record(&self, record_key: &str) -> Result<Option<CostRecord>> {
        let conn = self.conn()?;

        let result = conn.query_row(
            r#"
            SELECT service, amount, currency, period_start, period_end,
                   dimensions, source_ingested_at
            FROM cost_records
            WHERE record_key = ?
            "#,
            params![record_key],
            |row| self.row_to_cost_record(row),
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Count canonical records
    pub fn count_records(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cost_records", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Distinct services with at least one record, sorted
    pub fn list_services(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT service FROM cost_records ORDER BY service")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Helper to convert a row to CostRecord
    fn row_to_cost_record(&self, row: &rusqlite::Row) -> rusqlite::Result<CostRecord> {
        let amount_str: String = row.get(1)?;
        let period_start_str: String = row.get(3)?;
        let period_end_str: String = row.get(4)?;
        let dimensions_json: String = row.get(5)?;
        let ingested_str: String = row.get(6)?;

        let amount = Decimal::from_str(&amount_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let period_start = NaiveDate::parse_from_str(&period_start_str, "%Y-%m-%d").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let period_end = NaiveDate::parse_from_str(&period_end_str, "%Y-%m-%d").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(CostRecord {
            service: row.get(0)?,
            amount,
            currency: row.get(2)?,
            period_start,
            period_end,
            dimensions: serde_json::from_str(&dimensions_json).unwrap_or_default(),
            source_ingested_at: parse_datetime(&ingested_str),
        })
    }
}
