//! Insight storage
//!
//! Each analytics pass replaces the whole insight set. The `rank` column
//! preserves the ordering computed by the generating pass (savings, then
//! priority, then signal score), which string-typed savings columns cannot
//! reproduce in SQL.

use std::str::FromStr;

use rusqlite::params;
use rust_decimal::Decimal;

use super::Database;
use crate::error::Result;
use crate::insights::{Insight, InsightCategory, InsightFilter, Priority, SignalRef};

impl Database {
    /// Replace the current insight set in one transaction
    ///
    /// Clears prior insights and their index entries so the stored set (and
    /// anything rebuilt from it) always reflects exactly one pass.
    pub fn replace_insights(&self, insights: &[Insight]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM insights", [])?;
        tx.execute("DELETE FROM index_entries WHERE kind = 'insight'", [])?;

        for (rank, insight) in insights.iter().enumerate() {
            let signal_json = serde_json::to_string(&insight.source_signal)?;
            tx.execute(
                r#"
                INSERT INTO insights (
                    id, rank, category, service, title, description,
                    recommendation, potential_savings, priority, source_signal
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    insight.id,
                    rank as i64,
                    insight.category.as_str(),
                    insight.service,
                    insight.title,
                    insight.description,
                    insight.recommendation,
                    insight.potential_savings.to_string(),
                    insight.priority.as_str(),
                    signal_json,
                ],
            )?;
        }

        tx.commit()?;
        Ok(insights.len())
    }

    /// List insights in pass order, optionally filtered and limited
    pub fn list_insights(
        &self,
        filter: &InsightFilter,
        limit: Option<usize>,
    ) -> Result<Vec<Insight>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, category, service, title, description, recommendation,
                   potential_savings, priority, source_signal
            FROM insights
            ORDER BY rank
            "#,
        )?;

        let rows = stmt.query_map([], |row| self.row_to_insight(row))?;
        let insights = rows.collect::<std::result::Result<Vec<_>, _>>()?;

        let filtered = insights.into_iter().filter(|i| filter.matches(i));
        Ok(match limit {
            Some(n) => filtered.take(n).collect(),
            None => filtered.collect(),
        })
    }

    /// Top N insights in pass order
    pub fn top_insights(&self, limit: usize) -> Result<Vec<Insight>> {
        self.list_insights(&InsightFilter::default(), Some(limit))
    }

    /// Get a single insight by id
    pub fn get_insight(&self, id: &str) -> Result<Option<Insight>> {
        let conn = self.conn()?;

        let result = conn.query_row(
            r#"
            SELECT id, category, service, title, description, recommendation,
                   potential_savings, priority, source_signal
            FROM insights
            WHERE id = ?
            "#,
            params![id],
            |row| self.row_to_insight(row),
        );

        match result {
            Ok(insight) => Ok(Some(insight)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Count stored insights
    pub fn count_insights(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM insights", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Sum of potential savings across the current insight set
    pub fn total_potential_savings(&self) -> Result<Decimal> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT potential_savings FROM insights")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut total = Decimal::ZERO;
        for savings in rows {
            let savings = savings?;
            total += Decimal::from_str(&savings).unwrap_or(Decimal::ZERO);
        }
        Ok(total)
    }

    /// Helper to convert a row to Insight
    fn row_to_insight(&self, row: &rusqlite::Row) -> rusqlite::Result<Insight> {
        let category_str: String = row.get(1)?;
        let savings_str: String = row.get(6)?;
        let priority_str: String = row.get(7)?;
        let signal_json: String = row.get(8)?;

        let potential_savings = Decimal::from_str(&savings_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Insight {
            id: row.get(0)?,
            category: category_str
                .parse()
                .unwrap_or(InsightCategory::CostOptimization),
            service: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            recommendation: row.get(5)?,
            potential_savings,
            priority: priority_str.parse().unwrap_or(Priority::Low),
            source_signal: serde_json::from_str(&signal_json).unwrap_or(SignalRef::Concentration {
                service: String::new(),
                share_pct: 0.0,
            }),
        })
    }
}
