//! Persisted semantic index entries
//!
//! Embeddings are stored as JSON float arrays. The in-memory snapshot is
//! rebuilt from this table at startup and after every analytics pass.

use rusqlite::params;

use super::Database;
use crate::error::Result;
use crate::index::{EntryKind, IndexEntry};

impl Database {
    /// Upsert index entries in one transaction
    pub fn upsert_index_entries(&self, entries: &[IndexEntry]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        for entry in entries {
            let embedding_json = serde_json::to_string(&entry.embedding)?;
            tx.execute(
                r#"
                INSERT OR REPLACE INTO index_entries (entity_id, kind, text, embedding)
                VALUES (?, ?, ?, ?)
                "#,
                params![
                    entry.entity_id,
                    entry.kind.as_str(),
                    entry.text,
                    embedding_json,
                ],
            )?;
        }

        tx.commit()?;
        Ok(entries.len())
    }

    /// Load all persisted index entries
    ///
    /// Rows whose kind or embedding fails to parse are dropped; the index is
    /// a rebuildable cache, not a source of truth.
    pub fn load_index_entries(&self) -> Result<Vec<IndexEntry>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT entity_id, kind, text, embedding FROM index_entries")?;

        let rows = stmt.query_map([], |row| {
            let entity_id: String = row.get(0)?;
            let kind_str: String = row.get(1)?;
            let text: String = row.get(2)?;
            let embedding_json: String = row.get(3)?;
            Ok((entity_id, kind_str, text, embedding_json))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (entity_id, kind_str, text, embedding_json) = row?;
            let Ok(kind) = kind_str.parse::<EntryKind>() else {
                continue;
            };
            let Ok(embedding) = serde_json::from_str::<Vec<f32>>(&embedding_json) else {
                continue;
            };
            entries.push(IndexEntry {
                entity_id,
                kind,
                text,
                embedding,
            });
        }

        Ok(entries)
    }

    /// Remove a single entry
    pub fn remove_index_entry(&self, kind: EntryKind, entity_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM index_entries WHERE kind = ? AND entity_id = ?",
            params![kind.as_str(), entity_id],
        )?;
        Ok(())
    }

    /// Count persisted entries
    pub fn count_index_entries(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM index_entries", [], |row| row.get(0))?;
        Ok(count)
    }
}
