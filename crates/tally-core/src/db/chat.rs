//! Conversation history for the ask flow

use rusqlite::params;

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::{ChatMessage, ChatRole};

impl Database {
    /// Append a conversation turn
    pub fn append_chat_message(
        &self,
        conversation_id: &str,
        role: ChatRole,
        content: &str,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO chat_history (conversation_id, role, content) VALUES (?, ?, ?)",
            params![conversation_id, role.as_str(), content],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent turns of a conversation, oldest first
    ///
    /// Takes the last `limit` rows so long conversations stay bounded in the
    /// prompt, then restores chronological order for rendering.
    pub fn recent_chat_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, conversation_id, role, content, created_at
            FROM chat_history
            WHERE conversation_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )?;

        let rows = stmt.query_map(params![conversation_id, limit as i64], |row| {
            let role_str: String = row.get(2)?;
            let created_str: String = row.get(4)?;
            Ok(ChatMessage {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                role: role_str.parse().unwrap_or(ChatRole::User),
                content: row.get(3)?,
                created_at: parse_datetime(&created_str),
            })
        })?;

        let mut messages = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Count turns in a conversation
    pub fn count_chat_messages(&self, conversation_id: &str) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chat_history WHERE conversation_id = ?",
            params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
