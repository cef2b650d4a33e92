use chrono::Utc;
use rusqlite::params;

use crate::error::StoreResult;
use crate::types::SummaryRecord;
use crate::Store;

impl Store {
    pub async fn save_summary(
        &self,
        session_id: &str,
        start_turn_id: i64,
        end_turn_id: i64,
        content: &str,
    ) -> StoreResult<i64> {
        let conn = self.conn.lock().await;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO summaries (session_id, start_turn_id, end_turn_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, start_turn_id, end_turn_id, content, now.to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent `n` summaries for a session, newest first.
    pub async fn load_latest_summaries(&self, session_id: &str, n: i64) -> StoreResult<Vec<SummaryRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, start_turn_id, end_turn_id, content, created_at
             FROM summaries WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![session_id, n], |row| {
                let created_at: String = row.get(5)?;
                Ok(SummaryRecord {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    start_turn_id: row.get(2)?,
                    end_turn_id: row.get(3)?,
                    content: row.get(4)?,
                    created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }
}
