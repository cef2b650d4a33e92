use chrono::Utc;
use rusqlite::params;

use crate::error::StoreResult;
use crate::types::TeamInsight;
use crate::Store;

impl Store {
    /// Workers/the CEO append one row per completed delegation; this is the
    /// entire "team context" / "agent insight" mechanism (§9 Open Question).
    pub async fn record_insight(&self, session_id: &str, role: &str, kind: &str, content: &str) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO team_insights (session_id, role, kind, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, role, kind, content, now.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Latest `n` insight rows across all roles for a session, oldest first,
    /// used to build the CEO's "team context" system prompt block.
    pub async fn load_team_context(&self, session_id: &str, n: i64) -> StoreResult<Vec<TeamInsight>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT session_id, role, kind, content, created_at FROM team_insights
             WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let mut rows: Vec<TeamInsight> = stmt
            .query_map(params![session_id, n], |row| {
                let created_at: String = row.get(4)?;
                Ok(TeamInsight {
                    session_id: row.get(0)?,
                    role: row.get(1)?,
                    kind: row.get(2)?,
                    content: row.get(3)?,
                    created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
                })
            })?
            .collect::<Result<_, _>>()?;
        rows.reverse();
        Ok(rows)
    }
}
