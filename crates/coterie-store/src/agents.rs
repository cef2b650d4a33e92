use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::error::StoreResult;
use crate::types::{AgentStateRecord, AgentStatus};
use crate::Store;

impl Store {
    /// Upsert-on-conflict semantics on `role`.
    pub async fn upsert_agent_state(
        &self,
        role: &str,
        status: AgentStatus,
        process_id: Option<i64>,
        last_seen_task_id: Option<&str>,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO agent_state (role, status, process_id, last_seen_task_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(role) DO UPDATE SET
                status = excluded.status,
                process_id = excluded.process_id,
                last_seen_task_id = COALESCE(excluded.last_seen_task_id, agent_state.last_seen_task_id),
                updated_at = excluded.updated_at",
            params![role, status.as_str(), process_id, last_seen_task_id, now],
        )?;
        Ok(())
    }

    pub async fn get_agent_state(&self, role: &str) -> StoreResult<Option<AgentStateRecord>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT role, status, process_id, last_seen_task_id, updated_at FROM agent_state WHERE role = ?1",
            params![role],
            |row| {
                let updated_at: String = row.get(4)?;
                Ok(AgentStateRecord {
                    role: row.get(0)?,
                    status: AgentStatus::parse(&row.get::<_, String>(1)?),
                    process_id: row.get(2)?,
                    last_seen_task_id: row.get(3)?,
                    updated_at: updated_at.parse().unwrap_or_else(|_| Utc::now()),
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    pub async fn list_agent_states(&self) -> StoreResult<Vec<AgentStateRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT role, status, process_id, last_seen_task_id, updated_at FROM agent_state ORDER BY role",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let updated_at: String = row.get(4)?;
                Ok(AgentStateRecord {
                    role: row.get(0)?,
                    status: AgentStatus::parse(&row.get::<_, String>(1)?),
                    process_id: row.get(2)?,
                    last_seen_task_id: row.get(3)?,
                    updated_at: updated_at.parse().unwrap_or_else(|_| Utc::now()),
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }
}
