use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::types::{TaskRecord, TaskStatus};
use crate::Store;

impl Store {
    pub async fn create_task(
        &self,
        parent_task_id: Option<&str>,
        role: &str,
        input: serde_json::Value,
        max_retries: i64,
    ) -> StoreResult<String> {
        let conn = self.conn.lock().await;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO tasks (id, parent_task_id, role, input_json, output_json, status,
                retry_count, max_retries, error_message, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5, 0, ?6, NULL, ?7, ?7)",
            params![
                id,
                parent_task_id,
                role,
                serde_json::to_string(&input)?,
                TaskStatus::Pending.as_str(),
                max_retries,
                now,
            ],
        )?;
        Ok(id)
    }

    pub async fn add_task_dependency(&self, task_id: &str, depends_on_task_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_task_id) VALUES (?1, ?2)",
            params![task_id, depends_on_task_id],
        )?;
        Ok(())
    }

    /// Atomically selects the oldest pending task for `role` whose every
    /// dependency is `done`, and transitions it to `running`. Never returns a
    /// task with an unfinished dependency.
    pub async fn claim_ready_task(&self, role: &str) -> StoreResult<Option<TaskRecord>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let candidate_id: Option<String> = {
            let mut stmt = tx.prepare(
                "SELECT t.id FROM tasks t
                 WHERE t.role = ?1 AND t.status = 'pending'
                   AND NOT EXISTS (
                       SELECT 1 FROM task_dependencies d
                       JOIN tasks dep ON dep.id = d.depends_on_task_id
                       WHERE d.task_id = t.id AND dep.status != 'done'
                   )
                 ORDER BY t.created_at ASC, t.rowid ASC
                 LIMIT 1",
            )?;
            stmt.query_row(params![role], |row| row.get(0)).optional()?
        };

        let Some(id) = candidate_id else {
            tx.commit()?;
            return Ok(None);
        };

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "UPDATE tasks SET status = 'running', updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;

        let record = load_task_tx(&tx, &id)?;
        tx.commit()?;
        Ok(Some(record))
    }

    /// Returns `true` if a retry was scheduled (task reset to `pending`),
    /// `false` if retries were exhausted (task moved to `failed`).
    pub async fn fail_with_retry(&self, task_id: &str, error_message: &str) -> StoreResult<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let (retry_count, max_retries): (i64, i64) = tx.query_row(
            "SELECT retry_count, max_retries FROM tasks WHERE id = ?1",
            params![task_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let now = Utc::now().to_rfc3339();
        let retried = retry_count < max_retries;
        if retried {
            tx.execute(
                "UPDATE tasks SET status = 'pending', retry_count = retry_count + 1,
                    error_message = ?2, updated_at = ?3 WHERE id = ?1",
                params![task_id, error_message, now],
            )?;
        } else {
            tx.execute(
                "UPDATE tasks SET status = 'failed', error_message = ?2, updated_at = ?3 WHERE id = ?1",
                params![task_id, error_message, now],
            )?;
        }
        tx.commit()?;
        Ok(retried)
    }

    pub async fn complete_task(&self, task_id: &str, output: serde_json::Value) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE tasks SET status = 'done', output_json = ?2, updated_at = ?3 WHERE id = ?1",
            params![task_id, serde_json::to_string(&output)?, now],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("task {task_id}")));
        }
        Ok(())
    }

    pub async fn get_task(&self, task_id: &str) -> StoreResult<TaskRecord> {
        let conn = self.conn.lock().await;
        load_task_tx(&conn, task_id)
    }
}

fn load_task_tx(conn: &rusqlite::Connection, id: &str) -> StoreResult<TaskRecord> {
    conn.query_row(
        "SELECT id, parent_task_id, role, input_json, output_json, status,
                retry_count, max_retries, error_message, created_at, updated_at
         FROM tasks WHERE id = ?1",
        params![id],
        |row| {
            let input_json: String = row.get(3)?;
            let output_json: Option<String> = row.get(4)?;
            let created_at: String = row.get(9)?;
            let updated_at: String = row.get(10)?;
            Ok(TaskRecord {
                id: row.get(0)?,
                parent_task_id: row.get(1)?,
                role: row.get(2)?,
                input: serde_json::from_str(&input_json).unwrap_or(serde_json::Value::Null),
                output: output_json.and_then(|s| serde_json::from_str(&s).ok()),
                status: TaskStatus::parse(&row.get::<_, String>(5)?),
                retry_count: row.get(6)?,
                max_retries: row.get(7)?,
                error_message: row.get(8)?,
                created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
                updated_at: updated_at.parse().unwrap_or_else(|_| Utc::now()),
            })
        },
    )
    .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use crate::types::TaskStatus;
    use crate::Store;
    use serde_json::json;

    #[tokio::test]
    async fn claim_ready_task_waits_for_dependency() {
        let store = Store::open_in_memory().await.unwrap();
        let dep = store.create_task(None, "researcher", json!({"q": "x"}), 2).await.unwrap();
        let blocked = store.create_task(None, "coder", json!({"ref": dep}), 2).await.unwrap();
        store.add_task_dependency(&blocked, &dep).await.unwrap();

        assert!(store.claim_ready_task("coder").await.unwrap().is_none());

        let claimed_dep = store.claim_ready_task("researcher").await.unwrap().unwrap();
        assert_eq!(claimed_dep.id, dep);
        store.complete_task(&dep, json!({"ok": true})).await.unwrap();

        let claimed = store.claim_ready_task("coder").await.unwrap().unwrap();
        assert_eq!(claimed.id, blocked);
        assert_eq!(claimed.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn exhausted_retries_transition_to_failed_not_pending() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store.create_task(None, "coder", json!({}), 1).await.unwrap();
        store.claim_ready_task("coder").await.unwrap();

        assert!(store.fail_with_retry(&id, "boom").await.unwrap());
        let after_first = store.get_task(&id).await.unwrap();
        assert_eq!(after_first.status, TaskStatus::Pending);
        assert_eq!(after_first.retry_count, 1);

        store.claim_ready_task("coder").await.unwrap();
        assert!(!store.fail_with_retry(&id, "boom again").await.unwrap());
        let after_second = store.get_task(&id).await.unwrap();
        assert_eq!(after_second.status, TaskStatus::Failed);
    }
}
