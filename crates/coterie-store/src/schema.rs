use rusqlite::Connection;

use crate::error::StoreResult;

pub(crate) fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS turns (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            agent_role TEXT NOT NULL,
            token_count INTEGER NOT NULL DEFAULT 0,
            summarized INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_turns_session ON turns(session_id, id);

        CREATE TABLE IF NOT EXISTS summaries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            start_turn_id INTEGER NOT NULL,
            end_turn_id INTEGER NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_summaries_session ON summaries(session_id, id);

        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            parent_task_id TEXT,
            role TEXT NOT NULL,
            input_json TEXT NOT NULL,
            output_json TEXT,
            status TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(parent_task_id) REFERENCES tasks(id)
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_role_status ON tasks(role, status);

        CREATE TABLE IF NOT EXISTS task_dependencies (
            task_id TEXT NOT NULL,
            depends_on_task_id TEXT NOT NULL,
            PRIMARY KEY(task_id, depends_on_task_id),
            FOREIGN KEY(task_id) REFERENCES tasks(id),
            FOREIGN KEY(depends_on_task_id) REFERENCES tasks(id)
        );

        CREATE TABLE IF NOT EXISTS agent_state (
            role TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            process_id INTEGER,
            last_seen_task_id TEXT,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cost_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_role TEXT NOT NULL,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            input_tokens INTEGER NOT NULL,
            output_tokens INTEGER NOT NULL,
            cost_usd REAL NOT NULL,
            latency_ms INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_cost_records_created ON cost_records(created_at);

        CREATE TABLE IF NOT EXISTS audit_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_role TEXT NOT NULL,
            tool_name TEXT NOT NULL,
            arguments_json TEXT NOT NULL,
            result TEXT NOT NULL,
            detail TEXT,
            created_at TEXT NOT NULL
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS turns_fts USING fts5(
            content, session_id UNINDEXED, turn_id UNINDEXED
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS memory_chunks_fts USING fts5(
            chunk_text, heading UNINDEXED, chunk_id UNINDEXED
        );

        CREATE TABLE IF NOT EXISTS team_insights (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            role TEXT NOT NULL,
            kind TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_team_insights_session ON team_insights(session_id, id);
        ",
    )?;
    Ok(())
}

/// Runs PRAGMA quick_check and refuses to proceed on a hard corruption signal.
/// Mirrors the startup-integrity probe pattern used elsewhere in this codebase,
/// minus the vector-table-specific recovery path this store has no use for.
pub(crate) fn validate_integrity(conn: &Connection) -> StoreResult<()> {
    let check: String = match conn.query_row("PRAGMA quick_check(1)", [], |row| row.get(0)) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!("skipping strict integrity check due to probe error: {err}");
            return Ok(());
        }
    };
    if check.trim().eq_ignore_ascii_case("ok") {
        return Ok(());
    }
    let lowered = check.to_lowercase();
    if lowered.contains("malformed") || lowered.contains("corrupt") {
        return Err(crate::error::StoreError::InvalidState(format!(
            "database failed integrity check: {check}"
        )));
    }
    tracing::warn!("quick_check returned a non-ok, non-fatal status: {check}");
    Ok(())
}
