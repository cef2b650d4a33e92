use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::error::StoreResult;
use crate::types::{TurnRecord, TurnRole};
use crate::Store;

impl Store {
    pub fn make_session_id(&self, platform: &str, user: &str, context: &str) -> String {
        make_session_id(platform, user, context)
    }

    /// Appends a turn. Turns are never deleted; `summarized` starts `false`.
    pub async fn push_turn(
        &self,
        session_id: &str,
        role: TurnRole,
        content: &str,
        agent_role: &str,
        token_count: i64,
    ) -> StoreResult<i64> {
        let conn = self.conn.lock().await;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO turns (session_id, role, content, agent_role, token_count, summarized, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![session_id, role.as_str(), content, agent_role, token_count, now.to_rfc3339()],
        )?;
        let turn_id = conn.last_insert_rowid();
        // Kept alongside `turns` rather than as an FTS5 content-table, so a
        // search never needs to rejoin back to the row it was indexed from.
        conn.execute(
            "INSERT INTO turns_fts (content, session_id, turn_id) VALUES (?1, ?2, ?3)",
            params![content, session_id, turn_id],
        )?;
        Ok(turn_id)
    }

    /// Last `limit` turns for a session, in ascending (chronological) id order.
    /// Used both to answer `get_context` directly and, after a process
    /// restart, to rehydrate the in-memory short-term ring (`rebuild_short_term`).
    pub async fn get_context(&self, session_id: &str, limit: i64) -> StoreResult<Vec<TurnRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, agent_role, token_count, summarized, created_at
             FROM turns WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let mut rows: Vec<TurnRecord> = stmt
            .query_map(params![session_id, limit], row_to_turn)?
            .collect::<Result<_, _>>()?;
        rows.reverse();
        Ok(rows)
    }

    pub async fn rebuild_short_term(&self, session_id: &str, limit: i64) -> StoreResult<Vec<TurnRecord>> {
        self.get_context(session_id, limit).await
    }

    pub async fn count_unsummarized(&self, session_id: &str) -> StoreResult<i64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM turns WHERE session_id = ?1 AND summarized = 0",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub async fn get_unsummarized(&self, session_id: &str) -> StoreResult<Vec<TurnRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, agent_role, token_count, summarized, created_at
             FROM turns WHERE session_id = ?1 AND summarized = 0 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id], row_to_turn)?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    /// Marks every turn in `[start_id, end_id]` as summarized. Only ever
    /// transitions false -> true; never called in reverse.
    pub async fn mark_summarized(&self, session_id: &str, start_id: i64, end_id: i64) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE turns SET summarized = 1 WHERE session_id = ?1 AND id BETWEEN ?2 AND ?3",
            params![session_id, start_id, end_id],
        )?;
        Ok(())
    }

    /// Most recent session id used by a given (platform, user) pair, or
    /// `None` if that user has never connected before. Lets a returning user
    /// reconnect to the same session across process restarts.
    pub async fn find_latest_session(&self, platform_user_prefix: &str) -> StoreResult<Option<String>> {
        let conn = self.conn.lock().await;
        let like = format!("{platform_user_prefix}:%");
        conn.query_row(
            "SELECT session_id FROM turns WHERE session_id = ?1 OR session_id LIKE ?2
             ORDER BY id DESC LIMIT 1",
            params![platform_user_prefix, like],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }
}

fn row_to_turn(row: &rusqlite::Row) -> rusqlite::Result<TurnRecord> {
    let created_at: String = row.get(7)?;
    Ok(TurnRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: TurnRole::parse(&row.get::<_, String>(2)?),
        content: row.get(3)?,
        agent_role: row.get(4)?,
        token_count: row.get(5)?,
        summarized: row.get::<_, i64>(6)? != 0,
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
    })
}

/// `(platform, user, context)` joined with colons, per the session identity
/// rule in the data model.
pub fn make_session_id(platform: &str, user: &str, context: &str) -> String {
    format!("{platform}:{user}:{context}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    #[tokio::test]
    async fn push_then_get_context_round_trips_order_and_content() {
        let store = Store::open_in_memory().await.unwrap();
        let session = make_session_id("cli", "alice", "default");
        for i in 0..5 {
            store
                .push_turn(&session, TurnRole::User, &format!("msg {i}"), "ceo", 3)
                .await
                .unwrap();
        }
        let turns = store.get_context(&session, 3).await.unwrap();
        let contents: Vec<_> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 2", "msg 3", "msg 4"]);
        assert!(turns.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn mark_summarized_only_moves_forward() {
        let store = Store::open_in_memory().await.unwrap();
        let session = make_session_id("cli", "bob", "default");
        let id = store.push_turn(&session, TurnRole::User, "hi", "ceo", 1).await.unwrap();
        assert_eq!(store.count_unsummarized(&session).await.unwrap(), 1);
        store.mark_summarized(&session, id, id).await.unwrap();
        assert_eq!(store.count_unsummarized(&session).await.unwrap(), 0);
    }
}
