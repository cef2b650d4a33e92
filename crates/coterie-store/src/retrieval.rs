use rusqlite::params;

use crate::error::StoreResult;
use crate::Store;

/// One FTS5 hit against `turns_fts`: the raw BM25 score (lower is more
/// relevant, SQLite convention) plus enough context to rerank by recency.
#[derive(Debug, Clone)]
pub struct TurnHit {
    pub turn_id: i64,
    pub content: String,
    pub bm25_score: f64,
}

impl Store {
    /// BM25 search over a single session's turns. Returns `limit` hits
    /// ordered by relevance (best first); the caller is expected to apply
    /// its own recency re-ranking on top, since a bare BM25 ordering
    /// over-favors rare-term matches from long ago.
    pub async fn search_turns_fts(&self, session_id: &str, query: &str, limit: i64) -> StoreResult<Vec<TurnHit>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT turn_id, content, bm25(turns_fts) FROM turns_fts
             WHERE turns_fts MATCH ?1 AND session_id = ?2
             ORDER BY bm25(turns_fts) LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![query, session_id, limit], |row| {
                Ok(TurnHit {
                    turn_id: row.get(0)?,
                    content: row.get(1)?,
                    bm25_score: row.get(2)?,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    /// Plain substring fallback for environments where the bundled SQLite
    /// build can't run the MATCH query (kept deliberately dumb: it exists
    /// only so retrieval degrades instead of failing outright).
    pub async fn search_turns_like(&self, session_id: &str, terms: &[String], limit: i64) -> StoreResult<Vec<TurnHit>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().await;
        let conditions = terms.iter().map(|_| "content LIKE ?").collect::<Vec<_>>().join(" AND ");
        let sql = format!(
            "SELECT id, content FROM turns WHERE ({conditions}) AND session_id = ? ORDER BY id DESC LIMIT ?"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut param_values: Vec<Box<dyn rusqlite::ToSql>> = terms
            .iter()
            .map(|t| Box::new(format!("%{t}%")) as Box<dyn rusqlite::ToSql>)
            .collect();
        param_values.push(Box::new(session_id.to_string()));
        param_values.push(Box::new(limit));
        let param_refs: Vec<&dyn rusqlite::ToSql> = param_values.iter().map(|b| b.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                Ok(TurnHit {
                    turn_id: row.get(0)?,
                    content: row.get(1)?,
                    bm25_score: 0.0,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    /// Inserts a markdown chunk into `memory_chunks_fts` unless a chunk with
    /// the same content-derived id already exists. Returns whether it was
    /// newly indexed, so a full reindex can report how many chunks changed.
    pub async fn insert_chunk_if_new(&self, chunk_id: &str, heading: &str, chunk_text: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().await;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM memory_chunks_fts WHERE chunk_id = ?1",
                params![chunk_id],
                |row| row.get(0),
            )
            .optional_or_none()?;
        if exists.is_some() {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO memory_chunks_fts (chunk_text, heading, chunk_id) VALUES (?1, ?2, ?3)",
            params![chunk_text, heading, chunk_id],
        )?;
        Ok(true)
    }

    pub async fn search_chunks_fts(&self, query: &str, limit: i64) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT chunk_text FROM memory_chunks_fts
             WHERE memory_chunks_fts MATCH ?1 ORDER BY bm25(memory_chunks_fts) LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![query, limit], |row| row.get::<_, String>(0))?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }
}

trait OptionalOrNone<T> {
    fn optional_or_none(self) -> rusqlite::Result<Option<T>>;
}

impl<T> OptionalOrNone<T> for rusqlite::Result<T> {
    fn optional_or_none(self) -> rusqlite::Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TurnRole;

    #[tokio::test]
    async fn fts_search_finds_matching_turn_in_session() {
        let store = Store::open_in_memory().await.unwrap();
        let session = "cli:alice:default";
        store.push_turn(session, TurnRole::User, "the deployment uses kubernetes", "ceo", 5).await.unwrap();
        store.push_turn(session, TurnRole::User, "unrelated weather chat", "ceo", 3).await.unwrap();

        let hits = store.search_turns_fts(session, "kubernetes", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("kubernetes"));
    }

    #[tokio::test]
    async fn chunk_insert_is_idempotent_by_chunk_id() {
        let store = Store::open_in_memory().await.unwrap();
        let inserted_first = store.insert_chunk_if_new("abc123", "Key Facts", "some fact").await.unwrap();
        let inserted_second = store.insert_chunk_if_new("abc123", "Key Facts", "some fact").await.unwrap();
        assert!(inserted_first);
        assert!(!inserted_second);
    }
}
