use coterie_store::Store;

use crate::error::MemoryResult;

pub struct TurnRetrievalHit {
    pub content: String,
    pub score: f64,
}

pub struct RetrievedContext {
    pub turns: Vec<TurnRetrievalHit>,
    pub memory_chunks: Vec<String>,
}

/// BM25 search over a session's turns, reranked by recency, with a plain
/// LIKE fallback when the FTS5 query itself fails (e.g. a malformed query
/// string tripping MATCH syntax). Never fails outright: a retrieval miss is
/// not a reason to abort the caller's request for context.
pub struct HybridRetriever<'a> {
    store: &'a Store,
}

impl<'a> HybridRetriever<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub async fn search(&self, query: &str, session_id: &str, top_k: usize) -> Vec<TurnRetrievalHit> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        let sanitized = sanitize_query(query);
        match self.store.search_turns_fts(session_id, &sanitized, (top_k * 3) as i64).await {
            Ok(hits) if !hits.is_empty() => rerank_by_recency(hits, top_k),
            Ok(_) => Vec::new(),
            Err(err) => {
                tracing::warn!("turns_fts search failed, falling back to LIKE: {err}");
                self.fallback_like(query, session_id, top_k).await
            }
        }
    }

    pub async fn search_durable_memory(&self, query: &str, top_k: usize) -> MemoryResult<Vec<String>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let sanitized = sanitize_query(query);
        match self.store.search_chunks_fts(&sanitized, top_k as i64).await {
            Ok(hits) => Ok(hits),
            Err(err) => {
                tracing::warn!("memory_chunks_fts search failed: {err}");
                Ok(Vec::new())
            }
        }
    }

    pub async fn search_all_context(
        &self,
        query: &str,
        session_id: &str,
        turns_top_k: usize,
        memory_top_k: usize,
    ) -> RetrievedContext {
        let turns = self.search(query, session_id, turns_top_k).await;
        let memory_chunks = self.search_durable_memory(query, memory_top_k).await.unwrap_or_default();
        RetrievedContext { turns, memory_chunks }
    }

    async fn fallback_like(&self, query: &str, session_id: &str, top_k: usize) -> Vec<TurnRetrievalHit> {
        let terms: Vec<String> = query.split_whitespace().take(3).map(str::to_string).collect();
        match self.store.search_turns_like(session_id, &terms, top_k as i64).await {
            Ok(hits) => hits
                .into_iter()
                .map(|h| TurnRetrievalHit { content: h.content, score: 0.5 })
                .collect(),
            Err(err) => {
                tracing::warn!("LIKE fallback search also failed: {err}");
                Vec::new()
            }
        }
    }
}

/// FTS5's MATCH syntax treats quotes, colons, and hyphens specially; strip
/// anything that isn't alphanumeric/whitespace and AND the remaining terms
/// together (at most 10) as quoted phrases, so a query never accidentally
/// becomes an OR search or a syntax error.
fn sanitize_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    let words: Vec<&str> = cleaned.split_whitespace().take(10).collect();
    if words.is_empty() {
        return "\"\"".to_string();
    }
    words.iter().map(|w| format!("\"{w}\"")).collect::<Vec<_>>().join(" ")
}

/// BM25 scores from SQLite are negative and lower-is-better; this
/// normalizes them to 0..1 (higher-is-better) and blends 70% relevance with
/// 30% recency, where recency is approximated by the FTS query's own
/// already-relevance-ordered position.
fn rerank_by_recency(hits: Vec<coterie_store::TurnHit>, top_k: usize) -> Vec<TurnRetrievalHit> {
    if hits.is_empty() {
        return Vec::new();
    }
    let scores: Vec<f64> = hits.iter().map(|h| h.bm25_score).collect();
    let min_s = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_s = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = if (max_s - min_s).abs() > f64::EPSILON { max_s - min_s } else { 1.0 };
    let len = hits.len();

    let mut scored: Vec<TurnRetrievalHit> = hits
        .into_iter()
        .enumerate()
        .map(|(i, hit)| {
            let bm25_norm = (hit.bm25_score - min_s) / range;
            let relevance = 1.0 - bm25_norm;
            let recency = 1.0 - (i as f64 / (len.saturating_sub(1)).max(1) as f64);
            TurnRetrievalHit { content: hit.content, score: relevance * 0.7 + recency * 0.3 }
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use coterie_store::TurnRole;

    #[tokio::test]
    async fn search_finds_relevant_turn_over_unrelated_ones() {
        let store = Store::open_in_memory().await.unwrap();
        let session = "cli:alice:default";
        store.push_turn(session, TurnRole::User, "we decided on postgres for storage", "ceo", 6).await.unwrap();
        store.push_turn(session, TurnRole::User, "what's the weather like", "ceo", 4).await.unwrap();

        let retriever = HybridRetriever::new(&store);
        let hits = retriever.search("postgres storage", session, 3).await;
        assert!(!hits.is_empty());
        assert!(hits[0].content.contains("postgres"));
    }

    #[tokio::test]
    async fn empty_query_returns_no_hits() {
        let store = Store::open_in_memory().await.unwrap();
        let retriever = HybridRetriever::new(&store);
        let hits = retriever.search("   ", "cli:a:default", 3).await;
        assert!(hits.is_empty());
    }
}
