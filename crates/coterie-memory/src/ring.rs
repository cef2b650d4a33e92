use std::collections::VecDeque;

use coterie_store::{Store, TurnRecord};

use crate::error::MemoryResult;

/// L1 short-term memory: the most recent turns of a session, held in
/// process memory so the hot path of an agent loop never touches the
/// database to build its own context window. Rehydrated from the store at
/// startup (or after a crash) since the store, not the ring, is the
/// durable source of truth for a session's conversation.
pub struct ShortTermRing {
    session_id: String,
    capacity: usize,
    turns: VecDeque<TurnRecord>,
}

impl ShortTermRing {
    pub fn new(session_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            session_id: session_id.into(),
            capacity,
            turns: VecDeque::with_capacity(capacity),
        }
    }

    /// Loads the last `capacity` turns for this session from the store.
    /// Safe to call again after a restart; it always reflects the store's
    /// current tail rather than accumulating duplicates.
    pub async fn rehydrate(&mut self, store: &Store) -> MemoryResult<()> {
        let turns = store.rebuild_short_term(&self.session_id, self.capacity as i64).await?;
        self.turns = VecDeque::from(turns);
        Ok(())
    }

    pub fn push(&mut self, turn: TurnRecord) {
        self.turns.push_back(turn);
        while self.turns.len() > self.capacity {
            self.turns.pop_front();
        }
    }

    pub fn turns(&self) -> &VecDeque<TurnRecord> {
        &self.turns
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coterie_store::TurnRole;

    #[tokio::test]
    async fn rehydrate_loads_tail_and_caps_local_pushes() {
        let store = Store::open_in_memory().await.unwrap();
        let session = "cli:alice:default";
        for i in 0..5 {
            store.push_turn(session, TurnRole::User, &format!("m{i}"), "ceo", 2).await.unwrap();
        }
        let mut ring = ShortTermRing::new(session, 3);
        ring.rehydrate(&store).await.unwrap();
        assert_eq!(ring.turns().len(), 3);
        assert_eq!(ring.turns()[0].content, "m2");

        for i in 0..10 {
            ring.push(TurnRecord {
                id: 100 + i,
                session_id: session.to_string(),
                role: TurnRole::User,
                content: format!("local{i}"),
                agent_role: "ceo".to_string(),
                token_count: 1,
                summarized: false,
                created_at: chrono::Utc::now(),
            });
        }
        assert_eq!(ring.turns().len(), 3);
    }
}
