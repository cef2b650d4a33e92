//! Hierarchical memory: an in-process L1 ring of recent turns, an L2 daily
//! markdown log, an L3 durable `MEMORY.md`, SQLite-backed hybrid retrieval
//! over both, and a token-budgeted assembler that turns all four into the
//! message list an agent actually sends to a provider.

pub mod chunker;
pub mod context;
pub mod daily_log;
pub mod durable;
mod error;
pub mod retriever;
pub mod ring;
pub mod summarizer;

pub use context::ContextBudget;
pub use error::{MemoryError, MemoryResult};
pub use retriever::{HybridRetriever, RetrievedContext, TurnRetrievalHit};
pub use ring::ShortTermRing;
pub use summarizer::CompactionPolicy;

use std::path::{Path, PathBuf};

use coterie_router::Router;
use coterie_store::Store;
use coterie_types::ChatMessage;

/// Coordinates all four memory tiers for one workspace. One instance is
/// shared across a session's turns; `ring` is the only piece of state that
/// isn't simply re-read from disk or the store on every call.
pub struct MemoryAssembler {
    store: Store,
    workspace: PathBuf,
    ring: ShortTermRing,
}

impl MemoryAssembler {
    pub async fn new(store: Store, workspace: impl Into<PathBuf>, session_id: impl Into<String>, ring_capacity: usize) -> MemoryResult<Self> {
        let workspace = workspace.into();
        let mut ring = ShortTermRing::new(session_id, ring_capacity);
        ring.rehydrate(&store).await?;
        Ok(Self { store, workspace, ring })
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn ring(&self) -> &ShortTermRing {
        &self.ring
    }

    pub fn session_id(&self) -> &str {
        self.ring.session_id()
    }

    /// Persists a turn to the store and mirrors it into the in-memory ring.
    pub async fn record_turn(
        &mut self,
        role: coterie_store::TurnRole,
        content: &str,
        agent_role: &str,
    ) -> MemoryResult<i64> {
        let token_count = coterie_types::estimate_tokens(content) as i64;
        let turn_id = self.store.push_turn(self.ring.session_id(), role, content, agent_role, token_count).await?;
        self.ring.rehydrate(&self.store).await?;
        Ok(turn_id)
    }

    /// Runs compaction if due, then assembles the full context message
    /// list for `system_prompt` against `query` (used for retrieval). The
    /// third element of the returned tuple carries this call's freshly
    /// produced compaction text, if any — pass it straight to
    /// `persist_compaction` to promote it into L2/L3.
    pub async fn assemble_context(
        &self,
        system_prompt: &str,
        query: &str,
        router: &Router,
        agent_role: &str,
        budget: ContextBudget,
        compaction: CompactionPolicy,
    ) -> MemoryResult<(Vec<ChatMessage>, usize, Option<String>)> {
        let fresh_compaction = summarizer::maybe_summarize(&self.store, router, self.session_id(), agent_role, compaction).await?;

        let summaries = self
            .store
            .load_latest_summaries(self.session_id(), 3)
            .await?
            .into_iter()
            .rev()
            .map(|s| s.content)
            .collect::<Vec<_>>();

        let daily_log = daily_log::load_recent_daily_logs(&self.workspace, 2)?;
        let durable_memory = durable::load_durable_memory(&self.workspace)?;

        let retriever = HybridRetriever::new(&self.store);
        let retrieved = retriever.search_all_context(query, self.session_id(), 5, 3).await;
        let chunk_texts: Vec<String> = retrieved.memory_chunks;

        let turns: Vec<_> = self.ring.turns().iter().cloned().collect();
        let (messages, used) = context::build_context(system_prompt, &summaries, &turns, budget, &daily_log, &durable_memory, &chunk_texts);
        Ok((messages, used, fresh_compaction))
    }

    /// Writes a compaction result into L2 and L3, and reindexes L3 for
    /// retrieval. Called after `assemble_context`'s compaction step
    /// produces a summary worth promoting beyond the session.
    pub async fn persist_compaction(&self, heading: &str, content: &str) -> MemoryResult<()> {
        daily_log::append_to_daily_log(&self.workspace, heading, content)?;
        let changed = durable::merge_compaction_result(&self.workspace, content)?;
        if changed.values().any(|v| *v) {
            let full_text = durable::load_durable_memory(&self.workspace)?;
            let new_chunks = chunker::index_markdown(&self.store, &full_text).await?;
            tracing::info!(heading, new_chunks, "reindexed durable memory after compaction");
        }
        Ok(())
    }
}
