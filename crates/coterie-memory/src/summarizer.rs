use coterie_router::Router;
use coterie_store::Store;
use coterie_types::{ChatMessage, TaskTier};

use crate::error::MemoryResult;

const DEFAULT_EVERY_N: i64 = 15;
const DEFAULT_TARGET_COMPRESSION: f64 = 0.33;

/// How often to compact and how hard: `every_n_turns` gates whether
/// `maybe_summarize` runs at all, `target_compression` sets the summary's
/// token budget as a fraction of the source turns' token count. Exposed as
/// a pair (rather than two positional `f64`/`i64` args) since both come
/// from the same `memory.*` configuration block.
#[derive(Debug, Clone, Copy)]
pub struct CompactionPolicy {
    pub every_n_turns: i64,
    pub target_compression: f64,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            every_n_turns: DEFAULT_EVERY_N,
            target_compression: DEFAULT_TARGET_COMPRESSION,
        }
    }
}

/// Checks whether `session_id` has accumulated `policy.every_n_turns`
/// unsummarized turns and, if so, runs compaction immediately and awaits
/// it. Compaction is deliberately not detached into a background task: a
/// caller that asks for the session's context right after this returns
/// must see the freshly-written summary, not a stale one from before
/// compaction started. Returns the compaction text (four `## HEADING`
/// markdown sections) when compaction ran, so the caller can promote it
/// into L2/L3 via `MemoryAssembler::persist_compaction`; `None` means no
/// compaction was due or the model returned nothing usable.
pub async fn maybe_summarize(
    store: &Store,
    router: &Router,
    session_id: &str,
    agent_role: &str,
    policy: CompactionPolicy,
) -> MemoryResult<Option<String>> {
    let count = store.count_unsummarized(session_id).await?;
    if count < policy.every_n_turns {
        return Ok(None);
    }
    let turns = store.get_unsummarized(session_id).await?;
    if turns.is_empty() {
        return Ok(None);
    }

    let turns_text = turns
        .iter()
        .map(|t| format!("[{}]: {}", t.role.as_str(), truncate_chars(&t.content, 500)))
        .collect::<Vec<_>>()
        .join("\n");
    let total_tokens: i64 = turns.iter().map(|t| t.token_count).sum();
    let target_tokens = ((total_tokens as f64) * policy.target_compression).max(50.0) as i64;

    let prompt = format!(
        "You are a memory compressor. Extract key facts, decisions, and action items \
         from the following conversation turns into exactly four markdown sections, \
         in this order, using this heading format and nothing else: \
         \"## KEY FACTS\", \"## USER PREFERENCES\", \"## OPEN TASKS\", \"## CONCLUSIONS\". \
         Leave a section's body empty if it has nothing to report \
         (the heading line still present). Be concise — target {target_tokens} tokens total. \
         Output only the four sections, no preamble.\n\n---\n{turns_text}\n---"
    );

    let response = router
        .complete(agent_role, TaskTier::Fast, &[ChatMessage::user(prompt)], target_tokens.clamp(64, 2048) as u32, 0.2, None)
        .await?;

    if response.content.trim().is_empty() {
        return Ok(None);
    }

    let start_id = turns.iter().map(|t| t.id).min().expect("turns non-empty");
    let end_id = turns.iter().map(|t| t.id).max().expect("turns non-empty");
    store.save_summary(session_id, start_id, end_id, &response.content).await?;
    store.mark_summarized(session_id, start_id, end_id).await?;
    tracing::info!(session_id, turns = turns.len(), "summarized unsummarized turns");
    Ok(Some(response.content))
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}
