use coterie_store::TurnRecord;
use coterie_types::{estimate_tokens, ChatMessage, TurnRole as StoreTurnRole};

#[derive(Debug, Clone, Copy)]
pub struct ContextBudget {
    pub max_input_tokens: i64,
    pub context_turns: usize,
}

/// Assembles the message list an agent actually sends to a provider, in
/// fixed priority order (highest first): system prompt, L3 durable memory
/// (<=25% of budget), L2 daily log (<=20%), hybrid-retrieved chunks
/// (<=16%), the latest compaction summary, then as many recent turns as
/// still fit, newest-first until the budget runs out. Earlier slots are
/// never evicted to make room for later ones; a long system prompt simply
/// leaves less room for everything after it.
pub fn build_context(
    system_prompt: &str,
    summaries: &[String],
    short_term: &[TurnRecord],
    budget: ContextBudget,
    daily_log: &str,
    durable_memory: &str,
    retrieved_chunks: &[String],
) -> (Vec<ChatMessage>, usize) {
    let mut remaining = budget.max_input_tokens;
    let mut messages = Vec::new();

    let sys_tokens = estimate_tokens(system_prompt) as i64;
    messages.push(ChatMessage::system(system_prompt));
    remaining -= sys_tokens;

    if !durable_memory.is_empty() && remaining > 200 {
        let l3_budget = remaining / 4;
        let l3_budget = l3_budget.min(estimate_tokens(durable_memory) as i64);
        if l3_budget > 50 {
            let text = trim_to_tokens(&format!("[PERSISTENT MEMORY]\n{durable_memory}"), l3_budget);
            remaining -= estimate_tokens(&text) as i64;
            messages.push(ChatMessage::system(text));
        }
    }

    if !daily_log.is_empty() && remaining > 200 {
        let l2_budget = remaining / 5;
        let l2_budget = l2_budget.min(estimate_tokens(daily_log) as i64);
        if l2_budget > 50 {
            let text = trim_to_tokens(&format!("[DAILY LOG]\n{daily_log}"), l2_budget);
            remaining -= estimate_tokens(&text) as i64;
            messages.push(ChatMessage::system(text));
        }
    }

    if !retrieved_chunks.is_empty() && remaining > 200 {
        let retrieval_budget = remaining / 6;
        let mut used = 0i64;
        let mut parts = Vec::new();
        for chunk in retrieved_chunks {
            let chunk_tokens = estimate_tokens(chunk) as i64;
            if used + chunk_tokens > retrieval_budget {
                break;
            }
            parts.push(chunk.as_str());
            used += chunk_tokens;
        }
        if !parts.is_empty() {
            let text = format!("[RETRIEVED CONTEXT]\n{}", parts.join("\n---\n"));
            messages.push(ChatMessage::system(text));
            remaining -= used;
        }
    }

    if let Some(latest) = summaries.last() {
        if remaining > 150 {
            let text = format!("[MEMORY SUMMARY]\n{latest}");
            let tokens = estimate_tokens(&text) as i64;
            if tokens <= remaining - 150 {
                messages.push(ChatMessage::system(text));
                remaining -= tokens;
            }
        }
    }

    let capped_start = short_term.len().saturating_sub(budget.context_turns);
    let capped = &short_term[capped_start..];
    let mut turn_messages = Vec::new();
    for turn in capped.iter().rev() {
        let turn_tokens = estimate_tokens(&turn.content) as i64;
        if turn_tokens > remaining {
            break;
        }
        turn_messages.insert(0, to_chat_message(turn));
        remaining -= turn_tokens;
    }
    messages.extend(turn_messages);

    let used_total = (budget.max_input_tokens - remaining) as usize;
    (messages, used_total)
}

fn to_chat_message(turn: &TurnRecord) -> ChatMessage {
    match turn.role {
        StoreTurnRole::User => ChatMessage::user(turn.content.clone()),
        StoreTurnRole::Assistant => ChatMessage::assistant(turn.content.clone()),
        StoreTurnRole::Tool => ChatMessage::tool(turn.content.clone()),
        StoreTurnRole::System => ChatMessage::system(turn.content.clone()),
    }
}

fn trim_to_tokens(text: &str, max_tokens: i64) -> String {
    let max_chars = (max_tokens * 4) as usize;
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars.saturating_sub(15)).collect();
    format!("{truncated}\n[...truncated]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turn(content: &str) -> TurnRecord {
        TurnRecord {
            id: 1,
            session_id: "s".to_string(),
            role: StoreTurnRole::User,
            content: content.to_string(),
            agent_role: "ceo".to_string(),
            token_count: estimate_tokens(content) as i64,
            summarized: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn system_prompt_always_present_even_under_tight_budget() {
        let (messages, _) = build_context("you are the CEO", &[], &[], ContextBudget { max_input_tokens: 10, context_turns: 5 }, "", "", &[]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "you are the CEO");
    }

    #[test]
    fn fills_recent_turns_newest_first_until_budget_exhausted() {
        let turns = vec![turn("alpha"), turn("beta"), turn("gamma")];
        let (messages, _) = build_context(
            "sys",
            &[],
            &turns,
            ContextBudget { max_input_tokens: 1000, context_turns: 5 },
            "",
            "",
            &[],
        );
        let contents: Vec<_> = messages.iter().skip(1).map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn durable_memory_never_exceeds_a_quarter_of_budget() {
        let long_memory = "x".repeat(4000);
        let (messages, used) = build_context(
            "sys",
            &[],
            &[],
            ContextBudget { max_input_tokens: 400, context_turns: 5 },
            "",
            &long_memory,
            &[],
        );
        assert!(messages.iter().any(|m| m.content.contains("PERSISTENT MEMORY")));
        assert!(used <= 400);
    }
}
