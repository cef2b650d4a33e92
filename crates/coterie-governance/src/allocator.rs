//! Financial allocator: a keyword/length rule engine, no model call, that
//! decides a delegation's task tier and token ceiling and can veto it on
//! budget grounds. Grounded on `original_source/multiclaws/roles/cfo.py`.

use std::collections::HashMap;

use coterie_store::Store;
use coterie_types::TaskTier;

use crate::error::GovernanceResult;

const COMPLEX_SIGNALS: &[&str] = &[
    "architect", "design", "debug", "refactor", "analyze", "implement",
    "optimize", "explain", "compare", "evaluate", "write code", "build",
    "system", "algorithm", "pipeline", "integration", "security",
    "investigate", "multi-step", "plan",
];

const FAST_SIGNALS: &[&str] = &[
    "summarize", "translate", "bullet", "list", "quick", "brief",
    "format", "convert", "rename", "fix typo", "spell", "grammar",
    "what is", "define", "status",
];

fn cost_per_1k(tier: TaskTier) -> f64 {
    match tier {
        TaskTier::Complex => 0.003,
        TaskTier::Simple => 0.0003,
        TaskTier::Fast => 0.0001,
    }
}

#[derive(Debug, Clone)]
pub struct AllocatorDecision {
    pub task_type: TaskTier,
    pub max_tokens: u32,
    pub approved: bool,
    pub reason: String,
    pub projected_cost_usd: f64,
}

#[derive(Debug, Clone)]
pub struct FinancialAllocator {
    /// Per-role output token ceiling before the tier multiplier is applied.
    role_budgets: HashMap<String, u32>,
    daily_limit_usd: f64,
}

impl FinancialAllocator {
    pub fn new(daily_limit_usd: f64) -> Self {
        let mut role_budgets = HashMap::new();
        role_budgets.insert("ceo".to_string(), 4096);
        role_budgets.insert("researcher".to_string(), 2048);
        role_budgets.insert("coder".to_string(), 4096);
        role_budgets.insert("communicator".to_string(), 1024);
        Self { role_budgets, daily_limit_usd }
    }

    pub fn set_role_budget(&mut self, role: impl Into<String>, max_output_tokens: u32) {
        self.role_budgets.insert(role.into(), max_output_tokens);
    }

    fn role_budget(&self, role: &str) -> u32 {
        self.role_budgets.get(role).copied().unwrap_or(2048)
    }

    fn classify(&self, task_text: &str) -> TaskTier {
        let lower = task_text.to_lowercase();
        let complex_hits = COMPLEX_SIGNALS.iter().filter(|kw| lower.contains(*kw)).count();
        let fast_hits = FAST_SIGNALS.iter().filter(|kw| lower.contains(*kw)).count();

        if complex_hits >= 2 || task_text.len() > 400 {
            TaskTier::Complex
        } else if fast_hits >= 1 && complex_hits == 0 {
            TaskTier::Fast
        } else if task_text.len() < 80 {
            TaskTier::Fast
        } else {
            TaskTier::Simple
        }
    }

    fn token_alloc(&self, tier: TaskTier, role: &str) -> u32 {
        let base = self.role_budget(role) as f64;
        ((base * tier.token_scale()) as u32).max(256)
    }

    fn project_cost(&self, tier: TaskTier, max_tokens: u32) -> f64 {
        cost_per_1k(tier) * max_tokens as f64 / 1000.0
    }

    /// Classifies `task_text`, allocates a token ceiling scaled by `role`'s
    /// budget, and checks the projection against the remaining daily
    /// budget. A projection over budget tries one downgrade before vetoing.
    pub async fn allocate(&self, store: &Store, task_text: &str, role: &str) -> GovernanceResult<AllocatorDecision> {
        let task_type = self.classify(task_text);
        let max_tokens = self.token_alloc(task_type, role);
        let projected = self.project_cost(task_type, max_tokens);

        let daily_used = store.get_daily_cost().await?;
        let remaining = self.daily_limit_usd - daily_used;

        if projected > remaining {
            if let Some(downgraded) = task_type.downgrade() {
                let projected_down = self.project_cost(downgraded, max_tokens);
                if projected_down <= remaining {
                    return Ok(AllocatorDecision {
                        task_type: downgraded,
                        max_tokens,
                        approved: true,
                        reason: format!(
                            "downgraded {task_type:?}->{downgraded:?}: ${projected_down:.5} fits remaining ${remaining:.4}"
                        ),
                        projected_cost_usd: projected_down,
                    });
                }
            }
            return Ok(AllocatorDecision {
                task_type,
                max_tokens,
                approved: false,
                reason: format!(
                    "budget veto: projected ${projected:.5} > remaining ${remaining:.4} (daily ${:.2})",
                    self.daily_limit_usd
                ),
                projected_cost_usd: projected,
            });
        }

        Ok(AllocatorDecision {
            task_type,
            max_tokens,
            approved: true,
            reason: format!(
                "approved {task_type:?} (${projected:.5}, ${daily_used:.4}/${:.2} used)",
                self.daily_limit_usd
            ),
            projected_cost_usd: projected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn short_status_check_classifies_fast() {
        let store = Store::open_in_memory().await.unwrap();
        let allocator = FinancialAllocator::new(10.0);
        let decision = allocator.allocate(&store, "what is the status", "ceo").await.unwrap();
        assert_eq!(decision.task_type, TaskTier::Fast);
        assert!(decision.approved);
    }

    #[tokio::test]
    async fn multi_signal_architecture_task_classifies_complex() {
        let store = Store::open_in_memory().await.unwrap();
        let allocator = FinancialAllocator::new(10.0);
        let decision = allocator
            .allocate(&store, "architect and design the new pipeline integration", "coder")
            .await
            .unwrap();
        assert_eq!(decision.task_type, TaskTier::Complex);
    }

    #[tokio::test]
    async fn exhausted_budget_downgrades_before_vetoing() {
        let store = Store::open_in_memory().await.unwrap();
        store.log_cost("ceo", "anthropic", "m", 0, 0, 9.999, 10).await.unwrap();
        let allocator = FinancialAllocator::new(10.0);
        let decision = allocator
            .allocate(&store, "architect and design the new pipeline integration", "coder")
            .await
            .unwrap();
        assert!(decision.task_type != TaskTier::Complex || !decision.approved);
    }
}
