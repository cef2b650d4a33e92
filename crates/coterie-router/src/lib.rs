//! Scores and ranks the registered LLM providers for a requested task tier,
//! dispatches to the top-ranked candidates with fallback on failure, and
//! enforces the configured daily budget.

mod error;

pub use error::{RouterError, RouterResult};

use std::collections::HashMap;
use std::sync::Arc;

use coterie_providers::{CompletionResponse, Provider};
use coterie_store::Store;
use coterie_types::{ChatMessage, TaskTier};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// How many candidates must fail before quota erosion touches a provider
/// hard enough to change its ranking for the next call.
const QUOTA_PENALTY: f64 = 0.3;
const MAX_FALLBACK_CANDIDATES: usize = 3;

/// A provider plus the router-level configuration that decides when it is
/// picked: its static priority weight, the model it should use for each
/// task tier, and a quota that erodes on failure and recovers over time.
pub struct ProviderRegistration {
    pub provider: Arc<dyn Provider>,
    pub priority: f64,
    pub models_by_tier: HashMap<TaskTier, String>,
}

struct RoutedProvider {
    provider: Arc<dyn Provider>,
    priority: f64,
    models_by_tier: HashMap<TaskTier, String>,
    quota_remaining: Mutex<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct BudgetConfig {
    pub daily_budget_usd: f64,
    pub alert_threshold_percent: f64,
}

pub struct Router {
    providers: Vec<RoutedProvider>,
    store: Store,
    budget: BudgetConfig,
}

struct Candidate<'a> {
    index: usize,
    score: f64,
    provider: &'a RoutedProvider,
    model: String,
}

impl Router {
    pub fn new(registrations: Vec<ProviderRegistration>, store: Store, budget: BudgetConfig) -> Self {
        let providers = registrations
            .into_iter()
            .map(|r| RoutedProvider {
                provider: r.provider,
                priority: r.priority,
                models_by_tier: r.models_by_tier,
                quota_remaining: Mutex::new(1.0),
            })
            .collect();
        Self { providers, store, budget }
    }

    /// `score = 0.3*priority + 0.3*(1 - normalized_cost) + 0.2*(1 - normalized_latency)
    /// + 0.2*quota_remaining`, normalized against the other enabled candidates for
    /// this tier so a single expensive outlier doesn't flatten every score to zero.
    async fn rank_candidates(&self, tier: TaskTier) -> Vec<Candidate<'_>> {
        let mut entries = Vec::new();
        for (index, routed) in self.providers.iter().enumerate() {
            if !routed.provider.is_enabled() {
                continue;
            }
            let Some(model) = routed.models_by_tier.get(&tier) else {
                continue;
            };
            let pricing = routed.provider.cost_per_1k(model);
            let cost = pricing.input_per_1k + pricing.output_per_1k;
            let latency = routed.provider.average_latency_ms();
            entries.push((index, routed, model.clone(), cost, latency));
        }

        let max_cost = entries.iter().map(|(_, _, _, c, _)| *c).fold(0.0_f64, f64::max);
        let max_latency = entries.iter().map(|(_, _, _, _, l)| *l).fold(0.0_f64, f64::max);

        let mut candidates = Vec::with_capacity(entries.len());
        for (index, routed, model, cost, latency) in entries {
            let normalized_cost = if max_cost > 0.0 { cost / max_cost } else { 0.0 };
            let normalized_latency = if max_latency > 0.0 { latency / max_latency } else { 0.0 };
            let quota_remaining = *routed.quota_remaining.lock().await;
            let score = 0.3 * routed.priority
                + 0.3 * (1.0 - normalized_cost)
                + 0.2 * (1.0 - normalized_latency)
                + 0.2 * quota_remaining;
            candidates.push(Candidate { index, score, provider: routed, model });
        }

        // Stable sort: equal scores keep registration order as the tie-break.
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates
    }

    /// Dispatches a completion request for `tier`, trying up to three ranked
    /// candidates (or exactly the named provider, if `override_provider` is
    /// set) until one succeeds. Refuses to start a call once the daily
    /// budget is already spent, and stops returning successes (even a
    /// successful one) the moment a completed call pushes the daily total
    /// over budget, so the caller never sees a response produced beyond
    /// what they're allowed to spend in a day.
    pub async fn complete(
        &self,
        agent_role: &str,
        tier: TaskTier,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
        override_provider: Option<&str>,
    ) -> RouterResult<CompletionResponse> {
        let spent = self.store.get_daily_cost().await?;
        if spent >= self.budget.daily_budget_usd {
            return Err(RouterError::BudgetExhausted {
                spent,
                budget: self.budget.daily_budget_usd,
            });
        }

        let ranked = self.rank_candidates(tier).await;
        let candidates: Vec<&Candidate> = if let Some(name) = override_provider {
            ranked.iter().filter(|c| c.provider.provider.name() == name).collect()
        } else {
            ranked.iter().take(MAX_FALLBACK_CANDIDATES).collect()
        };

        if candidates.is_empty() {
            return Err(RouterError::NoProviders(tier));
        }

        let mut last_error = String::new();
        for candidate in candidates {
            let routed = candidate.provider;
            match routed
                .provider
                .complete(messages, &candidate.model, max_tokens, temperature)
                .await
            {
                Ok(response) => {
                    self.store
                        .log_cost(
                            agent_role,
                            response.provider.as_str(),
                            response.model.as_str(),
                            response.input_tokens as i64,
                            response.output_tokens as i64,
                            response.cost_usd,
                            response.latency_ms as i64,
                        )
                        .await?;

                    let after = self.store.get_daily_cost().await?;
                    let alert_line = self.budget.alert_threshold_percent * self.budget.daily_budget_usd;
                    if after >= alert_line {
                        warn!(
                            target: "coterie.router",
                            daily_cost = after,
                            daily_budget = self.budget.daily_budget_usd,
                            "daily spend crossed alert threshold"
                        );
                    }
                    if after >= self.budget.daily_budget_usd {
                        return Err(RouterError::BudgetExhausted {
                            spent: after,
                            budget: self.budget.daily_budget_usd,
                        });
                    }

                    info!(
                        target: "coterie.router",
                        provider = response.provider.as_str(),
                        model = response.model.as_str(),
                        tier = ?tier,
                        "completion routed"
                    );
                    return Ok(response);
                }
                Err(err) => {
                    last_error = err.to_string();
                    let mut quota = routed.quota_remaining.lock().await;
                    *quota = (*quota - QUOTA_PENALTY).max(0.0);
                    warn!(
                        target: "coterie.router",
                        provider = routed.provider.name(),
                        error = %last_error,
                        "provider call failed, falling back"
                    );
                }
            }
        }

        Err(RouterError::ProviderExhausted { tier, detail: last_error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use coterie_providers::{Pricing, ProviderError, ProviderResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvider {
        id: String,
        enabled: bool,
        fail_calls: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn name(&self) -> &str {
            &self.id
        }
        fn models(&self) -> &[String] {
            &[]
        }
        fn is_enabled(&self) -> bool {
            self.enabled
        }
        fn cost_per_1k(&self, _model: &str) -> Pricing {
            Pricing { input_per_1k: 0.01, output_per_1k: 0.01 }
        }
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            model: &str,
            _max_tokens: u32,
            _temperature: f32,
        ) -> ProviderResult<CompletionResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_calls {
                return Err(ProviderError::EmptyResponse(self.id.clone()));
            }
            Ok(CompletionResponse {
                content: "ok".to_string(),
                input_tokens: 10,
                output_tokens: 10,
                cost_usd: 0.01,
                latency_ms: 5,
                model: model.to_string(),
                provider: self.id.clone(),
            })
        }
        fn average_latency_ms(&self) -> f64 {
            5.0
        }
        fn record_latency(&self, _ms: u64) {}
    }

    fn tier_map(model: &str) -> HashMap<TaskTier, String> {
        let mut m = HashMap::new();
        m.insert(TaskTier::Complex, model.to_string());
        m.insert(TaskTier::Simple, model.to_string());
        m.insert(TaskTier::Fast, model.to_string());
        m
    }

    async fn router_with(registrations: Vec<ProviderRegistration>, budget: f64) -> Router {
        let store = Store::open_in_memory().await.unwrap();
        Router::new(
            registrations,
            store,
            BudgetConfig { daily_budget_usd: budget, alert_threshold_percent: 0.8 },
        )
    }

    #[tokio::test]
    async fn falls_back_to_second_provider_on_first_failure() {
        let primary = Arc::new(FakeProvider {
            id: "primary".to_string(),
            enabled: true,
            fail_calls: 1,
            calls: AtomicUsize::new(0),
        });
        let backup = Arc::new(FakeProvider {
            id: "backup".to_string(),
            enabled: true,
            fail_calls: 0,
            calls: AtomicUsize::new(0),
        });
        let router = router_with(
            vec![
                ProviderRegistration { provider: primary, priority: 0.9, models_by_tier: tier_map("m1") },
                ProviderRegistration { provider: backup, priority: 0.1, models_by_tier: tier_map("m2") },
            ],
            100.0,
        )
        .await;

        let response = router
            .complete("researcher", TaskTier::Simple, &[ChatMessage::user("hi")], 256, 0.2, None)
            .await
            .expect("fallback should succeed");
        assert_eq!(response.provider, "backup");
    }

    #[tokio::test]
    async fn refuses_new_call_once_budget_already_spent() {
        let provider = Arc::new(FakeProvider {
            id: "solo".to_string(),
            enabled: true,
            fail_calls: 0,
            calls: AtomicUsize::new(0),
        });
        let store = Store::open_in_memory().await.unwrap();
        store.log_cost("researcher", "solo", "m1", 1000, 1000, 5.0, 10).await.unwrap();
        let router = Router::new(
            vec![ProviderRegistration { provider, priority: 0.5, models_by_tier: tier_map("m1") }],
            store,
            BudgetConfig { daily_budget_usd: 5.0, alert_threshold_percent: 0.8 },
        );

        let err = router
            .complete("researcher", TaskTier::Fast, &[ChatMessage::user("hi")], 64, 0.0, None)
            .await
            .expect_err("budget already spent should refuse");
        assert!(matches!(err, RouterError::BudgetExhausted { .. }));
    }

    #[tokio::test]
    async fn all_candidates_failing_yields_provider_exhausted() {
        let a = Arc::new(FakeProvider { id: "a".to_string(), enabled: true, fail_calls: 99, calls: AtomicUsize::new(0) });
        let b = Arc::new(FakeProvider { id: "b".to_string(), enabled: true, fail_calls: 99, calls: AtomicUsize::new(0) });
        let router = router_with(
            vec![
                ProviderRegistration { provider: a, priority: 0.5, models_by_tier: tier_map("m1") },
                ProviderRegistration { provider: b, priority: 0.5, models_by_tier: tier_map("m2") },
            ],
            100.0,
        )
        .await;

        let err = router
            .complete("coder", TaskTier::Complex, &[ChatMessage::user("hi")], 256, 0.2, None)
            .await
            .expect_err("both providers fail");
        assert!(matches!(err, RouterError::ProviderExhausted { .. }));
    }
}
