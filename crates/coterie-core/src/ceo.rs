//! The CEO coordinator's single-session react loop (§4.J): persist the
//! user's turn, assemble context, call the router at tier `complex` up to
//! `max_tool_iterations` times, dispatch any tool call the assistant asks
//! for (delegation goes through the two-strike retry policy; every other
//! tool goes through the security reviewer first), and on a final
//! non-tool-call answer persist it, record a team insight, append to the
//! per-session task-context note, and promote any compaction that just
//! ran. Grounded on `tandem-core/src/engine_loop.rs`'s while-loop-with-
//! tool-parsing shape, generalized from a multi-session HTTP handler to
//! one coordinator owning exactly one session.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use coterie_agent::{CoderWorker, CommunicatorWorker, ResearcherWorker, WorkerRole};
use coterie_governance::{FinancialAllocator, SecurityReviewer};
use coterie_memory::{CompactionPolicy, ContextBudget, MemoryAssembler};
use coterie_router::Router;
use coterie_store::{Store, TurnRole};
use coterie_tools::{DelegateTaskTool, Dispatcher, ToolRegistry};
use coterie_types::{ChatMessage, TaskTier};

use crate::error::{CoreError, CoreResult};
use crate::notes;

const CEO_TEMPERATURE: f32 = 0.2;
const MAX_ESCALATION_STRIKES: u32 = 2;

const CEO_MISSION: &str = "You are the Coordinator (CEO) of this runtime: you interpret the \
    Chairman's intent, delegate bounded subtasks to specialist workers (researcher, coder, \
    communicator) via the delegate_task tool, and synthesize their results into a single reply. \
    To use a tool, reply with exactly one JSON object {\"tool\": \"<name>\", \"args\": {...}} and \
    nothing else. Otherwise reply with your final answer as plain text.";

/// One per running process (§9 Open Question: the two-strike retry map is
/// an ordinary field here, never global/class-level state).
pub struct Ceo {
    store: Store,
    router: Arc<Router>,
    tools: Arc<ToolRegistry>,
    security: SecurityReviewer,
    memory: MemoryAssembler,
    workspace: PathBuf,
    context_budget: ContextBudget,
    compaction: CompactionPolicy,
    max_tool_iterations: usize,
    max_output_tokens: u32,
    default_tier: TaskTier,
    retry_counts: HashMap<(String, u64), u32>,
}

impl Ceo {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        store: Store,
        router: Arc<Router>,
        tools: Arc<ToolRegistry>,
        delegate: Arc<DelegateTaskTool>,
        allocator: FinancialAllocator,
        memory: MemoryAssembler,
        workspace: PathBuf,
        context_budget: ContextBudget,
        compaction: CompactionPolicy,
        max_tool_iterations: usize,
        max_output_tokens: u32,
        default_tier: TaskTier,
    ) -> Self {
        let dispatcher = build_dispatcher(store.clone(), Arc::clone(&router), Arc::clone(&tools), allocator);
        delegate.set_dispatcher(dispatcher).await;
        Self {
            store,
            router,
            tools,
            security: SecurityReviewer::new(),
            memory,
            workspace,
            context_budget,
            compaction,
            max_tool_iterations,
            max_output_tokens,
            default_tier,
            retry_counts: HashMap::new(),
        }
    }

    /// Runs one full react-loop turn and returns the Chairman-visible
    /// reply text.
    pub async fn handle_user_turn(&mut self, text: &str) -> CoreResult<String> {
        let session_id = self.memory.session_id().to_string();
        self.memory.record_turn(TurnRole::User, text, "ceo").await?;

        let system_prompt = self.build_system_prompt(&session_id).await?;
        let (mut messages, _used_tokens, fresh_compaction) = self
            .memory
            .assemble_context(&system_prompt, text, &self.router, "ceo", self.context_budget, self.compaction)
            .await?;
        if let Some(compaction_text) = fresh_compaction {
            self.memory.persist_compaction(&session_id, &compaction_text).await?;
        }

        for _ in 0..self.max_tool_iterations {
            let response = self
                .router
                .complete("ceo", self.default_tier, &messages, self.max_output_tokens, CEO_TEMPERATURE, None)
                .await?;

            let parsed: Option<Value> = serde_json::from_str(response.content.trim()).ok();
            let Some(call) = parsed.filter(|v| v.is_object() && v.get("tool").is_some()) else {
                self.memory.record_turn(TurnRole::Assistant, &response.content, "ceo").await?;
                self.store.record_insight(&session_id, "ceo", "reply", &response.content).await?;
                let _ = notes::append_note_line(&self.workspace, &session_id, &truncate_chars(&response.content, 160));
                return Ok(response.content);
            };

            let tool_name = call["tool"].as_str().unwrap_or_default().to_string();
            let args = call.get("args").cloned().unwrap_or(Value::Null);
            messages.push(ChatMessage::assistant(response.content.clone()));
            tracing::info!(tool = %tool_name, "ceo tool-call iteration");

            let result_payload = if tool_name == "delegate_task" {
                self.delegate_with_two_strike_retry(args).await
            } else {
                let decision = self.security.review_tool_args(&self.store, &tool_name, &args, "ceo").await;
                if !decision.approved {
                    tracing::warn!(tool = %tool_name, risk = ?decision.risk_level, "ceo tool call vetoed by security reviewer");
                    json!({
                        "error": "blocked by security review",
                        "cso_action": "veto",
                        "risk_level": decision.risk_level,
                        "findings": decision.findings,
                    })
                } else {
                    self.tools.execute(&tool_name, args, "ceo").await.payload
                }
            };

            messages.push(ChatMessage::tool(result_payload.to_string()));
        }

        Err(CoreError::Config(format!(
            "ceo exceeded {} tool iterations without a final answer",
            self.max_tool_iterations
        )))
    }

    /// Calls `delegate_task` through the tool registry (so permissions and
    /// the audit row still apply), retrying once on failure with an
    /// appended hint and escalating on a second failure for the same
    /// `(role, task_payload)` pair (§4.J's two-strike rule).
    async fn delegate_with_two_strike_retry(&mut self, args: Value) -> Value {
        let Some(agent) = args.get("agent").and_then(|v| v.as_str()).map(str::to_string) else {
            return json!({ "error": "missing required argument 'agent'" });
        };
        let mut task = args.get("task").cloned().unwrap_or(Value::Null);
        let key = (agent.clone(), hash_task_payload(&task));

        loop {
            let outcome = self
                .tools
                .execute("delegate_task", json!({ "agent": agent, "task": task }), "ceo")
                .await;
            let payload = outcome.payload;

            if payload.get("error").is_none() {
                self.retry_counts.remove(&key);
                return payload;
            }

            let strikes = {
                let count = self.retry_counts.entry(key.clone()).or_insert(0);
                *count += 1;
                *count
            };
            tracing::warn!(role = %agent, strikes, "delegation attempt failed");

            if strikes >= MAX_ESCALATION_STRIKES {
                self.retry_counts.remove(&key);
                return json!({
                    "error": payload.get("error").cloned().unwrap_or(Value::Null),
                    "escalate": true,
                    "strikes": strikes,
                    "role": agent,
                });
            }

            if let Value::Object(map) = &mut task {
                map.insert(
                    "_retry_hint".to_string(),
                    json!("The previous attempt at this task failed. Try a different approach."),
                );
            }
        }
    }

    async fn build_system_prompt(&self, session_id: &str) -> CoreResult<String> {
        let mut prompt = String::from(CEO_MISSION);

        let schemas = self.tools.schemas_for("ceo").await;
        if !schemas.is_empty() {
            let tool_list = schemas.iter().map(|s| format!("- {}: {}", s.name, s.description)).collect::<Vec<_>>().join("\n");
            prompt.push_str("\n\nAvailable tools:\n");
            prompt.push_str(&tool_list);
        }

        let insights = self.store.load_team_context(session_id, 8).await?;
        if !insights.is_empty() {
            prompt.push_str("\n\n[TEAM CONTEXT]\n");
            for insight in insights {
                prompt.push_str(&format!("- ({}) {}: {}\n", insight.role, insight.kind, truncate_chars(&insight.content, 240)));
            }
        }

        if let Some(note) = notes::load_note(&self.workspace, session_id) {
            prompt.push_str("\n\n[TASK CONTEXT]\n");
            prompt.push_str(&note);
        }

        Ok(prompt)
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

fn hash_task_payload(task: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    serde_json::to_string(task).unwrap_or_default().hash(&mut hasher);
    hasher.finish()
}

/// The delegation dispatcher (§4.J): runs the financial allocator then the
/// security reviewer in order (either veto short-circuits with an error
/// payload), then instantiates the target worker in-process and awaits
/// its `handle_task` directly — a separate code path from the supervised
/// process-per-worker fleet `coterie-supervisor` runs, per §9.
fn build_dispatcher(store: Store, router: Arc<Router>, tools: Arc<ToolRegistry>, allocator: FinancialAllocator) -> Dispatcher {
    Arc::new(move |agent: String, task: Value| -> BoxFuture<'static, Value> {
        Box::pin(run_delegation(store.clone(), Arc::clone(&router), Arc::clone(&tools), allocator.clone(), agent, task))
    })
}

async fn run_delegation(store: Store, router: Arc<Router>, tools: Arc<ToolRegistry>, allocator: FinancialAllocator, agent: String, task: Value) -> Value {
    let task_text = task.get("task").and_then(|v| v.as_str()).map(str::to_string).unwrap_or_else(|| task.to_string());

    let decision = match allocator.allocate(&store, &task_text, &agent).await {
        Ok(decision) => decision,
        Err(err) => return json!({ "error": format!("allocator error: {err}") }),
    };
    if !decision.approved {
        tracing::warn!(role = %agent, reason = %decision.reason, "delegation vetoed by financial allocator");
        return json!({ "error": decision.reason, "cfo_action": "veto" });
    }

    let security = SecurityReviewer::new();
    let review = security.review_tool_args(&store, "delegate_task", &task, &agent).await;
    if !review.approved {
        tracing::warn!(role = %agent, risk = ?review.risk_level, "delegation vetoed by security reviewer");
        return json!({
            "error": "blocked by security review",
            "cso_action": "veto",
            "risk_level": review.risk_level,
            "findings": review.findings,
        });
    }

    let mut task_with_overrides = task;
    if let Value::Object(map) = &mut task_with_overrides {
        map.insert("_task_type".to_string(), json!(decision.task_type));
        map.insert("_max_tokens".to_string(), json!(decision.max_tokens));
    }

    let outcome: Result<Value, String> = match agent.as_str() {
        "researcher" => ResearcherWorker::new(Arc::clone(&router), Arc::clone(&tools)).handle_task(task_with_overrides).await,
        "coder" => CoderWorker::new(Arc::clone(&router), Arc::clone(&tools)).handle_task(task_with_overrides).await,
        "communicator" => CommunicatorWorker::new(Arc::clone(&router)).handle_task(task_with_overrides).await,
        other => Err(format!("unknown delegation target '{other}'")),
    };

    match outcome {
        Ok(value) => json!({ "result": value }),
        Err(message) => json!({ "error": message }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_task_payload_is_stable_for_identical_payloads() {
        let a = json!({"task": "research rust async runtimes"});
        let b = json!({"task": "research rust async runtimes"});
        assert_eq!(hash_task_payload(&a), hash_task_payload(&b));
    }

    #[test]
    fn hash_task_payload_differs_for_different_payloads() {
        let a = json!({"task": "research rust async runtimes"});
        let b = json!({"task": "research tokio vs async-std"});
        assert_ne!(hash_task_payload(&a), hash_task_payload(&b));
    }

    #[tokio::test]
    async fn two_strike_retry_escalates_after_second_failure() {
        let store = Store::open_in_memory().await.unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let permissions = coterie_tools::default_permission_matrix();
        let (registry, delegate) = coterie_tools::build_default_registry(tmp.path().to_path_buf(), store.clone(), permissions).await;
        delegate
            .set_dispatcher(Arc::new(|_agent: String, _task: Value| -> BoxFuture<'static, Value> {
                Box::pin(async move { json!({ "error": "worker always fails in this test" }) })
            }))
            .await;

        let memory = MemoryAssembler::new(store.clone(), tmp.path(), "sess-escalate", 10).await.unwrap();
        let router = Arc::new(Router::new(vec![], store.clone(), coterie_router::BudgetConfig { daily_budget_usd: 100.0, alert_threshold_percent: 80.0 }));
        let allocator = FinancialAllocator::new(100.0);
        let dummy_delegate = Arc::new(DelegateTaskTool::new());
        let mut ceo = Ceo::new(
            store,
            router,
            Arc::new(registry),
            dummy_delegate,
            allocator,
            memory,
            tmp.path().to_path_buf(),
            ContextBudget { max_input_tokens: 4000, context_turns: 10 },
            CompactionPolicy::default(),
            6,
            1024,
            TaskTier::Complex,
        )
        .await;
        // Re-point the real registry's delegate tool (the one `ceo.tools` actually holds) at the failing dispatcher.
        let _ = delegate;

        let result = ceo
            .delegate_with_two_strike_retry(json!({ "agent": "researcher", "task": { "task": "repeat me" } }))
            .await;
        assert!(result.get("escalate").is_none());
        let result = ceo
            .delegate_with_two_strike_retry(json!({ "agent": "researcher", "task": { "task": "repeat me" } }))
            .await;
        assert_eq!(result["escalate"], json!(true));
        assert_eq!(result["strikes"], json!(2));
    }
}
