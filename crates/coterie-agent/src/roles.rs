//! The three concrete worker roles over the shared chassis. Grounded on
//! `original_source/multiclaws/roles/{researcher,coder}.py`'s react loop
//! (call the router, look for a `{"tool": ..., "args": ...}` assistant
//! reply, execute it, append the result, loop) and `communicator.py`'s
//! single non-looping call restricted to read-only tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use coterie_router::Router;
use coterie_tools::ToolRegistry;
use coterie_types::{ChatMessage, TaskTier};

use crate::chassis::WorkerRole;

const DEFAULT_MAX_TOOL_ITERATIONS: usize = 6;
const DEFAULT_TEMPERATURE: f32 = 0.2;

fn task_text(input: &Value) -> String {
    input
        .get("task")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| input.to_string())
}

fn tier_override(input: &Value, default: TaskTier) -> TaskTier {
    input
        .get("_task_type")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or(default)
}

fn max_tokens_override(input: &Value, default: u32) -> u32 {
    input
        .get("_max_tokens")
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .unwrap_or(default)
}

/// Runs the shared tool-using react loop: calls the router, and as long as
/// the assistant's content parses as `{"tool": "<name>", "args": {...}}`,
/// executes it through `registry` and feeds the result back in, up to
/// `max_iterations` rounds. Falls through to the last assistant content as
/// the final answer once the model stops asking for a tool.
async fn react_loop(
    router: &Router,
    registry: &ToolRegistry,
    role_name: &str,
    tier: TaskTier,
    max_tokens: u32,
    mission: &str,
    task: &str,
    max_iterations: usize,
) -> Result<String, String> {
    let schemas = registry.schemas_for(role_name).await;
    let tool_list = schemas
        .iter()
        .map(|s| format!("- {}: {}", s.name, s.description))
        .collect::<Vec<_>>()
        .join("\n");

    let mut messages = vec![
        ChatMessage::system(format!(
            "{mission}\n\nAvailable tools:\n{tool_list}\n\nTo use a tool, reply with a JSON object \
             {{\"tool\": \"<name>\", \"args\": {{...}}}} and nothing else. Otherwise reply with your \
             final answer as plain text."
        )),
        ChatMessage::user(task.to_string()),
    ];

    for _ in 0..max_iterations {
        let response = router
            .complete(role_name, tier, &messages, max_tokens, DEFAULT_TEMPERATURE, None)
            .await
            .map_err(|err| err.to_string())?;

        let parsed: Option<Value> = serde_json::from_str(response.content.trim()).ok();
        let Some(call) = parsed.filter(|v| v.is_object() && v.get("tool").is_some()) else {
            return Ok(response.content);
        };

        let tool_name = call["tool"].as_str().unwrap_or_default().to_string();
        let args = call.get("args").cloned().unwrap_or(Value::Null);

        messages.push(ChatMessage::assistant(response.content.clone()));
        let outcome = registry.execute(&tool_name, args, role_name).await;
        messages.push(ChatMessage::tool(outcome.payload.to_string()));
    }

    Err(format!("exceeded {max_iterations} tool iterations without a final answer"))
}

pub struct ResearcherWorker {
    router: Arc<Router>,
    registry: Arc<ToolRegistry>,
    max_iterations: usize,
}

impl ResearcherWorker {
    pub fn new(router: Arc<Router>, registry: Arc<ToolRegistry>) -> Self {
        Self { router, registry, max_iterations: DEFAULT_MAX_TOOL_ITERATIONS }
    }
}

#[async_trait]
impl WorkerRole for ResearcherWorker {
    fn role_name(&self) -> &str {
        "researcher"
    }

    async fn handle_task(&self, input: Value) -> Result<Value, String> {
        let task = task_text(&input);
        let tier = tier_override(&input, TaskTier::Simple);
        let max_tokens = max_tokens_override(&input, 2048);
        let answer = react_loop(
            &self.router,
            &self.registry,
            "researcher",
            tier,
            max_tokens,
            "You are the runtime's research worker. Gather information using web_fetch and \
             file_read/file_write, then report findings concisely.",
            &task,
            self.max_iterations,
        )
        .await?;
        Ok(Value::String(answer))
    }
}

pub struct CoderWorker {
    router: Arc<Router>,
    registry: Arc<ToolRegistry>,
    max_iterations: usize,
}

impl CoderWorker {
    pub fn new(router: Arc<Router>, registry: Arc<ToolRegistry>) -> Self {
        Self { router, registry, max_iterations: DEFAULT_MAX_TOOL_ITERATIONS }
    }
}

#[async_trait]
impl WorkerRole for CoderWorker {
    fn role_name(&self) -> &str {
        "coder"
    }

    async fn handle_task(&self, input: Value) -> Result<Value, String> {
        let task = task_text(&input);
        let tier = tier_override(&input, TaskTier::Complex);
        let max_tokens = max_tokens_override(&input, 4096);
        let answer = react_loop(
            &self.router,
            &self.registry,
            "coder",
            tier,
            max_tokens,
            "You are the runtime's coding worker. Read, write, and run code inside the workspace \
             using file_read/file_write/shell_exec/run_python_equivalent, then report what changed.",
            &task,
            self.max_iterations,
        )
        .await?;
        Ok(Value::String(answer))
    }
}

/// Restricted to read-only tools (`file_read` only, per the runtime's
/// default permission matrix) and a single non-looping completion call —
/// a communicator drafts outward-facing text, it doesn't iterate on tools.
pub struct CommunicatorWorker {
    router: Arc<Router>,
}

impl CommunicatorWorker {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl WorkerRole for CommunicatorWorker {
    fn role_name(&self) -> &str {
        "communicator"
    }

    async fn handle_task(&self, input: Value) -> Result<Value, String> {
        let task = task_text(&input);
        let tier = tier_override(&input, TaskTier::Fast);
        let max_tokens = max_tokens_override(&input, 1024);
        let messages = vec![
            ChatMessage::system(
                "You are the runtime's communicator. Draft the requested outward-facing message. \
                 You have no tools; answer directly.",
            ),
            ChatMessage::user(task),
        ];
        let response = self
            .router
            .complete("communicator", tier, &messages, max_tokens, DEFAULT_TEMPERATURE, None)
            .await
            .map_err(|err| err.to_string())?;
        Ok(Value::String(response.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_text_prefers_explicit_task_field() {
        let input = serde_json::json!({"task": "summarize the report", "_task_type": "fast"});
        assert_eq!(task_text(&input), "summarize the report");
    }

    #[test]
    fn tier_override_falls_back_to_default_on_missing_or_bad_value() {
        let input = serde_json::json!({"task": "x"});
        assert_eq!(tier_override(&input, TaskTier::Complex), TaskTier::Complex);
        let bad = serde_json::json!({"_task_type": "nonsense"});
        assert_eq!(tier_override(&bad, TaskTier::Simple), TaskTier::Simple);
    }

    #[test]
    fn max_tokens_override_reads_explicit_value() {
        let input = serde_json::json!({"_max_tokens": 777});
        assert_eq!(max_tokens_override(&input, 2048), 777);
    }
}
