//! `Tool` trait, schema validation and the permission-gated registry.
//! Grounded on the teacher's `ToolRegistry` in `tandem-tools/src/lib.rs`
//! (an `Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>` with a schema-listing
//! and an execute path) generalized with the role-based `allowed` filter
//! and audit logging from the original Python `ToolRegistry.execute`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use coterie_store::{AuditResult, Store};

#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A tool's result is always a success payload or an `error` key, never a
/// propagated exception — callers (the CEO's react loop, a worker's
/// `handle_task`) treat both shapes uniformly.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolOutcome {
    pub payload: Value,
}

impl ToolOutcome {
    pub fn ok(payload: Value) -> Self {
        Self { payload }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { payload: serde_json::json!({ "error": message.into() }) }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;
    async fn execute(&self, args: Value) -> ToolOutcome;
}

/// A static mapping from role name to the set of tool names it may invoke.
/// Preset roles (named ad hoc at delegation time) inherit a base role's
/// tool set via `base_of`; an unknown role resolves to the empty set.
#[derive(Debug, Clone, Default)]
pub struct PermissionMatrix {
    direct: HashMap<String, HashSet<String>>,
    base_of: HashMap<String, String>,
}

impl PermissionMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&mut self, role: impl Into<String>, tools: impl IntoIterator<Item = impl Into<String>>) {
        self.direct
            .entry(role.into())
            .or_default()
            .extend(tools.into_iter().map(Into::into));
    }

    /// Registers `preset_role` as inheriting `base_role`'s tool set. A preset
    /// role with no direct grants of its own resolves purely to its base's set.
    pub fn inherit(&mut self, preset_role: impl Into<String>, base_role: impl Into<String>) {
        self.base_of.insert(preset_role.into(), base_role.into());
    }

    pub fn allowed_for(&self, role: &str) -> HashSet<String> {
        let mut set = self.direct.get(role).cloned().unwrap_or_default();
        if let Some(base) = self.base_of.get(role) {
            set.extend(self.allowed_for(base));
        }
        set
    }
}

pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    permissions: PermissionMatrix,
    store: Store,
}

impl ToolRegistry {
    pub fn new(store: Store, permissions: PermissionMatrix) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            permissions,
            store,
        }
    }

    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.schema().name;
        self.tools.write().await.insert(name, tool);
    }

    pub async fn all_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Schemas filtered to the ones `role` may call, used to build the
    /// tool-choice list handed to the LLM provider.
    pub async fn schemas_for(&self, role: &str) -> Vec<ToolSchema> {
        let allowed = self.permissions.allowed_for(role);
        let tools = self.tools.read().await;
        let mut schemas: Vec<ToolSchema> = tools
            .values()
            .map(|t| t.schema())
            .filter(|s| allowed.contains(&s.name))
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Validates membership in `role`'s allowed set, records an audit row
    /// for every allow/deny/error outcome, and executes. Never propagates a
    /// panic-worthy error to the caller: an unknown tool or a denied
    /// permission both come back as an `{error: ...}` outcome.
    pub async fn execute(&self, name: &str, args: Value, role: &str) -> ToolOutcome {
        let allowed = self.permissions.allowed_for(role);
        if !allowed.contains(name) {
            let _ = self
                .store
                .audit(role, name, &args, AuditResult::Denied, Some("not in allowed list"))
                .await;
            tracing::info!(role, tool = name, outcome = "denied", "tool execution denied");
            return ToolOutcome::error(format!("tool '{name}' not permitted for role '{role}'"));
        }

        let tool = self.tools.read().await.get(name).cloned();
        let Some(tool) = tool else {
            let _ = self
                .store
                .audit(role, name, &args, AuditResult::Error, Some("tool not found"))
                .await;
            return ToolOutcome::error(format!("tool '{name}' not found"));
        };

        let _ = self.store.audit(role, name, &args, AuditResult::Allowed, None).await;
        tracing::info!(role, tool = name, outcome = "allowed", "tool execution allowed");
        tool.execute(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_role_inherits_base_role_tool_set() {
        let mut matrix = PermissionMatrix::new();
        matrix.grant("researcher", ["web_fetch", "file_read"]);
        matrix.inherit("fact-checker", "researcher");
        let allowed = matrix.allowed_for("fact-checker");
        assert!(allowed.contains("web_fetch"));
    }

    #[test]
    fn unknown_role_resolves_to_empty_set() {
        let matrix = PermissionMatrix::new();
        assert!(matrix.allowed_for("ghost").is_empty());
    }

    #[tokio::test]
    async fn execute_denies_tool_not_in_allowed_set() {
        let store = Store::open_in_memory().await.unwrap();
        let mut matrix = PermissionMatrix::new();
        matrix.grant("communicator", ["file_read"]);
        let registry = ToolRegistry::new(store, matrix);
        let outcome = registry.execute("shell_exec", serde_json::json!({}), "communicator").await;
        assert!(outcome.payload.get("error").is_some());
    }
}
