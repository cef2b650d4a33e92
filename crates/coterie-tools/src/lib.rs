//! Path containment, the bounded subprocess runner, the tool contract, and
//! the built-in tools every worker role and the CEO draw from.

pub mod builtins;
mod error;
pub mod registry;
pub mod sandbox;

pub use builtins::{
    CreatePlanTool, DelegateTaskTool, Dispatcher, FileListTool, FileReadTool, FileWriteTool,
    RunPythonEquivalentTool, ShellExecTool, WebFetchTool,
};
pub use error::{ToolError, ToolResult};
pub use registry::{PermissionMatrix, Tool, ToolOutcome, ToolRegistry, ToolSchema};
pub use sandbox::{run_subprocess, safe_path, tokenize_command, SubprocessOutput};

use std::path::PathBuf;
use std::sync::Arc;

use coterie_store::Store;

/// The runtime's three concrete worker roles (§4.G) plus the CEO, wired
/// with the tool sets the spec names for each. Preset roles named ad hoc at
/// delegation time default to the empty set unless a caller adds an
/// `inherit` mapping after calling this.
pub fn default_permission_matrix() -> PermissionMatrix {
    let mut matrix = PermissionMatrix::new();
    matrix.grant("researcher", ["web_fetch", "file_read", "file_write"]);
    matrix.grant("coder", ["file_read", "file_write", "shell_exec", "run_python_equivalent"]);
    matrix.grant("communicator", ["file_read"]);
    matrix.grant(
        "ceo",
        [
            "file_read",
            "file_write",
            "shell_exec",
            "run_python_equivalent",
            "web_fetch",
            "delegate_task",
            "create_plan",
        ],
    );
    matrix
}

/// Builds a registry with every built-in tool registered against
/// `workspace`, backed by `store` for audit rows and plan persistence.
/// `delegate_task`'s dispatcher is not wired here: the CEO installs it via
/// `DelegateTaskTool::set_dispatcher` once its own delegation path exists.
pub async fn build_default_registry(workspace: PathBuf, store: Store, permissions: PermissionMatrix) -> (ToolRegistry, Arc<DelegateTaskTool>) {
    let registry = ToolRegistry::new(store.clone(), permissions);
    let delegate = Arc::new(DelegateTaskTool::new());

    registry.register(Arc::new(FileReadTool::new(workspace.clone()))).await;
    registry.register(Arc::new(FileWriteTool::new(workspace.clone()))).await;
    registry.register(Arc::new(FileListTool::new(workspace.clone()))).await;
    registry.register(Arc::new(ShellExecTool::new(workspace.clone()))).await;
    registry.register(Arc::new(RunPythonEquivalentTool::new(workspace))).await;
    registry.register(Arc::new(WebFetchTool::new())).await;
    registry.register(Arc::clone(&delegate) as Arc<dyn Tool>).await;
    registry.register(Arc::new(CreatePlanTool::new(store))).await;

    (registry, delegate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn default_registry_lists_every_builtin() {
        let store = Store::open_in_memory().await.unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let (registry, _delegate) = build_default_registry(tmp.path().to_path_buf(), store, default_permission_matrix()).await;
        let names = registry.all_names().await;
        assert!(names.contains(&"file_read".to_string()));
        assert!(names.contains(&"create_plan".to_string()));
        assert_eq!(names.len(), 8);
    }

    #[tokio::test]
    async fn path_escape_is_denied_end_to_end() {
        let store = Store::open_in_memory().await.unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let (registry, _delegate) = build_default_registry(tmp.path().to_path_buf(), store, default_permission_matrix()).await;
        let outcome = registry
            .execute("file_write", json!({"path": "../../etc/passwd", "content": "x"}), "coder")
            .await;
        assert!(outcome.payload.get("error").is_some());
        assert!(!tmp.path().parent().unwrap().join("etc/passwd").exists());
    }
}
