//! Built-in tools. Each one is grounded in the teacher's file-facing tools
//! (`tandem-tools/src/lib.rs`: `ReadTool`, `WriteTool`, `BashTool`) for
//! shape, and in the original Python `multiclaws/tools/builtins/*.py` for
//! the exact argument names, caps, and error behavior this runtime copies.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use coterie_store::Store;

use crate::registry::{Tool, ToolOutcome, ToolSchema};
use crate::sandbox::{self, run_subprocess, safe_path, tokenize_command};

const FILE_READ_DEFAULT_CAP: usize = 32 * 1024;
const WEB_FETCH_CAP: usize = 10 * 1024;
const WEB_FETCH_TIMEOUT_SECS: u64 = 10;
const FILE_LIST_MAX_ENTRIES: usize = 200;

pub struct FileReadTool {
    workspace: PathBuf,
}

impl FileReadTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "file_read".to_string(),
            description: "Read text content of a file within the workspace.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Relative path within workspace"},
                    "max_bytes": {"type": "integer", "description": "Max bytes to read (default 32768)"},
                },
                "required": ["path"],
            }),
        }
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let Some(path) = args.get("path").and_then(|v| v.as_str()) else {
            return ToolOutcome::error("missing required argument 'path'");
        };
        let max_bytes = args.get("max_bytes").and_then(|v| v.as_u64()).map(|n| n as usize).unwrap_or(FILE_READ_DEFAULT_CAP);

        let resolved = match safe_path(&self.workspace, path) {
            Ok(p) => p,
            Err(err) => return ToolOutcome::error(err.to_string()),
        };
        let bytes = match tokio::fs::read(&resolved).await {
            Ok(b) => b,
            Err(_) => return ToolOutcome::error(format!("file not found: {path}")),
        };
        let capped = &bytes[..bytes.len().min(max_bytes)];
        let content = String::from_utf8_lossy(capped).into_owned();
        ToolOutcome::ok(json!({
            "result": content,
            "path": resolved.to_string_lossy(),
            "size": bytes.len(),
        }))
    }
}

pub struct FileWriteTool {
    workspace: PathBuf,
}

impl FileWriteTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "file_write".to_string(),
            description: "Write text content to a file within the workspace.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Relative path within workspace"},
                    "content": {"type": "string", "description": "Text content to write"},
                    "append": {"type": "boolean", "description": "Append instead of overwrite (default false)"},
                },
                "required": ["path", "content"],
            }),
        }
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let (Some(path), Some(content)) = (
            args.get("path").and_then(|v| v.as_str()),
            args.get("content").and_then(|v| v.as_str()),
        ) else {
            return ToolOutcome::error("missing required argument 'path' or 'content'");
        };
        let append = args.get("append").and_then(|v| v.as_bool()).unwrap_or(false);

        let resolved = match safe_path(&self.workspace, path) {
            Ok(p) => p,
            Err(err) => return ToolOutcome::error(err.to_string()),
        };
        if let Some(parent) = resolved.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                return ToolOutcome::error(err.to_string());
            }
        }
        let write_result = if append {
            use tokio::io::AsyncWriteExt;
            match tokio::fs::OpenOptions::new().create(true).append(true).open(&resolved).await {
                Ok(mut f) => f.write_all(content.as_bytes()).await,
                Err(err) => Err(err),
            }
        } else {
            tokio::fs::write(&resolved, content).await
        };
        match write_result {
            Ok(()) => ToolOutcome::ok(json!({
                "result": "ok",
                "path": resolved.to_string_lossy(),
                "bytes": content.len(),
            })),
            Err(err) => ToolOutcome::error(err.to_string()),
        }
    }
}

pub struct FileListTool {
    workspace: PathBuf,
}

impl FileListTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FileListTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "file_list".to_string(),
            description: "List files and directories within a workspace path.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Relative path (default: root)"},
                    "pattern": {"type": "string", "description": "Glob pattern (default: *)"},
                },
                "required": [],
            }),
        }
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let pattern = args.get("pattern").and_then(|v| v.as_str()).unwrap_or("*");

        let resolved = match safe_path(&self.workspace, path) {
            Ok(p) => p,
            Err(err) => return ToolOutcome::error(err.to_string()),
        };
        let full_pattern = resolved.join(pattern);
        let glob_iter = match glob::glob(&full_pattern.to_string_lossy()) {
            Ok(it) => it,
            Err(err) => return ToolOutcome::error(err.to_string()),
        };

        let mut entries = Vec::new();
        for entry in glob_iter.flatten().take(FILE_LIST_MAX_ENTRIES) {
            let meta = tokio::fs::metadata(&entry).await.ok();
            let is_dir = meta.as_ref().map(|m| m.is_dir()).unwrap_or(false);
            let size = meta.as_ref().map(|m| m.len()).unwrap_or(0);
            entries.push(json!({
                "name": entry.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
                "type": if is_dir { "dir" } else { "file" },
                "size": if is_dir { 0 } else { size },
            }));
        }
        ToolOutcome::ok(json!({ "result": entries, "path": resolved.to_string_lossy() }))
    }
}

pub struct ShellExecTool {
    workspace: PathBuf,
}

impl ShellExecTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ShellExecTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "shell_exec".to_string(),
            description: "Execute a shell command inside the workspace sandbox (5s default timeout, 30s cap).".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Shell command to run"},
                    "cwd": {"type": "string", "description": "Working dir (relative to workspace)"},
                    "timeout": {"type": "integer", "description": "Timeout in seconds (max 30)"},
                },
                "required": ["command"],
            }),
        }
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let Some(command) = args.get("command").and_then(|v| v.as_str()) else {
            return ToolOutcome::error("missing required argument 'command'");
        };
        let timeout_secs = args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(sandbox::DEFAULT_TIMEOUT_SECS)
            .min(sandbox::MAX_TIMEOUT_SECS);
        let cwd_arg = args.get("cwd").and_then(|v| v.as_str());

        let cwd = match cwd_arg {
            Some(c) => match safe_path(&self.workspace, c) {
                Ok(p) => p,
                Err(err) => return ToolOutcome::error(err.to_string()),
            },
            None => self.workspace.clone(),
        };

        let argv = match tokenize_command(command) {
            Ok(a) => a,
            Err(err) => return ToolOutcome::error(err.to_string()),
        };

        match run_subprocess(&argv, Duration::from_secs(timeout_secs), &cwd).await {
            Ok(out) => ToolOutcome::ok(serde_json::to_value(out).unwrap_or(Value::Null)),
            Err(err) => ToolOutcome::error(err.to_string()),
        }
    }
}

pub struct RunPythonEquivalentTool {
    workspace: PathBuf,
}

impl RunPythonEquivalentTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for RunPythonEquivalentTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "run_python_equivalent".to_string(),
            description: "Execute a short script in the workspace sandbox. Returns stdout, stderr, and returncode.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": {"type": "string", "description": "Script source to execute"},
                    "timeout": {"type": "integer", "description": "Max execution seconds (default 10, max 30)"},
                },
                "required": ["code"],
            }),
        }
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let Some(code) = args.get("code").and_then(|v| v.as_str()) else {
            return ToolOutcome::error("missing required argument 'code'");
        };
        let timeout_secs = args.get("timeout").and_then(|v| v.as_u64()).unwrap_or(10).min(sandbox::MAX_TIMEOUT_SECS);

        let script_path = self.workspace.join(format!("_coterie_run_{}.py", uuid::Uuid::new_v4()));
        if let Err(err) = tokio::fs::write(&script_path, code).await {
            return ToolOutcome::error(err.to_string());
        }

        let argv = vec!["python3".to_string(), script_path.to_string_lossy().into_owned()];
        let result = run_subprocess(&argv, Duration::from_secs(timeout_secs), &self.workspace).await;
        let _ = tokio::fs::remove_file(&script_path).await;

        match result {
            Ok(out) => ToolOutcome::ok(serde_json::to_value(out).unwrap_or(Value::Null)),
            Err(err) => ToolOutcome::error(err.to_string()),
        }
    }
}

pub struct WebFetchTool {
    client: reqwest::Client,
}

impl WebFetchTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(WEB_FETCH_TIMEOUT_SECS))
                .build()
                .expect("reqwest client"),
        }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "web_fetch".to_string(),
            description: "Fetch the text content of a URL (GET only, 10KB cap).".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "URL to fetch"},
                },
                "required": ["url"],
            }),
        }
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let Some(url) = args.get("url").and_then(|v| v.as_str()) else {
            return ToolOutcome::error("missing required argument 'url'");
        };
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return ToolOutcome::error("only http/https URLs allowed");
        }

        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(err) => return ToolOutcome::error(err.to_string()),
        };
        let status = response.status();
        if !status.is_success() {
            return ToolOutcome::error(format!("HTTP {status}: {url}"));
        }
        let final_url = response.url().to_string();
        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(err) => return ToolOutcome::error(err.to_string()),
        };
        let truncated = bytes.len() > WEB_FETCH_CAP;
        let capped = &bytes[..bytes.len().min(WEB_FETCH_CAP)];
        let content = String::from_utf8_lossy(capped).into_owned();
        ToolOutcome::ok(json!({
            "result": content,
            "status_code": status.as_u16(),
            "url": final_url,
            "truncated": truncated,
        }))
    }
}

/// A task dispatch closure, injected by the CEO after it and the worker
/// roles exist. The registry never learns how dispatch actually works; it
/// just calls whatever closure is installed.
pub type Dispatcher = Arc<dyn Fn(String, Value) -> BoxFuture<'static, Value> + Send + Sync>;

pub struct DelegateTaskTool {
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl DelegateTaskTool {
    pub fn new() -> Self {
        Self { dispatcher: Mutex::new(None) }
    }

    pub async fn set_dispatcher(&self, dispatcher: Dispatcher) {
        *self.dispatcher.lock().await = Some(dispatcher);
    }
}

impl Default for DelegateTaskTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for DelegateTaskTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "delegate_task".to_string(),
            description: "Delegate a task to a specialist agent (researcher, coder, or communicator).".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agent": {"type": "string", "enum": ["researcher", "coder", "communicator"]},
                    "task": {"type": "object", "description": "Task payload"},
                },
                "required": ["agent", "task"],
            }),
        }
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let Some(agent) = args.get("agent").and_then(|v| v.as_str()) else {
            return ToolOutcome::error("missing required argument 'agent'");
        };
        let task = args.get("task").cloned().unwrap_or(Value::Null);

        let dispatcher = self.dispatcher.lock().await.clone();
        let Some(dispatcher) = dispatcher else {
            return ToolOutcome::error("delegate_task has no dispatcher installed");
        };
        let result = dispatcher(agent.to_string(), task).await;
        ToolOutcome::ok(result)
    }
}

pub struct CreatePlanTool {
    store: Store,
}

impl CreatePlanTool {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for CreatePlanTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "create_plan".to_string(),
            description: "Write a sequence of pending tasks, each depending on the one before it.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "steps": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "role": {"type": "string"},
                                "input": {"type": "object"},
                            },
                            "required": ["role", "input"],
                        },
                    },
                },
                "required": ["steps"],
            }),
        }
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let Some(steps) = args.get("steps").and_then(|v| v.as_array()) else {
            return ToolOutcome::error("missing required argument 'steps'");
        };
        if steps.is_empty() {
            return ToolOutcome::error("'steps' must contain at least one task");
        }

        let mut task_ids = Vec::with_capacity(steps.len());
        let mut previous: Option<String> = None;
        for step in steps {
            let Some(role) = step.get("role").and_then(|v| v.as_str()) else {
                return ToolOutcome::error("each step requires a 'role'");
            };
            let input = step.get("input").cloned().unwrap_or(Value::Null);
            let created = match self.store.create_task(None, role, input, 2).await {
                Ok(id) => id,
                Err(err) => return ToolOutcome::error(err.to_string()),
            };
            if let Some(dep) = &previous {
                if let Err(err) = self.store.add_task_dependency(&created, dep).await {
                    return ToolOutcome::error(err.to_string());
                }
            }
            previous = Some(created.clone());
            task_ids.push(created);
        }

        ToolOutcome::ok(json!({ "result": "ok", "task_ids": task_ids }))
    }
}
