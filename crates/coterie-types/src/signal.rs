use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Heartbeat,
    TaskAssign,
    TaskResult,
    AgentKill,
    AgentRestart,
    Shutdown,
    StatusRequest,
    StatusResponse,
}

/// A message exchanged between the supervisor and a worker over that
/// worker's inbox/outbox queue (`coterie-signals`). When the worker is a
/// real child process the same struct is framed as one JSON object per
/// line over its piped stdio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_type: SignalType,
    pub sender: String,
    pub target: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
}

impl Signal {
    pub fn new(signal_type: SignalType, sender: impl Into<String>, target: impl Into<String>, payload: Value) -> Self {
        Self {
            signal_type,
            sender: sender.into(),
            target: target.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn heartbeat(sender: impl Into<String>, target: impl Into<String>, pid: u32, status: &str) -> Self {
        Self::new(
            SignalType::Heartbeat,
            sender,
            target,
            serde_json::json!({ "pid": pid, "status": status }),
        )
    }

    pub fn task_assign(sender: impl Into<String>, target: impl Into<String>, task_id: &str, input_data: Value) -> Self {
        Self::new(
            SignalType::TaskAssign,
            sender,
            target,
            serde_json::json!({ "task_id": task_id, "input_data": input_data }),
        )
    }

    pub fn task_result(sender: impl Into<String>, target: impl Into<String>, task_id: &str, output_data: Value, success: bool) -> Self {
        Self::new(
            SignalType::TaskResult,
            sender,
            target,
            serde_json::json!({ "task_id": task_id, "output_data": output_data, "success": success }),
        )
    }

    pub fn shutdown(sender: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(SignalType::Shutdown, sender, target, Value::Null)
    }
}
