//! Universal worker chassis. Ported from
//! `original_source/multiclaws/core/picoclaw.py::PicoClaw`: a shared
//! process-entry sequence (RAM cap, store, `recover_state`), then two
//! concurrent loops — a 1s-poll main loop dispatching by signal type, and a
//! 5s heartbeat — both driven by async tasks instead of the original's
//! `asyncio.gather` of two coroutines inside one process.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use coterie_signals::{Signal, SignalBus, SignalType};
use coterie_store::{AgentStatus, Store};

use crate::error::AgentResult;
use crate::rammem::apply_ram_cap_mb;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// A worker's capability set: what role it plays and how it answers a task.
/// Concrete roles (`ResearcherWorker`, `CoderWorker`, `CommunicatorWorker`)
/// implement this; none of them touch the chassis's lifecycle.
#[async_trait]
pub trait WorkerRole: Send + Sync {
    fn role_name(&self) -> &str;

    /// Handles one assigned task. A returned error becomes `{error: ...}`
    /// with `success=false`; it never crashes the chassis.
    async fn handle_task(&self, input: Value) -> Result<Value, String>;

    /// Rebuilds in-memory state from the store after a restart. Base
    /// implementation is a no-op, matching the teacher's default.
    async fn recover_state(&self, _store: &Store) {}
}

pub struct WorkerChassis {
    role: Arc<dyn WorkerRole>,
    store: Store,
    bus: SignalBus,
    outbox_target: String,
    ram_cap_mb: u64,
    stop: Arc<AtomicBool>,
}

impl WorkerChassis {
    pub fn new(role: Arc<dyn WorkerRole>, store: Store, bus: SignalBus, outbox_target: impl Into<String>, ram_cap_mb: u64) -> Self {
        Self {
            role,
            store,
            bus,
            outbox_target: outbox_target.into(),
            ram_cap_mb,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs the chassis to completion (until a `shutdown` signal arrives).
    /// Any unexpected error bubbling out of either loop marks the agent
    /// `crashed` in the store before propagating, so the supervisor's next
    /// poll sees a state consistent with the process actually having died.
    pub async fn run(self) -> AgentResult<()> {
        apply_ram_cap_mb(self.ram_cap_mb);

        let role_name = self.role.role_name().to_string();
        let pid = std::process::id();
        self.store.upsert_agent_state(&role_name, AgentStatus::Idle, Some(pid as i64), None).await?;
        self.role.recover_state(&self.store).await;
        tracing::info!(role = %role_name, pid, "worker chassis started");

        let inbox = self.bus.register(&role_name).await;
        let run_result = self.event_loop(inbox).await;

        if let Err(err) = &run_result {
            tracing::error!(role = %role_name, error = %err, "worker chassis crashed");
            let _ = self.store.upsert_agent_state(&role_name, AgentStatus::Crashed, Some(pid as i64), None).await;
        }
        self.bus.deregister(&role_name).await;
        run_result
    }

    async fn event_loop(&self, mut inbox: tokio::sync::mpsc::Receiver<Signal>) -> AgentResult<()> {
        let heartbeat = self.heartbeat_loop();
        let main = self.main_loop(&mut inbox);
        tokio::select! {
            result = main => result,
            _ = heartbeat => Ok(()),
        }
    }

    async fn heartbeat_loop(&self) {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return;
            }
            let signal = Signal::heartbeat(self.role.role_name(), &self.outbox_target, std::process::id(), "running");
            if let Err(err) = self.bus.send(signal).await {
                tracing::warn!(role = %self.role.role_name(), error = %err, "heartbeat send failed");
            }
            tokio::time::sleep(HEARTBEAT_INTERVAL).await;
        }
    }

    async fn main_loop(&self, inbox: &mut tokio::sync::mpsc::Receiver<Signal>) -> AgentResult<()> {
        let role_name = self.role.role_name().to_string();
        loop {
            let received = tokio::time::timeout(RECV_TIMEOUT, inbox.recv()).await;
            let signal = match received {
                Ok(Some(sig)) => sig,
                Ok(None) => return Ok(()),
                Err(_) => continue,
            };

            match signal.signal_type {
                SignalType::Shutdown => {
                    self.stop.store(true, Ordering::Relaxed);
                    return Ok(());
                }
                SignalType::TaskAssign => {
                    self.handle_task_assign(&role_name, signal).await?;
                }
                SignalType::StatusRequest => {
                    let reply = Signal::new(
                        SignalType::StatusResponse,
                        &role_name,
                        signal.sender.clone(),
                        serde_json::json!({"role": role_name, "pid": std::process::id(), "status": "running"}),
                    );
                    let _ = self.bus.send(reply).await;
                }
                _ => {}
            }
        }
    }

    async fn handle_task_assign(&self, role_name: &str, signal: Signal) -> AgentResult<()> {
        let task_id = signal.payload.get("task_id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let input_data = signal.payload.get("input_data").cloned().unwrap_or(Value::Null);

        self.store.upsert_agent_state(role_name, AgentStatus::Working, Some(std::process::id() as i64), Some(&task_id)).await?;

        let (output, success) = match self.role.handle_task(input_data).await {
            Ok(value) => (wrap_scalar(value), true),
            Err(message) => {
                tracing::warn!(role = role_name, task_id, error = %message, "task failed");
                (serde_json::json!({"error": message}), false)
            }
        };

        self.store.upsert_agent_state(role_name, AgentStatus::Idle, Some(std::process::id() as i64), Some(&task_id)).await?;
        if !task_id.is_empty() {
            if success {
                let _ = self.store.complete_task(&task_id, output.clone()).await;
            } else {
                let _ = self.store.fail_with_retry(&task_id, &output.to_string()).await;
            }
        }

        let reply = Signal::task_result(role_name, signal.sender, &task_id, output, success);
        self.bus.send(reply).await?;
        Ok(())
    }
}

fn wrap_scalar(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        serde_json::json!({"result": value})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct EchoRole {
        calls: AtomicU32,
    }

    #[async_trait]
    impl WorkerRole for EchoRole {
        fn role_name(&self) -> &str {
            "echo"
        }
        async fn handle_task(&self, input: Value) -> Result<Value, String> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(input)
        }
    }

    #[tokio::test]
    async fn shutdown_signal_ends_the_event_loop() {
        let store = Store::open_in_memory().await.unwrap();
        let bus = SignalBus::new();
        let role = Arc::new(EchoRole { calls: AtomicU32::new(0) });
        let chassis = WorkerChassis::new(role, store, bus.clone(), "supervisor", 512);

        let handle = tokio::spawn(chassis.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.send(Signal::shutdown("supervisor", "echo")).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn task_assign_wraps_scalar_result_and_replies() {
        let store = Store::open_in_memory().await.unwrap();
        let bus = SignalBus::new();
        let mut supervisor_inbox = bus.register("supervisor").await;
        let role = Arc::new(EchoRole { calls: AtomicU32::new(0) });
        let chassis = WorkerChassis::new(role, store, bus.clone(), "supervisor", 512);

        let handle = tokio::spawn(chassis.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.send(Signal::task_assign("supervisor", "echo", "t1", serde_json::json!("hi"))).await.unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(2), supervisor_inbox.recv()).await.unwrap().unwrap();
        assert_eq!(reply.signal_type, SignalType::TaskResult);
        assert_eq!(reply.payload["output_data"]["result"], "hi");

        bus.send(Signal::shutdown("supervisor", "echo")).await.unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }
}
