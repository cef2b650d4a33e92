//! The process supervisor (§4.H): spawns each worker role as a real child
//! process, bridges its piped stdio to the in-process `SignalBus` so the
//! rest of the runtime never needs to know whether a given role lives in
//! this process or another one, polls health on an interval, and restarts
//! or permanently fails workers per the state machine in the spec.
//!
//! Grounded on the teacher's `src-tauri/src/sidecar.rs` (process lifecycle:
//! spawn → store the child handle → track state → `stop`/`restart`, and the
//! "kill, wait with a timeout, then drop the handle" shutdown shape) and
//! `src-tauri/orchestrator/scheduler.rs` (one coordinating struct owning a
//! set of named workers plus a mutex-gated periodic housekeeping pass).

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};

use coterie_signals::{stdio, Signal, SignalBus, SignalType};
use coterie_store::{AgentStatus, Store};

use crate::agent::{sample_process, ManagedAgent};
use crate::backoff::backoff_for_attempt;
use crate::error::{SupervisorError, SupervisorResult};

const COLLECTOR_QUEUE_DEPTH: usize = 512;

#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    pub poll_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub rss_cap_mb: u64,
    pub cpu_threshold_percent: f32,
    pub cpu_sustained_for: Duration,
    pub shutdown_grace: Duration,
    pub max_restarts: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            heartbeat_timeout: Duration::from_secs(15),
            rss_cap_mb: 512,
            cpu_threshold_percent: 90.0,
            cpu_sustained_for: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(2),
            max_restarts: 5,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusEntry {
    pub role: String,
    pub status: String,
    pub pid: Option<u32>,
    pub restart_count: u32,
    pub heartbeat_age_secs: u64,
}

pub struct Supervisor {
    agents: Mutex<HashMap<String, ManagedAgent>>,
    bus: SignalBus,
    store: Store,
    binary_path: PathBuf,
    workspace: PathBuf,
    config: SupervisorConfig,
    housekeeping_lock: Mutex<()>,
    collector_tx: mpsc::Sender<Signal>,
    collector_rx: Mutex<Option<mpsc::Receiver<Signal>>>,
    stop: AtomicBool,
}

impl Supervisor {
    pub fn new(
        roles: impl IntoIterator<Item = (String, u64)>,
        bus: SignalBus,
        store: Store,
        binary_path: PathBuf,
        workspace: PathBuf,
        config: SupervisorConfig,
    ) -> Arc<Self> {
        let mut agents = HashMap::new();
        for (role, ram_cap_mb) in roles {
            agents.insert(role.clone(), ManagedAgent::not_started(role, ram_cap_mb));
        }
        let (collector_tx, collector_rx) = mpsc::channel(COLLECTOR_QUEUE_DEPTH);
        Arc::new(Self {
            agents: Mutex::new(agents),
            bus,
            store,
            binary_path,
            workspace,
            config,
            housekeeping_lock: Mutex::new(()),
            collector_tx,
            collector_rx: Mutex::new(Some(collector_rx)),
            stop: AtomicBool::new(false),
        })
    }

    /// Spawns every registered role that isn't already running. Called once
    /// at startup; individual roles can also be brought up later via
    /// `start_agent`.
    pub async fn start_all(&self) -> SupervisorResult<()> {
        let roles: Vec<String> = self.agents.lock().await.keys().cloned().collect();
        for role in roles {
            self.spawn_agent(&role).await?;
        }
        Ok(())
    }

    /// Returns `true` if `role` is now running (spawning it if needed),
    /// `false` if `role` names no managed agent.
    pub async fn start_agent(&self, role: &str) -> bool {
        let already_running = {
            let agents = self.agents.lock().await;
            match agents.get(role) {
                Some(agent) => agent.is_running(),
                None => return false,
            }
        };
        if already_running {
            return true;
        }
        self.spawn_agent(role).await.is_ok()
    }

    async fn spawn_agent(&self, role: &str) -> SupervisorResult<()> {
        let ram_cap_mb = {
            let agents = self.agents.lock().await;
            agents.get(role).map(|a| a.ram_cap_mb).ok_or_else(|| SupervisorError::UnknownRole(role.to_string()))?
        };

        let mut command = Command::new(&self.binary_path);
        command
            .arg("worker")
            .arg("--role")
            .arg(role)
            .arg("--workspace")
            .arg(&self.workspace)
            .arg("--ram-cap-mb")
            .arg(ram_cap_mb.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| SupervisorError::Spawn { role: role.to_string(), source })?;
        let pid = child.id();
        let stdin = child.stdin.take().expect("stdin piped at spawn");
        let stdout = child.stdout.take().expect("stdout piped at spawn");

        let mut inbox = self.bus.register(role).await;
        let stdin_task = tokio::spawn(async move {
            while let Some(signal) = inbox.recv().await {
                if stdio::write_signal(&mut stdin, &signal).await.is_err() {
                    break;
                }
            }
        });
        let stdout_task = tokio::spawn(stdio::drain_signal_lines(stdout, self.collector_tx.clone()));

        self.store.upsert_agent_state(role, AgentStatus::Idle, pid.map(|p| p as i64), None).await?;

        let mut agents = self.agents.lock().await;
        let agent = agents.get_mut(role).ok_or_else(|| SupervisorError::UnknownRole(role.to_string()))?;
        agent.child = Some(child);
        agent.pid = pid;
        agent.stdin_task = Some(stdin_task);
        agent.stdout_task = Some(stdout_task);
        agent.last_heartbeat = Instant::now();
        agent.high_cpu_since = None;
        tracing::info!(role, pid, "worker process spawned");
        Ok(())
    }

    async fn restart_agent(&self, role: &str) {
        let attempt = {
            let mut agents = self.agents.lock().await;
            let Some(agent) = agents.get_mut(role) else { return };
            if !agent.enabled {
                return;
            }
            if agent.restart_count >= self.config.max_restarts {
                agent.enabled = false;
                drop(agents);
                let _ = self.store.upsert_agent_state(role, AgentStatus::Crashed, None, None).await;
                tracing::error!(role, "restart budget exhausted, marking crashed");
                return;
            }
            agent.restart_count += 1;
            agent.restart_count
        };

        let delay = backoff_for_attempt(attempt);
        tracing::warn!(role, attempt, delay_secs = delay.as_secs(), "restarting worker after backoff");
        tokio::time::sleep(delay).await;
        if let Err(err) = self.spawn_agent(role).await {
            tracing::error!(role, error = %err, "restart attempt failed to respawn worker");
        }
    }

    async fn kill_for_breach(&self, role: &str, reason: &str) {
        tracing::warn!(role, reason, "killing worker: health breach detected");
        {
            let mut agents = self.agents.lock().await;
            if let Some(agent) = agents.get_mut(role) {
                if let Some(mut child) = agent.child.take() {
                    let _ = child.start_kill();
                    let _ = tokio::time::timeout(Duration::from_secs(3), child.wait()).await;
                }
                agent.clear_process_handles();
            }
        }
        let _ = self.store.upsert_agent_state(role, AgentStatus::Killed, None, None).await;
        self.restart_agent(role).await;
    }

    /// One housekeeping pass. A non-blocking acquire on `housekeeping_lock`
    /// means an overrunning previous cycle causes this one to be skipped
    /// outright rather than queueing up behind it.
    pub async fn poll_cycle(&self) {
        let Ok(_permit) = self.housekeeping_lock.try_lock() else {
            tracing::debug!("housekeeping already in progress, skipping this poll cycle");
            return;
        };

        let roles: Vec<String> = self.agents.lock().await.keys().cloned().collect();
        for role in roles {
            let (enabled, running, pid, heartbeat_age) = {
                let agents = self.agents.lock().await;
                let Some(agent) = agents.get(&role) else { continue };
                (agent.enabled, agent.is_running(), agent.pid, agent.heartbeat_age())
            };
            if !enabled {
                continue;
            }
            if !running {
                self.restart_agent(&role).await;
                continue;
            }
            if heartbeat_age > self.config.heartbeat_timeout {
                self.kill_for_breach(&role, "heartbeat silence exceeded timeout").await;
                continue;
            }

            let Some(pid) = pid else { continue };
            let Some(sample) = sample_process(pid) else { continue };

            if sample.rss_bytes > self.config.rss_cap_mb * 1024 * 1024 {
                self.kill_for_breach(&role, "resident set size exceeded cap").await;
                continue;
            }

            if sample.cpu_percent > self.config.cpu_threshold_percent {
                let sustained_since = {
                    let mut agents = self.agents.lock().await;
                    let agent = agents.get_mut(&role).expect("role present");
                    *agent.high_cpu_since.get_or_insert_with(Instant::now)
                };
                if sustained_since.elapsed() > self.config.cpu_sustained_for {
                    self.kill_for_breach(&role, "cpu usage sustained above threshold").await;
                }
            } else {
                let mut agents = self.agents.lock().await;
                if let Some(agent) = agents.get_mut(&role) {
                    agent.high_cpu_since = None;
                }
            }
        }
    }

    async fn run_polling_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        loop {
            interval.tick().await;
            if self.stop.load(Ordering::Relaxed) {
                return;
            }
            self.poll_cycle().await;
        }
    }

    async fn handle_collected_signal(&self, signal: Signal) {
        match signal.signal_type {
            SignalType::Heartbeat => {
                let mut agents = self.agents.lock().await;
                if let Some(agent) = agents.get_mut(&signal.sender) {
                    let now = Instant::now();
                    // Monotonic per worker: a late heartbeat from a prior
                    // cycle must not roll `last_heartbeat` backwards.
                    if now > agent.last_heartbeat {
                        agent.last_heartbeat = now;
                    }
                    agent.restart_count = 0;
                }
            }
            SignalType::StatusRequest if signal.target == "supervisor" => {
                self.answer_status_request(signal).await;
            }
            _ => {
                if let Err(err) = self.bus.send(signal).await {
                    tracing::debug!(error = %err, "collected signal has no reachable in-process target");
                }
            }
        }
    }

    async fn run_collector_loop(self: Arc<Self>) {
        let rx = self.collector_rx.lock().await.take();
        let Some(mut rx) = rx else { return };
        while let Some(signal) = rx.recv().await {
            self.handle_collected_signal(signal).await;
        }
    }

    /// Listens on the supervisor's own bus inbox for `status_request`
    /// signals addressed directly to it (the CLI's `status` surface, §6).
    async fn run_status_responder_loop(self: Arc<Self>) {
        let mut inbox = self.bus.register("supervisor").await;
        while let Some(signal) = inbox.recv().await {
            if matches!(signal.signal_type, SignalType::StatusRequest) {
                self.answer_status_request(signal).await;
            }
        }
    }

    async fn answer_status_request(&self, request: Signal) {
        let entries = self.status().await;
        let reply = Signal::new(
            SignalType::StatusResponse,
            "supervisor",
            request.sender,
            serde_json::json!({ "agents": entries }),
        );
        let _ = self.bus.send(reply).await;
    }

    pub async fn status(&self) -> Vec<StatusEntry> {
        let agents = self.agents.lock().await;
        let mut entries: Vec<StatusEntry> = agents
            .values()
            .map(|agent| StatusEntry {
                role: agent.role.clone(),
                status: if agent.is_running() {
                    "running".to_string()
                } else if agent.enabled {
                    "not_started".to_string()
                } else {
                    "crashed".to_string()
                },
                pid: agent.pid,
                restart_count: agent.restart_count,
                heartbeat_age_secs: agent.heartbeat_age().as_secs(),
            })
            .collect();
        entries.sort_by(|a, b| a.role.cmp(&b.role));
        entries
    }

    /// Runs the polling loop, the collector loop, and the status responder
    /// loop concurrently until `shutdown` flips the stop flag and every
    /// worker has been told to exit.
    pub async fn run(self: Arc<Self>) {
        let poll = tokio::spawn(Arc::clone(&self).run_polling_loop());
        let collector = tokio::spawn(Arc::clone(&self).run_collector_loop());
        let status = tokio::spawn(Arc::clone(&self).run_status_responder_loop());
        let _ = tokio::join!(poll, collector, status);
    }

    /// Broadcasts `shutdown` to every managed worker's inbox, waits the
    /// configured grace window, then force-kills and reaps any survivors.
    pub async fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let roles: Vec<String> = self.agents.lock().await.keys().cloned().collect();
        for role in &roles {
            let _ = self.bus.send(Signal::shutdown("supervisor", role)).await;
        }

        tokio::time::sleep(self.config.shutdown_grace).await;

        let mut agents = self.agents.lock().await;
        for role in &roles {
            let Some(agent) = agents.get_mut(role) else { continue };
            if let Some(mut child) = agent.child.take() {
                match child.try_wait() {
                    Ok(Some(_)) => {}
                    _ => {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                    }
                }
            }
            agent.clear_process_handles();
        }
        tracing::info!("supervisor shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SupervisorConfig {
        SupervisorConfig {
            poll_interval: Duration::from_millis(20),
            heartbeat_timeout: Duration::from_millis(200),
            rss_cap_mb: 4096,
            cpu_threshold_percent: 95.0,
            cpu_sustained_for: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(50),
            max_restarts: 2,
        }
    }

    #[tokio::test]
    async fn start_agent_on_unknown_role_returns_false() {
        let store = Store::open_in_memory().await.unwrap();
        let bus = SignalBus::new();
        let supervisor = Supervisor::new(
            Vec::<(String, u64)>::new(),
            bus,
            store,
            PathBuf::from("/bin/true"),
            PathBuf::from("/tmp"),
            test_config(),
        );
        assert!(!supervisor.start_agent("ghost").await);
    }

    #[tokio::test]
    async fn status_reports_not_started_before_any_spawn() {
        let store = Store::open_in_memory().await.unwrap();
        let bus = SignalBus::new();
        let supervisor = Supervisor::new(
            vec![("researcher".to_string(), 512)],
            bus,
            store,
            PathBuf::from("/bin/true"),
            PathBuf::from("/tmp"),
            test_config(),
        );
        let entries = supervisor.status().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, "not_started");
        assert_eq!(entries[0].restart_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_restart_budget_marks_agent_crashed_and_disabled() {
        let store = Store::open_in_memory().await.unwrap();
        let bus = SignalBus::new();
        let supervisor = Supervisor::new(
            vec![("coder".to_string(), 512)],
            bus,
            store,
            PathBuf::from("/definitely/not/a/real/binary"),
            PathBuf::from("/tmp"),
            test_config(),
        );

        supervisor.restart_agent("coder").await;
        supervisor.restart_agent("coder").await;
        supervisor.restart_agent("coder").await;

        let entries = supervisor.status().await;
        assert_eq!(entries[0].status, "crashed");
    }
}
