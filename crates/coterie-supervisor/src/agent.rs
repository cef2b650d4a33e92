use std::time::{Duration, Instant};

use tokio::process::Child;
use tokio::task::JoinHandle;

/// One worker this supervisor manages. Grounded on the teacher's
/// `SidecarState`/process bookkeeping in `src-tauri/src/sidecar.rs`, adapted
/// from a single HTTP sidecar to an arbitrary number of named worker roles
/// each carrying their own heartbeat and restart history (§4.H).
pub struct ManagedAgent {
    pub role: String,
    pub ram_cap_mb: u64,
    pub child: Option<Child>,
    pub pid: Option<u32>,
    pub stdin_task: Option<JoinHandle<()>>,
    pub stdout_task: Option<JoinHandle<()>>,
    pub last_heartbeat: Instant,
    pub restart_count: u32,
    pub high_cpu_since: Option<Instant>,
    pub enabled: bool,
}

impl ManagedAgent {
    pub fn not_started(role: impl Into<String>, ram_cap_mb: u64) -> Self {
        Self {
            role: role.into(),
            ram_cap_mb,
            child: None,
            pid: None,
            stdin_task: None,
            stdout_task: None,
            last_heartbeat: Instant::now(),
            restart_count: 0,
            high_cpu_since: None,
            enabled: true,
        }
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    pub fn heartbeat_age(&self) -> Duration {
        self.last_heartbeat.elapsed()
    }

    /// Aborts the stdin/stdout bridge tasks and drops the child handle.
    /// Does not itself send a kill signal — callers decide graceful vs forced.
    pub fn clear_process_handles(&mut self) {
        if let Some(task) = self.stdin_task.take() {
            task.abort();
        }
        if let Some(task) = self.stdout_task.take() {
            task.abort();
        }
        self.child = None;
        self.pid = None;
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ResourceSample {
    pub rss_bytes: u64,
    pub cpu_percent: f32,
}

/// Samples RSS and CPU for `pid` via `sysinfo`. Returns `None` if the
/// process is gone (already exited, race with the poll cycle) rather than
/// erroring — a vanished process is handled by the "no live process" branch
/// of the poll loop, not by this sampler.
pub fn sample_process(pid: u32) -> Option<ResourceSample> {
    let mut system = sysinfo::System::new();
    let sys_pid = sysinfo::Pid::from_u32(pid);
    system.refresh_process(sys_pid);
    let process = system.process(sys_pid)?;
    Some(ResourceSample {
        rss_bytes: process.memory(),
        cpu_percent: process.cpu_usage(),
    })
}
