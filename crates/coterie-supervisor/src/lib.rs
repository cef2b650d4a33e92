//! Spawns, health-polls, restarts, and routes signals for worker child
//! processes (§4.H). The supervisor is the bridge between the fleet's
//! process-per-worker topology and the in-process `SignalBus`: any signal
//! addressed to a managed role is forwarded over that worker's piped stdin,
//! and anything the worker writes to stdout is parsed back into `Signal`s
//! and routed to whatever named recipient they target.

mod agent;
mod backoff;
mod error;
mod supervisor;

pub use agent::{sample_process, ManagedAgent, ResourceSample};
pub use error::{SupervisorError, SupervisorResult};
pub use supervisor::{StatusEntry, Supervisor, SupervisorConfig};
