//! Worker chassis and concrete worker roles (§4.G): the process-entry
//! sequence and dual main/heartbeat loop every worker shares, plus the
//! `researcher`/`coder`/`communicator` role implementations the supervisor
//! spawns and the CEO can also instantiate in-process for delegation.

mod chassis;
mod error;
mod rammem;
mod roles;

pub use chassis::{WorkerChassis, WorkerRole};
pub use error::{AgentError, AgentResult};
pub use rammem::apply_ram_cap_mb;
pub use roles::{CoderWorker, CommunicatorWorker, ResearcherWorker};
