//! The signal bus every component uses to talk to every other component:
//! an in-process pub/sub hub for same-process agents, and a JSON-lines
//! stdio framing for agents running as real child processes.

mod bus;
mod error;
pub mod stdio;

pub use bus::SignalBus;
pub use coterie_types::{Signal, SignalType};
pub use error::{SignalError, SignalResult};
