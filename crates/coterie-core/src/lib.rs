//! The CEO coordinator (§4.J) and the layered configuration loader that
//! wires every other crate together into a running process (§10.L).

mod ceo;
mod config;
mod error;
mod notes;

pub use ceo::Ceo;
pub use config::{
    default_tier, load as load_config, providers_from_config, AgentBudget, BudgetSettings, Config,
    MemorySettings, ProviderSettings, WatchdogSettings,
};
pub use error::{CoreError, CoreResult};
pub use notes::{append_note_line, load_note};
