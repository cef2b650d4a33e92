pub mod message;
pub mod signal;
pub mod task;

pub use message::{estimate_tokens, ChatMessage, Role};
pub use signal::{Signal, SignalType};
pub use task::{AgentStatus, TaskStatus, TaskTier};
