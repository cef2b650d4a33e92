use serde::{Deserialize, Serialize};

/// The allocator's decision on which model class a delegation should use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskTier {
    Complex,
    Simple,
    Fast,
}

impl TaskTier {
    /// complex -> simple -> fast, used by the financial allocator's one-step downgrade.
    pub fn downgrade(self) -> Option<TaskTier> {
        match self {
            TaskTier::Complex => Some(TaskTier::Simple),
            TaskTier::Simple => Some(TaskTier::Fast),
            TaskTier::Fast => None,
        }
    }

    pub fn token_scale(self) -> f64 {
        match self {
            TaskTier::Complex => 1.0,
            TaskTier::Simple => 0.75,
            TaskTier::Fast => 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Working,
    Crashed,
    Killed,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Crashed => "crashed",
            AgentStatus::Killed => "killed",
        }
    }
}
