use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("unknown managed role: {0}")]
    UnknownRole(String),

    #[error("failed to spawn worker process for role {role}: {source}")]
    Spawn { role: String, source: std::io::Error },

    #[error("store error: {0}")]
    Store(#[from] coterie_store::StoreError),

    #[error("signal bus error: {0}")]
    Signal(#[from] coterie_signals::SignalError),
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
