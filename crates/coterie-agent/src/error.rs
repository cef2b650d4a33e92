use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("store error: {0}")]
    Store(#[from] coterie_store::StoreError),

    #[error("router error: {0}")]
    Router(#[from] coterie_router::RouterError),

    #[error("signal bus error: {0}")]
    Signal(#[from] coterie_signals::SignalError),
}

pub type AgentResult<T> = Result<T, AgentError>;
