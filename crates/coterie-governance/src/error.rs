use thiserror::Error;

#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("store error: {0}")]
    Store(#[from] coterie_store::StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),
}

pub type GovernanceResult<T> = Result<T, GovernanceError>;
