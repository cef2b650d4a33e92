use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("store error: {0}")]
    Store(#[from] coterie_store::StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("router error: {0}")]
    Router(#[from] coterie_router::RouterError),
}

pub type MemoryResult<T> = Result<T, MemoryError>;
