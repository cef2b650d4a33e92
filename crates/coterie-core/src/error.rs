use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] coterie_store::StoreError),

    #[error("router error: {0}")]
    Router(#[from] coterie_router::RouterError),

    #[error("memory error: {0}")]
    Memory(#[from] coterie_memory::MemoryError),

    #[error("delegation to '{role}' escalated after {strikes} failed attempts: {detail}")]
    Escalated { role: String, strikes: u32, detail: String },
}

pub type CoreResult<T> = Result<T, CoreError>;
