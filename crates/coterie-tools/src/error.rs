use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("path escape attempt: {0:?}")]
    PathEscape(String),

    #[error("store error: {0}")]
    Store(#[from] coterie_store::StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

pub type ToolResult<T> = Result<T, ToolError>;
