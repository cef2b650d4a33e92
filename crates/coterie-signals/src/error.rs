use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("no registered inbox for agent {0:?}")]
    UnknownTarget(String),

    #[error("send to {target} timed out after queue stayed full")]
    SendTimeout { target: String },

    #[error("inbox closed for {0:?}")]
    ChannelClosed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed signal line: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type SignalResult<T> = Result<T, SignalError>;
