#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider}: request failed with status {status}: {detail}")]
    Http {
        provider: String,
        status: u16,
        detail: String,
    },

    #[error("{provider}: transport error: {source}")]
    Transport {
        provider: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{0}: no completion content in response")]
    EmptyResponse(String),

    #[error("{0}: provider is disabled (no API key configured)")]
    Disabled(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;
