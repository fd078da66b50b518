use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates supported `AssistClientError` values.
pub enum AssistClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid gateway base url '{0}'")]
    InvalidBaseUrl(String),
}
