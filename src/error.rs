use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlakeLensError {
    #[error("API request failed with status {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("API request failed with status {status} after {attempts} attempts")]
    ApiErrorAfterRetries { status: u16, attempts: u32 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid timestamp '{0}': expected ISO-8601")]
    InvalidTimestamp(String),

    #[error("Historical store belongs to {found}, expected {expected}")]
    PlatformMismatch { expected: String, found: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FlakeLensError>;
