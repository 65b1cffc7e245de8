use crate::size::SizeError;
use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised while configuring, talking to the backend or uploading.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Missing or malformed settings
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration error: {0}")]
    InvalidSize(#[from] SizeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level failure (connect, timeout, body, decode)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with an unexpected status
    #[error("HTTP status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,

    /// Fewer parts than planned made it to the backend
    #[error("upload failed: {name}")]
    Incomplete {
        name: String,
        uploaded: usize,
        expected: usize,
    },
}

impl UploadError {
    /// Whether the pacer should try the call again.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Status { status, .. } => is_retryable_status(*status),
            UploadError::Http(err) => {
                if let Some(status) = err.status() {
                    return is_retryable_status(status);
                }
                err.is_connect() || err.is_timeout() || err.is_request()
            }
            _ => false,
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504 | 509)
}
