use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed timing or text in a subtitle track. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Acquisition error: {0}")]
    Acquisition(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

impl RelayError {
    /// Failures of an external collaborator, as opposed to bad input data.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::Acquisition(_)
                | Self::Translation(_)
                | Self::Encoding(_)
                | Self::Publish(_)
                | Self::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

/// Run `future` under a deadline, mapping expiry to [`RelayError::Timeout`].
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(RelayError::Timeout {
            operation: operation.to_string(),
            seconds: limit.as_secs(),
        }),
    }
}
