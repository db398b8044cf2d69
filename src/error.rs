//! Edge layer error types

use std::time::Duration;

/// Edge layer error types
#[derive(Debug, thiserror::Error)]
pub enum EdgeError {
    // Backing store errors
    #[error("store error: {0}")]
    Store(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    // Generation errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("empty response from model")]
    EmptyResponse,

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl EdgeError {
    /// Whether the error came from the backing store being slow or unreachable.
    ///
    /// The request-path components fail open on these.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, EdgeError::Store(_) | EdgeError::Timeout { .. })
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for EdgeError {
    fn from(err: redis::RedisError) -> Self {
        EdgeError::Store(err.to_string())
    }
}

impl From<reqwest::Error> for EdgeError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            EdgeError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            EdgeError::Http(err.to_string())
        }
    }
}

/// Run a future under a deadline, mapping expiry to [`EdgeError::Timeout`].
pub(crate) async fn with_timeout<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(EdgeError::Timeout { operation, after }),
    }
}

/// Result type alias for edge layer operations
pub type Result<T> = std::result::Result<T, EdgeError>;
