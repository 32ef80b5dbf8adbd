//! Unified error handling for the client.

use crate::config::ConfigError;

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Engine error: {0}")]
    Engine(#[from] cirrus_engine::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend error {code} (status {status}): {message}")]
    Backend {
        status: u16,
        code: i64,
        message: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Blocking call made from inside the async runtime")]
    BlockingInRuntime,

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Whether the failure came from the network or the backend rather than
    /// from the caller's own data.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            ClientError::Http(_) | ClientError::Backend { .. } | ClientError::InvalidResponse(_)
        )
    }
}

/// Result type alias for client calls.
pub type Result<T> = std::result::Result<T, ClientError>;
