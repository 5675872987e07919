//! Control-plane error types

use thiserror::Error;

/// Stratus API error
#[derive(Error, Debug)]
pub enum CloudError {
    /// Transport-level failure (connect, TLS, timeout)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The referenced object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Authentication failed or the token expired
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Response body did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl CloudError {
    /// True when the failure means the object is absent remotely.
    ///
    /// Delete-of-absent relies on this to report success.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for control-plane operations
pub type CloudResult<T> = Result<T, CloudError>;
