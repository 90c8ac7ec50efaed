mod channel;
mod music;

pub use channel::*;
pub use music::*;

use std::time::Duration;

use thiserror::Error;

/// A failed call to the call/chat channel or the music provider
#[derive(Debug, Clone, Error)]
pub enum ExternalError {
    #[error("No response within {0:?}")]
    Timeout(Duration),
    #[error("Request failed: {0}")]
    Http(String),
    /// The provider refused the credentials or the request itself
    #[error("Request was rejected with status {0}")]
    Rejected(u16),
    #[error("Unexpected response status {0}")]
    Unexpected(u16),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Client could not be configured: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for ExternalError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::InvalidResponse(value.to_string())
        } else {
            Self::Http(value.to_string())
        }
    }
}

/// Maps a non-success status to an error. 400 and 401 mean the request or its
/// credentials will never succeed as-is.
pub(crate) fn check_status(status: reqwest::StatusCode) -> Result<(), ExternalError> {
    match status.as_u16() {
        _ if status.is_success() => Ok(()),
        400 | 401 | 403 => Err(ExternalError::Rejected(status.as_u16())),
        other => Err(ExternalError::Unexpected(other)),
    }
}
