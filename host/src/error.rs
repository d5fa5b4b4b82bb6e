//! Error types for remote data sources.

use thiserror::Error;

/// Everything that can go wrong while polling one source.
///
/// Every variant maps to `ConnectionStatus::Error`; only `Config` also stops
/// the polling loop.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SourceError {
    /// Required configuration is missing. Permanent until reconfigured.
    #[error("Missing configuration: {0}")]
    Config(String),

    /// Request could not be sent or the body could not be read.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Request timed out.
    #[error("Request timed out")]
    Timeout,

    /// Server answered with a non-success status.
    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    /// Body is not the json document we expected.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Body parsed but has the wrong shape (length or element types).
    #[error("Unexpected response shape: {0}")]
    Shape(String),

    /// Endpoint reported its own failure inside a successful response.
    #[error("Remote reported failure: {0}")]
    Remote(String),
}

impl SourceError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, SourceError::Config(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout
        } else if let Some(status) = err.status() {
            SourceError::Status(status.as_u16())
        } else if err.is_decode() {
            SourceError::Parse(err.to_string())
        } else {
            SourceError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(err.to_string())
    }
}
