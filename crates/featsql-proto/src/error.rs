//! Protocol error types.

use thiserror::Error;

/// Errors raised while constructing or reading protocol types.
#[derive(Debug, Error)]
pub enum Error {
    /// A structured filter could not be deserialized.
    #[error("invalid filter document: {0}")]
    InvalidFilter(String),

    /// A table path string did not follow the `/segment/segment` form.
    #[error("invalid table path: {0}")]
    InvalidTablePath(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidFilter(e.to_string())
    }
}
