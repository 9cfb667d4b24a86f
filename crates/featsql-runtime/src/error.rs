//! Runtime error types.

use featsql_core::DecodeError;
use thiserror::Error;

/// Failures reported by a [`StoreExecutor`](crate::StoreExecutor).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// The store rejected or failed a statement.
    #[error("query failed: {reason}")]
    Query { sql: String, reason: String },

    /// A column could not be read as its expected type.
    #[error("unexpected column type: {0}")]
    ColumnType(String),
}

impl StoreError {
    pub fn query(sql: impl Into<String>, reason: impl ToString) -> Self {
        StoreError::Query {
            sql: sql.into(),
            reason: reason.to_string(),
        }
    }
}

/// Runtime errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Compilation, configuration or decoding error.
    #[error(transparent)]
    Core(#[from] featsql_core::Error),

    /// Store execution error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The connection budget cannot serve a single request.
    #[error("maxConnections={max_connections} is too low, a minimum of {required} is required")]
    CapacityTooLow {
        max_connections: usize,
        required: usize,
    },

    /// Too many requests are already waiting.
    #[error("request queue is full ({0} waiting)")]
    QueueFull(usize),

    /// The meta query returned no usable row.
    #[error("malformed meta row: {0}")]
    MalformedMetaRow(String),

    /// The pipeline was shut down.
    #[error("request pipeline closed")]
    Closed,
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Core(e.into())
    }
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;
