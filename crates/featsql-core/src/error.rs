//! Core error types.

use featsql_proto::TablePath;
use thiserror::Error;

/// Errors detected while building a schema tree or compiling templates.
///
/// These are raised before any query runs and always name the offending
/// path or property.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source path does not follow the table path grammar.
    #[error("Invalid sourcePath in provider configuration: {path} ({reason})")]
    InvalidSourcePath { path: String, reason: String },

    /// A table reached through a relation has an empty sort key.
    #[error("missing sort key for table '{table}' in source path {path}")]
    MissingSortKey { table: String, path: String },

    /// An array property is not reached through any relation.
    #[error("array property '{0}' requires a relation in its source path")]
    MissingRelation(String),

    /// Two sibling properties share a name.
    #[error("duplicate property '{0}'")]
    DuplicateProperty(String),

    /// No feature type with this name is registered.
    #[error("unknown feature type: {0}")]
    UnknownFeatureType(String),

    /// The junction table pattern is not a valid regular expression.
    #[error("invalid junction table pattern: {0}")]
    InvalidJunctionPattern(String),

    /// A `{filter=...}` flag could not be turned into a filter expression.
    #[error("invalid filter flag in {path}: {reason}")]
    FilterFlag { path: String, reason: String },

    /// Any other inconsistent configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised while compiling a filter expression to SQL.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The property does not resolve to a column of the schema.
    #[error("Filter is invalid. Unknown property: {0}")]
    UnknownProperty(String),

    /// The operand combination cannot be expressed in SQL.
    #[error("Filter is invalid. Unsupported operands: {0}")]
    UnsupportedOperands(String),

    /// `accenti()` was used but no collation is configured.
    #[error("Filter is invalid. ACCENTI() requires a configured collation")]
    MissingCollation,

    /// `position()` was used outside of a nested property filter.
    #[error("Filter is invalid. POSITION() is only allowed in nested property filters")]
    PositionOutsideNestedFilter,

    /// A literal cannot be rendered in the target dialect.
    #[error("Filter is invalid. Invalid literal: {0}")]
    InvalidLiteral(String),
}

/// Decode invariant violations. These indicate a mismatch between the
/// compiled templates and the rows fed to the decoder.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// A row belongs to a table path no template produced.
    #[error("row references unknown table path {0}")]
    UnknownTablePath(TablePath),

    /// A row carries the wrong number of sort keys for its table.
    #[error("row for {path} has {actual} sort keys, expected {expected}")]
    KeyCountMismatch {
        path: TablePath,
        expected: usize,
        actual: usize,
    },

    /// A row carries the wrong number of value columns for its table.
    #[error("row for {path} has {actual} values, expected {expected}")]
    ColumnCountMismatch {
        path: TablePath,
        expected: usize,
        actual: usize,
    },

    /// A geometry column could not be decoded.
    #[error("invalid geometry: {0}")]
    Geometry(String),
}

/// Core errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] featsql_proto::Error),

    /// A meta query row could not be interpreted.
    #[error("malformed meta row: {0}")]
    MalformedMetaRow(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
