//! Shared types for the featsql read path.
//!
//! # Modules
//!
//! - [`value`] - Opaque store values and their total order
//! - [`filter`] - Filter expression AST consumed by the SQL filter compiler
//! - [`geometry`] - Geometry literals for spatial predicates
//! - [`query`] - Page request parameters
//! - [`row`] - Value query rows and table paths
//! - [`event`] - Nested feature events produced by the decoder
//! - [`error`] - Error types

pub mod error;
pub mod event;
pub mod filter;
pub mod geometry;
pub mod query;
pub mod row;
pub mod value;

pub use error::Error;

pub use event::{Counts, FeatureEvent, SchemaPath};
pub use filter::{
    ArrayOp, Bound, ComparisonOp, Expr, Function, Operand, Property, Scalar, SpatialOp,
    TemporalLiteral, TemporalOp,
};
pub use geometry::{Coord, Geometry, Shape};
pub use query::{Direction, QueryRequest, SortKey};
pub use row::{SqlRow, TablePath};
pub use value::{Value, ValueType};
