//! featsql runtime - async request pipeline on tokio.
//!
//! # Modules
//!
//! - [`executor`] - Store executor trait and statements
//! - [`budget`] - Request concurrency budget
//! - [`merge`] - Async merge of value query streams
//! - [`provider`] - Page requests: meta query, value queries, decoding
//! - [`error`] - Error types

pub mod budget;
pub mod error;
pub mod executor;
pub mod merge;
pub mod provider;

pub use budget::{ConcurrencyBudget, RequestPermit};
pub use error::{Error, Result, StoreError};
pub use executor::{RowStream, Statement, StoreExecutor};
pub use merge::{MergedStream, SqlRowStream};
pub use provider::{FeatureProvider, FeatureStream};
