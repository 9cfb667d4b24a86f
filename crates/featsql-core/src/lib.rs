//! featsql core - schema derivation, SQL template compilation and decoding.
//!
//! A feature type configuration is turned into a [`SchemaTree`], compiled
//! once into [`CompiledQueries`] (one meta query and one value query per
//! anchor table) and cached in the [`TemplateRegistry`]. The rows the store
//! returns for those queries are merged and decoded into nested
//! [`FeatureEvent`](featsql_proto::FeatureEvent)s.
//!
//! # Modules
//!
//! - [`config`] - Provider and feature type configuration
//! - [`schema`] - Source paths, relations and the schema tree
//! - [`dialect`] - SQL dialects (PostGIS, GeoPackage)
//! - [`query`] - Filter compilation, query templates and the registry
//! - [`decode`] - Row merging and feature decoding
//! - [`error`] - Error types

pub mod config;
pub mod decode;
pub mod dialect;
pub mod error;
pub mod query;
pub mod schema;

pub use config::{
    DialectKind, FeatureTypeConfig, PropertyConfig, PropertyType, ProviderConfig, Role,
};
pub use decode::{decode, DecodeIter, DecoderLayout, FeatureDecoder, RowOrdering};
pub use dialect::{dialect_for, SqlDialect};
pub use error::{ConfigError, DecodeError, Error, FilterError, Result};
pub use query::{
    compile_feature_type, CompiledQueries, FilterCompiler, KeyRange, MetaResult, QueryCompiler,
    TemplateRegistry,
};
pub use schema::{FilterParser, SchemaTree};
