//! Schema model: relations, source paths and the per-feature-type tree.

pub mod path;
pub mod relation;
pub mod tree;

pub use path::{parse_relative_path, parse_root_path, Flag, SourcePath, TableSegment};
pub use relation::{Cardinality, Junction, Relation, TableRef};
pub use tree::{
    ColumnSource, NodeId, NodeKind, SchemaBuilder, SchemaNode, SchemaTree, TableId, TableNode,
};

use featsql_proto::Expr;

/// Turns the text of a `{filter=...}` flag into a filter expression.
///
/// CQL2 text parsing lives outside this crate; implementations adapt
/// whichever parser the deployment uses.
pub trait FilterParser: Send + Sync {
    fn parse(&self, text: &str) -> Result<Expr, String>;
}
