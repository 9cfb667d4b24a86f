//! SQL generation: aliases, joins, filters and query templates.

pub mod alias;
pub mod filter;
pub mod join;
pub mod registry;
pub mod template;

pub use alias::{alias, aliases, aliases_from, level_aliases, table_count, target_alias};
pub use filter::FilterCompiler;
pub use join::{joins, JoinStep, JoinType};
pub use registry::{ReloadSummary, TemplateRegistry};
pub use template::{
    compile_feature_type, ColumnType, CompiledQueries, KeyRange, MetaResult, QueryCompiler,
    RenderedQueries, ValueColumn, ValueTemplate, META_COLUMNS, SORT_KEY, USER_SORT_KEY,
};
