//! Query template compiler.
//!
//! A feature type compiles into one meta query and one value query per
//! *anchor* table. An anchor is the root table or any table reached through
//! a to-many step; one-to-one descendants are folded into their anchor's
//! query with `LEFT JOIN`s.
//!
//! Every value query selects, in this order:
//!
//! 1. the user sort key columns `CSKEY_0..`,
//! 2. the structural sort keys `SKEY, SKEY_1..` of every level from the
//!    root table down to the anchor,
//! 3. the returnable columns of the anchor and its folded tables, in
//!    declaration order.
//!
//! The meta query orders by the same user sort columns followed by `SKEY`,
//! so both agree on the page a row belongs to.

use std::sync::Arc;

use featsql_proto::{
    Counts, Direction, Expr, Operand, QueryRequest, SchemaPath, SortKey, SqlRow, TablePath,
    Value, ValueType,
};
use tracing::{debug, trace};

use super::alias::{alias, aliases, level_aliases, table_count, target_alias};
use super::filter::FilterCompiler;
use super::join::{joins, JoinType};
use crate::config::{FeatureTypeConfig, ProviderConfig};
use crate::decode::DecoderLayout;
use crate::dialect::{dialect_for, SqlDialect};
use crate::error::{DecodeError, Error, FilterError, Result};
use crate::schema::{ColumnSource, FilterParser, NodeId, SchemaBuilder, SchemaTree, TableId};

/// Column name of the root sort key.
pub const SORT_KEY: &str = "SKEY";

/// Column name prefix of the user sort keys.
pub const USER_SORT_KEY: &str = "CSKEY";

/// Expected type of a result column, handed to the store executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    SortKey,
    Count,
    Value(ValueType),
}

/// Column types of a meta query row.
pub const META_COLUMNS: [ColumnType; 5] = [
    ColumnType::SortKey,
    ColumnType::SortKey,
    ColumnType::Count,
    ColumnType::Count,
    ColumnType::Count,
];

/// Inclusive window of root sort keys covering one page.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    pub min: Value,
    pub max: Value,
}

/// Interpretation of the single meta query row.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaResult {
    /// Root key window, `None` for empty pages and user sort orders.
    pub window: Option<KeyRange>,
    pub counts: Counts,
}

impl MetaResult {
    /// Parse `[minKey, maxKey, numberReturned, numberMatched, numberSkipped]`.
    pub fn from_row(row: &[Value]) -> Result<Self> {
        if row.len() != META_COLUMNS.len() {
            return Err(Error::MalformedMetaRow(format!(
                "expected {} columns, got {}",
                META_COLUMNS.len(),
                row.len()
            )));
        }
        let count = |index: usize, name: &str| -> Result<i64> {
            if row[index].is_null() {
                return Ok(-1);
            }
            row[index].as_i64().ok_or_else(|| {
                Error::MalformedMetaRow(format!("{} is not an integer: {}", name, row[index]))
            })
        };
        let counts = Counts {
            number_returned: count(2, "numberReturned")?,
            number_matched: count(3, "numberMatched")?,
            number_skipped: count(4, "numberSkipped")?,
        };
        let window = if counts.number_returned > 0 && !row[0].is_null() && !row[1].is_null() {
            Some(KeyRange {
                min: row[0].clone(),
                max: row[1].clone(),
            })
        } else {
            None
        };
        Ok(Self { window, counts })
    }
}

/// SQL of one page, ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedQueries {
    pub meta_sql: String,
    pub value_sqls: Vec<String>,
}

/// One returnable column of a value query.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueColumn {
    pub node: NodeId,
    pub path: SchemaPath,
    pub value_type: ValueType,
    sql: String,
}

impl ValueColumn {
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Value query of one anchor table.
#[derive(Debug, Clone)]
pub struct ValueTemplate {
    /// Path of the anchor table; rows of this query carry it.
    pub table_path: TablePath,
    /// Level tables from the root table down to the anchor.
    pub tables: Vec<TableId>,
    /// Position of each level table among its parent's children, 0 for the
    /// root level.
    pub branches: Vec<usize>,
    /// Whether each level is reached through a to-many step.
    pub many: Vec<bool>,
    pub columns: Vec<ValueColumn>,
    key_columns: Vec<String>,
    from: String,
    alias_count: usize,
}

impl ValueTemplate {
    /// Number of structural sort keys.
    pub fn levels(&self) -> usize {
        self.tables.len()
    }

    pub fn is_root(&self) -> bool {
        self.tables.len() == 1
    }

    /// Names of the ordering columns for a request, user sort keys first.
    pub fn sort_columns(&self, request: &QueryRequest) -> Vec<String> {
        let mut names = user_sort_names(request);
        names.push(SORT_KEY.to_string());
        names.extend((1..self.levels()).map(|i| format!("{}_{}", SORT_KEY, i)));
        names
    }

    /// Expected types of every result column.
    pub fn column_types(&self, sort_count: usize) -> Vec<ColumnType> {
        let mut types = vec![ColumnType::SortKey; sort_count + self.levels()];
        types.extend(self.columns.iter().map(|c| ColumnType::Value(c.value_type)));
        types
    }

    /// Split a raw result row into sort values, keys and column values.
    pub fn split_row(
        &self,
        mut values: Vec<Value>,
        sort_count: usize,
    ) -> std::result::Result<SqlRow, DecodeError> {
        let expected = sort_count + self.levels() + self.columns.len();
        if values.len() != expected {
            return Err(DecodeError::ColumnCountMismatch {
                path: self.table_path.clone(),
                expected,
                actual: values.len(),
            });
        }
        let columns = values.split_off(sort_count + self.levels());
        let keys = values.split_off(sort_count);
        Ok(SqlRow::new(self.table_path.clone(), keys, columns).with_sort_values(values))
    }
}

/// Compiles feature types into [`CompiledQueries`].
pub struct QueryCompiler<'a> {
    config: &'a ProviderConfig,
    parser: Option<&'a dyn FilterParser>,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(config: &'a ProviderConfig) -> Self {
        Self {
            config,
            parser: None,
        }
    }

    /// Set the parser used for `{filter=...}` flags.
    pub fn with_filter_parser(mut self, parser: &'a dyn FilterParser) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Build the schema tree and derive every template of a feature type.
    pub fn compile(&self, feature_type: &FeatureTypeConfig) -> Result<CompiledQueries> {
        let mut builder = SchemaBuilder::new(self.config)?;
        if let Some(parser) = self.parser {
            builder = builder.with_filter_parser(parser);
        }
        let tree = builder.build(feature_type)?;
        let dialect = dialect_for(self.config.dialect);

        let mut compiled = CompiledQueries {
            tree,
            dialect,
            collation: self.config.accenti_collation.clone(),
            native_srid: self.config.native_srid,
            compute_number_matched: self.config.compute_number_matched,
            compute_number_skipped: self.config.compute_number_skipped,
            values: Vec::new(),
            layout: DecoderLayout::default(),
        };
        // surfaces invalid instance filters before the first request
        compiled.instance_conditions(0, 1)?;
        compiled.values = compiled.build_value_templates()?;
        compiled.layout = DecoderLayout::build(&compiled.tree, &compiled.values)?;

        debug!(
            feature_type = %feature_type.name,
            value_queries = compiled.values.len(),
            "compiled feature type"
        );
        Ok(compiled)
    }
}

/// Compile a feature type with the default collaborators.
pub fn compile_feature_type(
    config: &ProviderConfig,
    feature_type: &FeatureTypeConfig,
) -> Result<CompiledQueries> {
    QueryCompiler::new(config).compile(feature_type)
}

/// Immutable templates of one feature type.
#[derive(Debug)]
pub struct CompiledQueries {
    tree: SchemaTree,
    dialect: Arc<dyn SqlDialect>,
    collation: Option<String>,
    native_srid: i32,
    compute_number_matched: bool,
    compute_number_skipped: bool,
    values: Vec<ValueTemplate>,
    layout: DecoderLayout,
}

impl CompiledQueries {
    pub fn feature_type(&self) -> &str {
        self.tree.feature_type()
    }

    pub fn tree(&self) -> &SchemaTree {
        &self.tree
    }

    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    pub fn value_templates(&self) -> &[ValueTemplate] {
        &self.values
    }

    pub fn layout(&self) -> &DecoderLayout {
        &self.layout
    }

    pub fn computes_number_matched(&self) -> bool {
        self.compute_number_matched
    }

    pub fn filter_compiler(&self) -> FilterCompiler<'_> {
        FilterCompiler::new(&self.tree, self.dialect.as_ref())
            .with_collation(self.collation.as_deref())
            .with_native_srid(self.native_srid)
    }

    /// Render a self-contained page: the meta query and value queries that
    /// select the page without the meta query's key window.
    pub fn render(&self, request: &QueryRequest) -> Result<RenderedQueries> {
        Ok(RenderedQueries {
            meta_sql: self.render_meta(request)?,
            value_sqls: self.render_values(request, None)?,
        })
    }

    /// Render every value query for a page. `window` comes from the meta
    /// query; without one the page is selected by a paged sub-select.
    pub fn render_values(
        &self,
        request: &QueryRequest,
        window: Option<&KeyRange>,
    ) -> Result<Vec<String>> {
        self.values
            .iter()
            .map(|template| self.render_value(template, request, window))
            .collect()
    }

    pub fn render_value(
        &self,
        template: &ValueTemplate,
        request: &QueryRequest,
        window: Option<&KeyRange>,
    ) -> Result<String> {
        let root = &self.tree.table(self.tree.root_table()).table;
        let mut select = Vec::new();
        for (i, key) in request.sort_keys.iter().enumerate() {
            select.push(format!(
                "{} AS {}_{}",
                self.sort_column(key, "A")?,
                USER_SORT_KEY,
                i
            ));
        }
        select.extend(template.key_columns.iter().cloned());
        select.extend(template.columns.iter().map(|c| c.sql.clone()));

        let mut paging = String::new();
        let conditions = if let Some(filter) = self.id_filter(request) {
            let mut conditions = self.instance_conditions(0, template.alias_count)?;
            conditions.push(
                self.filter_compiler()
                    .compile_within(filter, template.alias_count)?,
            );
            conditions
        } else if let (true, Some(range)) = (request.sort_keys.is_empty(), window) {
            let mut conditions = vec![
                format!("A.{} >= {}", root.sort_key, self.value_literal(&range.min)),
                format!("A.{} <= {}", root.sort_key, self.value_literal(&range.max)),
            ];
            conditions.extend(self.filter_conditions(request, 0, template.alias_count)?);
            conditions
        } else if template.is_root() {
            paging = self.dialect.paging(request.limit, request.offset);
            self.filter_conditions(request, 0, template.alias_count)?
        } else {
            vec![self.page_subselect(request, template.alias_count)?]
        };

        let mut sql = format!("SELECT {} FROM {}", select.join(", "), template.from);
        push_where(&mut sql, &conditions);
        let order: Vec<String> = (1..=request.sort_keys.len() + template.levels())
            .map(|position| match request.sort_keys.get(position - 1) {
                Some(key) if key.direction == Direction::Descending => format!("{} DESC", position),
                _ => position.to_string(),
            })
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(","));
        sql.push_str(&paging);

        trace!(table = %template.table_path, sql = %sql, "rendered value query");
        Ok(sql)
    }

    /// Names of the meta query's ordering columns.
    pub fn meta_sort_columns(&self, request: &QueryRequest) -> Vec<String> {
        let mut names = user_sort_names(request);
        names.push(SORT_KEY.to_string());
        names
    }

    /// Meta query with the configured count settings.
    pub fn render_meta(&self, request: &QueryRequest) -> Result<String> {
        self.render_meta_with(request, self.compute_number_matched)
    }

    /// Meta query; `include_matched` controls the `numberMatched` count.
    pub fn render_meta_with(&self, request: &QueryRequest, include_matched: bool) -> Result<String> {
        let root = &self.tree.table(self.tree.root_table()).table;
        let mut where_clause = String::new();
        push_where(&mut where_clause, &self.filter_conditions(request, 0, 1)?);

        let mut select = Vec::new();
        let mut order = Vec::new();
        for (i, key) in request.sort_keys.iter().enumerate() {
            select.push(format!(
                "{} AS {}_{}",
                self.sort_column(key, "A")?,
                USER_SORT_KEY,
                i
            ));
            order.push(match key.direction {
                Direction::Ascending => format!("{}_{}", USER_SORT_KEY, i),
                Direction::Descending => format!("{}_{} DESC", USER_SORT_KEY, i),
            });
        }
        select.push(format!("A.{} AS {}", root.sort_key, SORT_KEY));
        order.push(SORT_KEY.to_string());

        let ids = format!(
            "SELECT {} FROM {} A{} ORDER BY {}{}",
            select.join(", "),
            root.name,
            where_clause,
            order.join(", "),
            self.dialect.paging(request.limit, request.offset)
        );
        let (min, max) = if request.sort_keys.is_empty() {
            (format!("MIN({})", SORT_KEY), format!("MAX({})", SORT_KEY))
        } else {
            ("NULL".to_string(), "NULL".to_string())
        };
        let unknown = self.dialect.integer_literal(-1);

        let number_returned = format!(
            "NR AS (SELECT {} AS minKey, {} AS maxKey, count(*) AS numberReturned FROM ({}) AS IDS)",
            min, max, ids
        );
        let number_matched = if include_matched {
            format!(
                "NM AS (SELECT count(*) AS numberMatched FROM (SELECT A.{} AS {} FROM {} A{}) AS IDS)",
                root.sort_key, SORT_KEY, root.name, where_clause
            )
        } else {
            format!("NM AS (SELECT {} AS numberMatched)", unknown)
        };
        let number_skipped = if self.compute_number_skipped {
            let skipped = if request.offset == 0 {
                self.dialect.integer_literal(0)
            } else {
                format!(
                    "(SELECT count(*) FROM (SELECT A.{} AS {} FROM {} A{} ORDER BY 1{}) AS IDS)",
                    root.sort_key,
                    SORT_KEY,
                    root.name,
                    where_clause,
                    self.dialect.paging(request.offset, 0)
                )
            };
            format!(
                "NS AS (SELECT CASE WHEN numberReturned = 0 THEN {} ELSE {} END AS numberSkipped FROM NR)",
                skipped, unknown
            )
        } else {
            format!("NS AS (SELECT {} AS numberSkipped)", unknown)
        };

        let sql = format!(
            "WITH {}, {}, {} SELECT * FROM NR, NM, NS",
            number_returned, number_matched, number_skipped
        );
        trace!(sql = %sql, "rendered meta query");
        Ok(sql)
    }

    /// Standalone `numberMatched` count.
    pub fn render_number_matched(&self, request: &QueryRequest) -> Result<String> {
        let root = &self.tree.table(self.tree.root_table()).table;
        let mut where_clause = String::new();
        push_where(&mut where_clause, &self.filter_conditions(request, 0, 1)?);
        Ok(format!(
            "SELECT count(*) AS numberMatched FROM (SELECT A.{} AS {} FROM {} A{}) AS IDS",
            root.sort_key, SORT_KEY, root.name, where_clause
        ))
    }

    /// Bounding box of a geometry property over every matching feature.
    pub fn render_spatial_extent(&self, property: &str, filter: Option<&Expr>) -> Result<String> {
        let id = self.returnable(property)?;
        let node = self.tree.node(id);
        if node.value_type != Some(ValueType::Geometry) {
            return Err(FilterError::UnsupportedOperands(format!(
                "'{}' is not a geometry property",
                property
            ))
            .into());
        }
        let (from, target) = self.extent_from(node.table)?;
        let column = FilterCompiler::node_column(node, &target)?;
        let mut sql = format!(
            "SELECT {} FROM {}",
            self.dialect.spatial_extent(&column),
            from
        );
        push_where(&mut sql, &self.extent_conditions(filter)?);
        trace!(sql = %sql, "rendered spatial extent query");
        Ok(sql)
    }

    /// Earliest start and latest end of one or two temporal properties.
    pub fn render_temporal_extent(
        &self,
        start: &str,
        end: Option<&str>,
        filter: Option<&Expr>,
    ) -> Result<String> {
        let start_node = self.tree.node(self.returnable(start)?);
        let end_node = match end {
            Some(end) => self.tree.node(self.returnable(end)?),
            None => start_node,
        };
        for node in [start_node, end_node] {
            if !node.value_type.map(ValueType::is_temporal).unwrap_or(false) {
                return Err(FilterError::UnsupportedOperands(format!(
                    "'{}' is not a temporal property",
                    node.queryable()
                ))
                .into());
            }
        }
        if start_node.table != end_node.table {
            return Err(FilterError::UnsupportedOperands(format!(
                "'{}' and '{}' are read from different tables",
                start_node.queryable(),
                end_node.queryable()
            ))
            .into());
        }
        let (from, target) = self.extent_from(start_node.table)?;
        let mut sql = format!(
            "SELECT MIN({}), MAX({}) FROM {}",
            FilterCompiler::node_column(start_node, &target)?,
            FilterCompiler::node_column(end_node, &target)?,
            from
        );
        push_where(&mut sql, &self.extent_conditions(filter)?);
        trace!(sql = %sql, "rendered temporal extent query");
        Ok(sql)
    }

    fn returnable(&self, property: &str) -> Result<NodeId> {
        self.tree
            .queryable(property)
            .ok_or_else(|| FilterError::UnknownProperty(property.to_string()).into())
    }

    fn extent_from(&self, table: TableId) -> Result<(String, String)> {
        let root = &self.tree.table(self.tree.root_table()).table;
        let chain = &self.tree.table(table).relations;
        let names = aliases(chain);
        let steps = self.filter_compiler().flag_steps(chain, &names)?;
        let join_sql = joins(chain, &names, &steps);
        let mut from = format!("{} A", root.name);
        if !join_sql.is_empty() {
            from.push(' ');
            from.push_str(&join_sql);
        }
        Ok((from, target_alias(&names).to_string()))
    }

    fn extent_conditions(&self, filter: Option<&Expr>) -> Result<Vec<String>> {
        let mut conditions = self.instance_conditions(0, 1)?;
        if let Some(filter) = filter {
            conditions.push(self.filter_compiler().compile(filter)?);
        }
        Ok(conditions)
    }

    /// Root flag filter and feature type filter, for root alias
    /// `alias(root_index)` with sub-selects from `alias(first_free)`.
    fn instance_conditions(&self, root_index: usize, first_free: usize) -> Result<Vec<String>> {
        let compiler = self.filter_compiler();
        let mut conditions = Vec::new();
        if let Some(flag) = &self.tree.table(self.tree.root_table()).table.filter {
            conditions.push(compiler.compile_local(flag, &alias(root_index))?);
        }
        if let Some(filter) = self.tree.filter() {
            conditions.push(compiler.compile_scoped(filter, root_index, first_free)?);
        }
        Ok(conditions)
    }

    fn filter_conditions(
        &self,
        request: &QueryRequest,
        root_index: usize,
        first_free: usize,
    ) -> Result<Vec<String>> {
        let mut conditions = self.instance_conditions(root_index, first_free)?;
        if let Some(filter) = &request.filter {
            let compiler = self.filter_compiler();
            conditions.push(compiler.compile_scoped(filter, root_index, first_free)?);
        }
        Ok(conditions)
    }

    /// `A.sk IN (SELECT P.sk FROM root P WHERE ... ORDER BY ... LIMIT ...)`.
    fn page_subselect(&self, request: &QueryRequest, root_index: usize) -> Result<String> {
        let root = &self.tree.table(self.tree.root_table()).table;
        let inner = alias(root_index);
        let mut order = Vec::new();
        for key in &request.sort_keys {
            let column = self.sort_column(key, &inner)?;
            order.push(match key.direction {
                Direction::Ascending => column,
                Direction::Descending => format!("{} DESC", column),
            });
        }
        order.push(format!("{}.{}", inner, root.sort_key));

        let mut sql = format!(
            "A.{} IN (SELECT {}.{} FROM {} {}",
            root.sort_key, inner, root.sort_key, root.name, inner
        );
        push_where(&mut sql, &self.filter_conditions(request, root_index, root_index + 1)?);
        sql.push_str(&format!(
            " ORDER BY {}{})",
            order.join(", "),
            self.dialect.paging(request.limit, request.offset)
        ));
        Ok(sql)
    }

    /// A filter selecting features by id replaces the key window.
    fn id_filter<'r>(&self, request: &'r QueryRequest) -> Option<&'r Expr> {
        let filter = request.filter.as_ref()?;
        let Expr::In {
            value: Operand::Property(property),
            ..
        } = filter
        else {
            return None;
        };
        let id = self.tree.id_property()?;
        let is_id = property.filter.is_none()
            && self.tree.queryable(&property.name) == Some(id)
            && self.tree.node(id).table == self.tree.root_table();
        is_id.then_some(filter)
    }

    fn sort_column(&self, key: &SortKey, table_alias: &str) -> Result<String> {
        let id = self
            .tree
            .queryable(&key.field)
            .ok_or_else(|| FilterError::UnknownProperty(key.field.clone()))?;
        let node = self.tree.node(id);
        match &node.source {
            ColumnSource::Column(column) if node.table == self.tree.root_table() => {
                Ok(format!("{}.{}", table_alias, column))
            }
            _ => Err(FilterError::UnsupportedOperands(format!(
                "sort key '{}' must be a column of the root table",
                key.field
            ))
            .into()),
        }
    }

    fn value_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => self.dialect.string_literal(s),
        }
    }

    fn build_value_templates(&self) -> Result<Vec<ValueTemplate>> {
        let mut templates = Vec::new();
        for (id, table) in self.tree.tables() {
            if self.tree.anchor(id) != id {
                continue;
            }
            let folded = self.folded(id);
            let has_columns = !table.columns.is_empty()
                || folded.iter().any(|t| !self.tree.table(*t).columns.is_empty());
            if id == self.tree.root_table() || has_columns {
                templates.push(self.value_template(id, &folded)?);
            }
        }
        Ok(templates)
    }

    /// One-to-one descendants folded into an anchor's query, in pre-order,
    /// restricted to tables that carry or lead to columns.
    fn folded(&self, anchor: TableId) -> Vec<TableId> {
        fn walk(tree: &SchemaTree, table: TableId, out: &mut Vec<TableId>) -> bool {
            let mut used = !tree.table(table).columns.is_empty();
            for child in &tree.table(table).children {
                if tree.table(*child).is_many() {
                    continue;
                }
                let start = out.len();
                out.push(*child);
                if walk(tree, *child, out) {
                    used = true;
                } else {
                    out.truncate(start);
                }
            }
            used
        }
        let mut out = Vec::new();
        walk(&self.tree, anchor, &mut out);
        out
    }

    fn value_template(&self, anchor: TableId, folded: &[TableId]) -> Result<ValueTemplate> {
        let compiler = self.filter_compiler();
        let node = self.tree.table(anchor);
        let chain = &node.relations;
        let names = aliases(chain);

        let mut tables = vec![anchor];
        let mut current = node.parent;
        while let Some(parent) = current {
            tables.push(parent);
            current = self.tree.table(parent).parent;
        }
        tables.reverse();
        let branches = tables
            .iter()
            .map(|t| {
                self.tree
                    .table(*t)
                    .parent
                    .and_then(|p| self.tree.table(p).children.iter().position(|c| c == t))
                    .unwrap_or(0)
            })
            .collect();
        let many = tables.iter().map(|t| self.tree.table(*t).is_many()).collect();

        let key_columns = level_aliases(chain, &names)
            .iter()
            .zip(&tables)
            .enumerate()
            .map(|(level, (level_alias, table))| {
                let name = if level == 0 {
                    SORT_KEY.to_string()
                } else {
                    format!("{}_{}", SORT_KEY, level)
                };
                format!(
                    "{}.{} AS {}",
                    level_alias,
                    self.tree.table(*table).table.sort_key,
                    name
                )
            })
            .collect();

        let steps = compiler.flag_steps(chain, &names)?;
        let root = &self.tree.table(self.tree.root_table()).table;
        let mut from = format!("{} {}", root.name, names[0]);
        let join_sql = joins(chain, &names, &steps);
        if !join_sql.is_empty() {
            from.push(' ');
            from.push_str(&join_sql);
        }

        let mut table_aliases = vec![(anchor, target_alias(&names).to_string())];
        let mut next = table_count(chain);
        for table in folded {
            let child = self.tree.table(*table);
            let (Some(parent), Some(relation)) = (child.parent, child.relations.last()) else {
                continue;
            };
            let parent_alias = table_aliases
                .iter()
                .find(|(t, _)| *t == parent)
                .map(|(_, a)| a.clone())
                .unwrap_or_else(|| target_alias(&names).to_string());
            let pair = [parent_alias, alias(next)];
            let relation = std::slice::from_ref(relation);
            let mut steps = compiler.flag_steps(relation, &pair)?;
            for step in &mut steps {
                step.join_type = JoinType::Left;
            }
            from.push(' ');
            from.push_str(&joins(relation, &pair, &steps));
            table_aliases.push((*table, alias(next)));
            next += 1;
        }

        let mut nodes: Vec<NodeId> = table_aliases
            .iter()
            .flat_map(|(t, _)| self.tree.table(*t).columns.iter().copied())
            .collect();
        nodes.sort();
        let columns = nodes
            .into_iter()
            .map(|id| {
                let node = self.tree.node(id);
                let table_alias = table_aliases
                    .iter()
                    .find(|(t, _)| *t == node.table)
                    .map(|(_, a)| a.as_str())
                    .unwrap_or("A");
                let value_type = node.value_type.unwrap_or(ValueType::String);
                let sql = match &node.source {
                    ColumnSource::Column(column) => {
                        let column = format!("{}.{}", table_alias, column);
                        match value_type {
                            ValueType::Geometry => self.dialect.geometry_as_text(&column),
                            ValueType::Date => self.dialect.cast_to_date(&column),
                            ValueType::Datetime => self.dialect.cast_to_datetime(&column),
                            _ => column,
                        }
                    }
                    ColumnSource::Expression(sql) => sql.replace("{table}", table_alias),
                    ColumnSource::Constant(value) => self.dialect.string_literal(value),
                    ColumnSource::None => "NULL".to_string(),
                };
                ValueColumn {
                    node: id,
                    path: node.path.clone(),
                    value_type,
                    sql,
                }
            })
            .collect();

        Ok(ValueTemplate {
            table_path: node.path.clone(),
            tables,
            branches,
            many,
            columns,
            key_columns,
            from,
            alias_count: next,
        })
    }
}

fn user_sort_names(request: &QueryRequest) -> Vec<String> {
    (0..request.sort_keys.len())
        .map(|i| format!("{}_{}", USER_SORT_KEY, i))
        .collect()
}

fn push_where(sql: &mut String, conditions: &[String]) {
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DialectKind, PropertyConfig, PropertyType, Role};
    use crate::error::ConfigError;
    use featsql_proto::Scalar;
    use pretty_assertions::assert_eq;

    fn feature_type() -> FeatureTypeConfig {
        FeatureTypeConfig::new("observation", "/observation")
            .with_property(
                PropertyConfig::value("id", PropertyType::Integer, "id").with_role(Role::Id),
            )
            .with_property(PropertyConfig::value("name", PropertyType::String, "name"))
            .with_property(PropertyConfig::value("geom", PropertyType::Geometry, "geom"))
            .with_property(PropertyConfig::value(
                "observed",
                PropertyType::Datetime,
                "observed",
            ))
            .with_property(
                PropertyConfig::new("station", PropertyType::Object)
                    .with_source_path("[station_fk=id]station")
                    .with_property(PropertyConfig::value("name", PropertyType::String, "name")),
            )
            .with_property(
                PropertyConfig::value("tags", PropertyType::ValueArray, "[id=obs_id]tag/value")
                    .with_value_type(ValueType::String),
            )
            .with_property(
                PropertyConfig::new("authors", PropertyType::ObjectArray)
                    .with_source_path("[id=obs_id]obs_author{junction}/[author_id=id]author")
                    .with_property(PropertyConfig::value("name", PropertyType::String, "name")),
            )
    }

    fn compiled() -> CompiledQueries {
        compile_feature_type(&ProviderConfig::default(), &feature_type()).unwrap()
    }

    fn window() -> KeyRange {
        KeyRange {
            min: Value::Integer(1),
            max: Value::Integer(10),
        }
    }

    #[test]
    fn test_one_query_per_anchor() {
        let compiled = compiled();
        let paths: Vec<String> = compiled
            .value_templates()
            .iter()
            .map(|t| t.table_path.to_string())
            .collect();
        assert_eq!(
            paths,
            vec![
                "/observation",
                "/observation/[id=obs_id]tag",
                "/observation/[id=obs_id]obs_author{junction}/[author_id=id]author",
            ]
        );
    }

    #[test]
    fn test_value_queries_with_window() {
        let compiled = compiled();
        let request = QueryRequest::new().with_limit(10).with_offset(1);
        let sqls = compiled.render_values(&request, Some(&window())).unwrap();
        assert_eq!(
            sqls[0],
            "SELECT A.id AS SKEY, A.id, A.name, ST_AsText(A.geom), A.observed::timestamp(0), B.name FROM observation A LEFT JOIN station B ON (A.station_fk=B.id) WHERE A.id >= 1 AND A.id <= 10 ORDER BY 1"
        );
        assert_eq!(
            sqls[1],
            "SELECT A.id AS SKEY, B.id AS SKEY_1, B.value FROM observation A JOIN tag B ON (A.id=B.obs_id) WHERE A.id >= 1 AND A.id <= 10 ORDER BY 1,2"
        );
        assert_eq!(
            sqls[2],
            "SELECT A.id AS SKEY, C.id AS SKEY_1, C.name FROM observation A JOIN obs_author B ON (A.id=B.obs_id) JOIN author C ON (B.author_id=C.id) WHERE A.id >= 1 AND A.id <= 10 ORDER BY 1,2"
        );
    }

    #[test]
    fn test_meta_query() {
        let compiled = compiled();
        let request = QueryRequest::new().with_limit(10).with_offset(1);
        assert_eq!(
            compiled.render_meta(&request).unwrap(),
            "WITH NR AS (SELECT MIN(SKEY) AS minKey, MAX(SKEY) AS maxKey, count(*) AS numberReturned FROM (SELECT A.id AS SKEY FROM observation A ORDER BY SKEY LIMIT 10 OFFSET 1) AS IDS), NM AS (SELECT count(*) AS numberMatched FROM (SELECT A.id AS SKEY FROM observation A) AS IDS), NS AS (SELECT CASE WHEN numberReturned = 0 THEN (SELECT count(*) FROM (SELECT A.id AS SKEY FROM observation A ORDER BY 1 LIMIT 1) AS IDS) ELSE -1::bigint END AS numberSkipped FROM NR) SELECT * FROM NR, NM, NS"
        );
    }

    #[test]
    fn test_meta_query_without_counts() {
        let config = ProviderConfig::new(DialectKind::GeoPackage)
            .with_number_matched(false)
            .with_number_skipped(false);
        let compiled = compile_feature_type(&config, &feature_type()).unwrap();
        let request = QueryRequest::new()
            .with_limit(5)
            .with_filter(Expr::eq("name", "x"));
        assert_eq!(
            compiled.render_meta(&request).unwrap(),
            "WITH NR AS (SELECT MIN(SKEY) AS minKey, MAX(SKEY) AS maxKey, count(*) AS numberReturned FROM (SELECT A.id AS SKEY FROM observation A WHERE A.name = 'x' ORDER BY SKEY LIMIT 5) AS IDS), NM AS (SELECT CAST(-1 AS BIGINT) AS numberMatched), NS AS (SELECT CAST(-1 AS BIGINT) AS numberSkipped) SELECT * FROM NR, NM, NS"
        );
        assert_eq!(
            compiled.render_number_matched(&request).unwrap(),
            "SELECT count(*) AS numberMatched FROM (SELECT A.id AS SKEY FROM observation A WHERE A.name = 'x') AS IDS"
        );
    }

    #[test]
    fn test_self_contained_render() {
        let compiled = compiled();
        let request = QueryRequest::new().with_limit(10).with_offset(1);
        let rendered = compiled.render(&request).unwrap();
        assert_eq!(
            rendered.value_sqls[0],
            "SELECT A.id AS SKEY, A.id, A.name, ST_AsText(A.geom), A.observed::timestamp(0), B.name FROM observation A LEFT JOIN station B ON (A.station_fk=B.id) ORDER BY 1 LIMIT 10 OFFSET 1"
        );
        assert_eq!(
            rendered.value_sqls[1],
            "SELECT A.id AS SKEY, B.id AS SKEY_1, B.value FROM observation A JOIN tag B ON (A.id=B.obs_id) WHERE A.id IN (SELECT C.id FROM observation C ORDER BY C.id LIMIT 10 OFFSET 1) ORDER BY 1,2"
        );
    }

    #[test]
    fn test_user_sort_keys() {
        let compiled = compiled();
        let request = QueryRequest::new()
            .with_limit(10)
            .with_sort_key(SortKey::desc("name"))
            .with_filter(Expr::eq("name", "x"));
        let meta = compiled.render_meta(&request).unwrap();
        assert!(meta.starts_with(
            "WITH NR AS (SELECT NULL AS minKey, NULL AS maxKey, count(*) AS numberReturned FROM (SELECT A.name AS CSKEY_0, A.id AS SKEY FROM observation A WHERE A.name = 'x' ORDER BY CSKEY_0 DESC, SKEY LIMIT 10) AS IDS)"
        ));
        // a window is ignored under a user sort order
        let sqls = compiled.render_values(&request, Some(&window())).unwrap();
        assert_eq!(
            sqls[1],
            "SELECT A.name AS CSKEY_0, A.id AS SKEY, B.id AS SKEY_1, B.value FROM observation A JOIN tag B ON (A.id=B.obs_id) WHERE A.id IN (SELECT C.id FROM observation C WHERE C.name = 'x' ORDER BY C.name DESC, C.id LIMIT 10) ORDER BY 1 DESC,2,3"
        );
    }

    #[test]
    fn test_sort_columns_agree() {
        let compiled = compiled();
        let request = QueryRequest::new()
            .with_sort_key(SortKey::asc("name"))
            .with_sort_key(SortKey::desc("observed"));
        let meta = compiled.meta_sort_columns(&request);
        assert_eq!(meta, vec!["CSKEY_0", "CSKEY_1", "SKEY"]);
        for template in compiled.value_templates() {
            let columns = template.sort_columns(&request);
            assert_eq!(&columns[..meta.len()], &meta[..]);
            assert_eq!(columns.len(), meta.len() + template.levels() - 1);
        }
    }

    #[test]
    fn test_id_request_replaces_window() {
        let compiled = compiled();
        let request = QueryRequest::new().with_filter(Expr::in_list("id", vec![Scalar::from(7)]));
        let sqls = compiled.render_values(&request, Some(&window())).unwrap();
        assert_eq!(
            sqls[1],
            "SELECT A.id AS SKEY, B.id AS SKEY_1, B.value FROM observation A JOIN tag B ON (A.id=B.obs_id) WHERE A.id IN (7) ORDER BY 1,2"
        );
    }

    #[test]
    fn test_filter_is_applied_inside_window() {
        let compiled = compiled();
        let request = QueryRequest::new().with_filter(Expr::eq("tags", "a"));
        let sqls = compiled.render_values(&request, Some(&window())).unwrap();
        assert_eq!(
            sqls[0],
            "SELECT A.id AS SKEY, A.id, A.name, ST_AsText(A.geom), A.observed::timestamp(0), B.name FROM observation A LEFT JOIN station B ON (A.station_fk=B.id) WHERE A.id >= 1 AND A.id <= 10 AND A.id IN (SELECT C.id FROM observation C JOIN tag D ON (C.id=D.obs_id) WHERE D.value = 'a') ORDER BY 1"
        );
        // sub-select aliases continue after the ones the value query uses
        assert_eq!(
            sqls[1],
            "SELECT A.id AS SKEY, B.id AS SKEY_1, B.value FROM observation A JOIN tag B ON (A.id=B.obs_id) WHERE A.id >= 1 AND A.id <= 10 AND A.id IN (SELECT C.id FROM observation C JOIN tag D ON (C.id=D.obs_id) WHERE D.value = 'a') ORDER BY 1,2"
        );
    }

    #[test]
    fn test_unknown_sort_key() {
        let compiled = compiled();
        let request = QueryRequest::new().with_sort_key(SortKey::asc("nope"));
        assert!(matches!(
            compiled.render_meta(&request),
            Err(Error::Filter(FilterError::UnknownProperty(_)))
        ));
        let request = QueryRequest::new().with_sort_key(SortKey::asc("tags"));
        assert!(matches!(
            compiled.render_meta(&request),
            Err(Error::Filter(FilterError::UnsupportedOperands(_)))
        ));
    }

    #[test]
    fn test_extents() {
        let compiled = compiled();
        assert_eq!(
            compiled.render_spatial_extent("geom", None).unwrap(),
            "SELECT ST_Extent(A.geom) FROM observation A"
        );
        assert_eq!(
            compiled
                .render_temporal_extent("observed", None, Some(&Expr::eq("name", "x")))
                .unwrap(),
            "SELECT MIN(A.observed), MAX(A.observed) FROM observation A WHERE A.name = 'x'"
        );
        assert!(compiled.render_spatial_extent("name", None).is_err());
    }

    #[test]
    fn test_meta_result() {
        let row = vec![
            Value::Integer(2),
            Value::Integer(11),
            Value::Integer(10),
            Value::from("42"),
            Value::Integer(-1),
        ];
        let meta = MetaResult::from_row(&row).unwrap();
        assert_eq!(meta.window, Some(KeyRange { min: Value::Integer(2), max: Value::Integer(11) }));
        assert_eq!(meta.counts.number_matched, 42);

        let empty = vec![Value::Null, Value::Null, Value::Integer(0), Value::Null, Value::Integer(3)];
        let meta = MetaResult::from_row(&empty).unwrap();
        assert_eq!(meta.window, None);
        assert_eq!(meta.counts.number_skipped, 3);
        assert_eq!(meta.counts.number_matched, -1);

        assert!(matches!(
            MetaResult::from_row(&row[..3]),
            Err(Error::MalformedMetaRow(_))
        ));
    }

    #[test]
    fn test_split_row() {
        let compiled = compiled();
        let tags = &compiled.value_templates()[1];
        let row = tags
            .split_row(vec![Value::from("n"), Value::Integer(1), Value::Integer(5), Value::from("a")], 1)
            .unwrap();
        assert_eq!(row.sort_values, vec![Value::from("n")]);
        assert_eq!(row.keys, vec![Value::Integer(1), Value::Integer(5)]);
        assert_eq!(row.values, vec![Value::from("a")]);
        assert!(tags.split_row(vec![Value::Integer(1)], 0).is_err());
        assert_eq!(
            tags.column_types(0),
            vec![ColumnType::SortKey, ColumnType::SortKey, ColumnType::Value(ValueType::String)]
        );
    }

    #[test]
    fn test_bad_source_path_rejects_feature_type() {
        let broken = feature_type().with_property(PropertyConfig::value(
            "bad",
            PropertyType::String,
            "[id=x tag/value",
        ));
        let err = compile_feature_type(&ProviderConfig::default(), &broken).unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidSourcePath { .. })
        ));
        assert!(err.to_string().starts_with("Invalid sourcePath in provider configuration"));
    }

    #[test]
    fn test_invalid_instance_filter_fails_compile() {
        let broken = feature_type().with_filter(Expr::eq("nope", 1));
        assert!(matches!(
            compile_feature_type(&ProviderConfig::default(), &broken),
            Err(Error::Filter(FilterError::UnknownProperty(_)))
        ));
    }
}
