//! Filter expression to SQL compiler.
//!
//! Filters are compiled in one of two scopes:
//!
//! - **Queryables**: property names are dotted queryable paths resolved
//!   through the schema tree. Predicates on columns of the root table are
//!   rendered inline against the root alias; predicates on any other table
//!   become a membership test of the root sort key in a sub-select that joins
//!   the relation chain down to the owning table.
//! - **Table**: property names are raw column names of one table alias. Used
//!   for `{filter=...}` flags and nested property filters, the latter
//!   optionally over a numbered derived table exposing `row_number`.

use chrono::{DateTime, NaiveDate, Utc};
use featsql_proto::{
    ArrayOp, Bound, ComparisonOp, Expr, Function, Operand, Property, Scalar, SpatialOp,
    TemporalLiteral, TemporalOp,
};
use tracing::trace;

use super::alias::{alias, aliases_from, target_alias};
use super::join::{joins, JoinStep};
use crate::dialect::SqlDialect;
use crate::error::FilterError;
use crate::schema::{ColumnSource, Relation, SchemaNode, SchemaTree, TableId};

type Result<T> = std::result::Result<T, FilterError>;

#[derive(Debug, Clone, Copy)]
enum Scope<'s> {
    Queryables { root_index: usize, first_free: usize },
    Table { alias: &'s str, numbered: bool },
}

/// Column context of one leaf predicate.
#[derive(Debug, Clone)]
struct Ctx {
    alias: String,
    numbered: bool,
    queryables: bool,
    /// Sort key of the sub-select's root, for array aggregates.
    group: Option<String>,
}

/// A rendered leaf predicate.
struct Predicate {
    sql: String,
    /// `GROUP BY ... HAVING ...` suffix of the enclosing sub-select.
    having: Option<String>,
    /// Select the root rows that are *not* in the sub-select.
    exclude: bool,
}

impl Predicate {
    fn plain(sql: String) -> Self {
        Self {
            sql,
            having: None,
            exclude: false,
        }
    }
}

enum Side {
    Column(String),
    Literal(String),
}

impl Side {
    fn sql(&self) -> &str {
        match self {
            Side::Column(sql) | Side::Literal(sql) => sql,
        }
    }

    fn map(self, f: impl FnOnce(String) -> String) -> Side {
        match self {
            Side::Column(sql) => Side::Column(f(sql)),
            Side::Literal(sql) => Side::Literal(f(sql)),
        }
    }
}

struct Interval {
    start: String,
    end: String,
    instant: bool,
    column: bool,
}

fn truth(value: bool) -> String {
    if value { "1=1" } else { "1=0" }.to_string()
}

fn negated(sql: String, negate: bool) -> String {
    if negate {
        format!("NOT ({})", sql)
    } else {
        sql
    }
}

/// Compiles filter expressions against one schema tree.
pub struct FilterCompiler<'a> {
    tree: &'a SchemaTree,
    dialect: &'a dyn SqlDialect,
    collation: Option<&'a str>,
    native_srid: i32,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(tree: &'a SchemaTree, dialect: &'a dyn SqlDialect) -> Self {
        Self {
            tree,
            dialect,
            collation: None,
            native_srid: crate::config::DEFAULT_NATIVE_SRID,
        }
    }

    /// Collation used by `accenti()`.
    pub fn with_collation(mut self, collation: Option<&'a str>) -> Self {
        self.collation = collation;
        self
    }

    /// EPSG code of geometry literals without an explicit one.
    pub fn with_native_srid(mut self, srid: i32) -> Self {
        self.native_srid = srid;
        self
    }

    /// Compile a queryable filter for a query whose root table has alias `A`.
    pub fn compile(&self, expr: &Expr) -> Result<String> {
        self.compile_at(expr, 0)
    }

    /// Compile a queryable filter for a root table with alias
    /// `alias(root_index)`. Sub-selects use the aliases after it.
    pub fn compile_at(&self, expr: &Expr, root_index: usize) -> Result<String> {
        self.compile_scoped(expr, root_index, root_index + 1)
    }

    /// Compile a queryable filter for root alias `A` inside a query that
    /// already uses the first `reserved` aliases.
    pub fn compile_within(&self, expr: &Expr, reserved: usize) -> Result<String> {
        self.compile_scoped(expr, 0, reserved.max(1))
    }

    /// Compile a queryable filter for root alias `alias(root_index)` with
    /// sub-select aliases starting at `alias(first_free)`.
    pub fn compile_scoped(
        &self,
        expr: &Expr,
        root_index: usize,
        first_free: usize,
    ) -> Result<String> {
        let scope = Scope::Queryables {
            root_index,
            first_free,
        };
        let sql = self.expr(expr, false, scope)?;
        trace!(filter = %sql, "compiled filter");
        Ok(sql)
    }

    /// Compile a filter over the raw columns of a single table alias.
    pub fn compile_local(&self, expr: &Expr, alias: &str) -> Result<String> {
        self.expr(
            expr,
            false,
            Scope::Table {
                alias,
                numbered: false,
            },
        )
    }

    fn compile_nested(&self, expr: &Expr, alias: &str, numbered: bool) -> Result<String> {
        self.expr(expr, false, Scope::Table { alias, numbered })
    }

    /// Join steps carrying the `{filter=...}` flags of the tables along a
    /// chain, for the given aliases.
    pub fn flag_steps(&self, chain: &[Relation], aliases: &[String]) -> Result<Vec<JoinStep>> {
        let mut steps = Vec::with_capacity(chain.len());
        let mut index = 0;
        for relation in chain {
            let mut step = JoinStep::inner();
            match &relation.junction {
                Some(junction) => {
                    if let Some(filter) = &junction.table.filter {
                        step.junction_condition =
                            Some(self.compile_local(filter, &aliases[index + 1])?);
                    }
                    index += 2;
                }
                None => index += 1,
            }
            if let Some(filter) = &relation.target.filter {
                step.condition = Some(self.compile_local(filter, &aliases[index])?);
            }
            steps.push(step);
        }
        Ok(steps)
    }

    /// Column expression of a returnable node on a table alias.
    pub fn node_column(node: &SchemaNode, alias: &str) -> Result<String> {
        match &node.source {
            ColumnSource::Column(column) => Ok(format!("{}.{}", alias, column)),
            ColumnSource::Expression(sql) => Ok(sql.replace("{table}", alias)),
            ColumnSource::Constant(_) | ColumnSource::None => Err(
                FilterError::UnsupportedOperands(format!(
                    "property '{}' is not backed by a column",
                    node.queryable()
                )),
            ),
        }
    }

    fn expr(&self, expr: &Expr, negate: bool, scope: Scope<'_>) -> Result<String> {
        match expr {
            Expr::And(exprs) => self.logical(exprs, " AND ", negate, scope),
            Expr::Or(exprs) => self.logical(exprs, " OR ", negate, scope),
            Expr::Not(inner) => self.expr(inner, !negate, scope),
            Expr::Literal(value) => Ok(truth(*value != negate)),
            leaf => self.leaf(leaf, negate, scope),
        }
    }

    fn logical(
        &self,
        exprs: &[Expr],
        operator: &str,
        negate: bool,
        scope: Scope<'_>,
    ) -> Result<String> {
        let mut parts = exprs
            .iter()
            .map(|e| self.expr(e, false, scope))
            .collect::<Result<Vec<_>>>()?;
        let sql = match parts.len() {
            0 => return Ok(truth((operator == " AND ") != negate)),
            1 => return Ok(negated(parts.remove(0), negate)),
            _ => parts.join(operator),
        };
        Ok(if negate {
            format!("NOT ({})", sql)
        } else {
            format!("({})", sql)
        })
    }

    fn leaf(&self, expr: &Expr, negate: bool, scope: Scope<'_>) -> Result<String> {
        match scope {
            Scope::Table { alias, numbered } => {
                let ctx = Ctx {
                    alias: alias.to_string(),
                    numbered,
                    queryables: false,
                    group: None,
                };
                Ok(self.predicate(expr, negate, &ctx)?.sql)
            }
            Scope::Queryables {
                root_index,
                first_free,
            } => self.queryable_leaf(expr, negate, root_index, first_free),
        }
    }

    fn queryable_leaf(
        &self,
        expr: &Expr,
        negate: bool,
        root_index: usize,
        first_free: usize,
    ) -> Result<String> {
        let mut properties = Vec::new();
        collect_properties(expr, &mut properties);

        let local = Ctx {
            alias: alias(root_index),
            numbered: false,
            queryables: true,
            group: None,
        };
        let Some(first) = properties.first() else {
            return Ok(self.predicate(expr, negate, &local)?.sql);
        };

        let table = self.node(first)?.table;
        for property in &properties[1..] {
            if self.node(property)?.table != table {
                return Err(FilterError::UnsupportedOperands(format!(
                    "'{}' and '{}' are read from different tables",
                    first.name, property.name
                )));
            }
        }

        let nested = first.filter.as_deref();
        let is_array = matches!(expr, Expr::Array { .. });
        if table == self.tree.root_table() && nested.is_none() && !is_array {
            return Ok(self.predicate(expr, negate, &local)?.sql);
        }
        self.subquery(expr, negate, root_index, first_free, table, nested)
    }

    /// `outer.sk IN (SELECT inner.sk FROM root inner JOIN ... WHERE pred)`.
    fn subquery(
        &self,
        expr: &Expr,
        negate: bool,
        root_index: usize,
        first_free: usize,
        table: TableId,
        nested: Option<&Expr>,
    ) -> Result<String> {
        let root = &self.tree.table(self.tree.root_table()).table;
        let chain = &self.tree.table(table).relations;
        let aliases = aliases_from(chain, first_free);
        let inner = &aliases[0];
        let target = target_alias(&aliases).to_string();

        let ctx = Ctx {
            alias: target.clone(),
            numbered: false,
            queryables: true,
            group: Some(format!("{}.{}", inner, root.sort_key)),
        };
        let predicate = self.predicate(expr, negate, &ctx)?;

        let mut steps = self.flag_steps(chain, &aliases)?;
        let mut conditions = vec![predicate.sql];
        if let Some(filter) = nested {
            let numbered = filter.uses_position();
            match (steps.last_mut(), chain.last()) {
                (Some(step), Some(relation)) => {
                    let sql = self.compile_nested(filter, &target, numbered)?;
                    step.condition = Some(match step.condition.take() {
                        Some(flag) => format!("{} AND {}", flag, sql),
                        None => sql,
                    });
                    if numbered {
                        step.numbered = true;
                        if let Some(source_filter) = &relation.source.filter {
                            step.source_condition = Some(self.compile_local(source_filter, "A")?);
                        }
                    }
                }
                _ => {
                    if numbered {
                        return Err(FilterError::PositionOutsideNestedFilter);
                    }
                    conditions.push(self.compile_local(filter, &target)?);
                }
            }
        }

        let join_sql = joins(chain, &aliases, &steps);
        let from = if join_sql.is_empty() {
            format!("{} {}", root.name, inner)
        } else {
            format!("{} {} {}", root.name, inner, join_sql)
        };
        Ok(format!(
            "{}.{} {} (SELECT {}.{} FROM {} WHERE {}{})",
            alias(root_index),
            root.sort_key,
            if predicate.exclude { "NOT IN" } else { "IN" },
            inner,
            root.sort_key,
            from,
            conditions.join(" AND "),
            predicate.having.unwrap_or_default()
        ))
    }

    fn predicate(&self, expr: &Expr, negate: bool, ctx: &Ctx) -> Result<Predicate> {
        let sql = match expr {
            Expr::Compare { op, left, right } => {
                negated(self.compare(*op, left, right, ctx)?, negate)
            }
            Expr::Like { value, pattern } => {
                let value = self.value(value, ctx)?;
                let pattern = self.value(pattern, ctx)?;
                let value = match (value, &pattern) {
                    (Side::Column(a), Side::Column(b)) => {
                        return Err(FilterError::UnsupportedOperands(format!(
                            "LIKE between two properties: {} LIKE {}",
                            a, b
                        )))
                    }
                    (Side::Column(column), _) => self.dialect.cast_to_string(&column),
                    (Side::Literal(literal), _) => literal,
                };
                let operator = if negate { "NOT LIKE" } else { "LIKE" };
                format!("{} {} {}", value, operator, pattern.sql())
            }
            Expr::In { value, list } => {
                if list.is_empty() {
                    truth(negate)
                } else {
                    let operator = if negate { "NOT IN" } else { "IN" };
                    format!(
                        "{} {} {}",
                        self.value(value, ctx)?.sql(),
                        operator,
                        self.list(list)
                    )
                }
            }
            Expr::IsNull(value) => {
                let operator = if negate { "IS NOT NULL" } else { "IS NULL" };
                format!("{} {}", self.value(value, ctx)?.sql(), operator)
            }
            Expr::Between { value, low, high } => {
                let operator = if negate { "NOT BETWEEN" } else { "BETWEEN" };
                format!(
                    "{} {} {} AND {}",
                    self.value(value, ctx)?.sql(),
                    operator,
                    self.scalar(low),
                    self.scalar(high)
                )
            }
            Expr::Temporal { op, left, right } => {
                let (sql, compound) = self.temporal(*op, left, right, ctx)?;
                match (compound, negate) {
                    (true, true) => format!("NOT ({})", sql),
                    (true, false) => format!("({})", sql),
                    (false, negate) => negated(sql, negate),
                }
            }
            Expr::Spatial { op, left, right } => {
                let sql = self.spatial(*op, left, right, ctx)?;
                if negate {
                    format!("NOT {}", sql)
                } else {
                    sql
                }
            }
            Expr::Array { op, left, right } => return self.array(*op, left, right, negate, ctx),
            Expr::Literal(value) => truth(*value != negate),
            Expr::And(_) | Expr::Or(_) | Expr::Not(_) => {
                return Err(FilterError::UnsupportedOperands(
                    "logical operator in predicate position".into(),
                ))
            }
        };
        Ok(Predicate::plain(sql))
    }

    fn compare(
        &self,
        op: ComparisonOp,
        left: &Operand,
        right: &Operand,
        ctx: &Ctx,
    ) -> Result<String> {
        match (self.value(left, ctx)?, self.value(right, ctx)?) {
            (Side::Column(column), Side::Literal(literal)) => {
                Ok(format!("{} {} {}", column, op.as_sql(), literal))
            }
            (Side::Literal(literal), Side::Column(column)) => {
                Ok(format!("{} {} {}", column, op.flipped().as_sql(), literal))
            }
            (Side::Literal(a), Side::Literal(b)) => Ok(format!("{} {} {}", a, op.as_sql(), b)),
            (Side::Column(a), Side::Column(b)) => Err(FilterError::UnsupportedOperands(format!(
                "comparison between two properties: {} {} {}",
                a,
                op.as_sql(),
                b
            ))),
        }
    }

    fn value(&self, operand: &Operand, ctx: &Ctx) -> Result<Side> {
        match operand {
            Operand::Property(property) => Ok(Side::Column(self.column(property, ctx)?)),
            Operand::Scalar(scalar) => Ok(Side::Literal(self.scalar(scalar))),
            Operand::Temporal(TemporalLiteral::Instant(instant)) => {
                Ok(Side::Literal(self.dialect.datetime_literal(*instant)))
            }
            Operand::Temporal(TemporalLiteral::Date(date)) => {
                Ok(Side::Literal(self.dialect.date_literal(*date)))
            }
            Operand::Function(Function::Upper(inner)) => {
                self.case(inner, "UPPER", str::to_uppercase, ctx)
            }
            Operand::Function(Function::Lower(inner) | Function::Casei(inner)) => {
                self.case(inner, "LOWER", str::to_lowercase, ctx)
            }
            Operand::Function(Function::Accenti(inner)) => {
                let collation = self.collation.ok_or(FilterError::MissingCollation)?;
                Ok(self
                    .value(inner, ctx)?
                    .map(|sql| format!("{} COLLATE \"{}\"", sql, collation)))
            }
            Operand::Function(Function::Position) => {
                if ctx.numbered {
                    Ok(Side::Column(format!("{}.row_number", ctx.alias)))
                } else {
                    Err(FilterError::PositionOutsideNestedFilter)
                }
            }
            Operand::Temporal(TemporalLiteral::Interval { .. })
            | Operand::Function(Function::Interval(..)) => Err(FilterError::UnsupportedOperands(
                "interval used as a scalar".into(),
            )),
            Operand::Geometry(_) => Err(FilterError::UnsupportedOperands(
                "geometry used as a scalar".into(),
            )),
            Operand::Array(_) => Err(FilterError::UnsupportedOperands(
                "array used as a scalar".into(),
            )),
        }
    }

    fn case(
        &self,
        inner: &Operand,
        function: &str,
        apply: fn(&str) -> String,
        ctx: &Ctx,
    ) -> Result<Side> {
        match inner {
            Operand::Scalar(Scalar::String(text)) => {
                Ok(Side::Literal(self.dialect.string_literal(&apply(text))))
            }
            other => Ok(self
                .value(other, ctx)?
                .map(|sql| format!("{}({})", function, sql))),
        }
    }

    fn node(&self, property: &Property) -> Result<&SchemaNode> {
        self.tree
            .queryable(&property.name)
            .map(|id| self.tree.node(id))
            .ok_or_else(|| FilterError::UnknownProperty(property.name.clone()))
    }

    fn column(&self, property: &Property, ctx: &Ctx) -> Result<String> {
        if !ctx.queryables {
            return Ok(format!("{}.{}", ctx.alias, property.name));
        }
        Self::node_column(self.node(property)?, &ctx.alias)
    }

    fn temporal_column(&self, property: &Property, ctx: &Ctx) -> Result<String> {
        let column = self.column(property, ctx)?;
        if !ctx.queryables {
            return Ok(column);
        }
        Ok(match self.node(property)?.value_type {
            Some(featsql_proto::ValueType::Date) => self.dialect.cast_to_date(&column),
            Some(featsql_proto::ValueType::Datetime) => self.dialect.cast_to_datetime(&column),
            _ => column,
        })
    }

    fn scalar(&self, scalar: &Scalar) -> String {
        match scalar {
            Scalar::Boolean(true) => "TRUE".to_string(),
            Scalar::Boolean(false) => "FALSE".to_string(),
            Scalar::Integer(value) => value.to_string(),
            Scalar::Float(value) => value.to_string(),
            Scalar::String(value) => self.dialect.string_literal(value),
        }
    }

    fn list(&self, values: &[Scalar]) -> String {
        let items: Vec<String> = values.iter().map(|v| self.scalar(v)).collect();
        format!("({})", items.join(","))
    }

    fn bound(&self, bound: &Bound, start: bool) -> String {
        match bound {
            Bound::Instant(instant) => self.dialect.datetime_literal(*instant),
            Bound::Date(date) => self.dialect.date_literal(*date),
            Bound::Open if start => self.dialect.min_instant(),
            Bound::Open => self.dialect.max_instant(),
        }
    }

    fn interval(&self, operand: &Operand, ctx: &Ctx) -> Result<Interval> {
        match operand {
            Operand::Property(property) => {
                let column = self.temporal_column(property, ctx)?;
                Ok(Interval {
                    start: column.clone(),
                    end: column,
                    instant: true,
                    column: true,
                })
            }
            Operand::Temporal(TemporalLiteral::Instant(instant)) => {
                let literal = self.dialect.datetime_literal(*instant);
                Ok(Interval {
                    start: literal.clone(),
                    end: literal,
                    instant: true,
                    column: false,
                })
            }
            Operand::Temporal(TemporalLiteral::Date(date)) => {
                let literal = self.dialect.date_literal(*date);
                Ok(Interval {
                    start: literal.clone(),
                    end: literal,
                    instant: true,
                    column: false,
                })
            }
            Operand::Temporal(TemporalLiteral::Interval { start, end }) => Ok(Interval {
                start: self.bound(start, true),
                end: self.bound(end, false),
                instant: false,
                column: false,
            }),
            Operand::Function(Function::Interval(start, end)) => Ok(Interval {
                start: self.interval_bound(start, true, ctx)?,
                end: self.interval_bound(end, false, ctx)?,
                instant: false,
                column: start.has_property() || end.has_property(),
            }),
            _ => Err(FilterError::UnsupportedOperands(
                "temporal operator needs instants or intervals".into(),
            )),
        }
    }

    fn interval_bound(&self, operand: &Operand, start: bool, ctx: &Ctx) -> Result<String> {
        let sentinel = if start {
            self.dialect.min_instant()
        } else {
            self.dialect.max_instant()
        };
        match operand {
            Operand::Property(property) => Ok(format!(
                "COALESCE({},{})",
                self.temporal_column(property, ctx)?,
                sentinel
            )),
            Operand::Temporal(TemporalLiteral::Instant(instant)) => {
                Ok(self.dialect.datetime_literal(*instant))
            }
            Operand::Temporal(TemporalLiteral::Date(date)) => Ok(self.dialect.date_literal(*date)),
            Operand::Scalar(Scalar::String(text)) if text == ".." => Ok(sentinel),
            _ => Err(FilterError::UnsupportedOperands(
                "interval bounds must be properties, instants or '..'".into(),
            )),
        }
    }

    /// Returns the SQL and whether it consists of several clauses.
    fn temporal(
        &self,
        op: TemporalOp,
        left: &Operand,
        right: &Operand,
        ctx: &Ctx,
    ) -> Result<(String, bool)> {
        if let (Operand::Property(a), Operand::Property(b)) = (left, right) {
            return Err(FilterError::UnsupportedOperands(format!(
                "temporal comparison between two properties: {:?}({}, {})",
                op, a.name, b.name
            )));
        }
        let a = self.interval(left, ctx)?;
        let b = self.interval(right, ctx)?;
        if !a.column && !b.column {
            let (a, b) = (literal_range(left)?, literal_range(right)?);
            return Ok((truth(evaluate_temporal(op, a, b)), false));
        }

        let both_instants = a.instant && b.instant;
        let clauses = match op {
            TemporalOp::TEquals | TemporalOp::TIntersects if both_instants => {
                vec![format!("{} = {}", a.start, b.start)]
            }
            TemporalOp::TEquals => vec![
                format!("{} = {}", a.start, b.start),
                format!("{} = {}", a.end, b.end),
            ],
            TemporalOp::TBefore => vec![format!("{} < {}", a.end, b.start)],
            TemporalOp::TAfter => vec![format!("{} > {}", a.start, b.end)],
            TemporalOp::TDuring => vec![
                format!("{} > {}", a.start, b.start),
                format!("{} < {}", a.end, b.end),
            ],
            TemporalOp::TIntersects => vec![
                format!("{} <= {}", a.start, b.end),
                format!("{} >= {}", a.end, b.start),
            ],
        };
        let compound = clauses.len() > 1;
        Ok((clauses.join(" AND "), compound))
    }

    fn geometry(&self, operand: &Operand, ctx: &Ctx) -> Result<Side> {
        match operand {
            Operand::Property(property) => Ok(Side::Column(self.column(property, ctx)?)),
            Operand::Geometry(geometry) => Ok(Side::Literal(self.dialect.geometry_literal(
                &geometry.to_wkt(),
                geometry.srid.unwrap_or(self.native_srid),
            ))),
            _ => Err(FilterError::UnsupportedOperands(
                "spatial operator needs a property or a geometry".into(),
            )),
        }
    }

    fn spatial(&self, op: SpatialOp, left: &Operand, right: &Operand, ctx: &Ctx) -> Result<String> {
        let a = self.geometry(left, ctx)?;
        let b = self.geometry(right, ctx)?;
        let (op, a, b) = match (&a, &b) {
            (Side::Column(_), Side::Column(_)) => {
                return Err(FilterError::UnsupportedOperands(
                    "spatial operator between two properties".into(),
                ))
            }
            (Side::Literal(_), Side::Column(_)) => (swapped(op), b, a),
            _ => (op, a, b),
        };
        Ok(format!(
            "{}({}, {})",
            self.dialect.spatial_function(op),
            a.sql(),
            b.sql()
        ))
    }

    fn array(
        &self,
        op: ArrayOp,
        left: &Operand,
        right: &Operand,
        negate: bool,
        ctx: &Ctx,
    ) -> Result<Predicate> {
        match (left, right) {
            (Operand::Array(a), Operand::Array(b)) => {
                Ok(Predicate::plain(truth(evaluate_array(op, a, b) != negate)))
            }
            (Operand::Array(values), other) => {
                self.array_column(op.flipped(), other, values, negate, ctx)
            }
            (other, Operand::Array(values)) => self.array_column(op, other, values, negate, ctx),
            _ => Err(FilterError::UnsupportedOperands(
                "array operator needs an array literal".into(),
            )),
        }
    }

    fn array_column(
        &self,
        op: ArrayOp,
        operand: &Operand,
        values: &[Scalar],
        negate: bool,
        ctx: &Ctx,
    ) -> Result<Predicate> {
        let column = match self.value(operand, ctx)? {
            Side::Column(column) => column,
            Side::Literal(_) => {
                return Err(FilterError::UnsupportedOperands(
                    "array operator needs a property".into(),
                ))
            }
        };
        let group = ctx.group.as_ref().ok_or_else(|| {
            FilterError::UnsupportedOperands("array operator outside of a queryable filter".into())
        })?;
        if values.is_empty() {
            return Err(FilterError::InvalidLiteral("empty array".into()));
        }

        let list = self.list(values);
        let mut distinct: Vec<String> = values.iter().map(|v| self.scalar(v)).collect();
        distinct.sort();
        distinct.dedup();
        let count = distinct.len();

        let (sql, having, exclude) = match op {
            ArrayOp::AContains => (
                format!("{} IN {}", column, list),
                Some(format!(
                    " GROUP BY {} HAVING count(distinct {}) = {}",
                    group, column, count
                )),
                false,
            ),
            ArrayOp::AOverlaps => (format!("{} IN {}", column, list), None, false),
            ArrayOp::AContainedBy => (format!("{} NOT IN {}", column, list), None, true),
            ArrayOp::AEquals => (
                format!("{} IS NOT NULL", column),
                Some(format!(
                    " GROUP BY {} HAVING count(distinct {}) = {} AND count(case when {} not in {} then {} else null end) = 0",
                    group, column, count, column, list, column
                )),
                false,
            ),
        };
        Ok(Predicate {
            sql,
            having,
            exclude: exclude != negate,
        })
    }
}

fn swapped(op: SpatialOp) -> SpatialOp {
    match op {
        SpatialOp::SWithin => SpatialOp::SContains,
        SpatialOp::SContains => SpatialOp::SWithin,
        other => other,
    }
}

fn collect_properties<'e>(expr: &'e Expr, out: &mut Vec<&'e Property>) {
    fn operand<'e>(o: &'e Operand, out: &mut Vec<&'e Property>) {
        match o {
            Operand::Property(p) => out.push(p),
            Operand::Function(
                Function::Upper(inner)
                | Function::Lower(inner)
                | Function::Casei(inner)
                | Function::Accenti(inner),
            ) => operand(inner, out),
            Operand::Function(Function::Interval(a, b)) => {
                operand(a, out);
                operand(b, out);
            }
            _ => {}
        }
    }
    match expr {
        Expr::Compare { left, right, .. }
        | Expr::Temporal { left, right, .. }
        | Expr::Spatial { left, right, .. }
        | Expr::Array { left, right, .. } => {
            operand(left, out);
            operand(right, out);
        }
        Expr::Like { value, pattern } => {
            operand(value, out);
            operand(pattern, out);
        }
        Expr::In { value, .. } | Expr::IsNull(value) | Expr::Between { value, .. } => {
            operand(value, out)
        }
        Expr::And(_) | Expr::Or(_) | Expr::Not(_) | Expr::Literal(_) => {}
    }
}

fn day(date: NaiveDate, end: bool) -> Result<DateTime<Utc>> {
    let time = if end {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .ok_or_else(|| FilterError::InvalidLiteral(date.to_string()))
}

fn bound_instant(bound: &Bound, end: bool) -> Result<DateTime<Utc>> {
    match bound {
        Bound::Instant(instant) => Ok(*instant),
        Bound::Date(date) => day(*date, end),
        Bound::Open if end => Ok(DateTime::<Utc>::MAX_UTC),
        Bound::Open => Ok(DateTime::<Utc>::MIN_UTC),
    }
}

fn operand_instant(operand: &Operand, end: bool) -> Result<DateTime<Utc>> {
    match operand {
        Operand::Temporal(TemporalLiteral::Instant(instant)) => Ok(*instant),
        Operand::Temporal(TemporalLiteral::Date(date)) => day(*date, end),
        Operand::Scalar(Scalar::String(text)) if text == ".." => {
            bound_instant(&Bound::Open, end)
        }
        _ => Err(FilterError::UnsupportedOperands(
            "temporal literal expected".into(),
        )),
    }
}

fn literal_range(operand: &Operand) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    match operand {
        Operand::Temporal(TemporalLiteral::Interval { start, end }) => {
            Ok((bound_instant(start, false)?, bound_instant(end, true)?))
        }
        Operand::Function(Function::Interval(start, end)) => {
            Ok((operand_instant(start, false)?, operand_instant(end, true)?))
        }
        other => Ok((operand_instant(other, false)?, operand_instant(other, true)?)),
    }
}

fn evaluate_temporal(
    op: TemporalOp,
    (s1, e1): (DateTime<Utc>, DateTime<Utc>),
    (s2, e2): (DateTime<Utc>, DateTime<Utc>),
) -> bool {
    match op {
        TemporalOp::TEquals => s1 == s2 && e1 == e2,
        TemporalOp::TBefore => e1 < s2,
        TemporalOp::TAfter => s1 > e2,
        TemporalOp::TDuring => s1 > s2 && e1 < e2,
        TemporalOp::TIntersects => s1 <= e2 && e1 >= s2,
    }
}

fn evaluate_array(op: ArrayOp, a: &[Scalar], b: &[Scalar]) -> bool {
    let contains = |x: &[Scalar], y: &[Scalar]| y.iter().all(|v| x.contains(v));
    match op {
        ArrayOp::AContains => contains(a, b),
        ArrayOp::AContainedBy => contains(b, a),
        ArrayOp::AEquals => contains(a, b) && contains(b, a),
        ArrayOp::AOverlaps => a.iter().any(|v| b.contains(v)),
    }
}
