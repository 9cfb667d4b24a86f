//! Relation definitions between tables.

use featsql_proto::Expr;

/// Cardinality of a relation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// At most one target row per source row.
    OneToOne,
    /// Many target rows per source row, linked by a foreign key on the target.
    OneToMany,
    /// Many target rows per source row, linked through a junction table.
    ManyToMany,
}

impl Cardinality {
    /// Whether a source row may match several target rows.
    pub fn is_many(self) -> bool {
        !matches!(self, Cardinality::OneToOne)
    }
}

/// A table as it appears in a source path, with its key columns and flag
/// filter.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    /// Possibly schema-qualified table name.
    pub name: String,
    pub sort_key: String,
    pub primary_key: String,
    /// Filter restricting the rows of this table, written against its columns.
    pub filter: Option<Expr>,
}

impl TableRef {
    pub fn new(
        name: impl Into<String>,
        sort_key: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            sort_key: sort_key.into(),
            primary_key: primary_key.into(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// The junction table of a many-to-many relation.
#[derive(Debug, Clone, PartialEq)]
pub struct Junction {
    pub table: TableRef,
    /// Junction column matched against the source field.
    pub source_field: String,
    /// Junction column matched against the target field.
    pub target_field: String,
}

/// One join step between two tables.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub cardinality: Cardinality,
    pub source: TableRef,
    pub source_field: String,
    pub target: TableRef,
    pub target_field: String,
    pub junction: Option<Junction>,
    /// Canonical text of the step, used as a table path segment.
    pub segment: String,
}

impl Relation {
    /// Create a one-to-one or one-to-many relation.
    pub fn direct(
        cardinality: Cardinality,
        source: TableRef,
        source_field: impl Into<String>,
        target: TableRef,
        target_field: impl Into<String>,
    ) -> Self {
        let source_field = source_field.into();
        let target_field = target_field.into();
        let segment = format!("[{}={}]{}", source_field, target_field, target.name);
        Self {
            cardinality,
            source,
            source_field,
            target,
            target_field,
            junction: None,
            segment,
        }
    }

    /// Create a many-to-many relation through a junction table.
    pub fn many_to_many(
        source: TableRef,
        source_field: impl Into<String>,
        junction: Junction,
        target: TableRef,
        target_field: impl Into<String>,
    ) -> Self {
        let source_field = source_field.into();
        let target_field = target_field.into();
        let segment = format!(
            "[{}={}]{}/[{}={}]{}",
            source_field,
            junction.source_field,
            junction.table.name,
            junction.target_field,
            target_field,
            target.name
        );
        Self {
            cardinality: Cardinality::ManyToMany,
            source,
            source_field,
            target,
            target_field,
            junction: Some(junction),
            segment,
        }
    }

    /// Override the segment text, e.g. to keep the flags as written.
    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.segment = segment.into();
        self
    }

    /// Check if this relation goes through a junction table.
    pub fn is_many_to_many(&self) -> bool {
        self.junction.is_some()
    }

    /// Number of tables this step adds to a join.
    pub fn table_count(&self) -> usize {
        if self.is_many_to_many() {
            2
        } else {
            1
        }
    }
}
