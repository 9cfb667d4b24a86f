//! Per-table decoding layout derived from the schema and value templates.

use std::collections::HashMap;

use featsql_proto::{SchemaPath, TablePath, ValueType};

use crate::error::ConfigError;
use crate::query::ValueTemplate;
use crate::schema::{NodeKind, SchemaTree, TableId};

/// Kind of an open scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Object,
    Array,
}

/// A scope a column value is nested in.
///
/// Two rows share a scope instance when the multiplicities at
/// `instance_levels` are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeTemplate {
    pub path: SchemaPath,
    pub kind: ScopeKind,
    pub instance_levels: Vec<usize>,
}

/// One value column of a table layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnLayout {
    pub path: SchemaPath,
    pub value_type: ValueType,
    /// Enclosing scopes, outermost first.
    pub scopes: Vec<ScopeTemplate>,
}

/// Layout of the rows of one value query.
#[derive(Debug, Clone, PartialEq)]
pub struct TableLayout {
    pub levels: usize,
    /// Scopes every row opens, whether or not its columns are null.
    pub scopes: Vec<ScopeTemplate>,
    pub columns: Vec<ColumnLayout>,
}

/// Leading scopes of a column up to its innermost array element.
fn row_scopes(scopes: &[ScopeTemplate]) -> &[ScopeTemplate] {
    let Some(array) = scopes.iter().rposition(|s| s.kind == ScopeKind::Array) else {
        return &[];
    };
    let element = scopes
        .get(array + 1)
        .filter(|s| s.kind == ScopeKind::Object && s.path == scopes[array].path)
        .is_some();
    &scopes[..array + 1 + usize::from(element)]
}

/// Layouts of every value query of a feature type, by table path.
#[derive(Debug, Clone, Default)]
pub struct DecoderLayout {
    tables: HashMap<TablePath, TableLayout>,
}

impl DecoderLayout {
    /// Fails when one table feeds more than one array property, since its
    /// rows would alternate between the arrays.
    pub fn build(tree: &SchemaTree, templates: &[ValueTemplate]) -> Result<Self, ConfigError> {
        let level = |table: TableId| tree.table(tree.anchor(table)).depth();
        let mut tables = HashMap::new();

        for template in templates {
            let instance = |depth: usize, inclusive: bool| -> Vec<usize> {
                let end = if inclusive { depth + 1 } else { depth };
                std::iter::once(0)
                    .chain((1..end).filter(|l| template.many.get(*l).copied().unwrap_or(false)))
                    .collect()
            };
            let scope = |path: &SchemaPath, kind: ScopeKind, depth: usize| ScopeTemplate {
                path: path.clone(),
                kind,
                instance_levels: instance(depth, kind == ScopeKind::Object),
            };

            let columns: Vec<ColumnLayout> = template
                .columns
                .iter()
                .map(|column| {
                    let node = tree.node(column.node);
                    let mut scopes = Vec::new();
                    for ancestor in tree.ancestors(column.node) {
                        let ancestor = tree.node(ancestor);
                        let depth = level(ancestor.table);
                        match ancestor.kind {
                            NodeKind::Object => {
                                scopes.push(scope(&ancestor.path, ScopeKind::Object, depth))
                            }
                            NodeKind::ArrayOfObject => {
                                scopes.push(scope(&ancestor.path, ScopeKind::Array, depth));
                                scopes.push(scope(&ancestor.path, ScopeKind::Object, depth));
                            }
                            NodeKind::Value | NodeKind::ArrayOfValue => {}
                        }
                    }
                    if node.kind == NodeKind::ArrayOfValue {
                        scopes.push(scope(&node.path, ScopeKind::Array, level(node.table)));
                    }
                    ColumnLayout {
                        path: column.path.clone(),
                        value_type: column.value_type,
                        scopes,
                    }
                })
                .collect();

            let mut row: Option<&[ScopeTemplate]> = None;
            for column in &columns {
                let scopes = row_scopes(&column.scopes);
                match row {
                    None => row = Some(scopes),
                    Some(first) if first != scopes => {
                        let name = |s: &[ScopeTemplate]| {
                            s.last().map(|s| s.path.join("/")).unwrap_or_default()
                        };
                        return Err(ConfigError::InvalidConfig(format!(
                            "properties '{}' and '{}' are both read from table {}",
                            name(first),
                            name(scopes),
                            template.table_path
                        )));
                    }
                    Some(_) => {}
                }
            }
            let scopes = row.map(<[ScopeTemplate]>::to_vec).unwrap_or_default();

            tables.insert(
                template.table_path.clone(),
                TableLayout {
                    levels: template.levels(),
                    scopes,
                    columns,
                },
            );
        }
        Ok(Self { tables })
    }

    pub fn table(&self, path: &TablePath) -> Option<&TableLayout> {
        self.tables.get(path)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
