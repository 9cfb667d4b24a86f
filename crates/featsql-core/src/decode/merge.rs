//! Ordered merge of value query rows.

use std::cmp::Ordering;
use std::collections::HashMap;

use featsql_proto::{Direction, QueryRequest, SqlRow, TablePath};

use crate::query::CompiledQueries;

/// Total order of rows across the value queries of one page.
///
/// Rows compare by user sort values, then root key, then level by level by
/// branch position and key. A row missing a level sorts before the rows
/// that have it, so a parent table's row precedes its children.
#[derive(Debug, Clone)]
pub struct RowOrdering {
    directions: Vec<Direction>,
    branches: HashMap<TablePath, Vec<usize>>,
}

impl RowOrdering {
    pub fn new(queries: &CompiledQueries, request: &QueryRequest) -> Self {
        Self {
            directions: request.sort_keys.iter().map(|k| k.direction).collect(),
            branches: queries
                .value_templates()
                .iter()
                .map(|t| (t.table_path.clone(), t.branches.clone()))
                .collect(),
        }
    }

    pub fn compare(&self, a: &SqlRow, b: &SqlRow) -> Ordering {
        for (i, (x, y)) in a.sort_values.iter().zip(&b.sort_values).enumerate() {
            let ordering = match self.directions.get(i) {
                Some(Direction::Descending) => y.compare(x),
                _ => x.compare(y),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        let empty = Vec::new();
        let a_branches = self.branches.get(&a.table_path).unwrap_or(&empty);
        let b_branches = self.branches.get(&b.table_path).unwrap_or(&empty);
        let levels = a.keys.len().max(b.keys.len());
        for level in 0..levels {
            let (x, y) = match (a.keys.get(level), b.keys.get(level)) {
                (Some(x), Some(y)) => (x, y),
                (None, _) => return Ordering::Less,
                (_, None) => return Ordering::Greater,
            };
            if level > 0 {
                let branch = a_branches.get(level).cmp(&b_branches.get(level));
                if branch != Ordering::Equal {
                    return branch;
                }
            }
            let ordering = x.compare(y);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// K-way merge of already ordered row sources.
///
/// Ties go to the source listed first.
pub struct MergedRows<I> {
    ordering: RowOrdering,
    sources: Vec<I>,
    heads: Vec<Option<SqlRow>>,
    primed: bool,
}

impl<I: Iterator<Item = SqlRow>> MergedRows<I> {
    pub fn new(ordering: RowOrdering, sources: Vec<I>) -> Self {
        let heads = sources.iter().map(|_| None).collect();
        Self {
            ordering,
            sources,
            heads,
            primed: false,
        }
    }
}

/// Index of the smallest head, preferring lower indices on ties.
pub fn smallest_head(ordering: &RowOrdering, heads: &[Option<SqlRow>]) -> Option<usize> {
    let mut best: Option<(usize, &SqlRow)> = None;
    for (i, head) in heads.iter().enumerate() {
        let Some(row) = head else { continue };
        match best {
            Some((_, current)) if ordering.compare(row, current) != Ordering::Less => {}
            _ => best = Some((i, row)),
        }
    }
    best.map(|(i, _)| i)
}

impl<I: Iterator<Item = SqlRow>> Iterator for MergedRows<I> {
    type Item = SqlRow;

    fn next(&mut self) -> Option<SqlRow> {
        if !self.primed {
            for (head, source) in self.heads.iter_mut().zip(self.sources.iter_mut()) {
                *head = source.next();
            }
            self.primed = true;
        }
        let index = smallest_head(&self.ordering, &self.heads)?;
        let row = self.heads[index].take();
        self.heads[index] = self.sources[index].next();
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeatureTypeConfig, PropertyConfig, PropertyType, ProviderConfig};
    use crate::query::compile_feature_type;
    use featsql_proto::{SortKey, Value};
    use pretty_assertions::assert_eq;

    fn queries() -> CompiledQueries {
        let feature_type = FeatureTypeConfig::new("a", "/a")
            .with_property(PropertyConfig::value("name", PropertyType::String, "name"))
            .with_property(
                PropertyConfig::new("bs", PropertyType::ObjectArray)
                    .with_source_path("[id=a_id]b")
                    .with_property(PropertyConfig::value("v", PropertyType::Integer, "v")),
            )
            .with_property(
                PropertyConfig::new("ds", PropertyType::ObjectArray)
                    .with_source_path("[id=a_id]d")
                    .with_property(PropertyConfig::value("w", PropertyType::Integer, "w")),
            );
        compile_feature_type(&ProviderConfig::default(), &feature_type).unwrap()
    }

    fn row(path: &TablePath, keys: &[i64]) -> SqlRow {
        SqlRow::new(
            path.clone(),
            keys.iter().map(|k| Value::Integer(*k)).collect(),
            vec![Value::Null],
        )
    }

    fn keys(rows: Vec<SqlRow>) -> Vec<(usize, Vec<Value>)> {
        rows.into_iter().map(|r| (r.table_path.depth(), r.keys)).collect()
    }

    #[test]
    fn test_merge_orders_parent_before_children() {
        let queries = queries();
        let paths: Vec<TablePath> = queries
            .value_templates()
            .iter()
            .map(|t| t.table_path.clone())
            .collect();
        assert_eq!(paths.len(), 3);

        let root = vec![row(&paths[0], &[1]), row(&paths[0], &[2])];
        let bs = vec![row(&paths[1], &[1, 10]), row(&paths[1], &[2, 11])];
        let ds = vec![row(&paths[2], &[1, 5]), row(&paths[2], &[1, 6])];

        let ordering = RowOrdering::new(&queries, &QueryRequest::new());
        let merged: Vec<SqlRow> = MergedRows::new(
            ordering,
            vec![root.into_iter(), bs.into_iter(), ds.into_iter()],
        )
        .collect();

        let int = |v: i64| Value::Integer(v);
        let order: Vec<&TablePath> = merged.iter().map(|r| &r.table_path).collect();
        assert_eq!(
            order,
            vec![&paths[0], &paths[1], &paths[2], &paths[2], &paths[0], &paths[1]]
        );
        assert_eq!(
            keys(merged),
            vec![
                (1, vec![int(1)]),
                (2, vec![int(1), int(10)]),
                (2, vec![int(1), int(5)]),
                (2, vec![int(1), int(6)]),
                (1, vec![int(2)]),
                (2, vec![int(2), int(11)]),
            ]
        );
    }

    #[test]
    fn test_user_sort_direction() {
        let queries = queries();
        let root = queries.value_templates()[0].table_path.clone();
        let request = QueryRequest::new().with_sort_key(SortKey::desc("name"));
        let ordering = RowOrdering::new(&queries, &request);

        let a = row(&root, &[1]).with_sort_values(vec![Value::from("a")]);
        let b = row(&root, &[2]).with_sort_values(vec![Value::from("b")]);
        assert_eq!(ordering.compare(&a, &b), Ordering::Greater);
        assert_eq!(ordering.compare(&b, &b.clone()), Ordering::Equal);
    }

    #[test]
    fn test_ties_prefer_first_source() {
        let queries = queries();
        let root = queries.value_templates()[0].table_path.clone();
        let ordering = RowOrdering::new(&queries, &QueryRequest::new());
        let mut first = row(&root, &[1]);
        first.values = vec![Value::from("first")];
        let second = row(&root, &[1]);
        let heads = vec![Some(second), Some(first)];
        assert_eq!(smallest_head(&ordering, &heads), Some(0));
        assert_eq!(smallest_head(&ordering, &[None, None]), None);
    }
}
