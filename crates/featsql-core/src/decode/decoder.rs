//! Row-driven feature decoder.

use std::cmp::Ordering;

use featsql_proto::{FeatureEvent, SchemaPath, SqlRow, Value};

use super::geometry::{GeometryDecoder, WktPassthrough};
use super::layout::{DecoderLayout, ScopeKind, ScopeTemplate};
use super::multiplicity::MultiplicityTracker;
use crate::error::DecodeError;

#[derive(Debug, Clone, PartialEq, Eq)]
struct OpenScope {
    path: SchemaPath,
    kind: ScopeKind,
    /// Multiplicities at the scope's instance levels.
    instance: Vec<u32>,
}

impl OpenScope {
    fn start(&self) -> FeatureEvent {
        match self.kind {
            ScopeKind::Object => FeatureEvent::ObjectStart {
                path: self.path.clone(),
            },
            ScopeKind::Array => FeatureEvent::ArrayStart {
                path: self.path.clone(),
            },
        }
    }

    fn end(&self) -> FeatureEvent {
        match self.kind {
            ScopeKind::Object => FeatureEvent::ObjectEnd {
                path: self.path.clone(),
            },
            ScopeKind::Array => FeatureEvent::ArrayEnd {
                path: self.path.clone(),
            },
        }
    }
}

fn instances(scopes: &[ScopeTemplate], multiplicities: &[u32]) -> Vec<OpenScope> {
    scopes
        .iter()
        .map(|scope| OpenScope {
            path: scope.path.clone(),
            kind: scope.kind,
            instance: scope
                .instance_levels
                .iter()
                .map(|level| multiplicities.get(*level).copied().unwrap_or(1))
                .collect(),
        })
        .collect()
}

/// Turns merged value query rows into nested feature events.
///
/// Owns the per-request state; one decoder serves exactly one row stream.
pub struct FeatureDecoder<'a> {
    layout: &'a DecoderLayout,
    geometry: Box<dyn GeometryDecoder + 'a>,
    tracker: MultiplicityTracker,
    current: Option<Value>,
    open: Vec<OpenScope>,
}

impl<'a> FeatureDecoder<'a> {
    pub fn new(layout: &'a DecoderLayout) -> Self {
        Self {
            layout,
            geometry: Box::new(WktPassthrough),
            tracker: MultiplicityTracker::new(),
            current: None,
            open: Vec::new(),
        }
    }

    /// Replace the WKT passthrough.
    pub fn with_geometry_decoder(mut self, decoder: impl GeometryDecoder + 'a) -> Self {
        self.geometry = Box::new(decoder);
        self
    }

    /// Whether a feature is open.
    pub fn in_feature(&self) -> bool {
        self.current.is_some()
    }

    /// Feed one row, appending its events to `out`.
    pub fn on_row(&mut self, row: &SqlRow, out: &mut Vec<FeatureEvent>) -> Result<(), DecodeError> {
        let table = self
            .layout
            .table(&row.table_path)
            .ok_or_else(|| DecodeError::UnknownTablePath(row.table_path.clone()))?;
        if row.keys.len() != table.levels {
            return Err(DecodeError::KeyCountMismatch {
                path: row.table_path.clone(),
                expected: table.levels,
                actual: row.keys.len(),
            });
        }
        if row.values.len() != table.columns.len() {
            return Err(DecodeError::ColumnCountMismatch {
                path: row.table_path.clone(),
                expected: table.columns.len(),
                actual: row.values.len(),
            });
        }
        let root = row.root_key().ok_or_else(|| DecodeError::KeyCountMismatch {
            path: row.table_path.clone(),
            expected: table.levels,
            actual: 0,
        })?;

        let same_feature = self
            .current
            .as_ref()
            .map(|current| current.compare(root) == Ordering::Equal)
            .unwrap_or(false);
        if !same_feature {
            self.close_feature(out);
            self.tracker.reset();
            self.current = Some(root.clone());
            out.push(FeatureEvent::FeatureStart { id: root.clone() });
        }

        self.tracker.track(&row.table_path, &row.keys);
        let multiplicities = self.tracker.multiplicities_for(&row.table_path);

        let row_scopes = instances(&table.scopes, &multiplicities);
        self.enter(row_scopes, out);

        for (column, value) in table.columns.iter().zip(&row.values) {
            if value.is_null() {
                continue;
            }
            self.enter(instances(&column.scopes, &multiplicities), out);

            if column.value_type.is_spatial() {
                self.geometry.decode(&column.path, value, out)?;
            } else {
                out.push(FeatureEvent::Value {
                    path: column.path.clone(),
                    value: value.clone(),
                    value_type: column.value_type,
                });
            }
        }
        Ok(())
    }

    /// Close everything still open at the end of the input.
    pub fn finish(&mut self, out: &mut Vec<FeatureEvent>) {
        self.close_feature(out);
        self.tracker.reset();
    }

    /// Keep the common prefix of open scopes, close the rest innermost
    /// first and open what is missing.
    fn enter(&mut self, scopes: Vec<OpenScope>, out: &mut Vec<FeatureEvent>) {
        let common = self
            .open
            .iter()
            .zip(&scopes)
            .take_while(|(open, wanted)| open == wanted)
            .count();
        while self.open.len() > common {
            if let Some(scope) = self.open.pop() {
                out.push(scope.end());
            }
        }
        for scope in scopes.into_iter().skip(common) {
            out.push(scope.start());
            self.open.push(scope);
        }
    }

    fn close_feature(&mut self, out: &mut Vec<FeatureEvent>) {
        if self.current.take().is_none() {
            return;
        }
        while let Some(scope) = self.open.pop() {
            out.push(scope.end());
        }
        out.push(FeatureEvent::FeatureEnd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeatureTypeConfig, PropertyConfig, PropertyType, ProviderConfig};
    use crate::query::{compile_feature_type, CompiledQueries};
    use featsql_proto::{TablePath, ValueType};
    use pretty_assertions::assert_eq;

    fn compiled() -> CompiledQueries {
        let feature_type = FeatureTypeConfig::new("a", "/a").with_property(
            PropertyConfig::new("bs", PropertyType::ObjectArray)
                .with_source_path("[id=a_id]b")
                .with_property(
                    PropertyConfig::new("cs", PropertyType::ObjectArray)
                        .with_source_path("[id=b_id]c")
                        .with_property(PropertyConfig::value("v", PropertyType::Integer, "v")),
                ),
        );
        compile_feature_type(&ProviderConfig::default(), &feature_type).unwrap()
    }

    fn c_path() -> TablePath {
        TablePath::from_segments(vec!["a".into(), "[id=a_id]b".into(), "[id=b_id]c".into()])
    }

    fn row(keys: [i64; 3], value: i64) -> SqlRow {
        SqlRow::new(
            c_path(),
            keys.iter().map(|k| Value::Integer(*k)).collect(),
            vec![Value::Integer(value)],
        )
    }

    fn path(names: &[&str]) -> SchemaPath {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_nesting_follows_key_transitions() {
        let compiled = compiled();
        let mut decoder = FeatureDecoder::new(compiled.layout());
        let mut out = Vec::new();
        for (keys, value) in [([1, 1, 1], 1), ([1, 1, 2], 2), ([1, 2, 1], 3), ([2, 1, 1], 4)] {
            decoder.on_row(&row(keys, value), &mut out).unwrap();
        }
        decoder.finish(&mut out);

        let bs = path(&["bs"]);
        let cs = path(&["bs", "cs"]);
        let v = |value: i64| FeatureEvent::Value {
            path: path(&["bs", "cs", "v"]),
            value: Value::Integer(value),
            value_type: ValueType::Integer,
        };
        let one_c = |value: i64| {
            vec![
                FeatureEvent::ObjectStart { path: cs.clone() },
                v(value),
                FeatureEvent::ObjectEnd { path: cs.clone() },
            ]
        };
        let mut expected = vec![
            FeatureEvent::FeatureStart { id: Value::Integer(1) },
            FeatureEvent::ArrayStart { path: bs.clone() },
            FeatureEvent::ObjectStart { path: bs.clone() },
            FeatureEvent::ArrayStart { path: cs.clone() },
        ];
        expected.extend(one_c(1));
        expected.extend(one_c(2));
        expected.extend([
            FeatureEvent::ArrayEnd { path: cs.clone() },
            FeatureEvent::ObjectEnd { path: bs.clone() },
            FeatureEvent::ObjectStart { path: bs.clone() },
            FeatureEvent::ArrayStart { path: cs.clone() },
        ]);
        expected.extend(one_c(3));
        expected.extend([
            FeatureEvent::ArrayEnd { path: cs.clone() },
            FeatureEvent::ObjectEnd { path: bs.clone() },
            FeatureEvent::ArrayEnd { path: bs.clone() },
            FeatureEvent::FeatureEnd,
            FeatureEvent::FeatureStart { id: Value::Integer(2) },
            FeatureEvent::ArrayStart { path: bs.clone() },
            FeatureEvent::ObjectStart { path: bs.clone() },
            FeatureEvent::ArrayStart { path: cs.clone() },
        ]);
        expected.extend(one_c(4));
        expected.extend([
            FeatureEvent::ArrayEnd { path: cs.clone() },
            FeatureEvent::ObjectEnd { path: bs.clone() },
            FeatureEvent::ArrayEnd { path: bs },
            FeatureEvent::FeatureEnd,
        ]);
        assert_eq!(out, expected);

        let starts = out.iter().filter(|e| e.is_start()).count();
        let ends = out.iter().filter(|e| e.is_end()).count();
        assert_eq!(starts, ends);
    }

    #[test]
    fn test_null_row_opens_empty_element() {
        let compiled = compiled();
        let mut decoder = FeatureDecoder::new(compiled.layout());
        let mut out = Vec::new();
        let mut null_row = row([1, 1, 1], 0);
        null_row.values = vec![Value::Null];
        decoder.on_row(&null_row, &mut out).unwrap();
        decoder.on_row(&row([1, 1, 2], 5), &mut out).unwrap();
        decoder.finish(&mut out);

        let bs = path(&["bs"]);
        let cs = path(&["bs", "cs"]);
        assert_eq!(
            out,
            vec![
                FeatureEvent::FeatureStart { id: Value::Integer(1) },
                FeatureEvent::ArrayStart { path: bs.clone() },
                FeatureEvent::ObjectStart { path: bs.clone() },
                FeatureEvent::ArrayStart { path: cs.clone() },
                FeatureEvent::ObjectStart { path: cs.clone() },
                FeatureEvent::ObjectEnd { path: cs.clone() },
                FeatureEvent::ObjectStart { path: cs.clone() },
                FeatureEvent::Value {
                    path: path(&["bs", "cs", "v"]),
                    value: Value::Integer(5),
                    value_type: ValueType::Integer,
                },
                FeatureEvent::ObjectEnd { path: cs.clone() },
                FeatureEvent::ArrayEnd { path: cs },
                FeatureEvent::ObjectEnd { path: bs.clone() },
                FeatureEvent::ArrayEnd { path: bs },
                FeatureEvent::FeatureEnd,
            ]
        );
    }

    #[test]
    fn test_invariant_violations() {
        let compiled = compiled();
        let mut decoder = FeatureDecoder::new(compiled.layout());
        let mut out = Vec::new();

        let unknown = SqlRow::new(TablePath::root("x"), vec![Value::Integer(1)], vec![]);
        assert!(matches!(
            decoder.on_row(&unknown, &mut out),
            Err(DecodeError::UnknownTablePath(_))
        ));

        let mut short = row([1, 1, 1], 1);
        short.keys.pop();
        assert!(matches!(
            decoder.on_row(&short, &mut out),
            Err(DecodeError::KeyCountMismatch { expected: 3, actual: 2, .. })
        ));

        let mut wide = row([1, 1, 1], 1);
        wide.values.push(Value::Null);
        assert!(matches!(
            decoder.on_row(&wide, &mut out),
            Err(DecodeError::ColumnCountMismatch { .. })
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_finish_without_rows() {
        let compiled = compiled();
        let mut decoder = FeatureDecoder::new(compiled.layout());
        let mut out = Vec::new();
        decoder.finish(&mut out);
        assert!(out.is_empty());
        assert!(!decoder.in_feature());
    }
}
