//! Rows as read from the value queries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::value::Value;

/// Path of a table from the feature root, one segment per relation step.
///
/// The first segment is the root table; every following segment is the
/// canonical rendering of one relation step (`[fk=id]station`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TablePath(Vec<String>);

impl TablePath {
    /// Path of a root table.
    pub fn root(table: impl Into<String>) -> Self {
        Self(vec![table.into()])
    }

    pub fn from_segments(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Extend by one relation step.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Number of levels, the root table included.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// The path truncated to `levels` segments.
    pub fn prefix(&self, levels: usize) -> TablePath {
        Self(self.0[..levels.min(self.0.len())].to_vec())
    }

    /// Whether `self` equals `other` or is one of its ancestors.
    pub fn is_prefix_of(&self, other: &TablePath) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

impl fmt::Display for TablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.0 {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for TablePath {
    type Err = Error;

    /// Splits on `/` outside of `[...]` and `{...}`, so junction steps such
    /// as `[id=a_id]a_b/[b_id=id]b` stay a single segment only when written
    /// through [`TablePath::child`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| Error::InvalidTablePath(s.to_string()))?;
        let mut segments = Vec::new();
        let mut depth = 0usize;
        let mut current = String::new();
        for c in rest.chars() {
            match c {
                '[' | '{' => depth += 1,
                ']' | '}' => depth = depth.saturating_sub(1),
                _ => {}
            }
            if c == '/' && depth == 0 {
                segments.push(std::mem::take(&mut current));
            } else {
                current.push(c);
            }
        }
        segments.push(current);
        if segments.iter().any(String::is_empty) {
            return Err(Error::InvalidTablePath(s.to_string()));
        }
        Ok(Self(segments))
    }
}

/// One row of a value query, split into its parts.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlRow {
    /// Table the row was read from.
    pub table_path: TablePath,
    /// Values of the user sort keys, in request order.
    pub sort_values: Vec<Value>,
    /// Sort key of every level from the root table down to this table.
    pub keys: Vec<Value>,
    /// Returnable columns in template order.
    pub values: Vec<Value>,
}

impl SqlRow {
    pub fn new(table_path: TablePath, keys: Vec<Value>, values: Vec<Value>) -> Self {
        Self {
            table_path,
            sort_values: Vec::new(),
            keys,
            values,
        }
    }

    /// Set the user sort key values.
    pub fn with_sort_values(mut self, sort_values: Vec<Value>) -> Self {
        self.sort_values = sort_values;
        self
    }

    /// The root feature's key.
    pub fn root_key(&self) -> Option<&Value> {
        self.keys.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_path_display_and_parse() {
        let path = TablePath::root("obs").child("[station_fk=id]station");
        assert_eq!(path.to_string(), "/obs/[station_fk=id]station");
        let parsed: TablePath = "/obs/[station_fk=id]station".parse().unwrap();
        assert_eq!(parsed, path);
    }

    #[test]
    fn test_table_path_parse_keeps_flags_together() {
        let parsed: TablePath = "/obs{filter=a/b = 1}/[id=obs_id]tag".parse().unwrap();
        assert_eq!(parsed.depth(), 2);
        assert_eq!(parsed.segments()[0], "obs{filter=a/b = 1}");
    }

    #[test]
    fn test_table_path_prefix() {
        let path = TablePath::root("a").child("[x=y]b").child("[y=z]c");
        let parent = path.prefix(2);
        assert!(parent.is_prefix_of(&path));
        assert!(!path.is_prefix_of(&parent));
        assert!("a".parse::<TablePath>().is_err());
    }
}
