//! Repetition counters per table path.

use std::cmp::Ordering;
use std::collections::HashMap;

use featsql_proto::{TablePath, Value};

/// Tracks, for every table path seen within the current feature, the last
/// sort key and how many distinct keys have been seen under the current
/// parent instance.
#[derive(Debug, Default)]
pub struct MultiplicityTracker {
    state: HashMap<TablePath, (Value, u32)>,
}

impl MultiplicityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a row of `path` with one key per level, root first.
    ///
    /// The first level whose key differs from the last one seen gets a new
    /// count; every deeper level of the row starts over at 1 and tracked
    /// descendants of the changed level that are not on `path` are dropped.
    /// A changed root key clears everything.
    pub fn track(&mut self, path: &TablePath, keys: &[Value]) {
        for (level, key) in keys.iter().enumerate() {
            let prefix = path.prefix(level + 1);
            let previous = self
                .state
                .get(&prefix)
                .map(|(last, count)| (last.compare(key) == Ordering::Equal, *count));
            let count = match previous {
                Some((true, _)) => continue,
                Some((false, _)) if level == 0 => {
                    self.state.clear();
                    1
                }
                Some((false, count)) => count + 1,
                None => 1,
            };
            self.state.insert(prefix.clone(), (key.clone(), count));
            for (deeper, key) in keys.iter().enumerate().skip(level + 1) {
                self.state.insert(path.prefix(deeper + 1), (key.clone(), 1));
            }
            self.state.retain(|tracked, _| {
                !(prefix.is_prefix_of(tracked) && tracked != &prefix && !tracked.is_prefix_of(path))
            });
            return;
        }
    }

    /// Current 1-based count of every level from the root down to `path`.
    pub fn multiplicities_for(&self, path: &TablePath) -> Vec<u32> {
        (1..=path.depth())
            .map(|levels| {
                self.state
                    .get(&path.prefix(levels))
                    .map(|(_, count)| *count)
                    .unwrap_or(1)
            })
            .collect()
    }

    /// Forget everything, at a feature boundary.
    pub fn reset(&mut self) {
        self.state.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(segments: &[&str]) -> TablePath {
        TablePath::from_segments(segments.iter().map(|s| s.to_string()).collect())
    }

    fn keys(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| Value::Integer(*v)).collect()
    }

    #[test]
    fn test_nested_multiplicities() {
        let c = path(&["a", "[id=a_id]b", "[id=b_id]c"]);
        let mut tracker = MultiplicityTracker::new();
        let mut seen = Vec::new();
        for row in [[1, 1, 1], [1, 1, 2], [1, 2, 1], [2, 1, 1]] {
            tracker.track(&c, &keys(&row));
            seen.push(tracker.multiplicities_for(&c));
        }
        assert_eq!(
            seen,
            vec![vec![1, 1, 1], vec![1, 1, 2], vec![1, 2, 1], vec![1, 1, 1]]
        );
    }

    #[test]
    fn test_siblings_reset_on_parent_change() {
        let x = path(&["a", "[id=a_id]b", "[id=b_id]x"]);
        let y = path(&["a", "[id=a_id]b", "[id=b_id]y"]);
        let mut tracker = MultiplicityTracker::new();
        tracker.track(&x, &keys(&[1, 1, 10]));
        tracker.track(&y, &keys(&[1, 1, 20]));
        tracker.track(&y, &keys(&[1, 1, 21]));
        assert_eq!(tracker.multiplicities_for(&y), vec![1, 1, 2]);

        // next b: y's count from the previous b is gone
        tracker.track(&x, &keys(&[1, 2, 11]));
        tracker.track(&y, &keys(&[1, 2, 22]));
        assert_eq!(tracker.multiplicities_for(&y), vec![1, 2, 1]);
    }

    #[test]
    fn test_repeated_key_keeps_count() {
        let b = path(&["a", "[id=a_id]b"]);
        let mut tracker = MultiplicityTracker::new();
        tracker.track(&b, &keys(&[1, 5]));
        tracker.track(&b, &keys(&[1, 6]));
        tracker.track(&b, &keys(&[1, 6]));
        assert_eq!(tracker.multiplicities_for(&b), vec![1, 2]);
        tracker.reset();
        assert_eq!(tracker.multiplicities_for(&b), vec![1, 1]);
    }
}
