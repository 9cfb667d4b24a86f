//! Feature events emitted by the decoder.

use serde::{Deserialize, Serialize};

use crate::value::{Value, ValueType};

/// Path of a schema node as property names from the feature root.
pub type SchemaPath = Vec<String>;

/// Page-level counts. `-1` means unknown or not computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub number_returned: i64,
    pub number_matched: i64,
    pub number_skipped: i64,
}

impl Counts {
    /// Counts with every number unknown.
    pub fn unknown() -> Self {
        Self {
            number_returned: -1,
            number_matched: -1,
            number_skipped: -1,
        }
    }
}

impl Default for Counts {
    fn default() -> Self {
        Self::unknown()
    }
}

/// One event of the nested feature stream.
///
/// Object and array events are strictly nested: every start has a matching
/// end, closed innermost first, and no scope stays open across a feature
/// boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeatureEvent {
    /// Start of a page, carrying the meta query counts.
    Start(Counts),
    FeatureStart { id: Value },
    ObjectStart { path: SchemaPath },
    ObjectEnd { path: SchemaPath },
    ArrayStart { path: SchemaPath },
    ArrayEnd { path: SchemaPath },
    Value {
        path: SchemaPath,
        value: Value,
        value_type: ValueType,
    },
    /// A geometry column as produced by the geometry decoder.
    Geometry { path: SchemaPath, wkt: String },
    FeatureEnd,
    /// End of a page.
    End,
}

impl FeatureEvent {
    /// Whether this event opens a scope.
    pub fn is_start(&self) -> bool {
        matches!(
            self,
            FeatureEvent::FeatureStart { .. }
                | FeatureEvent::ObjectStart { .. }
                | FeatureEvent::ArrayStart { .. }
        )
    }

    /// Whether this event closes a scope.
    pub fn is_end(&self) -> bool {
        matches!(
            self,
            FeatureEvent::FeatureEnd | FeatureEvent::ObjectEnd { .. } | FeatureEvent::ArrayEnd { .. }
        )
    }
}
