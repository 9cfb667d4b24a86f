//! Provider and feature type configuration.
//!
//! Configuration is deserialized from JSON (camelCase keys) or assembled
//! with the `with_*` builders. Loading it from files or remote stores is the
//! caller's concern.

use featsql_proto::{Expr, ValueType};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default sort key column of every table.
pub const DEFAULT_SORT_KEY: &str = "id";

/// Default primary key column of every table.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Default EPSG code of geometry columns and literals.
pub const DEFAULT_NATIVE_SRID: i32 = 4326;

/// Minimum queue length of the request budget.
pub const MIN_QUEUE_SIZE: usize = 1024;

/// SQL dialect of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DialectKind {
    #[default]
    #[serde(rename = "PGIS")]
    PostGis,
    #[serde(rename = "GPKG")]
    GeoPackage,
}

/// Provider-wide settings shared by every feature type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub dialect: DialectKind,
    /// Sort key used when a table segment has no `{sortKey=...}` flag.
    pub default_sort_key: String,
    /// Primary key used when a table segment has no `{primaryKey=...}` flag.
    pub default_primary_key: String,
    /// Schema prefixed to unqualified table names.
    pub default_schema: Option<String>,
    /// Tables whose name matches are junctions without needing `{junction}`.
    pub junction_table_pattern: Option<String>,
    pub compute_number_matched: bool,
    pub compute_number_skipped: bool,
    /// Physical connections available; 0 derives it from the CPU count.
    pub max_connections: usize,
    /// Collation applied by `accenti()`.
    pub accenti_collation: Option<String>,
    pub native_srid: i32,
    /// Waiting requests allowed beyond the running ones.
    pub queue_size: Option<usize>,
}

impl ProviderConfig {
    pub fn new(dialect: DialectKind) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    /// Parse a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }

    pub fn with_default_sort_key(mut self, key: impl Into<String>) -> Self {
        self.default_sort_key = key.into();
        self
    }

    pub fn with_default_primary_key(mut self, key: impl Into<String>) -> Self {
        self.default_primary_key = key.into();
        self
    }

    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = Some(schema.into());
        self
    }

    pub fn with_junction_table_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.junction_table_pattern = Some(pattern.into());
        self
    }

    pub fn with_number_matched(mut self, enabled: bool) -> Self {
        self.compute_number_matched = enabled;
        self
    }

    pub fn with_number_skipped(mut self, enabled: bool) -> Self {
        self.compute_number_skipped = enabled;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_accenti_collation(mut self, collation: impl Into<String>) -> Self {
        self.accenti_collation = Some(collation.into());
        self
    }

    pub fn with_native_srid(mut self, srid: i32) -> Self {
        self.native_srid = srid;
        self
    }

    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = Some(size);
        self
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            dialect: DialectKind::default(),
            default_sort_key: DEFAULT_SORT_KEY.to_string(),
            default_primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            default_schema: None,
            junction_table_pattern: None,
            compute_number_matched: true,
            compute_number_skipped: true,
            max_connections: 0,
            accenti_collation: None,
            native_srid: DEFAULT_NATIVE_SRID,
            queue_size: None,
        }
    }
}

/// Declared type of a feature property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Datetime,
    Geometry,
    Object,
    ValueArray,
    ObjectArray,
}

impl PropertyType {
    /// Scalar type for value properties.
    pub fn value_type(self) -> Option<ValueType> {
        match self {
            PropertyType::String => Some(ValueType::String),
            PropertyType::Integer => Some(ValueType::Integer),
            PropertyType::Float => Some(ValueType::Float),
            PropertyType::Boolean => Some(ValueType::Boolean),
            PropertyType::Date => Some(ValueType::Date),
            PropertyType::Datetime => Some(ValueType::Datetime),
            PropertyType::Geometry => Some(ValueType::Geometry),
            PropertyType::Object | PropertyType::ValueArray | PropertyType::ObjectArray => None,
        }
    }
}

/// Special meaning of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// The feature id.
    Id,
    /// The primary geometry.
    PrimaryGeometry,
    /// The primary instant.
    PrimaryInstant,
}

/// One property of a feature type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    /// Path relative to the parent's table, e.g. `[id=obs_id]tag/value`.
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    /// Fixed value, no column is read.
    #[serde(default)]
    pub constant: Option<String>,
    /// Raw SQL; `{table}` is replaced by the alias of the owning table.
    #[serde(default)]
    pub expression: Option<String>,
    /// Element type of a `VALUE_ARRAY`.
    #[serde(default)]
    pub value_type: Option<ValueType>,
    #[serde(default)]
    pub properties: Vec<PropertyConfig>,
}

impl PropertyConfig {
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            source_path: None,
            role: None,
            constant: None,
            expression: None,
            value_type: None,
            properties: Vec::new(),
        }
    }

    /// Value property read from a column path.
    pub fn value(
        name: impl Into<String>,
        property_type: PropertyType,
        source_path: impl Into<String>,
    ) -> Self {
        Self::new(name, property_type).with_source_path(source_path)
    }

    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_constant(mut self, value: impl Into<String>) -> Self {
        self.constant = Some(value.into());
        self
    }

    pub fn with_expression(mut self, sql: impl Into<String>) -> Self {
        self.expression = Some(sql.into());
        self
    }

    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = Some(value_type);
        self
    }

    pub fn with_property(mut self, property: PropertyConfig) -> Self {
        self.properties.push(property);
        self
    }
}

/// A feature type: a root table and its properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureTypeConfig {
    pub name: String,
    /// Root table path, e.g. `/observation{sortKey=oid}`.
    pub source_path: String,
    /// Filter applied to every query of this type, on top of flag filters.
    #[serde(default)]
    pub filter: Option<Expr>,
    #[serde(default)]
    pub properties: Vec<PropertyConfig>,
}

impl FeatureTypeConfig {
    pub fn new(name: impl Into<String>, source_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_path: source_path.into(),
            filter: None,
            properties: Vec::new(),
        }
    }

    /// Parse a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }

    pub fn with_filter(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_property(mut self, property: PropertyConfig) -> Self {
        self.properties.push(property);
        self
    }
}
