//! Filter expression AST.
//!
//! The AST is the output of a CQL2 parser and the input of the SQL filter
//! compiler. It is a closed set of variants: every operator family
//! (scalar, temporal, spatial, array, logical) is matched exhaustively by
//! the compiler.
//!
//! Property references use the dotted queryable path of the schema
//! (`station.name`, `authors.affiliation.city`).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::geometry::Geometry;

/// Binary scalar comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    /// The SQL operator token.
    pub fn as_sql(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
        }
    }

    /// The operator with its operands swapped (`a < b` == `b > a`).
    pub fn flipped(self) -> Self {
        match self {
            ComparisonOp::Lt => ComparisonOp::Gt,
            ComparisonOp::Le => ComparisonOp::Ge,
            ComparisonOp::Gt => ComparisonOp::Lt,
            ComparisonOp::Ge => ComparisonOp::Le,
            other => other,
        }
    }
}

/// Temporal relationship operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TemporalOp {
    TEquals,
    TBefore,
    TAfter,
    TDuring,
    TIntersects,
}

/// Spatial relationship operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpatialOp {
    SEquals,
    SDisjoint,
    STouches,
    SWithin,
    SOverlaps,
    SCrosses,
    SIntersects,
    SContains,
}

/// Array relationship operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArrayOp {
    /// Left contains every element of right.
    AContains,
    /// Same elements, ignoring order.
    AEquals,
    /// At least one shared element.
    AOverlaps,
    /// Every element of left is in right.
    AContainedBy,
}

impl ArrayOp {
    /// The operator with its operands swapped.
    pub fn flipped(self) -> Self {
        match self {
            ArrayOp::AContains => ArrayOp::AContainedBy,
            ArrayOp::AContainedBy => ArrayOp::AContains,
            other => other,
        }
    }
}

/// Scalar literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::String(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::String(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Integer(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Integer(v as i64)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Boolean(v)
    }
}

/// One bound of a temporal interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Bound {
    Instant(DateTime<Utc>),
    Date(NaiveDate),
    /// Unbounded (`..` in CQL2).
    Open,
}

/// Temporal literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TemporalLiteral {
    Instant(DateTime<Utc>),
    Date(NaiveDate),
    Interval { start: Bound, end: Bound },
}

/// A reference to a queryable property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// Dotted queryable path.
    pub name: String,
    /// Restricts which rows of the property's table take part, evaluated
    /// against that table only. May use `position()`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Box<Expr>>,
}

impl Property {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: None,
        }
    }

    /// Attach a nested filter on the property's table.
    pub fn with_filter(mut self, filter: Expr) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

/// Function calls allowed in operand position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Function {
    Upper(Box<Operand>),
    Lower(Box<Operand>),
    /// Case-insensitive comparison.
    Casei(Box<Operand>),
    /// Accent-insensitive comparison, requires a collation.
    Accenti(Box<Operand>),
    /// Interval built from two operands (typically two properties).
    Interval(Box<Operand>, Box<Operand>),
    /// 1-based position of a row within its parent, only inside nested
    /// property filters.
    Position,
}

/// An operand of a predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operand {
    Property(Property),
    Scalar(Scalar),
    Temporal(TemporalLiteral),
    Geometry(Geometry),
    Array(Vec<Scalar>),
    Function(Function),
}

impl Operand {
    /// Property reference without nested filter.
    pub fn property(name: impl Into<String>) -> Self {
        Operand::Property(Property::new(name))
    }

    /// Scalar literal.
    pub fn scalar(value: impl Into<Scalar>) -> Self {
        Operand::Scalar(value.into())
    }

    /// Whether this operand references a column.
    pub fn has_property(&self) -> bool {
        match self {
            Operand::Property(_) => true,
            Operand::Function(f) => match f {
                Function::Upper(o) | Function::Lower(o) | Function::Casei(o) | Function::Accenti(o) => {
                    o.has_property()
                }
                Function::Interval(a, b) => a.has_property() || b.has_property(),
                Function::Position => true,
            },
            _ => false,
        }
    }
}

/// Boolean filter expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Compare {
        op: ComparisonOp,
        left: Operand,
        right: Operand,
    },
    Like {
        value: Operand,
        pattern: Operand,
    },
    In {
        value: Operand,
        list: Vec<Scalar>,
    },
    IsNull(Operand),
    Between {
        value: Operand,
        low: Scalar,
        high: Scalar,
    },
    Temporal {
        op: TemporalOp,
        left: Operand,
        right: Operand,
    },
    Spatial {
        op: SpatialOp,
        left: Operand,
        right: Operand,
    },
    Array {
        op: ArrayOp,
        left: Operand,
        right: Operand,
    },
    /// Constant `true`/`false`.
    Literal(bool),
}

impl Expr {
    /// Parse a structured (JSON) filter document.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(text)?)
    }

    /// `property = value`.
    pub fn eq(property: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Self::compare(ComparisonOp::Eq, property, value)
    }

    /// `property <> value`.
    pub fn ne(property: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Self::compare(ComparisonOp::Ne, property, value)
    }

    /// `property <op> value`.
    pub fn compare(op: ComparisonOp, property: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Expr::Compare {
            op,
            left: Operand::property(property),
            right: Operand::scalar(value),
        }
    }

    /// `property LIKE pattern`.
    pub fn like(property: impl Into<String>, pattern: impl Into<String>) -> Self {
        Expr::Like {
            value: Operand::property(property),
            pattern: Operand::Scalar(Scalar::String(pattern.into())),
        }
    }

    /// `property IN (values)`.
    pub fn in_list(property: impl Into<String>, list: Vec<Scalar>) -> Self {
        Expr::In {
            value: Operand::property(property),
            list,
        }
    }

    /// `property IS NULL`.
    pub fn is_null(property: impl Into<String>) -> Self {
        Expr::IsNull(Operand::property(property))
    }

    /// `property BETWEEN low AND high`.
    pub fn between(
        property: impl Into<String>,
        low: impl Into<Scalar>,
        high: impl Into<Scalar>,
    ) -> Self {
        Expr::Between {
            value: Operand::property(property),
            low: low.into(),
            high: high.into(),
        }
    }

    /// Spatial predicate between a property and a geometry literal.
    pub fn spatial(op: SpatialOp, property: impl Into<String>, geometry: Geometry) -> Self {
        Expr::Spatial {
            op,
            left: Operand::property(property),
            right: Operand::Geometry(geometry),
        }
    }

    /// Temporal predicate between a property and a temporal literal.
    pub fn temporal(op: TemporalOp, property: impl Into<String>, literal: TemporalLiteral) -> Self {
        Expr::Temporal {
            op,
            left: Operand::property(property),
            right: Operand::Temporal(literal),
        }
    }

    /// Array predicate between a property and an array literal.
    pub fn array(op: ArrayOp, property: impl Into<String>, values: Vec<Scalar>) -> Self {
        Expr::Array {
            op,
            left: Operand::property(property),
            right: Operand::Array(values),
        }
    }

    pub fn and(exprs: Vec<Expr>) -> Self {
        Expr::And(exprs)
    }

    pub fn or(exprs: Vec<Expr>) -> Self {
        Expr::Or(exprs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    /// Whether the expression uses `position()` anywhere.
    pub fn uses_position(&self) -> bool {
        fn operand(o: &Operand) -> bool {
            match o {
                Operand::Function(Function::Position) => true,
                Operand::Function(
                    Function::Upper(inner)
                    | Function::Lower(inner)
                    | Function::Casei(inner)
                    | Function::Accenti(inner),
                ) => operand(inner),
                Operand::Function(Function::Interval(a, b)) => operand(a) || operand(b),
                _ => false,
            }
        }
        match self {
            Expr::And(exprs) | Expr::Or(exprs) => exprs.iter().any(Expr::uses_position),
            Expr::Not(inner) => inner.uses_position(),
            Expr::Compare { left, right, .. }
            | Expr::Temporal { left, right, .. }
            | Expr::Spatial { left, right, .. }
            | Expr::Array { left, right, .. } => operand(left) || operand(right),
            Expr::Like { value, pattern } => operand(value) || operand(pattern),
            Expr::In { value, .. } | Expr::Between { value, .. } | Expr::IsNull(value) => {
                operand(value)
            }
            Expr::Literal(_) => false,
        }
    }
}
