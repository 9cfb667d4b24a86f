//! SQL dialect adapters.
//!
//! The filter compiler and the template compiler only emit dialect-specific
//! fragments through [`SqlDialect`].

mod gpkg;
mod postgis;

pub use gpkg::GeoPackageDialect;
pub use postgis::PostGisDialect;

use std::fmt::Debug;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use featsql_proto::SpatialOp;

use crate::config::DialectKind;

/// Dialect-specific SQL fragments.
pub trait SqlDialect: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Read a geometry column as WKT.
    fn geometry_as_text(&self, column: &str) -> String {
        format!("ST_AsText({})", column)
    }

    /// Geometry literal from WKT.
    fn geometry_literal(&self, wkt: &str, srid: i32) -> String {
        format!("ST_GeomFromText('{}',{})", self.escape_string(wkt), srid)
    }

    fn cast_to_string(&self, expr: &str) -> String;

    fn cast_to_date(&self, expr: &str) -> String;

    fn cast_to_datetime(&self, expr: &str) -> String;

    fn date_literal(&self, date: NaiveDate) -> String;

    fn datetime_literal(&self, instant: DateTime<Utc>) -> String;

    /// Smallest representable instant, used for open interval starts.
    fn min_instant(&self) -> String;

    /// Largest representable instant, used for open interval ends.
    fn max_instant(&self) -> String;

    /// Integer literal typed as a 64-bit integer.
    fn integer_literal(&self, value: i64) -> String;

    fn escape_string(&self, value: &str) -> String {
        value.replace('\'', "''")
    }

    fn string_literal(&self, value: &str) -> String {
        format!("'{}'", self.escape_string(value))
    }

    /// `LIMIT`/`OFFSET` suffix with a leading space, empty when both are 0.
    fn paging(&self, limit: usize, offset: usize) -> String {
        let mut sql = String::new();
        if limit > 0 {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if offset > 0 {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        sql
    }

    fn spatial_function(&self, op: SpatialOp) -> &'static str {
        match op {
            SpatialOp::SEquals => "ST_Equals",
            SpatialOp::SDisjoint => "ST_Disjoint",
            SpatialOp::STouches => "ST_Touches",
            SpatialOp::SWithin => "ST_Within",
            SpatialOp::SOverlaps => "ST_Overlaps",
            SpatialOp::SCrosses => "ST_Crosses",
            SpatialOp::SIntersects => "ST_Intersects",
            SpatialOp::SContains => "ST_Contains",
        }
    }

    /// Aggregate computing the bounding box of a geometry column.
    fn spatial_extent(&self, column: &str) -> String;
}

/// Dialect implementation for a configured kind.
pub fn dialect_for(kind: DialectKind) -> Arc<dyn SqlDialect> {
    match kind {
        DialectKind::PostGis => Arc::new(PostGisDialect),
        DialectKind::GeoPackage => Arc::new(GeoPackageDialect),
    }
}

pub(crate) fn iso_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}
