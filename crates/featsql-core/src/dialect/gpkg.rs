//! GeoPackage (SQLite/SpatiaLite) dialect.

use chrono::{DateTime, NaiveDate, Utc};

use super::{iso_instant, SqlDialect};

#[derive(Debug, Clone, Copy, Default)]
pub struct GeoPackageDialect;

impl SqlDialect for GeoPackageDialect {
    fn name(&self) -> &'static str {
        "GPKG"
    }

    fn cast_to_string(&self, expr: &str) -> String {
        format!("cast({} as text)", expr)
    }

    fn cast_to_date(&self, expr: &str) -> String {
        format!("date({})", expr)
    }

    fn cast_to_datetime(&self, expr: &str) -> String {
        format!("datetime({})", expr)
    }

    fn date_literal(&self, date: NaiveDate) -> String {
        format!("date('{}')", date.format("%Y-%m-%d"))
    }

    fn datetime_literal(&self, instant: DateTime<Utc>) -> String {
        format!("datetime('{}')", iso_instant(instant))
    }

    fn min_instant(&self) -> String {
        "datetime('0001-01-01T00:00:00Z')".to_string()
    }

    fn max_instant(&self) -> String {
        "datetime('9999-12-31T23:59:59Z')".to_string()
    }

    fn integer_literal(&self, value: i64) -> String {
        format!("CAST({} AS BIGINT)", value)
    }

    // SQLite rejects OFFSET without LIMIT
    fn paging(&self, limit: usize, offset: usize) -> String {
        match (limit, offset) {
            (0, 0) => String::new(),
            (0, offset) => format!(" LIMIT -1 OFFSET {}", offset),
            (limit, 0) => format!(" LIMIT {}", limit),
            (limit, offset) => format!(" LIMIT {} OFFSET {}", limit, offset),
        }
    }

    fn spatial_extent(&self, column: &str) -> String {
        format!("Extent({})", column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments() {
        let d = GeoPackageDialect;
        assert_eq!(d.cast_to_string("A.name"), "cast(A.name as text)");
        assert_eq!(d.integer_literal(-1), "CAST(-1 AS BIGINT)");
        assert_eq!(d.paging(0, 3), " LIMIT -1 OFFSET 3");
        assert_eq!(d.paging(2, 3), " LIMIT 2 OFFSET 3");
        assert_eq!(d.cast_to_date("A.d"), "date(A.d)");
    }
}
