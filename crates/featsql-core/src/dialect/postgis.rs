//! PostgreSQL/PostGIS dialect.

use chrono::{DateTime, NaiveDate, Utc};

use super::{iso_instant, SqlDialect};

#[derive(Debug, Clone, Copy, Default)]
pub struct PostGisDialect;

impl SqlDialect for PostGisDialect {
    fn name(&self) -> &'static str {
        "PGIS"
    }

    fn cast_to_string(&self, expr: &str) -> String {
        format!("{}::varchar", expr)
    }

    fn cast_to_date(&self, expr: &str) -> String {
        format!("{}::date", expr)
    }

    fn cast_to_datetime(&self, expr: &str) -> String {
        format!("{}::timestamp(0)", expr)
    }

    fn date_literal(&self, date: NaiveDate) -> String {
        format!("DATE '{}'", date.format("%Y-%m-%d"))
    }

    fn datetime_literal(&self, instant: DateTime<Utc>) -> String {
        format!("TIMESTAMP '{}'", iso_instant(instant))
    }

    fn min_instant(&self) -> String {
        "TIMESTAMP '-infinity'".to_string()
    }

    fn max_instant(&self) -> String {
        "TIMESTAMP 'infinity'".to_string()
    }

    fn integer_literal(&self, value: i64) -> String {
        format!("{}::bigint", value)
    }

    fn spatial_extent(&self, column: &str) -> String {
        format!("ST_Extent({})", column)
    }
}
