//! SQLite storage layer.
//!
//! Store implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod budget;
pub mod completion;
pub mod pool;

use chrono::{DateTime, SecondsFormat, Utc};
use switchyard_types::error::RepositoryError;

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}
