//! Timestamp utilities

use chrono::{DateTime, SecondsFormat, Utc};

/// Parse an RFC 3339 timestamp as stored in the database
pub fn parse_rfc3339(value: &str) -> crate::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::Error::Decode(format!("Invalid timestamp '{}': {}", value, e)))
}

/// Format a timestamp for storage
///
/// Fixed-width microsecond RFC 3339 in UTC, so stored values compare and
/// sort correctly as plain text.
pub fn to_db_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}
