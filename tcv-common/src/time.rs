//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Parse an RFC 3339 timestamp as stored in the database
pub fn parse_rfc3339(value: &str) -> crate::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e)))
}
