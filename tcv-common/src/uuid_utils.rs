//! UUID utilities

use uuid::Uuid;

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Parse UUID from string
pub fn parse(s: &str) -> Result<Uuid, uuid::Error> {
    Uuid::parse_str(s)
}

/// Parse a UUID column read back from the database
pub fn parse_column(column: &str, s: &str) -> crate::Result<Uuid> {
    Uuid::parse_str(s)
        .map_err(|e| crate::Error::Internal(format!("Invalid UUID in column {}: {}", column, e)))
}
