//! Error types shared across crates

use thiserror::Error;

/// A row that does not satisfy its table's declared schema
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{table} [{key}]: invalid field '{field}': {reason}")]
pub struct ValidationError {
    pub table: String,
    /// Human-readable natural key of the offending row
    pub key: String,
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(
        table: impl Into<String>,
        key: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }
}
