//! Error types for price_crawler

use crawler_common::ValidationError;
use thiserror::Error;

/// Unified error type for price_crawler operations
#[derive(Debug, Error)]
pub enum CrawlerError {
    /// HTTP request failed (network error, timeout, etc.)
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP error status code
    #[error("HTTP error: {status} ({url})")]
    HttpStatus {
        status: reqwest::StatusCode,
        url: String,
    },
    /// Failed to parse JSON
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// Vendor response parsed but did not have the expected shape
    #[error("Unexpected response from {vendor}: {detail}")]
    MalformedResponse { vendor: String, detail: String },
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Row does not satisfy its table schema
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    /// Row references a parent row that does not exist
    #[error("Integrity error: {table} [{key}] references missing {parent} [{parent_key}]")]
    Integrity {
        table: String,
        key: String,
        parent: String,
        parent_key: String,
    },
    /// Row cannot be removed while a child row still references it
    #[error("Integrity error: {table} [{key}] is still referenced by {child}")]
    Referenced {
        table: String,
        key: String,
        child: String,
    },
    /// Required environment variable is not set
    #[error("Missing environment variable: {0}")]
    MissingCredentials(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Unknown table: {0}")]
    UnknownTable(String),
    #[error("Unknown vendor: {0}")]
    UnknownVendor(String),
    /// Source and target databases were created from different catalog versions
    #[error("Schema version mismatch: source is {source_version:?}, target is {target_version:?}")]
    SchemaMismatch {
        source_version: Option<String>,
        target_version: Option<String>,
    },
}

/// Short alias used throughout the crate
pub type Error = CrawlerError;

/// Result alias for price_crawler operations
pub type Result<T> = std::result::Result<T, CrawlerError>;

impl CrawlerError {
    /// Whether the failed request is worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            CrawlerError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            CrawlerError::Parse(_) => true,
            CrawlerError::HttpStatus { status, .. } => {
                status.as_u16() == 429 || status.is_server_error()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        let err = |code: u16| CrawlerError::HttpStatus {
            status: reqwest::StatusCode::from_u16(code).unwrap(),
            url: "http://localhost/x".to_string(),
        };
        assert!(err(429).is_transient());
        assert!(err(503).is_transient());
        assert!(!err(404).is_transient());
        assert!(!err(401).is_transient());
        assert!(!CrawlerError::Config("x".into()).is_transient());
    }

    #[test]
    fn validation_error_message_names_table_key_and_field() {
        let err: CrawlerError =
            ValidationError::new("server", "aws/m5.large", "vcpus", "expected integer").into();
        assert_eq!(
            err.to_string(),
            "Validation error: server [aws/m5.large]: invalid field 'vcpus': expected integer"
        );
    }
}
