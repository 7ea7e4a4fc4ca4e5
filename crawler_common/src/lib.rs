//! Crawler Common - shared data model for the cloud pricing crawler
//!
//! This crate provides the vendor-agnostic pieces used by the crawler:
//! - Static table catalog (columns, natural keys, foreign keys)
//! - Enumerated field values
//! - Row-dict canonicalization
//! - Row validation and structured validation errors

pub mod catalog;
pub mod error;
pub mod fields;
pub mod row;
pub mod validate;

pub use catalog::{dependency_order, table, TableDef, EMPTY_KEY, TABLES};
pub use error::ValidationError;
pub use row::Row;
pub use validate::{format_timestamp, parse_timestamp, validate_row};
