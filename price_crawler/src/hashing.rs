//! Deterministic content digests
//!
//! Rows are canonicalized (sorted object keys, sorted set-valued columns,
//! ignored meta columns dropped), ordered by natural key and digested with
//! SHA-256, so the digest depends only on table content.

use crate::database::read_rows;
use crate::error::Result;
use crawler_common::row::{canonical_row, key_json};
use crawler_common::{Row, TableDef};
use rusqlite::Connection;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Granularity of [`hash_tables`] output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashLevel {
    /// One digest for all selected tables
    Database,
    /// One digest per table
    Table,
    /// One digest per row, keyed by natural key
    Row,
}

fn sha256_hex(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

pub fn row_digest(table: &TableDef, row: &Row) -> String {
    sha256_hex(&Value::Object(canonical_row(table, row)).to_string())
}

/// `(natural key, row digest)` pairs sorted by key
fn keyed_digests(table: &TableDef, rows: &[Row]) -> Vec<(String, String)> {
    let mut digests: Vec<(String, String)> = rows
        .iter()
        .map(|r| (key_json(table, r), row_digest(table, r)))
        .collect();
    digests.sort();
    digests
}

pub fn table_digest(table: &TableDef, rows: &[Row]) -> String {
    let digests = keyed_digests(table, rows);
    let mut hasher = Sha256::new();
    for (key, digest) in &digests {
        hasher.update(key.as_bytes());
        hasher.update(b"\t");
        hasher.update(digest.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Hash the given tables at the requested level.
///
/// - `Row`: `{table: {key: digest}}`
/// - `Table`: `{table: digest}`
/// - `Database`: a single digest string over the table-level result
pub fn hash_tables(conn: &Connection, tables: &[&TableDef], level: HashLevel) -> Result<Value> {
    let mut out = Map::new();
    for table in tables {
        let rows = read_rows(conn, table)?;
        let value = match level {
            HashLevel::Row => Value::Object(
                keyed_digests(table, &rows)
                    .into_iter()
                    .map(|(k, d)| (k, Value::String(d)))
                    .collect(),
            ),
            HashLevel::Table | HashLevel::Database => Value::String(table_digest(table, &rows)),
        };
        log::debug!("Hashed {} rows of {}", rows.len(), table.name);
        out.insert(table.name.to_string(), value);
    }

    Ok(match level {
        HashLevel::Database => Value::String(sha256_hex(&Value::Object(out).to_string())),
        _ => Value::Object(out),
    })
}
