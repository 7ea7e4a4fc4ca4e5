//! Row-dicts and their canonical forms
//!
//! Rows travel between layers as plain JSON objects. Everything that compares
//! or hashes rows goes through the canonical form built here, so that
//! unordered collections compare equal regardless of element order.

use crate::catalog::{ColumnType, TableDef, EMPTY_KEY};
use serde_json::{Map, Value};

/// A single row: column name → value.
///
/// Backed by `serde_json::Map`, which keeps keys sorted.
pub type Row = Map<String, Value>;

/// Build a row from a JSON object. Anything else yields an empty row.
pub fn row_from_json(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Canonical form of a single value for the given column type.
///
/// Set-valued columns are sorted by their JSON text; objects already have
/// sorted keys. Lists and price tiers keep their order.
pub fn canonical_value(ty: &ColumnType, value: &Value) -> Value {
    match (ty, value) {
        (ColumnType::Set, Value::Array(items)) => {
            let mut items = items.clone();
            items.sort_by_cached_key(|v| v.to_string());
            items.dedup();
            Value::Array(items)
        }
        _ => value.clone(),
    }
}

/// Natural key values of a row, in key declaration order.
///
/// Missing optional key components come back as [`EMPTY_KEY`], other missing
/// components fall back to the column default.
pub fn natural_key(table: &TableDef, row: &Row) -> Vec<Value> {
    table
        .primary_key
        .iter()
        .map(|k| match row.get(*k) {
            Some(Value::Null) | None if table.is_optional_key(k) => Value::from(EMPTY_KEY),
            Some(v) => v.clone(),
            None => table
                .column(k)
                .and_then(|c| c.default)
                .map(|d| d.to_json())
                .unwrap_or(Value::Null),
        })
        .collect()
}

/// Stable textual identity of a row: the JSON object of its key columns.
pub fn key_json(table: &TableDef, row: &Row) -> String {
    let mut keys = Map::new();
    for (name, value) in table.primary_key.iter().zip(natural_key(table, row)) {
        keys.insert((*name).to_string(), value);
    }
    Value::Object(keys).to_string()
}

/// Human-readable key, e.g. `aws/us-east-1/m5.large`
pub fn key_label(table: &TableDef, row: &Row) -> String {
    natural_key(table, row)
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Canonical non-key attributes of a row, used for change detection.
///
/// Ignored meta columns (`observed_at`) are dropped, and missing columns are
/// treated as NULL.
pub fn canonical_attributes(table: &TableDef, row: &Row) -> Row {
    let mut out = Map::new();
    for column in table.attribute_columns() {
        let value = row.get(column.name).unwrap_or(&Value::Null);
        out.insert(column.name.to_string(), canonical_value(&column.ty, value));
    }
    out
}

/// Canonical full row (keys and attributes), without ignored columns
pub fn canonical_row(table: &TableDef, row: &Row) -> Row {
    let mut out = canonical_attributes(table, row);
    for (name, value) in table.primary_key.iter().zip(natural_key(table, row)) {
        out.insert((*name).to_string(), value);
    }
    out
}

/// Whether two rows of the same table differ in any non-key field
pub fn attributes_differ(table: &TableDef, a: &Row, b: &Row) -> bool {
    canonical_attributes(table, a) != canonical_attributes(table, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{REGION, SERVER, SERVER_PRICE};
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn set_columns_ignore_element_order() {
        let a = row(json!({"vendor_id": "v", "server_id": "a", "cpu_flags": ["sse", "avx"]}));
        let b = row(json!({"vendor_id": "v", "server_id": "a", "cpu_flags": ["avx", "sse"]}));
        assert!(!attributes_differ(&SERVER, &a, &b));
    }

    #[test]
    fn list_columns_respect_element_order() {
        let tiers_a = json!([{"lower": 0, "upper": 10, "price": 1.0}, {"lower": 10, "upper": "Infinity", "price": 0.5}]);
        let tiers_b = json!([{"lower": 10, "upper": "Infinity", "price": 0.5}, {"lower": 0, "upper": 10, "price": 1.0}]);
        let a = row(json!({"vendor_id": "v", "price_tiered": tiers_a}));
        let b = row(json!({"vendor_id": "v", "price_tiered": tiers_b}));
        assert!(attributes_differ(&SERVER_PRICE, &a, &b));
    }

    #[test]
    fn observed_at_is_not_a_change() {
        let a = row(json!({"vendor_id": "v", "region_id": "r", "name": "x", "observed_at": "2024-01-01T00:00:00.000000Z"}));
        let b = row(json!({"vendor_id": "v", "region_id": "r", "name": "x", "observed_at": "2025-01-01T00:00:00.000000Z"}));
        assert!(!attributes_differ(&REGION, &a, &b));
    }

    #[test]
    fn optional_key_uses_sentinel() {
        let r = row(json!({
            "vendor_id": "v", "region_id": "r", "zone_id": null, "server_id": "s",
            "allocation": "spot", "operating_system": "Linux"
        }));
        let key = natural_key(&SERVER_PRICE, &r);
        assert_eq!(key[2], json!(""));
        assert_eq!(key_label(&SERVER_PRICE, &r), "v/r//s/spot/Linux");
    }

    #[test]
    fn key_json_is_independent_of_column_order() {
        let a = row(json!({"region_id": "r", "vendor_id": "v"}));
        let b = row(json!({"vendor_id": "v", "region_id": "r"}));
        assert_eq!(key_json(&REGION, &a), key_json(&REGION, &b));
        assert_eq!(key_json(&REGION, &a), r#"{"region_id":"r","vendor_id":"v"}"#);
    }
}
