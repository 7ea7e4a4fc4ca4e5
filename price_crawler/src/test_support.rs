//! Fixtures shared by the unit tests

use crate::database::init_schema;
use crawler_common::{Row, TABLES};
use rusqlite::Connection;
use serde_json::{json, Value};

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

/// In-memory database with every primary table (and optionally SCD tables)
pub fn memory_db(with_scd: bool) -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    init_schema(&conn, TABLES, with_scd).unwrap();
    conn
}

pub fn country(id: &str) -> Row {
    row(json!({"country_id": id, "continent": "Europe"}))
}

pub fn vendor(id: &str) -> Row {
    row(json!({
        "vendor_id": id,
        "name": format!("Vendor {id}"),
        "country_id": "DE",
        "founding_year": 2000,
    }))
}

pub fn region(vendor_id: &str, region_id: &str) -> Row {
    row(json!({
        "vendor_id": vendor_id,
        "region_id": region_id,
        "name": region_id,
        "api_reference": region_id,
        "display_name": region_id,
        "country_id": "DE",
    }))
}

pub fn zone(vendor_id: &str, region_id: &str, zone_id: &str) -> Row {
    row(json!({
        "vendor_id": vendor_id,
        "region_id": region_id,
        "zone_id": zone_id,
        "name": zone_id,
        "api_reference": zone_id,
        "display_name": zone_id,
    }))
}

pub fn server(vendor_id: &str, server_id: &str, vcpus: i64) -> Row {
    row(json!({
        "vendor_id": vendor_id,
        "server_id": server_id,
        "name": server_id,
        "api_reference": server_id,
        "display_name": server_id,
        "vcpus": vcpus,
        "cpu_allocation": "Shared",
        "cpu_architecture": "x86_64",
        "memory_amount": 2048,
    }))
}

pub fn server_price(vendor_id: &str, region_id: &str, zone_id: &str, server_id: &str, price: f64) -> Row {
    row(json!({
        "vendor_id": vendor_id,
        "region_id": region_id,
        "zone_id": zone_id,
        "server_id": server_id,
        "operating_system": "Linux",
        "unit": "hour",
        "price": price,
    }))
}
