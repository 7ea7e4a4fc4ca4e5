//! End-to-end tests: pull into a working database, sync it into a long-lived
//! database with history, and hash the result.

use crawler_common::catalog::{SERVER, SERVER_PRICE, VALID_FROM, VALID_TO};
use crawler_common::row::row_from_json;
use crawler_common::{parse_timestamp, Row, TableDef, TABLES};
use price_crawler::database::{count_rows, read_rows, read_scd_versions};
use price_crawler::inventory::{Inventory, InventoryOp, VendorContext};
use price_crawler::pull::{pull_vendor, seed_lookups, OpStatus};
use price_crawler::{
    hash_tables, init_schema, orchestrator, sync_table, HashLevel, InsertOptions, RecordCache,
    Result, SyncMode, SyncOptions, TableStatus,
};
use rusqlite::Connection;
use serde_json::{json, Value};

/// A tiny vendor whose server sizes and prices can be changed between pulls
struct StaticVendor {
    servers: Vec<(&'static str, i64, f64)>,
}

impl StaticVendor {
    fn region(&self) -> Row {
        row_from_json(json!({
            "vendor_id": "static",
            "region_id": "eu1",
            "name": "Europe 1",
            "api_reference": "eu1",
            "display_name": "Europe 1 (DE)",
            "country_id": "DE",
            "aliases": ["eu-central", "frankfurt"],
        }))
    }
}

impl Inventory for StaticVendor {
    fn vendor_id(&self) -> &'static str {
        "static"
    }

    fn vendor_row(&self) -> Row {
        row_from_json(json!({
            "vendor_id": "static",
            "name": "Static Cloud",
            "country_id": "DE",
            "founding_year": 2020,
        }))
    }

    async fn compliance_frameworks(&self, _ctx: &VendorContext) -> Result<Vec<Row>> {
        Ok(vec![row_from_json(
            json!({"vendor_id": "static", "compliance_framework_id": "iso27001"}),
        )])
    }

    async fn regions(&self, _ctx: &VendorContext) -> Result<Vec<Row>> {
        Ok(vec![self.region()])
    }

    // bundled into regions
    async fn zones(&self, _ctx: &VendorContext) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }

    async fn servers(&self, _ctx: &VendorContext) -> Result<Vec<Row>> {
        Ok(self
            .servers
            .iter()
            .map(|(id, vcpus, _)| {
                row_from_json(json!({
                    "vendor_id": "static",
                    "server_id": id,
                    "name": id,
                    "api_reference": id,
                    "display_name": id,
                    "vcpus": vcpus,
                    "cpu_allocation": "Dedicated",
                    "cpu_architecture": "x86_64",
                    "memory_amount": vcpus * 1024,
                    "cpu_flags": ["sse4_2", "avx2", "aes"],
                }))
            })
            .collect())
    }

    async fn server_prices(&self, _ctx: &VendorContext) -> Result<Vec<Row>> {
        Ok(self
            .servers
            .iter()
            .map(|(id, _, price)| {
                row_from_json(json!({
                    "vendor_id": "static",
                    "region_id": "eu1",
                    "server_id": id,
                    "operating_system": "Linux",
                    "unit": "hour",
                    "price": price,
                    "currency": "EUR",
                }))
            })
            .collect())
    }

    async fn server_prices_spot(&self, _ctx: &VendorContext) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }

    async fn storages(&self, _ctx: &VendorContext) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }

    async fn storage_prices(&self, _ctx: &VendorContext) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }

    async fn traffic_prices(&self, _ctx: &VendorContext) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }

    async fn ipv4_prices(&self, _ctx: &VendorContext) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }
}

fn database(with_scd: bool) -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    init_schema(&conn, TABLES, with_scd).unwrap();
    conn
}

async fn pull_static(conn: &mut Connection, vendor: &StaticVendor, observed_at: &str) -> Vec<OpStatus> {
    let options = InsertOptions::new(observed_at);
    seed_lookups(conn, &options).unwrap();
    let mut ctx = VendorContext::new("static", RecordCache::disabled());
    let report = pull_vendor(conn, vendor, &mut ctx, &InventoryOp::ORDER, &options).await;
    assert!(!report.failed(), "{report:?}");
    report.ops.into_iter().map(|r| r.status).collect()
}

fn sync_all(source: &Connection, dest: &mut Connection, mode: SyncMode, now: &str) -> orchestrator::RunReport {
    let tables: Vec<&TableDef> = TABLES.iter().collect();
    let options = SyncOptions {
        now: parse_timestamp(now),
        ..Default::default()
    };
    orchestrator::run(source, dest, &tables, mode, &options)
}

fn versions_of(conn: &Connection, table: &TableDef, key_column: &str, key: &str) -> Vec<Row> {
    let mut versions: Vec<Row> = read_scd_versions(conn, table)
        .unwrap()
        .into_iter()
        .filter(|r| r[key_column] == key)
        .collect();
    versions.sort_by(|a, b| a[VALID_FROM].as_str().cmp(&b[VALID_FROM].as_str()));
    versions
}

#[tokio::test]
async fn repeated_pull_is_idempotent() {
    let mut conn = database(false);
    let vendor = StaticVendor {
        servers: vec![("small", 2, 0.01), ("large", 8, 0.04)],
    };

    pull_static(&mut conn, &vendor, "2024-01-01T00:00:00.000000Z").await;
    let hash_before = hash_tables(&conn, &TABLES.iter().collect::<Vec<_>>(), HashLevel::Database).unwrap();

    let second = pull_static(&mut conn, &vendor, "2024-01-02T00:00:00.000000Z").await;
    for status in &second {
        match status {
            OpStatus::Ok(res) => {
                assert_eq!(res.inserted, 0);
                assert_eq!(res.updated, 0);
                assert_eq!(res.inactivated, 0);
            }
            other => panic!("Unexpected status: {other:?}"),
        }
    }
    let hash_after = hash_tables(&conn, &TABLES.iter().collect::<Vec<_>>(), HashLevel::Database).unwrap();
    assert_eq!(hash_before, hash_after);
}

#[tokio::test]
async fn pulled_snapshots_build_contiguous_history() {
    let mut working = database(false);
    let mut history = database(true);

    // v1
    let v1 = StaticVendor {
        servers: vec![("a", 4, 0.02)],
    };
    pull_static(&mut working, &v1, "2024-01-01T00:00:00.000000Z").await;
    let report = sync_all(&working, &mut history, SyncMode::Scd, "2024-01-01T01:00:00Z");
    assert!(!report.failed());
    assert_eq!(report.table("server").unwrap().counts.added, 1);

    // v2: same server, more vCPUs
    let v2 = StaticVendor {
        servers: vec![("a", 8, 0.02)],
    };
    pull_static(&mut working, &v2, "2024-01-02T00:00:00.000000Z").await;
    let report = sync_all(&working, &mut history, SyncMode::Scd, "2024-01-02T01:00:00Z");
    assert_eq!(report.table("server").unwrap().counts.updated, 1);
    assert_eq!(report.table("server_price").unwrap().counts.unchanged, 1);

    // v3: the server is gone from the primary table entirely
    let mut v3_source = database(false);
    for table in TABLES.iter().filter(|t| t.name != "server" && t.name != "server_price") {
        let rows = read_rows(&working, table).unwrap();
        sync_table(&mut v3_source, table, &rows, SyncMode::Overwrite, &SyncOptions::default()).unwrap();
    }
    let report = sync_all(&v3_source, &mut history, SyncMode::Scd, "2024-01-03T01:00:00Z");
    assert_eq!(report.table("server").unwrap().counts.removed, 1);

    let versions = versions_of(&history, &SERVER, "server_id", "a");
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0]["vcpus"], 4);
    assert_eq!(versions[0][VALID_FROM], "2024-01-01T01:00:00.000000Z");
    assert_eq!(versions[0][VALID_TO], "2024-01-02T01:00:00.000000Z");
    assert_eq!(versions[1]["vcpus"], 8);
    assert_eq!(versions[1][VALID_FROM], versions[0][VALID_TO]);
    assert_eq!(versions[1][VALID_TO], "2024-01-03T01:00:00.000000Z");

    let open_prices = versions_of(&history, &SERVER_PRICE, "server_id", "a")
        .into_iter()
        .filter(|r| r[VALID_TO] == Value::Null)
        .count();
    assert_eq!(open_prices, 0);
}

#[tokio::test]
async fn overwrite_sync_mirrors_source() {
    let mut working = database(false);
    let mut target = database(false);
    let vendor = StaticVendor {
        servers: vec![("a", 2, 0.01), ("b", 4, 0.02), ("c", 8, 0.04)],
    };
    pull_static(&mut working, &vendor, "2024-01-01T00:00:00.000000Z").await;
    let report = sync_all(&working, &mut target, SyncMode::Overwrite, "2024-01-01T01:00:00Z");
    assert!(!report.failed());

    // drop one server and its price from the source and sync again
    for table in [&SERVER_PRICE, &SERVER] {
        let shrunk: Vec<Row> = read_rows(&working, table)
            .unwrap()
            .into_iter()
            .filter(|r| r["server_id"] != "b")
            .collect();
        sync_table(&mut working, table, &shrunk, SyncMode::Overwrite, &SyncOptions::default()).unwrap();
    }
    let report = sync_all(&working, &mut target, SyncMode::Overwrite, "2024-01-02T01:00:00Z");
    assert!(!report.failed(), "{report:?}");
    assert_eq!(report.table("server").unwrap().counts.removed, 1);
    assert_eq!(report.table("server_price").unwrap().counts.removed, 1);

    let tables: Vec<&TableDef> = TABLES.iter().collect();
    assert_eq!(
        hash_tables(&working, &tables, HashLevel::Table).unwrap(),
        hash_tables(&target, &tables, HashLevel::Table).unwrap()
    );
    assert_eq!(count_rows(&target, "server").unwrap(), 2);
}

#[tokio::test]
async fn children_of_a_failed_table_are_skipped() {
    let mut working = database(false);
    let vendor = StaticVendor {
        servers: vec![("a", 2, 0.01)],
    };
    pull_static(&mut working, &vendor, "2024-01-01T00:00:00.000000Z").await;

    // target without SCD tables: every table fails or is skipped, none is half-written
    let mut target = database(false);
    let report = sync_all(&working, &mut target, SyncMode::Scd, "2024-01-01T01:00:00Z");
    assert!(report.failed());
    assert!(matches!(
        report.table("country").unwrap().status,
        TableStatus::Failed(_)
    ));
    assert!(matches!(
        report.table("server_price").unwrap().status,
        TableStatus::Skipped { .. }
    ));
}
