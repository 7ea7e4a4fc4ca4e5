//! Snapshot synchronization
//!
//! Compares an incoming snapshot of a table with the current state and applies
//! the difference, either to the plain table (overwrite) or to its
//! slowly-changing-dimension shadow table (scd).
//!
//! In scd mode nothing is ever deleted. Every version row carries a validity
//! interval `[valid_from, valid_to)`; an open interval (`valid_to` NULL) marks
//! the current version. A changed row closes its current version and opens a
//! new one at the same instant, a vanished row only closes its version.

use crate::database::{
    check_references, check_referencing, close_version, delete_row, insert_version,
    latest_scd_timestamp, read_open_versions, read_rows, upsert_row,
};
use crate::error::Result;
use crawler_common::row::{attributes_differ, key_json, key_label};
use crawler_common::{format_timestamp, parse_timestamp, Row, TableDef};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};

/// Where a snapshot is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// The plain table becomes exactly the snapshot
    Overwrite,
    /// History is appended to the `<table>_scd` shadow table
    Scd,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Overwrite => f.write_str("overwrite"),
            SyncMode::Scd => f.write_str("scd"),
        }
    }
}

/// Row counts of one table sync
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncResult {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl SyncResult {
    pub fn changed(&self) -> usize {
        self.added + self.updated + self.removed
    }
}

/// Changes needed to turn the current state into the snapshot
#[derive(Debug, Default, Clone)]
pub struct SyncPlan {
    /// Snapshot rows whose natural key is new
    pub added: Vec<Row>,
    /// Snapshot rows whose non-key fields differ from the current row
    pub updated: Vec<Row>,
    /// Current rows whose natural key is missing from the snapshot
    pub removed: Vec<Row>,
    pub unchanged: usize,
}

impl SyncPlan {
    pub fn result(&self) -> SyncResult {
        SyncResult {
            added: self.added.len(),
            updated: self.updated.len(),
            removed: self.removed.len(),
            unchanged: self.unchanged,
        }
    }
}

/// Options for [`sync_table`]
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Maximum rows per committed transaction in scd mode
    pub batch_size: usize,
    /// Compute the plan without writing anything
    pub dry_run: bool,
    /// Clock override; defaults to the current time
    pub now: Option<DateTime<Utc>>,
    /// Verify parent rows exist before writing and that removed rows have no
    /// children left (overwrite mode)
    pub check_references: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: crate::config::DEFAULT_SCD_BATCH_SIZE,
            dry_run: false,
            now: None,
            check_references: true,
        }
    }
}

/// Diff `current` against `snapshot` by natural key.
///
/// A key repeated in the snapshot keeps its last row.
pub fn plan_sync(table: &TableDef, current: &[Row], snapshot: &[Row]) -> SyncPlan {
    let current_by_key: HashMap<String, &Row> =
        current.iter().map(|r| (key_json(table, r), r)).collect();

    let mut latest: HashMap<String, &Row> = HashMap::with_capacity(snapshot.len());
    let mut order: Vec<String> = Vec::with_capacity(snapshot.len());
    for row in snapshot {
        let key = key_json(table, row);
        if latest.insert(key.clone(), row).is_none() {
            order.push(key);
        }
    }

    let mut plan = SyncPlan::default();
    for key in &order {
        let row = latest[key];
        match current_by_key.get(key) {
            None => plan.added.push(row.clone()),
            Some(existing) if attributes_differ(table, existing, row) => {
                plan.updated.push(row.clone())
            }
            Some(_) => plan.unchanged += 1,
        }
    }

    let snapshot_keys: HashSet<&String> = order.iter().collect();
    for row in current {
        if !snapshot_keys.contains(&key_json(table, row)) {
            plan.removed.push(row.clone());
        }
    }
    plan
}

/// Timestamp for opening/closing versions in this run.
///
/// Never earlier than anything already recorded in the shadow table, and
/// strictly later than its latest timestamp, so a version can never be
/// closed before it was opened even if the clock moves backwards.
pub fn run_timestamp(conn: &Connection, table: &TableDef, now: DateTime<Utc>) -> Result<String> {
    let latest = latest_scd_timestamp(conn, table)?
        .as_deref()
        .and_then(parse_timestamp);
    let ts = match latest {
        Some(latest) if latest >= now => latest + Duration::microseconds(1),
        _ => now,
    };
    Ok(format_timestamp(&ts))
}

/// Make `table` (or its shadow table) match `snapshot`.
///
/// Overwrite mode applies everything in one transaction. Scd mode commits in
/// batches of at most `options.batch_size` changes; closing an old version and
/// opening its replacement always land in the same batch.
pub fn sync_table(
    conn: &mut Connection,
    table: &TableDef,
    snapshot: &[Row],
    mode: SyncMode,
    options: &SyncOptions,
) -> Result<SyncPlan> {
    let current = match mode {
        SyncMode::Overwrite => read_rows(conn, table)?,
        SyncMode::Scd => read_open_versions(conn, table)?,
    };
    let plan = plan_sync(table, &current, snapshot);
    let result = plan.result();

    if options.dry_run {
        log::info!(
            "{} ({}, dry run): {} to add, {} to update, {} to remove, {} unchanged",
            table.name,
            mode,
            result.added,
            result.updated,
            result.removed,
            result.unchanged
        );
        return Ok(plan);
    }

    match mode {
        SyncMode::Overwrite => apply_overwrite(conn, table, &plan, options)?,
        SyncMode::Scd => apply_scd(conn, table, &plan, options)?,
    }

    log::info!(
        "{} ({}): {} added, {} updated, {} removed, {} unchanged",
        table.name,
        mode,
        result.added,
        result.updated,
        result.removed,
        result.unchanged
    );
    Ok(plan)
}

fn apply_overwrite(
    conn: &mut Connection,
    table: &TableDef,
    plan: &SyncPlan,
    options: &SyncOptions,
) -> Result<()> {
    let tx = conn.transaction()?;
    delete_rows(&tx, table, &plan.removed, options)?;
    for row in plan.added.iter().chain(plan.updated.iter()) {
        if options.check_references {
            check_references(&tx, table, row)?;
        }
        upsert_row(&tx, table, row)?;
    }
    tx.commit()?;
    Ok(())
}

fn delete_rows(conn: &Connection, table: &TableDef, rows: &[Row], options: &SyncOptions) -> Result<()> {
    for row in rows {
        if options.check_references {
            check_referencing(conn, table, row)?;
        }
        delete_row(conn, table, row)?;
    }
    Ok(())
}

/// Delete the rows of `table` whose natural key is missing from `snapshot`,
/// in one transaction. Returns the deleted rows.
///
/// Running this over a set of tables children first lets a later overwrite
/// sync drop parents whose children are gone as well.
pub fn prune_table(
    conn: &mut Connection,
    table: &TableDef,
    snapshot: &[Row],
    options: &SyncOptions,
) -> Result<Vec<Row>> {
    let current = read_rows(conn, table)?;
    let removed = plan_sync(table, &current, snapshot).removed;
    if removed.is_empty() {
        return Ok(removed);
    }
    let tx = conn.transaction()?;
    delete_rows(&tx, table, &removed, options)?;
    tx.commit()?;
    log::debug!("{}: removed {} rows", table.name, removed.len());
    Ok(removed)
}

enum ScdChange<'a> {
    Open(&'a Row),
    Replace(&'a Row),
    Close(&'a Row),
}

impl ScdChange<'_> {
    /// Rows written by this change
    fn weight(&self) -> usize {
        match self {
            ScdChange::Replace(_) => 2,
            _ => 1,
        }
    }
}

fn apply_scd(
    conn: &mut Connection,
    table: &TableDef,
    plan: &SyncPlan,
    options: &SyncOptions,
) -> Result<()> {
    let ts = run_timestamp(conn, table, options.now.unwrap_or_else(Utc::now))?;
    let changes: Vec<ScdChange<'_>> = plan
        .added
        .iter()
        .map(ScdChange::Open)
        .chain(plan.updated.iter().map(ScdChange::Replace))
        .chain(plan.removed.iter().map(ScdChange::Close))
        .collect();

    let batch_size = options.batch_size.max(2);
    let mut batches = 0;
    let mut pending = changes.iter().peekable();
    while pending.peek().is_some() {
        let tx = conn.transaction()?;
        let mut written = 0;
        while let Some(change) = pending.next_if(|c| written + c.weight() <= batch_size) {
            match change {
                ScdChange::Open(row) => insert_version(&tx, table, row, &ts)?,
                ScdChange::Replace(row) => {
                    close_version(&tx, table, row, &ts)?;
                    insert_version(&tx, table, row, &ts)?;
                }
                ScdChange::Close(row) => {
                    if close_version(&tx, table, row, &ts)? == 0 {
                        log::warn!("{}: no open version to close for {}", table.name, key_label(table, row));
                    }
                }
            }
            written += change.weight();
        }
        tx.commit()?;
        batches += 1;
    }

    if batches > 1 {
        log::debug!("{}: scd changes committed in {} batches", table.scd_name(), batches);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{read_scd_versions, upsert_row};
    use crate::error::Error;
    use crate::test_support::{country, memory_db, region, row, server, vendor, zone};
    use crawler_common::catalog::{COUNTRY, REGION, SERVER, VALID_FROM, VALID_TO, VENDOR, ZONE};
    use crawler_common::validate_row;
    use serde_json::{json, Value};

    fn at(s: &str) -> DateTime<Utc> {
        parse_timestamp(s).unwrap()
    }

    fn snapshot(servers: &[(&str, i64)]) -> Vec<Row> {
        servers
            .iter()
            .map(|(id, vcpus)| validate_row(&SERVER, &server("v", id, *vcpus)).unwrap())
            .collect()
    }

    fn scd_at(now: &str) -> SyncOptions {
        SyncOptions {
            now: Some(at(now)),
            check_references: false,
            ..SyncOptions::default()
        }
    }

    fn overwrite() -> SyncOptions {
        SyncOptions {
            check_references: false,
            ..SyncOptions::default()
        }
    }

    /// Per key: sorted by start, each closed end equals the next start, at
    /// most one open interval and it is the last one.
    fn assert_contiguous(versions: &[Row]) {
        let mut by_key: HashMap<String, Vec<&Row>> = HashMap::new();
        for v in versions {
            by_key.entry(key_json(&SERVER, v)).or_default().push(v);
        }
        for (key, mut history) in by_key {
            history.sort_by_key(|v| v[VALID_FROM].as_str().map(str::to_string));
            for pair in history.windows(2) {
                assert_eq!(pair[0][VALID_TO], pair[1][VALID_FROM], "{key}");
            }
            let open = history.iter().filter(|v| v[VALID_TO].is_null()).count();
            assert!(open <= 1, "{key}");
            for v in &history[..history.len() - 1] {
                assert!(!v[VALID_TO].is_null(), "{key}");
            }
        }
    }

    #[test]
    fn plan_detects_added_updated_removed() {
        let current = snapshot(&[("a", 1), ("b", 2), ("c", 3)]);
        let next = snapshot(&[("a", 1), ("b", 4), ("d", 5)]);
        let plan = plan_sync(&SERVER, &current, &next);
        assert_eq!(
            plan.result(),
            SyncResult { added: 1, updated: 1, removed: 1, unchanged: 1 }
        );
        assert_eq!(plan.added[0]["server_id"], json!("d"));
        assert_eq!(plan.updated[0]["vcpus"], json!(4));
        assert_eq!(plan.removed[0]["server_id"], json!("c"));
    }

    #[test]
    fn reordered_set_is_not_a_change() {
        let mut a = validate_row(&SERVER, &server("v", "a", 1)).unwrap();
        a.insert("cpu_flags".into(), json!(["avx", "sse"]));
        let mut b = a.clone();
        b.insert("cpu_flags".into(), json!(["sse", "avx"]));
        let plan = plan_sync(&SERVER, &[a], &[b]);
        assert_eq!(plan.result().unchanged, 1);
    }

    #[test]
    fn reordered_list_is_a_change() {
        let mut a = validate_row(&SERVER, &server("v", "a", 1)).unwrap();
        a.insert("gpus".into(), json!([{"model": "A100"}, {"model": "T4"}]));
        let mut b = a.clone();
        b.insert("gpus".into(), json!([{"model": "T4"}, {"model": "A100"}]));
        let plan = plan_sync(&SERVER, &[a], &[b]);
        assert_eq!(plan.result().updated, 1);
    }

    #[test]
    fn scd_versions_follow_snapshots() {
        let mut conn = memory_db(true);
        let (t1, t2, t3) = (
            "2024-01-01T00:00:00.000000Z",
            "2024-02-01T00:00:00.000000Z",
            "2024-03-01T00:00:00.000000Z",
        );

        sync_table(&mut conn, &SERVER, &snapshot(&[("a", 4)]), SyncMode::Scd, &scd_at(t1)).unwrap();
        let versions = read_scd_versions(&conn, &SERVER).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0][VALID_FROM], json!(t1));
        assert_eq!(versions[0][VALID_TO], Value::Null);

        let plan =
            sync_table(&mut conn, &SERVER, &snapshot(&[("a", 8)]), SyncMode::Scd, &scd_at(t2)).unwrap();
        assert_eq!(plan.result().updated, 1);
        let versions = read_scd_versions(&conn, &SERVER).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0][VALID_TO], json!(t2));
        assert_eq!(versions[1][VALID_FROM], json!(t2));
        assert_eq!(versions[1]["vcpus"], json!(8));
        assert_eq!(versions[1][VALID_TO], Value::Null);

        let plan = sync_table(&mut conn, &SERVER, &[], SyncMode::Scd, &scd_at(t3)).unwrap();
        assert_eq!(plan.result().removed, 1);
        let versions = read_scd_versions(&conn, &SERVER).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1][VALID_TO], json!(t3));
        assert_contiguous(&versions);
    }

    #[test]
    fn unchanged_snapshot_writes_nothing() {
        let mut conn = memory_db(true);
        let rows = snapshot(&[("a", 1), ("b", 2)]);
        sync_table(&mut conn, &SERVER, &rows, SyncMode::Scd, &scd_at("2024-01-01T00:00:00Z")).unwrap();
        let plan =
            sync_table(&mut conn, &SERVER, &rows, SyncMode::Scd, &scd_at("2024-01-02T00:00:00Z")).unwrap();
        assert_eq!(plan.result().changed(), 0);
        assert_eq!(read_scd_versions(&conn, &SERVER).unwrap().len(), 2);
    }

    #[test]
    fn backwards_clock_still_moves_forward() {
        let mut conn = memory_db(true);
        sync_table(&mut conn, &SERVER, &snapshot(&[("a", 1)]), SyncMode::Scd, &scd_at("2024-05-01T00:00:00Z"))
            .unwrap();
        sync_table(&mut conn, &SERVER, &snapshot(&[("a", 2)]), SyncMode::Scd, &scd_at("2024-04-01T00:00:00Z"))
            .unwrap();

        let versions = read_scd_versions(&conn, &SERVER).unwrap();
        assert_eq!(versions[1][VALID_FROM], json!("2024-05-01T00:00:00.000001Z"));
        assert_contiguous(&versions);
    }

    #[test]
    fn small_batches_keep_history_consistent() {
        let mut conn = memory_db(true);
        let mut opts = scd_at("2024-01-01T00:00:00Z");
        opts.batch_size = 3;
        let v1 = snapshot(&[("a", 1), ("b", 1), ("c", 1), ("d", 1), ("e", 1)]);
        sync_table(&mut conn, &SERVER, &v1, SyncMode::Scd, &opts).unwrap();

        opts.now = Some(at("2024-01-02T00:00:00Z"));
        let v2 = snapshot(&[("a", 2), ("b", 2), ("c", 1), ("f", 1)]);
        let plan = sync_table(&mut conn, &SERVER, &v2, SyncMode::Scd, &opts).unwrap();
        assert_eq!(
            plan.result(),
            SyncResult { added: 1, updated: 2, removed: 2, unchanged: 1 }
        );

        let versions = read_scd_versions(&conn, &SERVER).unwrap();
        assert_eq!(versions.len(), 8);
        assert_eq!(read_open_versions(&conn, &SERVER).unwrap().len(), 4);
        assert_contiguous(&versions);
    }

    #[test]
    fn overwrite_makes_table_equal_to_snapshot() {
        let mut conn = memory_db(false);
        for r in snapshot(&[("a", 1), ("b", 2), ("c", 3)]) {
            upsert_row(&conn, &SERVER, &r).unwrap();
        }

        let next = snapshot(&[("b", 5), ("d", 1)]);
        let plan = sync_table(&mut conn, &SERVER, &next, SyncMode::Overwrite, &overwrite()).unwrap();
        assert_eq!(
            plan.result(),
            SyncResult { added: 1, updated: 1, removed: 2, unchanged: 0 }
        );

        let ids: Vec<Value> = read_rows(&conn, &SERVER)
            .unwrap()
            .into_iter()
            .map(|r| r["server_id"].clone())
            .collect();
        assert_eq!(ids, vec![json!("b"), json!("d")]);
    }

    #[test]
    fn dry_run_changes_nothing() {
        let mut conn = memory_db(true);
        let mut opts = scd_at("2024-01-01T00:00:00Z");
        opts.dry_run = true;
        let plan = sync_table(&mut conn, &SERVER, &snapshot(&[("a", 1)]), SyncMode::Scd, &opts).unwrap();
        assert_eq!(plan.result().added, 1);
        assert!(read_scd_versions(&conn, &SERVER).unwrap().is_empty());

        let mut opts = overwrite();
        opts.dry_run = true;
        sync_table(&mut conn, &SERVER, &snapshot(&[("a", 1)]), SyncMode::Overwrite, &opts).unwrap();
        assert!(read_rows(&conn, &SERVER).unwrap().is_empty());
    }

    #[test]
    fn overwrite_checks_parents() {
        let mut conn = memory_db(false);
        let orphan = validate_row(&SERVER, &row(json!({
            "vendor_id": "ghost", "server_id": "x", "name": "x", "api_reference": "x",
            "display_name": "x", "vcpus": 1, "cpu_allocation": "Shared",
            "cpu_architecture": "x86_64", "memory_amount": 1
        })))
        .unwrap();
        let result = sync_table(&mut conn, &SERVER, &[orphan], SyncMode::Overwrite, &SyncOptions::default());
        assert!(result.is_err());
        assert!(read_rows(&conn, &SERVER).unwrap().is_empty());
    }

    #[test]
    fn overwrite_keeps_parents_that_still_have_children() {
        let mut conn = memory_db(false);
        let put = |table: &TableDef, r: Row| upsert_row(&conn, table, &validate_row(table, &r).unwrap()).unwrap();
        put(&COUNTRY, country("DE"));
        put(&VENDOR, vendor("v"));
        put(&REGION, region("v", "r1"));
        put(&ZONE, zone("v", "r1", "z1"));

        let next = vec![validate_row(&REGION, &region("v", "r2")).unwrap()];
        let err = sync_table(&mut conn, &REGION, &next, SyncMode::Overwrite, &SyncOptions::default())
            .unwrap_err();
        match err {
            Error::Referenced { table, key, child } => {
                assert_eq!(table, "region");
                assert_eq!(key, "v/r1");
                assert_eq!(child, "zone");
            }
            other => panic!("Expected Referenced, got: {other:?}"),
        }
        let ids: Vec<Value> = read_rows(&conn, &REGION)
            .unwrap()
            .into_iter()
            .map(|r| r["region_id"].clone())
            .collect();
        assert_eq!(ids, vec![json!("r1")]);
    }

    #[test]
    fn prune_removes_childless_rows_only() {
        let mut conn = memory_db(false);
        let put = |table: &TableDef, r: Row| upsert_row(&conn, table, &validate_row(table, &r).unwrap()).unwrap();
        put(&COUNTRY, country("DE"));
        put(&VENDOR, vendor("v"));
        put(&REGION, region("v", "r1"));
        put(&ZONE, zone("v", "r1", "z1"));

        let removed = prune_table(&mut conn, &ZONE, &[], &SyncOptions::default()).unwrap();
        assert_eq!(removed.len(), 1);
        let removed = prune_table(&mut conn, &REGION, &[], &SyncOptions::default()).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(read_rows(&conn, &REGION).unwrap().is_empty());
    }
}
