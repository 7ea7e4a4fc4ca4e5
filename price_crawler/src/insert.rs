//! Insertion/upsert engine
//!
//! Validates a batch of row-dicts for one table, drops duplicate natural keys
//! (last write wins), and upserts the rest in a single transaction. Optionally
//! marks rows in a scope that were not part of the batch as inactive.

use crate::database::{check_references, find_row, read_rows, read_vendor_rows, set_status, upsert_row};
use crate::error::{Error, Result};
use crate::progress::ProgressTracker;
use crawler_common::fields::Status;
use crawler_common::row::{attributes_differ, key_json};
use crawler_common::{validate_row, Row, TableDef, ValidationError};
use rusqlite::Connection;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Equals(Value),
    NotEquals(Value),
}

/// Subset of a table owned by one inventory operation.
///
/// Active rows in scope that the operation did not return are marked
/// inactive after the batch is written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    conditions: Vec<(String, Condition)>,
}

impl Scope {
    /// All rows of one vendor
    pub fn vendor(vendor_id: &str) -> Self {
        Self::default().and_equals("vendor_id", vendor_id)
    }

    pub fn and_equals(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push((column.to_string(), Condition::Equals(value.into())));
        self
    }

    pub fn and_not_equals(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push((column.to_string(), Condition::NotEquals(value.into())));
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|(column, condition)| {
            let value = row.get(column).unwrap_or(&Value::Null);
            match condition {
                Condition::Equals(expected) => value == expected,
                Condition::NotEquals(expected) => value != expected,
            }
        })
    }

    fn vendor_id(&self) -> Option<&str> {
        self.conditions.iter().find_map(|(column, condition)| match condition {
            Condition::Equals(Value::String(v)) if column == "vendor_id" => Some(v.as_str()),
            _ => None,
        })
    }
}

/// Options for a single [`insert_rows`] call
#[derive(Debug, Clone, Copy)]
pub struct InsertOptions<'a> {
    /// Fail the whole batch on the first invalid row
    pub strict: bool,
    /// Timestamp written to `observed_at` of inserted/updated rows
    pub observed_at: &'a str,
    pub scope: Option<&'a Scope>,
    pub progress: Option<&'a ProgressTracker>,
}

impl<'a> InsertOptions<'a> {
    pub fn new(observed_at: &'a str) -> Self {
        Self {
            strict: false,
            observed_at,
            scope: None,
            progress: None,
        }
    }
}

/// Result of an insert operation
#[derive(Debug, Default)]
pub struct InsertResult {
    /// Number of new natural keys written
    pub inserted: usize,
    /// Number of existing rows whose non-key fields changed
    pub updated: usize,
    /// Number of rows identical to what was stored (not written)
    pub unchanged: usize,
    /// Number of rows dropped because a later row had the same natural key
    pub duplicates_skipped: usize,
    /// Number of rows in scope that were set inactive
    pub inactivated: usize,
    /// Rows rejected by validation
    pub invalid: Vec<ValidationError>,
}

/// Validate and drop duplicate keys, keeping the position of the first
/// occurrence and the contents of the last.
fn prepare_batch(
    table: &TableDef,
    rows: Vec<Row>,
    options: &InsertOptions<'_>,
    result: &mut InsertResult,
) -> Result<Vec<Row>> {
    let task = options
        .progress
        .map(|p| p.start_task(format!("Validating {}", table.name), rows.len()));

    let mut batch: Vec<Row> = Vec::with_capacity(rows.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    for raw in rows {
        if let (Some(p), Some(task)) = (options.progress, task) {
            p.advance(task, 1);
        }
        let valid = match validate_row(table, &raw) {
            Ok(valid) => valid,
            Err(e) if options.strict => return Err(Error::Validation(e)),
            Err(e) => {
                log::warn!("Skipping invalid row: {}", e);
                result.invalid.push(e);
                continue;
            }
        };
        let key = key_json(table, &valid);
        match positions.get(&key) {
            Some(&i) => {
                batch[i] = valid;
                result.duplicates_skipped += 1;
            }
            None => {
                positions.insert(key, batch.len());
                batch.push(valid);
            }
        }
    }

    if result.duplicates_skipped > 0 {
        log::debug!(
            "{}: dropped {} rows with duplicate natural keys",
            table.name,
            result.duplicates_skipped
        );
    }
    Ok(batch)
}

/// Validate, deduplicate and upsert `rows` into `table`.
///
/// The batch is written in one transaction: a missing parent row or a
/// database error rolls back the whole batch. Invalid rows are skipped and
/// reported unless `options.strict` is set.
pub fn insert_rows(
    conn: &mut Connection,
    table: &TableDef,
    rows: Vec<Row>,
    options: &InsertOptions<'_>,
) -> Result<InsertResult> {
    let mut result = InsertResult::default();
    let batch = prepare_batch(table, rows, options, &mut result)?;

    let tx = conn.transaction()?;
    let task = options
        .progress
        .map(|p| p.start_task(format!("Syncing {}", table.name), batch.len()));

    let mut seen: HashSet<String> = HashSet::with_capacity(batch.len());
    for mut row in batch {
        check_references(&tx, table, &row)?;
        row.insert("observed_at".to_string(), Value::from(options.observed_at));

        match find_row(&tx, table, &row)? {
            None => {
                upsert_row(&tx, table, &row)?;
                result.inserted += 1;
            }
            Some(existing) if attributes_differ(table, &existing, &row) => {
                upsert_row(&tx, table, &row)?;
                result.updated += 1;
            }
            Some(_) => result.unchanged += 1,
        }
        seen.insert(key_json(table, &row));

        if let (Some(p), Some(task)) = (options.progress, task) {
            p.advance(task, 1);
        }
    }

    if let Some(scope) = options.scope {
        let existing = match scope.vendor_id() {
            Some(vendor_id) => read_vendor_rows(&tx, table, vendor_id)?,
            None => read_rows(&tx, table)?,
        };
        let active = Value::from(Status::Active.as_str());
        for row in existing {
            if row.get("status") == Some(&active)
                && scope.matches(&row)
                && !seen.contains(&key_json(table, &row))
            {
                set_status(&tx, table, &row, Status::Inactive.as_str())?;
                result.inactivated += 1;
            }
        }
    }

    tx.commit()?;

    let summary = format!(
        "{} inserted, {} updated, {} unchanged, {} inactivated, {} duplicates, {} invalid",
        result.inserted,
        result.updated,
        result.unchanged,
        result.inactivated,
        result.duplicates_skipped,
        result.invalid.len()
    );
    match (options.progress, task) {
        (Some(p), Some(task)) => p.finish(task, &summary),
        _ => log::info!("{}: {}", table.name, summary),
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{country, memory_db, region, row, server, server_price, vendor, zone};
    use crawler_common::catalog::{COUNTRY, REGION, SERVER, SERVER_PRICE, VENDOR, ZONE};
    use serde_json::json;

    const T1: &str = "2024-01-01T00:00:00.000000Z";
    const T2: &str = "2024-01-02T00:00:00.000000Z";

    fn seeded() -> Connection {
        let mut conn = memory_db(false);
        let opts = InsertOptions::new(T1);
        insert_rows(&mut conn, &COUNTRY, vec![country("DE")], &opts).unwrap();
        insert_rows(&mut conn, &VENDOR, vec![vendor("v")], &opts).unwrap();
        conn
    }

    #[test]
    fn second_identical_insert_changes_nothing() {
        let mut conn = seeded();
        let rows = vec![region("v", "r1"), region("v", "r2")];

        let first = insert_rows(&mut conn, &REGION, rows.clone(), &InsertOptions::new(T1)).unwrap();
        assert_eq!(first.inserted, 2);

        let second = insert_rows(&mut conn, &REGION, rows, &InsertOptions::new(T2)).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.unchanged, 2);
    }

    #[test]
    fn changed_field_is_an_update() {
        let mut conn = seeded();
        insert_rows(&mut conn, &REGION, vec![region("v", "r1")], &InsertOptions::new(T1)).unwrap();

        let mut changed = region("v", "r1");
        changed.insert("city".into(), json!("Berlin"));
        let result = insert_rows(&mut conn, &REGION, vec![changed], &InsertOptions::new(T2)).unwrap();
        assert_eq!(result.updated, 1);

        let stored = read_rows(&conn, &REGION).unwrap();
        assert_eq!(stored[0]["city"], json!("Berlin"));
        assert_eq!(stored[0]["observed_at"], json!(T2));
    }

    #[test]
    fn duplicate_keys_keep_the_last_row() {
        let mut conn = seeded();
        let mut first = region("v", "r1");
        first.insert("city".into(), json!("Munich"));
        let mut last = region("v", "r1");
        last.insert("city".into(), json!("Hamburg"));

        let result = insert_rows(&mut conn, &REGION, vec![first, last], &InsertOptions::new(T1)).unwrap();
        assert_eq!(result.inserted, 1);
        assert_eq!(result.duplicates_skipped, 1);
        assert_eq!(read_rows(&conn, &REGION).unwrap()[0]["city"], json!("Hamburg"));
    }

    #[test]
    fn invalid_rows_are_reported_not_fatal() {
        let mut conn = seeded();
        let mut bad = region("v", "r2");
        bad.remove("display_name");

        let result = insert_rows(&mut conn, &REGION, vec![region("v", "r1"), bad], &InsertOptions::new(T1)).unwrap();
        assert_eq!(result.inserted, 1);
        assert_eq!(result.invalid.len(), 1);
        assert_eq!(result.invalid[0].table, "region");
        assert_eq!(result.invalid[0].key, "v/r2");
        assert_eq!(result.invalid[0].field, "display_name");
    }

    #[test]
    fn strict_mode_aborts_the_batch() {
        let mut conn = seeded();
        let mut bad = region("v", "r2");
        bad.insert("lat".into(), json!("north"));

        let mut opts = InsertOptions::new(T1);
        opts.strict = true;
        let err = insert_rows(&mut conn, &REGION, vec![region("v", "r1"), bad], &opts).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(read_rows(&conn, &REGION).unwrap().is_empty());
    }

    #[test]
    fn missing_parent_rolls_back_the_whole_batch() {
        let mut conn = seeded();
        let rows = vec![zone("v", "r1", "z1")];
        let err = insert_rows(&mut conn, &ZONE, rows, &InsertOptions::new(T1)).unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));

        let rows = vec![region("v", "r1"), region("ghost", "r1")];
        assert!(insert_rows(&mut conn, &REGION, rows, &InsertOptions::new(T1)).is_err());
        assert!(read_rows(&conn, &REGION).unwrap().is_empty());
    }

    #[test]
    fn rows_missing_from_scope_are_inactivated_and_can_return() {
        let mut conn = seeded();
        let scope = Scope::vendor("v");
        let mut opts = InsertOptions::new(T1);
        opts.scope = Some(&scope);

        insert_rows(&mut conn, &REGION, vec![region("v", "r1"), region("v", "r2")], &opts).unwrap();
        let result = insert_rows(&mut conn, &REGION, vec![region("v", "r1")], &opts).unwrap();
        assert_eq!(result.inactivated, 1);
        let stored = read_rows(&conn, &REGION).unwrap();
        assert_eq!(stored[1]["status"], json!("inactive"));

        let result = insert_rows(&mut conn, &REGION, vec![region("v", "r1"), region("v", "r2")], &opts).unwrap();
        assert_eq!(result.updated, 1);
        assert_eq!(result.inactivated, 0);
        assert_eq!(read_rows(&conn, &REGION).unwrap()[1]["status"], json!("active"));
    }

    #[test]
    fn allocation_scope_leaves_spot_prices_alone() {
        let mut conn = seeded();
        let opts = InsertOptions::new(T1);
        insert_rows(&mut conn, &REGION, vec![region("v", "r")], &opts).unwrap();
        insert_rows(&mut conn, &SERVER, vec![server("v", "s", 2)], &opts).unwrap();

        let mut spot = server_price("v", "r", "", "s", 0.01);
        spot.insert("allocation".into(), json!("spot"));
        insert_rows(&mut conn, &SERVER_PRICE, vec![spot, server_price("v", "r", "", "s", 0.1)], &opts)
            .unwrap();

        let ondemand = Scope::vendor("v").and_not_equals("allocation", "spot");
        let mut scoped = InsertOptions::new(T2);
        scoped.scope = Some(&ondemand);
        let result = insert_rows(&mut conn, &SERVER_PRICE, vec![], &scoped).unwrap();
        assert_eq!(result.inactivated, 1);

        let statuses: Vec<(Value, Value)> = read_rows(&conn, &SERVER_PRICE)
            .unwrap()
            .into_iter()
            .map(|r| (r["allocation"].clone(), r["status"].clone()))
            .collect();
        assert!(statuses.contains(&(json!("ondemand"), json!("inactive"))));
        assert!(statuses.contains(&(json!("spot"), json!("active"))));
    }

    #[test]
    fn scope_matching() {
        let scope = Scope::vendor("v").and_equals("allocation", "spot");
        assert!(scope.matches(&row(json!({"vendor_id": "v", "allocation": "spot"}))));
        assert!(!scope.matches(&row(json!({"vendor_id": "w", "allocation": "spot"}))));
        assert!(!scope.matches(&row(json!({"vendor_id": "v", "allocation": "ondemand"}))));
    }
}
