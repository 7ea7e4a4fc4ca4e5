//! Pull pipeline
//!
//! Seeds the lookup tables, then for every selected vendor writes the vendor
//! row and runs the selected inventory operations in their fixed order,
//! inserting each operation's rows before the next one starts. A failed
//! operation only skips the operations whose tables depend on it.

use crate::cache::RecordCache;
use crate::config::{CacheConfig, CrawlerConfig};
use crate::database::read_vendor_rows;
use crate::error::{Error, Result};
use crate::insert::{insert_rows, InsertOptions, InsertResult};
use crate::inventory::{Inventory, InventoryOp, VendorContext};
use crate::lookup;
use crate::vendors::{Driver, VENDOR_IDS};
use chrono::Utc;
use crawler_common::catalog::{COMPLIANCE_FRAMEWORK, COUNTRY, VENDOR};
use crawler_common::fields::Status;
use crawler_common::{format_timestamp, Row};
use rusqlite::Connection;
use serde_json::Value;
use std::collections::HashSet;

/// Resolve `--include-vendor`/`--exclude-vendor` against the known vendors
pub fn select_vendors(include: &[String], exclude: &[String]) -> Result<Vec<&'static str>> {
    for id in include.iter().chain(exclude) {
        if !VENDOR_IDS.contains(&id.as_str()) {
            return Err(Error::UnknownVendor(id.clone()));
        }
    }
    Ok(VENDOR_IDS
        .iter()
        .copied()
        .filter(|id| include.is_empty() || include.iter().any(|i| i == id))
        .filter(|id| !exclude.iter().any(|e| e == id))
        .collect())
}

/// Resolve `--include-records`/`--exclude-records`, keeping the fixed order
pub fn select_ops(include: &[String], exclude: &[String]) -> Result<Vec<InventoryOp>> {
    for name in include.iter().chain(exclude) {
        if InventoryOp::parse(name).is_none() {
            return Err(Error::Config(format!(
                "unknown record type '{}' (expected one of: {})",
                name,
                InventoryOp::ORDER.map(|op| op.name()).join(", ")
            )));
        }
    }
    Ok(InventoryOp::ORDER
        .into_iter()
        .filter(|op| include.is_empty() || include.iter().any(|i| i == op.name()))
        .filter(|op| !exclude.iter().any(|e| e == op.name()))
        .collect())
}

/// Outcome of one inventory operation
#[derive(Debug)]
pub enum OpStatus {
    Ok(InsertResult),
    Failed(String),
    /// Not run because a parent table failed earlier in this pull
    Skipped { parent: String },
}

#[derive(Debug)]
pub struct OpReport {
    pub op: InventoryOp,
    pub status: OpStatus,
}

#[derive(Debug)]
pub struct VendorReport {
    pub vendor_id: String,
    /// Set when the vendor could not be pulled at all (credentials, vendor row)
    pub error: Option<String>,
    pub ops: Vec<OpReport>,
}

impl VendorReport {
    fn new(vendor_id: &str) -> Self {
        Self {
            vendor_id: vendor_id.to_string(),
            error: None,
            ops: Vec::new(),
        }
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
            || self
                .ops
                .iter()
                .any(|r| matches!(r.status, OpStatus::Failed(_)))
    }
}

#[derive(Debug)]
pub struct PullReport {
    pub observed_at: String,
    pub vendors: Vec<VendorReport>,
}

impl PullReport {
    pub fn failed(&self) -> bool {
        self.vendors.iter().any(VendorReport::failed)
    }

    /// Log one line per operation and a closing summary
    pub fn log_summary(&self) {
        for vendor in &self.vendors {
            if let Some(e) = &vendor.error {
                log::error!("{}: {}", vendor.vendor_id, e);
            }
            for r in &vendor.ops {
                match &r.status {
                    OpStatus::Ok(res) => log::info!(
                        "{}/{}: {} inserted, {} updated, {} unchanged, {} inactivated, {} invalid",
                        vendor.vendor_id,
                        r.op,
                        res.inserted,
                        res.updated,
                        res.unchanged,
                        res.inactivated,
                        res.invalid.len()
                    ),
                    OpStatus::Failed(e) => log::error!("{}/{}: failed: {}", vendor.vendor_id, r.op, e),
                    OpStatus::Skipped { parent } => log::warn!(
                        "{}/{}: skipped, {} failed",
                        vendor.vendor_id,
                        r.op,
                        parent
                    ),
                }
            }
        }
        let failed = self.vendors.iter().filter(|v| v.failed()).count();
        log::info!(
            "Pull finished: {} vendors, {} with failures",
            self.vendors.len(),
            failed
        );
    }
}

/// Upsert the country and compliance framework reference rows
pub fn seed_lookups(conn: &mut Connection, options: &InsertOptions<'_>) -> Result<()> {
    insert_rows(conn, &COUNTRY, lookup::countries(), options)?;
    insert_rows(conn, &COMPLIANCE_FRAMEWORK, lookup::compliance_frameworks(), options)?;
    Ok(())
}

fn active_rows(conn: &Connection, op: InventoryOp, vendor_id: &str) -> Result<Vec<Row>> {
    let active = Value::from(Status::Active.as_str());
    Ok(read_vendor_rows(conn, op.table(), vendor_id)?
        .into_iter()
        .filter(|r| r.get("status") == Some(&active))
        .collect())
}

/// Pull one vendor into `conn`.
///
/// Never fails as a whole: every problem is recorded in the returned report.
pub async fn pull_vendor<I: Inventory>(
    conn: &mut Connection,
    driver: &I,
    ctx: &mut VendorContext,
    ops: &[InventoryOp],
    options: &InsertOptions<'_>,
) -> VendorReport {
    let vendor_id = driver.vendor_id();
    let mut report = VendorReport::new(vendor_id);
    log::info!("Pulling {}", vendor_id);

    if let Err(e) = insert_rows(conn, &VENDOR, vec![driver.vendor_row()], options) {
        log::error!("{}: failed to write vendor row: {}", vendor_id, e);
        report.error = Some(e.to_string());
        return report;
    }

    // Rows stored by earlier pulls stand in for operations that are not selected
    for op in InventoryOp::ORDER {
        if ctx.rows(op.table().name).is_empty() {
            match active_rows(conn, op, vendor_id) {
                Ok(rows) => ctx.record(op.table().name, rows),
                Err(e) => log::warn!("{}: could not read stored {}: {}", vendor_id, op.table().name, e),
            }
        }
    }

    let mut blocked: HashSet<&'static str> = HashSet::new();
    for &op in ops {
        let table = op.table();
        if let Some(parent) = table.parents().into_iter().find(|p| blocked.contains(p)) {
            log::warn!("{}/{}: skipping, {} failed", vendor_id, op, parent);
            blocked.insert(table.name);
            report.ops.push(OpReport {
                op,
                status: OpStatus::Skipped {
                    parent: parent.to_string(),
                },
            });
            continue;
        }

        let status = match run_op(conn, driver, ctx, op, options).await {
            Ok(result) => OpStatus::Ok(result),
            Err(e) => {
                log::error!("{}/{}: {}", vendor_id, op, e);
                blocked.insert(table.name);
                OpStatus::Failed(e.to_string())
            }
        };
        report.ops.push(OpReport { op, status });
    }
    report
}

async fn run_op<I: Inventory>(
    conn: &mut Connection,
    driver: &I,
    ctx: &mut VendorContext,
    op: InventoryOp,
    options: &InsertOptions<'_>,
) -> Result<InsertResult> {
    let rows = driver.run(op, ctx).await?;
    log::debug!("{}/{}: fetched {} rows", ctx.vendor_id, op, rows.len());

    let scope = op.scope(&ctx.vendor_id);
    let options = InsertOptions {
        scope: Some(&scope),
        progress: Some(&ctx.progress),
        ..*options
    };
    let result = insert_rows(conn, op.table(), rows, &options)?;

    let stored = active_rows(conn, op, &ctx.vendor_id)?;
    ctx.record(op.table().name, stored);
    Ok(result)
}

/// Open the record cache for one vendor, emptying it first when asked to
pub fn vendor_cache(vendor_id: &str, config: &CacheConfig) -> RecordCache {
    let cache = RecordCache::new(config);
    if config.clear {
        if let Err(e) = cache.clear_namespace(vendor_id) {
            log::warn!("{}: could not clear cached responses: {}", vendor_id, e);
        }
    }
    cache
}

/// Pull the selected vendors with drivers built from the environment
pub async fn pull(
    conn: &mut Connection,
    vendors: &[&str],
    ops: &[InventoryOp],
    config: &CrawlerConfig,
) -> Result<PullReport> {
    let observed_at = format_timestamp(&Utc::now());
    let mut options = InsertOptions::new(&observed_at);
    options.strict = config.strict;

    seed_lookups(conn, &options)?;

    let mut reports = Vec::with_capacity(vendors.len());
    for &vendor_id in vendors {
        let driver = match Driver::from_env(vendor_id, &config.retry) {
            Ok(driver) => driver,
            Err(e) => {
                log::error!("{}: {}", vendor_id, e);
                let mut report = VendorReport::new(vendor_id);
                report.error = Some(e.to_string());
                reports.push(report);
                continue;
            }
        };
        let mut ctx = VendorContext::new(vendor_id, vendor_cache(vendor_id, &config.cache));
        reports.push(pull_vendor(conn, &driver, &mut ctx, ops, &options).await);
    }

    Ok(PullReport {
        observed_at: observed_at.clone(),
        vendors: reports,
    })
}

#[cfg(test)]
#[path = "pull_tests.rs"]
mod tests;
