//! Copy/sync orchestrator
//!
//! Syncs a set of tables from a source database into a destination, parents
//! before children. A failing table does not stop the run, but every table
//! that depends on it (directly or through another skipped table) is skipped.
//!
//! In overwrite mode rows missing from the source are removed first, children
//! before parents, so a parent row is only deleted once nothing references it.

use crate::database::read_rows;
use crate::error::{Error, Result};
use crate::scd::{prune_table, sync_table, SyncMode, SyncOptions, SyncResult};
use crawler_common::row::key_label;
use crawler_common::{dependency_order, Row, TableDef, TABLES};
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};

/// Resolve table names (all tables when empty) into dependency order
pub fn resolve_tables(names: &[String]) -> Result<Vec<&'static TableDef>> {
    let selected: Vec<&'static TableDef> = if names.is_empty() {
        TABLES.iter().collect()
    } else {
        names
            .iter()
            .map(|n| crawler_common::table(n).ok_or_else(|| Error::UnknownTable(n.clone())))
            .collect::<Result<_>>()?
    };
    Ok(dependency_order(&selected))
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableStatus {
    Ok,
    Failed(String),
    /// A parent table failed or was skipped in this run
    Skipped { parent: String },
}

/// Natural keys touched by a table sync
#[derive(Debug, Default, Clone)]
pub struct Changes {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl Changes {
    fn labels(table: &TableDef, rows: &[Row]) -> Vec<String> {
        let mut labels: Vec<String> = rows.iter().map(|r| key_label(table, r)).collect();
        labels.sort();
        labels
    }
}

#[derive(Debug, Clone)]
pub struct TableReport {
    pub table: &'static str,
    pub status: TableStatus,
    pub counts: SyncResult,
    pub changes: Changes,
}

impl TableReport {
    fn new(table: &'static str, status: TableStatus) -> Self {
        Self {
            table,
            status,
            counts: SyncResult::default(),
            changes: Changes::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: SyncMode,
    pub dry_run: bool,
    pub tables: Vec<TableReport>,
}

impl RunReport {
    pub fn failed(&self) -> bool {
        self.tables
            .iter()
            .any(|t| matches!(t.status, TableStatus::Failed(_)))
    }

    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn log_summary(&self) {
        for t in &self.tables {
            match &t.status {
                TableStatus::Ok => log::info!(
                    "{}: {} added, {} updated, {} removed, {} unchanged",
                    t.table,
                    t.counts.added,
                    t.counts.updated,
                    t.counts.removed,
                    t.counts.unchanged
                ),
                TableStatus::Failed(e) => log::error!("{}: failed: {}", t.table, e),
                TableStatus::Skipped { parent } => {
                    log::warn!("{}: skipped, depends on {}", t.table, parent)
                }
            }
        }
        let failed = self
            .tables
            .iter()
            .filter(|t| matches!(t.status, TableStatus::Failed(_)))
            .count();
        log::info!(
            "Sync ({}{}) finished: {} tables, {} failed",
            self.mode,
            if self.dry_run { ", dry run" } else { "" },
            self.tables.len(),
            failed
        );
    }

    /// Markdown list of changed natural keys, optionally limited to `tables`
    pub fn changes_markdown(&self, tables: &[String]) -> String {
        let mut out = String::from("# Changes\n");
        for t in &self.tables {
            if !tables.is_empty() && !tables.iter().any(|n| n == t.table) {
                continue;
            }
            if t.counts.changed() == 0 {
                continue;
            }
            out.push_str(&format!("\n## {}\n\n", t.table));
            for (title, keys) in [
                ("New", &t.changes.added),
                ("Updated", &t.changes.updated),
                ("Removed", &t.changes.removed),
            ] {
                if keys.is_empty() {
                    continue;
                }
                out.push_str(&format!("### {} ({})\n\n", title, keys.len()));
                for key in keys {
                    out.push_str(&format!("- {}\n", key));
                }
                out.push('\n');
            }
        }
        out
    }
}

fn sync_one(
    source: &Connection,
    dest: &mut Connection,
    table: &'static TableDef,
    mode: SyncMode,
    options: &SyncOptions,
    pruned: &[Row],
) -> Result<TableReport> {
    let snapshot = read_rows(source, table)?;
    log::debug!("{}: {} rows in source", table.name, snapshot.len());
    let plan = sync_table(dest, table, &snapshot, mode, options)?;
    let mut counts = plan.result();
    counts.removed += pruned.len();
    let mut removed = Changes::labels(table, &plan.removed);
    removed.extend(Changes::labels(table, pruned));
    removed.sort();
    Ok(TableReport {
        table: table.name,
        status: TableStatus::Ok,
        counts,
        changes: Changes {
            added: Changes::labels(table, &plan.added),
            updated: Changes::labels(table, &plan.updated),
            removed,
        },
    })
}

/// Remove rows missing from the source, children first. Returns the removed
/// rows and the failures per table.
fn prune_all(
    source: &Connection,
    dest: &mut Connection,
    ordered: &[&'static TableDef],
    options: &SyncOptions,
) -> (HashMap<&'static str, Vec<Row>>, HashMap<&'static str, String>) {
    let mut pruned = HashMap::new();
    let mut failed = HashMap::new();
    for table in ordered.iter().rev() {
        match read_rows(source, table).and_then(|snapshot| prune_table(dest, table, &snapshot, options)) {
            Ok(rows) => {
                pruned.insert(table.name, rows);
            }
            Err(e) => {
                log::error!("{}: {}", table.name, e);
                failed.insert(table.name, e.to_string());
            }
        }
    }
    (pruned, failed)
}

/// Sync `tables` from `source` into `dest`, parents first
pub fn run(
    source: &Connection,
    dest: &mut Connection,
    tables: &[&'static TableDef],
    mode: SyncMode,
    options: &SyncOptions,
) -> RunReport {
    let ordered = dependency_order(tables);
    let (mut pruned, mut prune_failed) = if mode == SyncMode::Overwrite && !options.dry_run {
        prune_all(source, dest, &ordered, options)
    } else {
        (HashMap::new(), HashMap::new())
    };
    let mut broken: HashSet<&'static str> = HashSet::new();
    let mut reports = Vec::with_capacity(ordered.len());

    for table in ordered {
        let removed = pruned.remove(table.name).unwrap_or_default();
        if let Some(e) = prune_failed.remove(table.name) {
            broken.insert(table.name);
            reports.push(TableReport::new(table.name, TableStatus::Failed(e)));
            continue;
        }
        if let Some(parent) = table.parents().into_iter().find(|p| broken.contains(p)) {
            log::warn!("{}: skipping, parent table {} did not sync", table.name, parent);
            broken.insert(table.name);
            // removals already committed are still reported
            let mut report = TableReport::new(
                table.name,
                TableStatus::Skipped {
                    parent: parent.to_string(),
                },
            );
            report.counts.removed = removed.len();
            report.changes.removed = Changes::labels(table, &removed);
            reports.push(report);
            continue;
        }

        match sync_one(source, dest, table, mode, options, &removed) {
            Ok(report) => reports.push(report),
            Err(e) => {
                log::error!("{}: {}", table.name, e);
                broken.insert(table.name);
                reports.push(TableReport::new(table.name, TableStatus::Failed(e.to_string())));
            }
        }
    }

    RunReport {
        mode,
        dry_run: options.dry_run,
        tables: reports,
    }
}
