//! Price Crawler - cloud compute pricing database
//!
//! Pulls server, storage, traffic and IP pricing from cloud vendor APIs into a
//! SQLite database and keeps a long-lived copy in sync, either by overwriting
//! it or by appending slowly-changing-dimension history.

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod hashing;
pub mod http;
pub mod insert;
pub mod inventory;
pub mod lookup;
pub mod orchestrator;
pub mod progress;
pub mod pull;
pub mod scd;
pub mod vendors;

#[cfg(test)]
mod test_support;

pub use cache::RecordCache;
pub use config::{CacheConfig, CrawlerConfig, RetryConfig};
pub use database::{ensure_same_schema, init_schema, open};
pub use error::{CrawlerError, Error, Result};
pub use hashing::{hash_tables, HashLevel};
pub use insert::{insert_rows, InsertOptions, InsertResult, Scope};
pub use inventory::{Inventory, InventoryOp, VendorContext};
pub use orchestrator::{resolve_tables, RunReport, TableStatus};
pub use pull::{pull, select_ops, select_vendors, PullReport};
pub use scd::{sync_table, SyncMode, SyncOptions, SyncResult};
pub use vendors::{Driver, VENDOR_IDS};
