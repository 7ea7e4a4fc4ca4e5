//! Price Crawler - cloud compute pricing database
//!
//! Pulls vendor pricing into SQLite, copies and syncs databases (optionally
//! with SCD history) and prints content hashes for change detection.

use clap::{Parser, Subcommand, ValueEnum};
use price_crawler::config::{
    default_cache_dir, CacheConfig, CrawlerConfig, RetryConfig, DEFAULT_CACHE_TTL_SECS,
    DEFAULT_SCD_BATCH_SIZE,
};
use price_crawler::{
    ensure_same_schema, hash_tables, init_schema, open, orchestrator, pull, resolve_tables,
    select_ops, select_vendors, HashLevel, SyncMode, SyncOptions,
};
use price_crawler::{Error, Result};
use crawler_common::TABLES;
use rusqlite::Connection;
use std::path::PathBuf;
use std::time::Duration;

/// Cloud pricing crawler - pulls vendor inventories and syncs pricing databases
#[derive(Parser, Debug)]
#[command(name = "price_crawler")]
#[command(version, about, long_about = None)]
struct Args {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database tables
    Create {
        /// Database connection string or path
        #[arg(short, long, default_value_t = default_db_path())]
        connection_string: String,

        /// Also create the SCD history tables
        #[arg(long, default_value_t = false)]
        scd: bool,
    },
    /// Fetch vendor inventories and insert them into the database
    Pull {
        /// Database connection string or path
        #[arg(short, long, default_value_t = default_db_path())]
        connection_string: String,

        /// Only pull these vendors
        #[arg(long = "include-vendor")]
        include_vendors: Vec<String>,

        /// Skip these vendors
        #[arg(long = "exclude-vendor")]
        exclude_vendors: Vec<String>,

        /// Only run these inventory operations (e.g. regions, server_prices)
        #[arg(long)]
        include_records: Vec<String>,

        /// Skip these inventory operations
        #[arg(long)]
        exclude_records: Vec<String>,

        /// Cache vendor API responses on disk
        #[arg(long, env = "PRICE_CRAWLER_CACHE", default_value_t = false)]
        cache: bool,

        /// Cache directory (default: <temp dir>/price_crawler-cache)
        #[arg(long, env = "PRICE_CRAWLER_CACHE_DIR")]
        cache_dir: Option<PathBuf>,

        /// Drop the cached responses of the selected vendors before pulling
        #[arg(long, default_value_t = false)]
        clear_cache: bool,

        /// Cache entry lifetime in seconds
        #[arg(long, env = "PRICE_CRAWLER_CACHE_TTL", default_value_t = DEFAULT_CACHE_TTL_SECS)]
        cache_ttl: u64,

        /// Retries per vendor API request
        #[arg(long, env = "PRICE_CRAWLER_RETRIES", default_value_t = 3)]
        retries: u32,

        /// Initial retry backoff in milliseconds
        #[arg(long, default_value_t = 500)]
        backoff_ms: u64,

        /// Maximum retry backoff in milliseconds
        #[arg(long, default_value_t = 30_000)]
        max_backoff_ms: u64,

        /// Request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,

        /// Fail a table on the first invalid row
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Copy tables from one database to another, replacing their content
    Copy {
        /// Source database
        source: String,
        /// Target database
        target: String,

        /// Tables to copy (default: all)
        #[arg(long)]
        tables: Vec<String>,
    },
    /// Sync tables into a long-lived database, optionally recording history
    Sync {
        /// Source database
        source: String,
        /// Target database
        target: String,

        /// Tables to sync (default: all)
        #[arg(long)]
        tables: Vec<String>,

        /// Append SCD history instead of overwriting the tables
        #[arg(long, default_value_t = false)]
        scd: bool,

        /// Report the changes without writing them
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Rows per committed transaction in SCD mode
        #[arg(long, default_value_t = DEFAULT_SCD_BATCH_SIZE)]
        batch_size: usize,

        /// Write a Markdown list of changed keys to this file
        #[arg(long)]
        log_changes_path: Option<PathBuf>,

        /// Limit the change log to these tables
        #[arg(long)]
        log_changes_tables: Vec<String>,
    },
    /// Print content digests of tables
    Hash {
        /// Database connection string or path
        #[arg(short, long, default_value_t = default_db_path())]
        connection_string: String,

        #[arg(long, value_enum, default_value_t = Level::Database)]
        level: Level,

        /// Tables to hash (default: all)
        #[arg(long)]
        tables: Vec<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Level {
    Database,
    Table,
    Row,
}

impl From<Level> for HashLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Database => HashLevel::Database,
            Level::Table => HashLevel::Table,
            Level::Row => HashLevel::Row,
        }
    }
}

/// Returns the default database path: ~/.local/share/price_crawler/prices.db
fn default_db_path() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("price_crawler")
        .join("prices.db")
        .to_string_lossy()
        .to_string()
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level.as_str()))
        .init();

    match run(args.command).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    }
}

/// Run one command; `Ok(false)` means it completed with failed tables
async fn run(command: Command) -> Result<bool> {
    match command {
        Command::Create {
            connection_string,
            scd,
        } => {
            let conn = open(&connection_string)?;
            init_schema(&conn, TABLES, scd)?;
            Ok(true)
        }
        Command::Pull {
            connection_string,
            include_vendors,
            exclude_vendors,
            include_records,
            exclude_records,
            cache,
            cache_dir,
            clear_cache,
            cache_ttl,
            retries,
            backoff_ms,
            max_backoff_ms,
            timeout_secs,
            strict,
        } => {
            let vendors = select_vendors(&include_vendors, &exclude_vendors)?;
            let ops = select_ops(&include_records, &exclude_records)?;
            let config = CrawlerConfig {
                cache: CacheConfig {
                    enabled: cache,
                    dir: cache_dir.unwrap_or_else(default_cache_dir),
                    ttl: Duration::from_secs(cache_ttl),
                    clear: clear_cache,
                    ..Default::default()
                },
                retry: RetryConfig {
                    max_retries: retries,
                    initial_backoff: Duration::from_millis(backoff_ms),
                    max_backoff: Duration::from_millis(max_backoff_ms),
                    timeout: Duration::from_secs(timeout_secs),
                },
                strict,
            };

            let mut conn = open(&connection_string)?;
            init_schema(&conn, TABLES, false)?;
            log::info!("Pulling {} into {}", vendors.join(", "), connection_string);

            // Every vendor table commits on its own, so stopping here is safe
            let report = tokio::select! {
                report = pull(&mut conn, &vendors, &ops, &config) => report?,
                _ = tokio::signal::ctrl_c() => {
                    log::warn!("Interrupted, stopping pull");
                    return Ok(false);
                }
            };
            report.log_summary();
            Ok(!report.failed())
        }
        Command::Copy {
            source,
            target,
            tables,
        } => {
            let tables = resolve_tables(&tables)?;
            let source = open(&source)?;
            let mut target = open(&target)?;
            init_schema(&target, TABLES, false)?;

            let report = orchestrator::run(
                &source,
                &mut target,
                &tables,
                SyncMode::Overwrite,
                &SyncOptions::default(),
            );
            report.log_summary();
            Ok(!report.failed())
        }
        Command::Sync {
            source,
            target,
            tables,
            scd,
            dry_run,
            batch_size,
            log_changes_path,
            log_changes_tables,
        } => {
            let tables = resolve_tables(&tables)?;
            let source = open(&source)?;
            let mut target = open(&target)?;
            ensure_same_schema(&source, &target)?;

            let mode = if scd { SyncMode::Scd } else { SyncMode::Overwrite };
            let options = SyncOptions {
                batch_size,
                dry_run,
                ..Default::default()
            };
            let report = orchestrator::run(&source, &mut target, &tables, mode, &options);
            report.log_summary();

            if let Some(path) = log_changes_path {
                std::fs::write(&path, report.changes_markdown(&log_changes_tables))?;
                log::info!("Wrote change log to {}", path.display());
            }
            Ok(!report.failed())
        }
        Command::Hash {
            connection_string,
            level,
            tables,
        } => {
            let tables = resolve_tables(&tables)?;
            let conn: Connection = open(&connection_string)?;
            let digest = hash_tables(&conn, &tables, level.into())?;
            match digest {
                serde_json::Value::String(s) => println!("{}", s),
                other => println!(
                    "{}",
                    serde_json::to_string_pretty(&other).map_err(Error::from)?
                ),
            }
            Ok(true)
        }
    }
}
