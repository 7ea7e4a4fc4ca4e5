//! Runtime configuration
//!
//! Operational tuning (cache, retries, timeouts, batch sizes) lives here rather
//! than in the vendor drivers, so it can be set from the command line or the
//! environment.

use std::path::PathBuf;
use std::time::Duration;

/// Default lifetime of a cached vendor response
pub const DEFAULT_CACHE_TTL_SECS: u64 = 24 * 3600;

/// Age after which a cache lock left behind by another process is ignored
pub const DEFAULT_LOCK_STALENESS_SECS: u64 = 60;

/// Rows per committed transaction when writing SCD history
pub const DEFAULT_SCD_BATCH_SIZE: usize = 1000;

/// Settings for the on-disk record cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub ttl: Duration,
    pub lock_staleness: Duration,
    /// Drop each pulled vendor's cached responses before fetching
    pub clear: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_cache_dir(),
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            lock_staleness: Duration::from_secs(DEFAULT_LOCK_STALENESS_SECS),
            clear: false,
        }
    }
}

/// Returns the default cache directory: `<temp dir>/price_crawler-cache`
pub fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("price_crawler-cache")
}

/// Timeout and retry policy for vendor API calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based), doubling up to `max_backoff`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Everything a pull needs besides the database and the vendor list
#[derive(Debug, Clone, Default)]
pub struct CrawlerConfig {
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    /// Abort a table batch on the first invalid row instead of skipping it
    pub strict: bool,
}
