//! Log Unit Configuration
//!
//! One typed configuration value, constructed at startup and passed
//! explicitly to every component.
//!
//! - **memory**: keep all entries in RAM; nothing touches disk and data is
//!   lost on exit. Testing only.
//! - **log_path**: base directory for on-disk logs. The global log lives
//!   under `log/`, each stream under `log/<stream-uuid>/`.
//! - **no_verify**: skip per-record checksum verification on read.
//! - **max_cache_bytes**: cache weight cap; eviction keeps the sum of
//!   entry weights at or under this bound.
//! - **quickcheck_test_mode**: shrink the segment file size ceiling to
//!   ~4 MB for filesystems where sparse files are expensive.
//! - **gc_interval_ms**: garbage collection sweep period.

use crate::segment::{DEFAULT_MAX_FILE_BYTES, QUICKCHECK_MAX_FILE_BYTES};
use serde::{Deserialize, Serialize};
use sharedlog_core::StreamId;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogUnitConfig {
    /// In-memory backend, no persistence (default: false).
    #[serde(default)]
    pub memory: bool,

    /// Base directory for on-disk logs (default: `./data`).
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Skip checksum verification on read (default: false).
    #[serde(default)]
    pub no_verify: bool,

    /// Cache weight cap in bytes (default: 1 GiB).
    #[serde(default = "default_max_cache_bytes")]
    pub max_cache_bytes: u64,

    /// Use ~4 MB segment files instead of the default ceiling
    /// (default: false).
    #[serde(default)]
    pub quickcheck_test_mode: bool,

    /// GC sweep period in milliseconds (default: 60 000).
    #[serde(default = "default_gc_interval_ms")]
    pub gc_interval_ms: u64,
}

impl Default for LogUnitConfig {
    fn default() -> Self {
        Self {
            memory: false,
            log_path: default_log_path(),
            no_verify: false,
            max_cache_bytes: default_max_cache_bytes(),
            quickcheck_test_mode: false,
            gc_interval_ms: default_gc_interval_ms(),
        }
    }
}

impl LogUnitConfig {
    /// Segment file size ceiling for this configuration.
    pub fn max_segment_file_bytes(&self) -> u64 {
        if self.quickcheck_test_mode {
            QUICKCHECK_MAX_FILE_BYTES
        } else {
            DEFAULT_MAX_FILE_BYTES
        }
    }

    /// Directory of the global log.
    pub fn global_log_dir(&self) -> PathBuf {
        self.log_path.join("log")
    }

    /// Directory of one stream's log.
    pub fn stream_log_dir(&self, stream: &StreamId) -> PathBuf {
        self.log_path.join("log").join(stream.to_string())
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }
}

fn default_log_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_max_cache_bytes() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

fn default_gc_interval_ms() -> u64 {
    60_000
}
