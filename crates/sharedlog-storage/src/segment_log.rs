//! Segment Log
//!
//! A [`SegmentLog`] is the durable store for one keyspace: the global log,
//! or one stream's log. It owns a directory of segment files named by
//! their decimal starting address (`0.log`, `10000.log`, ...), opening each
//! on first touch and keeping it open behind its own async mutex.
//!
//! Reads in different segments proceed concurrently; a read contending
//! with a write on the same segment blocks briefly on that segment's lock.
//!
//! [`LogStore`] is the seam between the cache and its backing storage; the
//! in-memory backend in [`crate::memory`] implements the same trait.

use crate::error::Result;
use crate::segment::{segment_base, OpenSegment};
use async_trait::async_trait;
use sharedlog_core::LogData;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Backing storage for one keyspace.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Durably store `entry` at `address`. At most one record per address:
    /// a second attempt fails with an overwrite error and the first record
    /// remains authoritative.
    async fn append(&self, address: u64, entry: &LogData) -> Result<()>;

    /// Fetch the entry at `address`, or `None` if never written. The
    /// returned entry owns a fresh buffer reference for its payload.
    async fn read(&self, address: u64) -> Result<Option<LogData>>;

    /// Flush and release resources.
    async fn close(&self);
}

/// On-disk log backed by segment files.
pub struct SegmentLog {
    dir: PathBuf,
    no_verify: bool,
    max_file_bytes: u64,
    segments: RwLock<HashMap<u64, Arc<Mutex<OpenSegment>>>>,
}

impl SegmentLog {
    /// Open a segment log rooted at `dir`, creating the directory if
    /// needed. Creation is idempotent, so concurrent opens of the same
    /// stream's log race harmlessly.
    pub async fn open(
        dir: impl AsRef<Path>,
        no_verify: bool,
        max_file_bytes: u64,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        info!(dir = %dir.display(), "segment log opened");
        Ok(Self {
            dir,
            no_verify,
            max_file_bytes,
            segments: RwLock::new(HashMap::new()),
        })
    }

    fn segment_path(&self, base: u64) -> PathBuf {
        self.dir.join(format!("{}.log", base))
    }

    /// Get the open segment containing `address`, opening (and scanning)
    /// it on first touch.
    async fn segment_for(&self, address: u64) -> Result<Arc<Mutex<OpenSegment>>> {
        let base = segment_base(address);

        // Fast path: already open.
        {
            let segments = self.segments.read().await;
            if let Some(segment) = segments.get(&base) {
                return Ok(segment.clone());
            }
        }

        // Slow path: open under the write lock. Double-check, another
        // task may have opened it while we waited.
        let mut segments = self.segments.write().await;
        if let Some(segment) = segments.get(&base) {
            return Ok(segment.clone());
        }

        let segment =
            OpenSegment::open(self.segment_path(base), base, self.no_verify, self.max_file_bytes)
                .await?;
        let segment = Arc::new(Mutex::new(segment));
        segments.insert(base, segment.clone());
        Ok(segment)
    }

    /// Whether any state exists for the segment containing `address`,
    /// without creating the file.
    async fn segment_exists(&self, address: u64) -> bool {
        let base = segment_base(address);
        if self.segments.read().await.contains_key(&base) {
            return true;
        }
        tokio::fs::try_exists(self.segment_path(base))
            .await
            .unwrap_or(false)
    }
}

#[async_trait]
impl LogStore for SegmentLog {
    async fn append(&self, address: u64, entry: &LogData) -> Result<()> {
        let segment = self.segment_for(address).await?;
        let mut segment = segment.lock().await;
        segment.append(address, entry).await
    }

    async fn read(&self, address: u64) -> Result<Option<LogData>> {
        // Don't create an empty segment file just to answer "never
        // written".
        if !self.segment_exists(address).await {
            return Ok(None);
        }
        let segment = self.segment_for(address).await?;
        let mut segment = segment.lock().await;
        segment.read(address).await
    }

    async fn close(&self) {
        let mut segments = self.segments.write().await;
        for (base, segment) in segments.drain() {
            let mut segment = segment.lock().await;
            if let Err(err) = segment.close().await {
                debug!(base, error = %err, "error closing segment");
            }
        }
    }
}
