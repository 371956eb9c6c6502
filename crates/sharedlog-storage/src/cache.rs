//! Write-Through Data Cache
//!
//! All reads and writes go through this cache; the segment logs behind it
//! are the durable truth.
//!
//! ## Write path
//!
//! `put` appends to the owning segment log *before* the entry becomes
//! visible in the cache. If the log already holds a record for the
//! address, the append fails with an overwrite error and the cache keeps
//! whatever it had: the first durable record always wins.
//!
//! ## Per-key serialization
//!
//! Every operation that can write (put, load-through get) first takes a
//! striped per-key mutex, so for any single address at most one writer or
//! loader runs at a time. Two racing `put`s for one address are funneled
//! through the stripe: the first reaches the segment and wins, the second
//! finds the address present and fails with an overwrite error.
//!
//! ## Weight and eviction
//!
//! Entry weight is the payload length (1 for payload-less entries). The
//! sum of weights never exceeds the configured cap: eviction runs
//! synchronously with insertion, popping least-recently-used entries
//! until the new entry fits. Every removal path (weight eviction,
//! `invalidate`, `invalidate_all`) releases the entry's payload buffer
//! reference exactly once.
//!
//! ## Load-through
//!
//! A `get` miss loads from the owning segment log. A loaded entry is
//! cached; a never-written address answers `Empty` and is NOT cached, so
//! a later first write at that address is not shadowed by a stale
//! negative entry.

use crate::error::Result;
use crate::registry::LogRegistry;
use lru::LruCache;
use sharedlog_core::{LogAddress, LogData};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{trace, warn};

const STRIPES: usize = 64;

struct CacheInner {
    map: LruCache<LogAddress, LogData>,
    weight: u64,
}

pub struct DataCache {
    registry: Arc<LogRegistry>,
    inner: Mutex<CacheInner>,
    stripes: Vec<Mutex<()>>,
    max_weight: u64,
}

impl DataCache {
    pub fn new(registry: Arc<LogRegistry>, max_weight: u64) -> Self {
        Self {
            registry,
            inner: Mutex::new(CacheInner {
                map: LruCache::unbounded(),
                weight: 0,
            }),
            stripes: (0..STRIPES).map(|_| Mutex::new(())).collect(),
            max_weight,
        }
    }

    fn stripe(&self, address: &LogAddress) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        address.hash(&mut hasher);
        &self.stripes[hasher.finish() as usize % STRIPES]
    }

    /// Write-through insert. On success the cache takes its own payload
    /// reference; the caller keeps (and remains responsible for) its own.
    pub async fn put(&self, address: LogAddress, entry: &LogData) -> Result<()> {
        let _key = self.stripe(&address).lock().await;

        let log = self.registry.log_for(address.stream).await?;
        log.append(address.address, entry).await?;

        let mut inner = self.inner.lock().await;
        self.insert_locked(&mut inner, address, entry.clone_retained());
        Ok(())
    }

    /// Fetch the entry at `address`, loading from the segment log on a
    /// miss. Never-written addresses answer `Empty`.
    ///
    /// The returned entry is a view: it does NOT own a payload reference
    /// (the cache's retained reference keeps the buffer alive).
    pub async fn get(&self, address: &LogAddress) -> Result<LogData> {
        {
            let mut inner = self.inner.lock().await;
            if let Some(entry) = inner.map.get(address) {
                return Ok(entry.clone());
            }
        }

        // Miss: load through, serialized with writers for this key.
        let _key = self.stripe(address).lock().await;

        // The race we just lost may have filled the entry.
        {
            let mut inner = self.inner.lock().await;
            if let Some(entry) = inner.map.get(address) {
                return Ok(entry.clone());
            }
        }

        let log = self.registry.log_for(address.stream).await?;
        match log.read(address.address).await? {
            Some(entry) => {
                trace!(%address, "loaded entry into cache");
                let view = entry.clone();
                let mut inner = self.inner.lock().await;
                self.insert_locked(&mut inner, *address, entry);
                Ok(view)
            }
            None => Ok(LogData::empty()),
        }
    }

    /// The cached entry, if any. No load-through, no recency update; used
    /// by the GC sweep.
    pub async fn get_if_present(&self, address: &LogAddress) -> Option<LogData> {
        let inner = self.inner.lock().await;
        inner.map.peek(address).cloned()
    }

    /// Set the commit bit on the entry at `address`, loading it first if
    /// it only exists on disk. Returns false if the address holds nothing.
    pub async fn set_commit(&self, address: &LogAddress, commit: bool) -> Result<bool> {
        let entry = self.get(address).await?;
        if entry.is_empty() {
            return Ok(false);
        }
        let mut inner = self.inner.lock().await;
        match inner.map.get_mut(address) {
            Some(entry) => {
                entry.set_commit(commit);
                Ok(true)
            }
            // Evicted between the load and now; the next load re-reads
            // the durable record.
            None => Ok(false),
        }
    }

    /// Drop the cache entry, releasing its payload reference. Deletes
    /// nothing on disk.
    pub async fn invalidate(&self, address: &LogAddress) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.map.pop(address) {
            inner.weight = inner.weight.saturating_sub(entry.weight());
            entry.release_payload();
            trace!(%address, "invalidated cache entry");
        }
    }

    /// Drop every entry, releasing each payload reference.
    pub async fn invalidate_all(&self) {
        let mut inner = self.inner.lock().await;
        while let Some((address, entry)) = inner.map.pop_lru() {
            entry.release_payload();
            trace!(%address, "invalidated cache entry");
        }
        inner.weight = 0;
    }

    /// Snapshot of the cached keys.
    pub async fn keys_snapshot(&self) -> Vec<LogAddress> {
        let inner = self.inner.lock().await;
        inner.map.iter().map(|(address, _)| *address).collect()
    }

    /// Snapshot of the cached entries (non-owning views).
    pub async fn values_snapshot(&self) -> Vec<LogData> {
        let inner = self.inner.lock().await;
        inner.map.iter().map(|(_, entry)| entry.clone()).collect()
    }

    /// Current sum of entry weights.
    pub async fn weight(&self) -> u64 {
        self.inner.lock().await.weight
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.map.is_empty()
    }

    fn insert_locked(&self, inner: &mut CacheInner, address: LogAddress, entry: LogData) {
        let weight = entry.weight();
        if let Some(old) = inner.map.put(address, entry) {
            // Can't happen on the put path (the append would have failed)
            // and the load path re-checks under the stripe; kept for the
            // invariant that every removed entry is released once.
            inner.weight = inner.weight.saturating_sub(old.weight());
            old.release_payload();
        }
        inner.weight += weight;

        while inner.weight > self.max_weight {
            match inner.map.pop_lru() {
                Some((evicted_address, evicted)) => {
                    inner.weight = inner.weight.saturating_sub(evicted.weight());
                    evicted.release_payload();
                    trace!(address = %evicted_address, "evicted cache entry");
                }
                None => {
                    warn!(
                        weight = inner.weight,
                        max_weight = self.max_weight,
                        "cache weight exceeds cap with no entries to evict"
                    );
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogUnitConfig;
    use sharedlog_core::RefBuf;
    use tempfile::TempDir;

    async fn disk_cache(dir: &TempDir, max_weight: u64) -> DataCache {
        let registry = LogRegistry::open(LogUnitConfig {
            log_path: dir.path().to_path_buf(),
            ..Default::default()
        })
        .await
        .unwrap();
        DataCache::new(Arc::new(registry), max_weight)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = disk_cache(&dir, 1024).await;

        let address = LogAddress::global(5);
        cache
            .put(address, &LogData::new_data(RefBuf::from("hello")))
            .await
            .unwrap();

        let entry = cache.get(&address).await.unwrap();
        assert_eq!(entry.payload_bytes().unwrap(), &bytes::Bytes::from("hello"));
    }

    #[tokio::test]
    async fn test_get_never_written_is_empty_and_not_cached() {
        let dir = TempDir::new().unwrap();
        let cache = disk_cache(&dir, 1024).await;

        let entry = cache.get(&LogAddress::global(123)).await.unwrap();
        assert!(entry.is_empty());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_second_put_fails_and_first_wins() {
        let dir = TempDir::new().unwrap();
        let cache = disk_cache(&dir, 1024).await;

        let address = LogAddress::global(9);
        cache
            .put(address, &LogData::new_data(RefBuf::from("first")))
            .await
            .unwrap();
        let err = cache
            .put(address, &LogData::new_data(RefBuf::from("second")))
            .await
            .unwrap_err();
        assert!(err.is_overwrite());

        let entry = cache.get(&address).await.unwrap();
        assert_eq!(entry.payload_bytes().unwrap(), &bytes::Bytes::from("first"));
    }

    #[tokio::test]
    async fn test_concurrent_puts_exactly_one_wins() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(disk_cache(&dir, 1024).await);
        let address = LogAddress::global(77);

        let a = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .put(address, &LogData::new_data(RefBuf::from("a")))
                    .await
            })
        };
        let b = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .put(address, &LogData::new_data(RefBuf::from("b")))
                    .await
            })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);

        // The readable value matches the winner.
        let winner = if a.is_ok() { "a" } else { "b" };
        let entry = cache.get(&address).await.unwrap();
        assert_eq!(
            entry.payload_bytes().unwrap(),
            &bytes::Bytes::copy_from_slice(winner.as_bytes())
        );
    }

    #[tokio::test]
    async fn test_invalidate_then_reload_from_disk() {
        let dir = TempDir::new().unwrap();
        let cache = disk_cache(&dir, 1024).await;

        let address = LogAddress::global(3);
        cache
            .put(address, &LogData::new_data(RefBuf::from("durable")))
            .await
            .unwrap();
        cache.invalidate(&address).await;
        assert_eq!(cache.len().await, 0);

        // Invalidation dropped only the cache entry; disk still has it.
        let entry = cache.get(&address).await.unwrap();
        assert_eq!(
            entry.payload_bytes().unwrap(),
            &bytes::Bytes::from("durable")
        );
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_weight_bound_evicts_lru() {
        let dir = TempDir::new().unwrap();
        let cache = disk_cache(&dir, 10).await;

        for address in 0..3u64 {
            cache
                .put(
                    LogAddress::global(address),
                    &LogData::new_data(RefBuf::from(vec![b'x'; 4])),
                )
                .await
                .unwrap();
            assert!(cache.weight().await <= 10);
        }

        // 3 * 4 bytes > 10: the least recently used entry is gone.
        assert_eq!(cache.len().await, 2);
        assert!(cache.get_if_present(&LogAddress::global(0)).await.is_none());
        assert!(cache.get_if_present(&LogAddress::global(2)).await.is_some());
    }

    #[tokio::test]
    async fn test_eviction_releases_payload_reference() {
        let dir = TempDir::new().unwrap();
        let cache = disk_cache(&dir, 8).await;

        let buf = RefBuf::from(vec![b'a'; 6]);
        let entry = LogData::new_data(buf.retain());
        cache.put(LogAddress::global(1), &entry).await.unwrap();
        entry.release_payload();
        // One reference held here, one by the cache.
        assert_eq!(buf.ref_count(), 2);

        // Inserting a second large entry evicts the first.
        cache
            .put(
                LogAddress::global(2),
                &LogData::new_data(RefBuf::from(vec![b'b'; 6])),
            )
            .await
            .unwrap();
        assert_eq!(buf.ref_count(), 1);
        buf.release();
    }

    #[tokio::test]
    async fn test_invalidate_all_releases_every_reference() {
        let dir = TempDir::new().unwrap();
        let cache = disk_cache(&dir, 1024).await;

        let bufs: Vec<RefBuf> = (0..4).map(|i| RefBuf::from(vec![i as u8; 8])).collect();
        for (i, buf) in bufs.iter().enumerate() {
            let entry = LogData::new_data(buf.retain());
            cache
                .put(LogAddress::global(i as u64), &entry)
                .await
                .unwrap();
            entry.release_payload();
        }

        cache.invalidate_all().await;
        assert_eq!(cache.len().await, 0);
        assert_eq!(cache.weight().await, 0);
        for buf in &bufs {
            assert_eq!(buf.ref_count(), 1);
            buf.release();
        }
    }

    #[tokio::test]
    async fn test_set_commit_mutates_cached_entry() {
        let dir = TempDir::new().unwrap();
        let cache = disk_cache(&dir, 1024).await;

        let address = LogAddress::global(5);
        cache
            .put(address, &LogData::new_data(RefBuf::from("x")))
            .await
            .unwrap();

        assert!(cache.set_commit(&address, true).await.unwrap());
        assert_eq!(cache.get(&address).await.unwrap().commit(), Some(true));
    }

    #[tokio::test]
    async fn test_set_commit_on_empty_address() {
        let dir = TempDir::new().unwrap();
        let cache = disk_cache(&dir, 1024).await;
        assert!(!cache.set_commit(&LogAddress::global(404), true).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_commit_loads_disk_resident_entry() {
        let dir = TempDir::new().unwrap();
        let cache = disk_cache(&dir, 1024).await;

        let address = LogAddress::global(6);
        cache
            .put(address, &LogData::new_data(RefBuf::from("x")))
            .await
            .unwrap();
        cache.invalidate(&address).await;

        assert!(cache.set_commit(&address, true).await.unwrap());
        assert_eq!(cache.get(&address).await.unwrap().commit(), Some(true));
    }

    #[tokio::test]
    async fn test_snapshots() {
        let dir = TempDir::new().unwrap();
        let cache = disk_cache(&dir, 1024).await;

        for address in [4u64, 1, 9] {
            cache
                .put(
                    LogAddress::global(address),
                    &LogData::new_data(RefBuf::from(vec![b'v'; 3])),
                )
                .await
                .unwrap();
        }

        let mut keys = cache.keys_snapshot().await;
        keys.sort();
        assert_eq!(
            keys,
            vec![
                LogAddress::global(1),
                LogAddress::global(4),
                LogAddress::global(9)
            ]
        );
        assert_eq!(cache.values_snapshot().await.len(), 3);
    }

    #[tokio::test]
    async fn test_hole_weighs_one() {
        let dir = TempDir::new().unwrap();
        let cache = disk_cache(&dir, 1024).await;

        cache
            .put(LogAddress::global(8), &LogData::hole())
            .await
            .unwrap();
        assert_eq!(cache.weight().await, 1);
        assert!(cache.get(&LogAddress::global(8)).await.unwrap().is_hole());
    }
}
