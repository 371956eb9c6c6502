//! Garbage Collection
//!
//! A background sweep that frees cache entries provably safe to discard:
//! an entry is trimmable once every stream it belongs to has a trim mark
//! at or past its address. Trimmable entries are invalidated, which
//! releases their payload buffers; the durable records stay on disk, so a
//! later read reloads them (trim is a cache hint, not deletion).
//!
//! Entries with an empty stream set belong to all readers of the global
//! log and are never collected; the cache weight cap is the only bound on
//! them.
//!
//! The sweep holds no locks across iterations. A key written after the
//! snapshot simply waits for the next pass.

use crate::cache::DataCache;
use crate::trim::TrimMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

pub struct GcTask {
    cache: Arc<DataCache>,
    trim: Arc<TrimMap>,
    interval_ms: AtomicU64,
    force: Notify,
}

impl GcTask {
    pub fn new(cache: Arc<DataCache>, trim: Arc<TrimMap>, interval: Duration) -> Self {
        Self {
            cache,
            trim,
            interval_ms: AtomicU64::new(interval.as_millis() as u64),
            force: Notify::new(),
        }
    }

    /// Spawn the sweep loop. It runs until `shutdown_rx` fires.
    pub fn start(self: &Arc<Self>, shutdown_rx: oneshot::Receiver<()>) -> JoinHandle<()> {
        let task = self.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown_rx;
            info!(
                interval_ms = task.interval_ms.load(Ordering::Relaxed),
                "garbage collector started"
            );
            loop {
                // Re-read every round so interval updates apply on the
                // next wait.
                let wait = Duration::from_millis(task.interval_ms.load(Ordering::Relaxed));
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = task.force.notified() => {
                        debug!("garbage collection forced");
                    }
                    _ = &mut shutdown_rx => {
                        info!("garbage collector shutting down");
                        break;
                    }
                }
                task.run_pass().await;
            }
        })
    }

    /// One sweep over the cache. Returns the number of entries freed.
    pub async fn run_pass(&self) -> u64 {
        info!("garbage collection pass starting");
        let mut freed = 0u64;

        let mut addresses = self.cache.keys_snapshot().await;
        addresses.sort();

        for address in addresses {
            // Re-fetch; the entry may be gone since the snapshot.
            let Some(entry) = self.cache.get_if_present(&address).await else {
                continue;
            };

            // Global-only entries are never collected.
            if entry.streams.is_empty() {
                continue;
            }

            let trimmable = entry.streams.iter().all(|stream| {
                self.trim
                    .get(stream)
                    .is_some_and(|mark| address.address <= mark)
            });
            if trimmable {
                trace!(%address, "trimming cache entry");
                self.cache.invalidate(&address).await;
                freed += 1;
            }
        }

        info!(freed, "garbage collection pass complete");
        freed
    }

    /// Wake the sweep loop immediately.
    pub fn force(&self) {
        self.force.notify_one();
    }

    /// Change the sweep period; takes effect on the next wait.
    pub fn set_interval(&self, millis: u64) {
        self.interval_ms.store(millis, Ordering::Relaxed);
        debug!(interval_ms = millis, "garbage collection interval updated");
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogUnitConfig;
    use crate::registry::LogRegistry;
    use sharedlog_core::{LogAddress, LogData, RefBuf, StreamId};

    async fn memory_fixture() -> (Arc<DataCache>, Arc<TrimMap>, GcTask) {
        let registry = LogRegistry::open(LogUnitConfig {
            memory: true,
            ..Default::default()
        })
        .await
        .unwrap();
        let cache = Arc::new(DataCache::new(Arc::new(registry), 1024 * 1024));
        let trim = Arc::new(TrimMap::new());
        let gc = GcTask::new(cache.clone(), trim.clone(), Duration::from_secs(60));
        (cache, trim, gc)
    }

    #[tokio::test]
    async fn test_untrimmed_entries_survive() {
        let (cache, _trim, gc) = memory_fixture().await;
        let stream = StreamId::new();
        let address = LogAddress::stream(7, stream);

        cache
            .put(address, &LogData::new_data(RefBuf::from("x")).with_streams([stream]))
            .await
            .unwrap();

        assert_eq!(gc.run_pass().await, 0);
        assert!(cache.get_if_present(&address).await.is_some());
    }

    #[tokio::test]
    async fn test_trimmed_entry_is_freed() {
        let (cache, trim, gc) = memory_fixture().await;
        let stream = StreamId::new();
        let address = LogAddress::stream(7, stream);

        cache
            .put(address, &LogData::new_data(RefBuf::from("x")).with_streams([stream]))
            .await
            .unwrap();
        trim.put_max(stream, 10);

        assert_eq!(gc.run_pass().await, 1);
        assert!(cache.get_if_present(&address).await.is_none());
    }

    #[tokio::test]
    async fn test_entry_past_trim_mark_survives() {
        let (cache, trim, gc) = memory_fixture().await;
        let stream = StreamId::new();
        let address = LogAddress::stream(20, stream);

        cache
            .put(address, &LogData::new_data(RefBuf::from("x")).with_streams([stream]))
            .await
            .unwrap();
        trim.put_max(stream, 10);

        assert_eq!(gc.run_pass().await, 0);
        assert!(cache.get_if_present(&address).await.is_some());
    }

    #[tokio::test]
    async fn test_all_streams_must_be_trimmed() {
        let (cache, trim, gc) = memory_fixture().await;
        let a = StreamId::new();
        let b = StreamId::new();
        let address = LogAddress::stream(5, a);

        cache
            .put(
                address,
                &LogData::new_data(RefBuf::from("x")).with_streams([a, b]),
            )
            .await
            .unwrap();

        // Only one of the two streams is trimmed past the address.
        trim.put_max(a, 10);
        assert_eq!(gc.run_pass().await, 0);
        assert!(cache.get_if_present(&address).await.is_some());

        trim.put_max(b, 5);
        assert_eq!(gc.run_pass().await, 1);
        assert!(cache.get_if_present(&address).await.is_none());
    }

    #[tokio::test]
    async fn test_global_only_entries_are_never_collected() {
        let (cache, trim, gc) = memory_fixture().await;
        let stream = StreamId::new();
        let address = LogAddress::global(3);

        // Empty stream set: belongs to the global log only.
        cache
            .put(address, &LogData::new_data(RefBuf::from("x")))
            .await
            .unwrap();
        trim.put_max(stream, 100);

        assert_eq!(gc.run_pass().await, 0);
        assert!(cache.get_if_present(&address).await.is_some());
    }

    #[tokio::test]
    async fn test_freeing_releases_payload_reference() {
        let (cache, trim, gc) = memory_fixture().await;
        let stream = StreamId::new();
        let address = LogAddress::stream(2, stream);

        let buf = RefBuf::from("payload");
        let entry = LogData::new_data(buf.retain()).with_streams([stream]);
        cache.put(address, &entry).await.unwrap();
        entry.release_payload();
        // One reference held here, one by the cache, one by the memory
        // backend.
        assert_eq!(buf.ref_count(), 3);

        trim.put_max(stream, 2);
        gc.run_pass().await;
        assert_eq!(buf.ref_count(), 2);
        buf.release();
    }

    #[tokio::test]
    async fn test_force_wakes_the_loop() {
        let (cache, trim, gc) = memory_fixture().await;
        let gc = Arc::new(gc);
        let stream = StreamId::new();
        let address = LogAddress::stream(1, stream);

        cache
            .put(address, &LogData::new_data(RefBuf::from("x")).with_streams([stream]))
            .await
            .unwrap();
        trim.put_max(stream, 1);

        // An hour-long interval: only the forced wake can free the entry
        // promptly.
        gc.set_interval(3_600_000);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = gc.start(shutdown_rx);

        gc.force();
        tokio::time::timeout(Duration::from_secs(5), async {
            while cache.get_if_present(&address).await.is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("forced GC should free the entry");

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_the_loop() {
        let (_cache, _trim, gc) = memory_fixture().await;
        let gc = Arc::new(gc);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = gc.start(shutdown_rx);

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop should exit on shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_set_interval_visible() {
        let (_cache, _trim, gc) = memory_fixture().await;
        gc.set_interval(1234);
        assert_eq!(gc.interval_ms(), 1234);
    }
}
