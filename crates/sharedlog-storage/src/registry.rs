//! Log Registry
//!
//! Maps each keyspace to its backing store: the global log, plus one log
//! per stream created on first touch. Stream log creation makes the
//! stream's directory, which is idempotent, so two requests racing to
//! touch a new stream both succeed and one of the freshly built stores is
//! kept.

use crate::config::LogUnitConfig;
use crate::error::Result;
use crate::memory::MemoryLog;
use crate::segment_log::{LogStore, SegmentLog};
use dashmap::DashMap;
use sharedlog_core::StreamId;
use std::sync::Arc;
use tracing::debug;

pub struct LogRegistry {
    config: LogUnitConfig,
    global: Arc<dyn LogStore>,
    streams: DashMap<StreamId, Arc<dyn LogStore>>,
}

impl LogRegistry {
    /// Open the global log and prepare for per-stream logs.
    pub async fn open(config: LogUnitConfig) -> Result<Self> {
        let global: Arc<dyn LogStore> = if config.memory {
            Arc::new(MemoryLog::new())
        } else {
            Arc::new(
                SegmentLog::open(
                    config.global_log_dir(),
                    config.no_verify,
                    config.max_segment_file_bytes(),
                )
                .await?,
            )
        };
        Ok(Self {
            config,
            global,
            streams: DashMap::new(),
        })
    }

    /// The store owning `stream` (`None` = the global log), creating a
    /// stream log on first touch.
    pub async fn log_for(&self, stream: Option<StreamId>) -> Result<Arc<dyn LogStore>> {
        let Some(stream) = stream else {
            return Ok(self.global.clone());
        };

        if let Some(log) = self.streams.get(&stream) {
            return Ok(log.clone());
        }

        // Build outside the map lock; directory creation is idempotent,
        // so a racing creator is harmless and the loser's store is
        // dropped.
        let log: Arc<dyn LogStore> = if self.config.memory {
            Arc::new(MemoryLog::new())
        } else {
            Arc::new(
                SegmentLog::open(
                    self.config.stream_log_dir(&stream),
                    self.config.no_verify,
                    self.config.max_segment_file_bytes(),
                )
                .await?,
            )
        };

        let log = self
            .streams
            .entry(stream)
            .or_insert_with(|| {
                debug!(%stream, "stream log created");
                log
            })
            .value()
            .clone();
        Ok(log)
    }

    /// Close every open store.
    pub async fn close_all(&self) {
        self.global.close().await;
        let streams: Vec<Arc<dyn LogStore>> =
            self.streams.iter().map(|entry| entry.value().clone()).collect();
        self.streams.clear();
        for log in streams {
            log.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharedlog_core::{LogData, RefBuf};
    use tempfile::TempDir;

    fn disk_config(dir: &TempDir) -> LogUnitConfig {
        LogUnitConfig {
            log_path: dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_global_and_stream_keyspaces_are_independent() {
        let dir = TempDir::new().unwrap();
        let registry = LogRegistry::open(disk_config(&dir)).await.unwrap();
        let stream = StreamId::new();

        registry
            .log_for(None)
            .await
            .unwrap()
            .append(5, &LogData::new_data(RefBuf::from("global")))
            .await
            .unwrap();

        // Address 5 of the stream log is untouched.
        let stream_log = registry.log_for(Some(stream)).await.unwrap();
        assert!(stream_log.read(5).await.unwrap().is_none());
        stream_log
            .append(5, &LogData::new_data(RefBuf::from("stream")))
            .await
            .unwrap();

        assert_eq!(
            registry
                .log_for(None)
                .await
                .unwrap()
                .read(5)
                .await
                .unwrap()
                .unwrap()
                .payload_bytes()
                .unwrap(),
            &bytes::Bytes::from("global")
        );
    }

    #[tokio::test]
    async fn test_stream_log_directory_layout() {
        let dir = TempDir::new().unwrap();
        let registry = LogRegistry::open(disk_config(&dir)).await.unwrap();
        let stream = StreamId::new();

        registry
            .log_for(Some(stream))
            .await
            .unwrap()
            .append(1, &LogData::new_data(RefBuf::from("x")))
            .await
            .unwrap();

        assert!(dir.path().join("log").is_dir());
        assert!(dir.path().join("log").join(stream.to_string()).is_dir());
    }

    #[tokio::test]
    async fn test_repeated_lookup_returns_same_store() {
        let dir = TempDir::new().unwrap();
        let registry = LogRegistry::open(disk_config(&dir)).await.unwrap();
        let stream = StreamId::new();

        let first = registry.log_for(Some(stream)).await.unwrap();
        let second = registry.log_for(Some(stream)).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_memory_mode_touches_no_disk() {
        let dir = TempDir::new().unwrap();
        let registry = LogRegistry::open(LogUnitConfig {
            memory: true,
            log_path: dir.path().to_path_buf(),
            ..Default::default()
        })
        .await
        .unwrap();

        registry
            .log_for(Some(StreamId::new()))
            .await
            .unwrap()
            .append(1, &LogData::new_data(RefBuf::from("x")))
            .await
            .unwrap();
        assert!(!dir.path().join("log").exists());
    }
}
