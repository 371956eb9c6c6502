//! The Log Unit Server
//!
//! Owns one replica's storage stack — log registry, write-through cache,
//! trim map, and GC task — and dispatches control messages onto it. All
//! reads and writes go through the cache; the segment logs behind it are
//! the durable truth.
//!
//! The transport and epoch collaborators sit in front of this type:
//! out-of-epoch messages never reach [`LogUnitServer::handle`].
//!
//! ## Lifecycle
//!
//! - [`LogUnitServer::start`] opens the logs, builds the cache, and
//!   spawns the GC loop.
//! - [`LogUnitServer::shutdown`] stops the GC loop, invalidates the cache
//!   (releasing every payload buffer reference), and closes the logs.
//! - [`LogUnitServer::reboot`] tears the stack down and rebuilds it on
//!   the same data; the trim map resets (trim is a hint, re-learned from
//!   clients).
//! - [`LogUnitServer::reset`] additionally deletes the on-disk logs.

use crate::request::{CommitTarget, LogUnitRequest, LogUnitResponse, ReadResponse};
use sharedlog_core::{LogAddress, LogData};
use sharedlog_storage::{
    DataCache, Error, GcTask, LogRegistry, LogUnitConfig, Result, TrimMap,
};
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// The running storage stack; rebuilt by reboot/reset, gone after
/// shutdown.
struct Active {
    registry: Arc<LogRegistry>,
    cache: Arc<DataCache>,
    gc: Arc<GcTask>,
    gc_shutdown: oneshot::Sender<()>,
    gc_handle: JoinHandle<()>,
}

pub struct LogUnitServer {
    config: LogUnitConfig,
    trim: Arc<TrimMap>,
    active: RwLock<Option<Active>>,
}

impl LogUnitServer {
    /// Open the logs and start serving.
    pub async fn start(config: LogUnitConfig) -> Result<Self> {
        let trim = Arc::new(TrimMap::new());
        let active = build_active(&config, &trim).await?;
        Ok(Self {
            config,
            trim,
            active: RwLock::new(Some(active)),
        })
    }

    /// Dispatch one control message.
    pub async fn handle(&self, request: LogUnitRequest) -> LogUnitResponse {
        let (cache, gc) = {
            let guard = self.active.read().await;
            match guard.as_ref() {
                Some(active) => (active.cache.clone(), active.gc.clone()),
                None => {
                    // Release the transport's buffer reference; nothing
                    // downstream will.
                    match &request {
                        LogUnitRequest::Write { data, .. }
                        | LogUnitRequest::ReplexWrite { data, .. } => data.release_payload(),
                        _ => {}
                    }
                    return LogUnitResponse::ServerError {
                        message: "log unit is shut down".to_string(),
                    };
                }
            }
        };

        match request {
            LogUnitRequest::Write { address, mut data } => {
                debug!(
                    address,
                    streams = data.streams.len(),
                    "log write"
                );
                // Incoming writes are uncommitted until the client
                // protocol says otherwise.
                data.clear_commit();
                let result = cache.put(LogAddress::global(address), &data).await;
                data.release_payload();
                match result {
                    Ok(()) => LogUnitResponse::WriteOk,
                    Err(err) if err.is_overwrite() => LogUnitResponse::OverwriteError,
                    Err(err) => storage_error(err),
                }
            }

            LogUnitRequest::ReplexWrite {
                stream_addresses,
                mut data,
            } => {
                debug!(placements = stream_addresses.len(), "replex write");
                data.clear_commit();
                for (stream, address) in &stream_addresses {
                    let result = cache
                        .put(LogAddress::stream(*address, *stream), &data)
                        .await;
                    match result {
                        Ok(()) => {}
                        Err(err) if err.is_overwrite() => {
                            // Fail fast; earlier per-stream writes in this
                            // request remain durable.
                            data.release_payload();
                            return LogUnitResponse::ReplexOverwriteError;
                        }
                        Err(err) => {
                            data.release_payload();
                            return storage_error(err);
                        }
                    }
                }
                data.release_payload();
                LogUnitResponse::WriteOk
            }

            LogUnitRequest::Read { stream, start, end } => {
                debug!(?stream, start, end, "log read");
                let mut response = ReadResponse::default();
                for address in start..=end {
                    match cache.get(&LogAddress { address, stream }).await {
                        Ok(entry) => {
                            let entry = if entry.is_hole() {
                                LogData::hole()
                            } else {
                                entry
                            };
                            response.entries.insert(address, entry);
                        }
                        Err(err) if err.is_corruption() => {
                            error!(address, error = %err, "corrupt record in read range");
                            return LogUnitResponse::DataCorruptionError;
                        }
                        Err(err) => return storage_error(err),
                    }
                }
                LogUnitResponse::Read(response)
            }

            LogUnitRequest::Commit { target, commit } => {
                let targets: Vec<LogAddress> = match target {
                    CommitTarget::Global { address } => vec![LogAddress::global(address)],
                    CommitTarget::Streams(streams) => streams
                        .into_iter()
                        .map(|(stream, address)| LogAddress::stream(address, stream))
                        .collect(),
                };
                for address in targets {
                    match cache.set_commit(&address, commit).await {
                        // Fail fast; commit bits already set in this
                        // request stay set.
                        Ok(false) => return LogUnitResponse::NoEntryError,
                        Ok(true) => {}
                        Err(err) => return storage_error(err),
                    }
                }
                LogUnitResponse::Ack
            }

            LogUnitRequest::FillHole { stream, address } => {
                debug!(?stream, address, "fill hole");
                match cache.put(LogAddress { address, stream }, &LogData::hole()).await {
                    Ok(()) => LogUnitResponse::WriteOk,
                    Err(err) if err.is_overwrite() => LogUnitResponse::OverwriteError,
                    Err(err) => storage_error(err),
                }
            }

            LogUnitRequest::Trim { stream, prefix } => {
                self.trim.put_max(stream, prefix);
                LogUnitResponse::Ack
            }

            LogUnitRequest::ForceGc => {
                gc.force();
                LogUnitResponse::Ack
            }

            LogUnitRequest::SetGcInterval { millis } => {
                gc.set_interval(millis);
                LogUnitResponse::Ack
            }
        }
    }

    /// Stop the GC loop, release every cached buffer, and close the logs.
    pub async fn shutdown(&self) {
        let mut guard = self.active.write().await;
        if let Some(active) = guard.take() {
            teardown(active).await;
        }
    }

    /// Tear the storage stack down and rebuild it over the same data.
    /// The trim map resets; clients re-send trims.
    pub async fn reboot(&self) -> Result<()> {
        let mut guard = self.active.write().await;
        if let Some(active) = guard.take() {
            teardown(active).await;
        }
        self.trim.clear();
        *guard = Some(build_active(&self.config, &self.trim).await?);
        Ok(())
    }

    /// Delete all on-disk logs and reboot empty.
    pub async fn reset(&self) -> Result<()> {
        let mut guard = self.active.write().await;
        if let Some(active) = guard.take() {
            teardown(active).await;
        }

        if !self.config.memory {
            delete_logs(&self.config).await?;
        }

        self.trim.clear();
        *guard = Some(build_active(&self.config, &self.trim).await?);
        Ok(())
    }

    pub fn config(&self) -> &LogUnitConfig {
        &self.config
    }

    pub fn trim_map(&self) -> &Arc<TrimMap> {
        &self.trim
    }

    /// The cache, while running. Test and operator hook.
    pub async fn cache(&self) -> Option<Arc<DataCache>> {
        self.active.read().await.as_ref().map(|a| a.cache.clone())
    }

    /// The GC task, while running. Test and operator hook.
    pub async fn gc_task(&self) -> Option<Arc<GcTask>> {
        self.active.read().await.as_ref().map(|a| a.gc.clone())
    }
}

async fn build_active(config: &LogUnitConfig, trim: &Arc<TrimMap>) -> Result<Active> {
    if config.memory {
        warn!(
            max_cache_bytes = config.max_cache_bytes,
            "log unit opened in-memory mode; this should be run for testing purposes \
             only, and the unit WILL LOSE ALL DATA if it exits"
        );
    }

    let registry = Arc::new(LogRegistry::open(config.clone()).await?);
    let cache = Arc::new(DataCache::new(registry.clone(), config.max_cache_bytes));
    let gc = Arc::new(GcTask::new(cache.clone(), trim.clone(), config.gc_interval()));
    let (gc_shutdown, shutdown_rx) = oneshot::channel();
    let gc_handle = gc.start(shutdown_rx);

    Ok(Active {
        registry,
        cache,
        gc,
        gc_shutdown,
        gc_handle,
    })
}

async fn teardown(active: Active) {
    let _ = active.gc_shutdown.send(());
    if let Err(err) = active.gc_handle.await {
        error!(error = %err, "garbage collector task failed");
    }
    active.cache.invalidate_all().await;
    active.registry.close_all().await;
}

/// Remove every `log*` entry under the data directory.
async fn delete_logs(config: &LogUnitConfig) -> Result<()> {
    let dir = &config.log_path;
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(());
    }
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with("log") {
            continue;
        }
        let path = entry.path();
        let result = if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        if let Err(err) = result {
            error!(path = %path.display(), error = %err, "reset: error deleting log entry");
        }
    }
    Ok(())
}

fn storage_error(err: Error) -> LogUnitResponse {
    if err.is_corruption() {
        error!(error = %err, "data corruption");
        LogUnitResponse::DataCorruptionError
    } else {
        error!(error = %err, "storage error");
        LogUnitResponse::ServerError {
            message: err.to_string(),
        }
    }
}
