//! In-Memory Log
//!
//! Backend for `memory` mode: entries live in a map and nothing touches
//! disk. Overwrite detection matches the on-disk log; everything is lost
//! on exit. Testing only.
//!
//! The memory log is a holder in the buffer protocol: it retains one
//! payload reference per stored entry and releases them all on close.

use crate::error::{Error, Result};
use crate::segment_log::LogStore;
use async_trait::async_trait;
use sharedlog_core::LogData;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryLog {
    entries: RwLock<HashMap<u64, LogData>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for MemoryLog {
    async fn append(&self, address: u64, entry: &LogData) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&address) {
            return Err(Error::Overwrite { address });
        }
        entries.insert(address, entry.clone_retained());
        Ok(())
    }

    async fn read(&self, address: u64) -> Result<Option<LogData>> {
        let entries = self.entries.read().await;
        Ok(entries.get(&address).map(LogData::clone_retained))
    }

    async fn close(&self) {
        let mut entries = self.entries.write().await;
        for (_, entry) in entries.drain() {
            entry.release_payload();
        }
    }
}
