//! Per-Stream Trim Marks
//!
//! A trim mark is the highest address in a stream that a client has
//! declared safe to discard. The map is monotonic: the only mutation is
//! `put_max`, so marks never move backwards no matter how trim requests
//! are ordered or retried.
//!
//! The map is not persisted. Trim is a hint to the GC sweep; losing it on
//! restart costs nothing but re-learning freed space on the next client
//! trim.

use dashmap::DashMap;
use sharedlog_core::StreamId;
use std::collections::HashMap;

#[derive(Default)]
pub struct TrimMap {
    marks: DashMap<StreamId, u64>,
}

impl TrimMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the stream's trim mark to `prefix` if it is higher than the
    /// current mark.
    pub fn put_max(&self, stream: StreamId, prefix: u64) {
        self.marks
            .entry(stream)
            .and_modify(|mark| *mark = (*mark).max(prefix))
            .or_insert(prefix);
    }

    /// The stream's trim mark, or `None` if it was never trimmed.
    pub fn get(&self, stream: &StreamId) -> Option<u64> {
        self.marks.get(stream).map(|mark| *mark)
    }

    pub fn snapshot(&self) -> HashMap<StreamId, u64> {
        self.marks
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    /// Forget every mark (reboot).
    pub fn clear(&self) {
        self.marks.clear();
    }
}
