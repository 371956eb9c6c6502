//! Log Entries
//!
//! A [`LogData`] is what the log unit stores at an address. Besides the
//! opaque payload it carries the client protocol's bookkeeping:
//!
//! - **streams**: the streams this entry was placed in (empty means the
//!   entry belongs to the global log only)
//! - **backpointers**: per-stream previous address, written by the client
//!   so readers can walk a stream backwards
//! - **metadata**: small mutable flags such as the commit bit
//!
//! Entry kinds distinguish real data from the protocol's placeholders:
//! `Empty` means "never written", `Hole` means "definitively skipped", and
//! `Trimmed` means "was present, discarded past the trim mark".
//!
//! Collections are ordered (`BTreeSet`/`BTreeMap`) so an entry has exactly
//! one byte encoding on disk.

use crate::address::StreamId;
use crate::buffer::RefBuf;
use crate::error::Error;
use std::collections::{BTreeMap, BTreeSet};

/// The kind of record stored at an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryType {
    /// A client write with a payload.
    Data = 0,
    /// A deliberately skipped address; readers treat it as filled.
    Hole = 1,
    /// Never written. Not stored on disk; the absence of a record.
    Empty = 2,
    /// Was present, discarded past the stream's trim mark.
    Trimmed = 3,
}

impl TryFrom<u8> for EntryType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EntryType::Data),
            1 => Ok(EntryType::Hole),
            2 => Ok(EntryType::Empty),
            3 => Ok(EntryType::Trimmed),
            _ => Err(Error::InvalidEntryType(value)),
        }
    }
}

/// Keys of the per-entry metadata map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum MetaKey {
    /// Commit bit set by the client protocol after the write is decided.
    Commit = 0,
    /// Rank of the writer that produced this entry.
    Rank = 1,
    /// The entry's address in the global log.
    GlobalAddress = 2,
    /// Per-stream addresses assigned to this entry.
    StreamAddresses = 3,
}

impl TryFrom<u8> for MetaKey {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MetaKey::Commit),
            1 => Ok(MetaKey::Rank),
            2 => Ok(MetaKey::GlobalAddress),
            3 => Ok(MetaKey::StreamAddresses),
            _ => Err(Error::InvalidMetaKey(value)),
        }
    }
}

/// Values of the per-entry metadata map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Bool(bool),
    U64(u64),
    AddressMap(BTreeMap<StreamId, u64>),
}

/// A log entry: the unit of storage and caching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogData {
    pub entry_type: EntryType,

    /// Opaque payload. Present only for `Data` entries (and possibly
    /// empty even then).
    pub payload: Option<RefBuf>,

    /// Streams this entry belongs to. Empty means global-only.
    pub streams: BTreeSet<StreamId>,

    /// Per-stream previous address.
    pub backpointers: BTreeMap<StreamId, u64>,

    /// Mutable protocol metadata (commit bit, rank, address echoes).
    pub metadata: BTreeMap<MetaKey, MetadataValue>,
}

impl LogData {
    /// A data entry wrapping `payload`. The entry assumes the caller's
    /// reference to the buffer.
    pub fn new_data(payload: RefBuf) -> Self {
        Self {
            entry_type: EntryType::Data,
            payload: Some(payload),
            streams: BTreeSet::new(),
            backpointers: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn hole() -> Self {
        Self {
            entry_type: EntryType::Hole,
            payload: None,
            streams: BTreeSet::new(),
            backpointers: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn empty() -> Self {
        Self {
            entry_type: EntryType::Empty,
            payload: None,
            streams: BTreeSet::new(),
            backpointers: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn trimmed() -> Self {
        Self {
            entry_type: EntryType::Trimmed,
            payload: None,
            streams: BTreeSet::new(),
            backpointers: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_streams(mut self, streams: impl IntoIterator<Item = StreamId>) -> Self {
        self.streams = streams.into_iter().collect();
        self
    }

    pub fn with_backpointers(
        mut self,
        backpointers: impl IntoIterator<Item = (StreamId, u64)>,
    ) -> Self {
        self.backpointers = backpointers.into_iter().collect();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entry_type == EntryType::Empty
    }

    pub fn is_hole(&self) -> bool {
        self.entry_type == EntryType::Hole
    }

    pub fn is_trimmed(&self) -> bool {
        self.entry_type == EntryType::Trimmed
    }

    /// Cache weight: payload length, or 1 for payload-less entries.
    pub fn weight(&self) -> u64 {
        match &self.payload {
            Some(buf) if !buf.is_empty() => buf.len() as u64,
            _ => 1,
        }
    }

    /// Set the commit bit.
    pub fn set_commit(&mut self, commit: bool) {
        self.metadata
            .insert(MetaKey::Commit, MetadataValue::Bool(commit));
    }

    /// Remove any commit bit. Incoming writes are uncommitted until the
    /// client protocol says otherwise.
    pub fn clear_commit(&mut self) {
        self.metadata.remove(&MetaKey::Commit);
    }

    pub fn commit(&self) -> Option<bool> {
        match self.metadata.get(&MetaKey::Commit) {
            Some(MetadataValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// The payload's bytes, if any.
    pub fn payload_bytes(&self) -> Option<&bytes::Bytes> {
        self.payload.as_ref().map(|buf| buf.as_bytes())
    }

    /// Release the payload's buffer reference, if this entry carries one.
    /// Called by whichever of evict, trim, or shutdown fires first for the
    /// holder that owns this instance.
    pub fn release_payload(&self) {
        if let Some(buf) = &self.payload {
            buf.release();
        }
    }

    /// Clone this entry and take a payload reference for the new holder.
    /// A plain `clone()` is a non-owning view; use this when a component
    /// assumes ownership of the copy.
    pub fn clone_retained(&self) -> LogData {
        let clone = self.clone();
        if let Some(buf) = &clone.payload {
            let _ = buf.retain();
        }
        clone
    }
}
