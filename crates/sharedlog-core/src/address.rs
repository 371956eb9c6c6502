//! Log Addressing
//!
//! The shared log is positional: an external sequencer hands out 64-bit
//! addresses, and the log unit stores whatever arrives at them. Every
//! address lives in one of two keyspaces:
//!
//! - the **global log** (`stream == None`)
//! - a **per-stream log** (`stream == Some(id)`), one address space per
//!   stream
//!
//! [`LogAddress`] is the cache key for the whole unit, so it is `Eq + Hash`
//! and ordered by address first (the GC sweep walks keys in ascending
//! address order).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 128-bit opaque stream identifier.
///
/// The log unit never interprets it; streams are named by the client
/// protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(Uuid);

impl StreamId {
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// The 16-byte big-endian form used by the record encoding.
    pub const fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for StreamId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// A position in the shared log: an address plus the keyspace it belongs
/// to.
///
/// Two `LogAddress`es are equal iff both components are equal; address 7 of
/// stream X and global address 7 are distinct entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogAddress {
    /// 64-bit position assigned by the sequencer.
    pub address: u64,

    /// `None` for the global log, `Some` for a per-stream log.
    pub stream: Option<StreamId>,
}

impl LogAddress {
    pub const fn global(address: u64) -> Self {
        Self {
            address,
            stream: None,
        }
    }

    pub const fn stream(address: u64, stream: StreamId) -> Self {
        Self {
            address,
            stream: Some(stream),
        }
    }
}

impl fmt::Display for LogAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stream {
            Some(stream) => write!(f, "{}@{}", self.address, stream),
            None => write!(f, "{}@global", self.address),
        }
    }
}
