//! Request and Response Types
//!
//! The log unit's control surface as a discriminated union. The transport
//! collaborator owns the wire encoding and connection handling; it decodes
//! frames into [`LogUnitRequest`] values, validates the epoch, and hands
//! them to [`crate::LogUnitServer::handle`], which dispatches on the tag.
//! Every request kind maps to exactly one handler arm; there is no
//! runtime handler registration.

use sharedlog_core::{LogData, StreamId};
use std::collections::BTreeMap;

/// A control message addressed to the log unit. Epoch validation has
/// already happened by the time one of these is constructed.
#[derive(Debug)]
pub enum LogUnitRequest {
    /// Write `data` at a global address.
    Write { address: u64, data: LogData },

    /// Write `data` at one address in each named stream.
    ReplexWrite {
        stream_addresses: BTreeMap<StreamId, u64>,
        data: LogData,
    },

    /// Read the inclusive address range `[start, end]` of one keyspace.
    Read {
        stream: Option<StreamId>,
        start: u64,
        end: u64,
    },

    /// Set or clear the commit bit on stored entries.
    Commit { target: CommitTarget, commit: bool },

    /// Mark an address as deliberately skipped.
    FillHole {
        stream: Option<StreamId>,
        address: u64,
    },

    /// Raise a stream's trim mark.
    Trim { stream: StreamId, prefix: u64 },

    /// Wake the garbage collector immediately.
    ForceGc,

    /// Change the garbage collection period.
    SetGcInterval { millis: u64 },
}

/// Where a commit request lands.
#[derive(Debug)]
pub enum CommitTarget {
    Global { address: u64 },
    Streams(BTreeMap<StreamId, u64>),
}

/// The log unit's answer to one request.
#[derive(Debug)]
pub enum LogUnitResponse {
    WriteOk,

    /// The address already holds a durable record; it remains
    /// authoritative.
    OverwriteError,

    /// A multi-stream write hit an occupied address. Per-stream writes
    /// that succeeded before the collision remain durable; callers must
    /// treat partial success as possible.
    ReplexOverwriteError,

    Read(ReadResponse),

    /// A record failed validation (magic, sizes, or checksum). The
    /// affected segment is read-only until operator action.
    DataCorruptionError,

    Ack,

    /// Commit target holds nothing.
    NoEntryError,

    /// A storage failure outside the protocol taxonomy (I/O, shutdown).
    ServerError { message: String },
}

/// Entries for every address in a read range. Addresses never written
/// answer with an `Empty` entry, filled holes with a `Hole` entry.
///
/// Entries are non-owning views; the cache's retained buffer references
/// keep the payloads alive.
#[derive(Debug, Default)]
pub struct ReadResponse {
    pub entries: BTreeMap<u64, LogData>,
}

impl ReadResponse {
    pub fn entry(&self, address: u64) -> Option<&LogData> {
        self.entries.get(&address)
    }
}
