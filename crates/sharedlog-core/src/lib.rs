//! Core types for the sharedlog log unit.
//!
//! This crate defines the data model shared by the storage engine and the
//! request layer:
//!
//! - [`StreamId`] / [`LogAddress`]: the 64-bit positional keyspace, global
//!   or per-stream
//! - [`LogData`]: a log entry (data, hole, empty, or trimmed) with its
//!   stream placements, backpointers, and metadata
//! - [`RefBuf`]: an explicitly reference-counted payload buffer; every
//!   holder (the cache, the in-memory log) owns exactly one reference and
//!   releases it exactly once
//!
//! The log unit never interprets payload bytes; payloads travel as opaque
//! [`bytes::Bytes`] behind the refcount protocol.

pub mod address;
pub mod buffer;
pub mod entry;
pub mod error;

pub use address::{LogAddress, StreamId};
pub use buffer::RefBuf;
pub use entry::{EntryType, LogData, MetaKey, MetadataValue};
pub use error::{Error, Result};
