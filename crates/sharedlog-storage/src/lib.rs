//! Storage engine for the sharedlog log unit.
//!
//! One replica's durable storage for a distributed shared log. Callers
//! hand it positional writes at 64-bit addresses (global or per-stream);
//! it persists them through a write-through, size-bounded cache onto
//! append-only segment files, serves positional reads, and garbage
//! collects cache entries whose streams are trimmed past their address.
//!
//! ## Data flow
//!
//! ```text
//! write ──► DataCache ──► LogRegistry ──► SegmentLog ──► segment files
//!               │              │              (or MemoryLog)
//! read  ◄───────┘ (hit, or load-through via the registry)
//!
//! trim  ──► TrimMap ◄── GcTask (background sweep, invalidates DataCache)
//! ```
//!
//! ## Guarantees
//!
//! - **At most one durable record per address**: racing writes are
//!   serialized per key; the first reaches the segment, the rest fail
//!   with an overwrite error.
//! - **Crash-consistent append**: a record becomes visible only after its
//!   body is synced and its WRITTEN flag is synced; anything less is a
//!   torn write, invisible after recovery, and the address stays
//!   writable.
//! - **Bounded cache**: the sum of entry weights never exceeds the
//!   configured cap; eviction releases payload buffer references.
//! - **GC safety**: an entry leaves the cache early only when every
//!   stream it belongs to is trimmed at or past its address.

pub mod cache;
pub mod config;
pub mod error;
pub mod gc;
pub mod memory;
pub mod registry;
pub mod segment;
pub mod segment_log;
pub mod trim;

pub use cache::DataCache;
pub use config::LogUnitConfig;
pub use error::{Error, Result};
pub use gc::GcTask;
pub use memory::MemoryLog;
pub use registry::LogRegistry;
pub use segment_log::{LogStore, SegmentLog};
pub use trim::TrimMap;
