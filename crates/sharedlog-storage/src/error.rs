//! Storage Error Types
//!
//! ## Error Categories
//!
//! ### Write errors
//! - `Overwrite`: the address already holds a durable record; the first
//!   record stays authoritative and the caller retries at a new address
//! - `SegmentLimit`: a record would push the segment file past its size
//!   ceiling
//!
//! ### Corruption errors
//! - `InvalidMagic`: a record header does not start with the `LE` magic
//! - `InvalidRecord`: header fields are impossible (sizes, truncation)
//! - `CrcMismatch`: record body failed checksum verification
//!
//! A corruption error latches the affected segment read-only; subsequent
//! writes to it fail with `SegmentReadOnly` until operator action.
//!
//! All storage operations return `Result<T>` aliased to
//! `Result<T, Error>` for clean `?` propagation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("address {address} already written")]
    Overwrite { address: u64 },

    #[error("bad record magic at file offset {offset}")]
    InvalidMagic { offset: u64 },

    #[error("invalid record at file offset {offset}: {reason}")]
    InvalidRecord { offset: u64, reason: String },

    #[error("checksum mismatch reading address {address}")]
    CrcMismatch { address: u64 },

    #[error("record at address {address} would exceed the segment size limit ({limit} bytes)")]
    SegmentLimit { address: u64, limit: u64 },

    #[error("segment starting at {base} is read-only after a corruption error")]
    SegmentReadOnly { base: u64 },

    #[error("invalid record body: {0}")]
    Decode(#[from] sharedlog_core::Error),
}

impl Error {
    /// True for errors that indicate on-disk corruption. Handlers map
    /// these to a data-corruption response.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::InvalidMagic { .. }
                | Error::InvalidRecord { .. }
                | Error::CrcMismatch { .. }
                | Error::Decode(_)
        )
    }

    pub fn is_overwrite(&self) -> bool {
        matches!(self, Error::Overwrite { .. })
    }
}
