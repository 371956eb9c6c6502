//! Error types for the core data model.
//!
//! Decode errors surface when an on-disk tag byte does not map to a known
//! enum variant. All functions in this crate return `Result<T>` aliased to
//! `Result<T, Error>` so callers can propagate with `?`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid entry type tag: {0}")]
    InvalidEntryType(u8),

    #[error("invalid metadata key tag: {0}")]
    InvalidMetaKey(u8),
}

pub type Result<T> = std::result::Result<T, Error>;
