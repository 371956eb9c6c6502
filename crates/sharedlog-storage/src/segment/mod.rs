//! Segment Files
//!
//! A segment is an append-only file holding a fixed window of 10,000
//! addresses; the file name is the window's decimal starting address plus
//! `.log`. Records inside a segment are laid out in append order, which
//! need not match address order.
//!
//! ## Record Format
//!
//! Every record is a 24-byte header followed by the entry body,
//! little-endian throughout:
//!
//! ```text
//! ┌───────┬────────────┬────────────┬───────────┬────────────────┬───────────┐
//! │ 'L''E'│ FLAGS (u16)│ ADDR (u64) │ SIZE (u32)│ META_SIZE (u32)│ CRC (u32) │
//! └───────┴────────────┴────────────┴───────────┴────────────────┴───────────┘
//! ┌──────────────────────┬────────────────────────────┐
//! │ META (META_SIZE)     │ PAYLOAD (SIZE − META_SIZE) │
//! └──────────────────────┴────────────────────────────┘
//! ```
//!
//! FLAGS bit 0 is WRITTEN. An append writes the header with WRITTEN clear,
//! writes the body, syncs, then sets WRITTEN and syncs again. A record
//! found with WRITTEN clear is a torn write: recovery rewinds the tail to
//! its start and the address stays writable.

pub mod file;
pub mod format;

pub use file::OpenSegment;

/// Record header magic.
pub const RECORD_MAGIC: [u8; 2] = *b"LE";

/// Header length in bytes.
pub const HEADER_SIZE: usize = 24;

/// FLAGS bit 0: set last, after the record body is durable.
pub const FLAG_WRITTEN: u16 = 0x1;

/// Addresses per segment file.
pub const ENTRIES_PER_SEGMENT: u64 = 10_000;

/// Default segment file size ceiling.
pub const DEFAULT_MAX_FILE_BYTES: u64 = (i32::MAX >> 4) as u64;

/// Segment file size ceiling in quickcheck test mode, for filesystems
/// where sparse files are expensive.
pub const QUICKCHECK_MAX_FILE_BYTES: u64 = 4_000_000;

/// Starting address of the segment window containing `address`.
pub fn segment_base(address: u64) -> u64 {
    (address / ENTRIES_PER_SEGMENT) * ENTRIES_PER_SEGMENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_base() {
        assert_eq!(segment_base(0), 0);
        assert_eq!(segment_base(9_999), 0);
        assert_eq!(segment_base(10_000), 10_000);
        assert_eq!(segment_base(25_000), 20_000);
        assert_eq!(segment_base(u64::MAX), u64::MAX / 10_000 * 10_000);
    }
}
