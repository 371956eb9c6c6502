//! Reference-Counted Payload Buffers
//!
//! Payloads enter the log unit inside transport-owned buffers whose
//! lifetime is managed by an explicit reference count, not by scope. A
//! [`RefBuf`] carries that protocol into this codebase:
//!
//! - a buffer is created with one reference, owned by whoever built it
//! - every long-lived holder (the data cache, the in-memory log) takes its
//!   own reference with [`RefBuf::retain`]
//! - each holder calls [`RefBuf::release`] exactly once, on whichever of
//!   eviction, trim, or shutdown fires first
//!
//! The count is bookkeeping for the ownership protocol: the bytes
//! themselves are shared `bytes::Bytes` and are freed when the last handle
//! drops. What the count buys is detection — a release on a dead buffer is
//! a protocol violation and is logged rather than ignored, and tests can
//! assert that evict/trim/shutdown paths balance their references.

use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::error;

#[derive(Debug)]
struct Shared {
    data: Bytes,
    refs: AtomicUsize,
}

/// An explicitly reference-counted byte buffer.
///
/// Cloning a `RefBuf` yields another handle to the same buffer and count;
/// it does NOT take a reference. Use [`RefBuf::retain`] when a component
/// assumes ownership.
#[derive(Debug, Clone)]
pub struct RefBuf {
    shared: Arc<Shared>,
}

impl RefBuf {
    /// Wrap `data` with an initial reference count of one, owned by the
    /// caller.
    pub fn new(data: Bytes) -> Self {
        Self {
            shared: Arc::new(Shared {
                data,
                refs: AtomicUsize::new(1),
            }),
        }
    }

    /// Take an additional reference and return a handle for the new owner.
    pub fn retain(&self) -> RefBuf {
        self.shared.refs.fetch_add(1, Ordering::AcqRel);
        self.clone()
    }

    /// Drop one reference. Returns the count remaining after the release.
    ///
    /// Releasing a buffer whose count is already zero is a protocol
    /// violation; it is logged and the count stays at zero.
    pub fn release(&self) -> usize {
        let mut current = self.shared.refs.load(Ordering::Acquire);
        loop {
            if current == 0 {
                error!("release of a payload buffer with no outstanding references");
                return 0;
            }
            match self.shared.refs.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return current - 1,
                Err(observed) => current = observed,
            }
        }
    }

    /// Outstanding protocol references.
    pub fn ref_count(&self) -> usize {
        self.shared.refs.load(Ordering::Acquire)
    }

    /// The underlying bytes. Valid for as long as the handle is held,
    /// independent of the protocol count.
    pub fn as_bytes(&self) -> &Bytes {
        &self.shared.data
    }

    pub fn len(&self) -> usize {
        self.shared.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.data.is_empty()
    }
}

impl From<Bytes> for RefBuf {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

impl From<Vec<u8>> for RefBuf {
    fn from(data: Vec<u8>) -> Self {
        Self::new(Bytes::from(data))
    }
}

impl From<&'static str> for RefBuf {
    fn from(data: &'static str) -> Self {
        Self::new(Bytes::from_static(data.as_bytes()))
    }
}

impl PartialEq for RefBuf {
    fn eq(&self, other: &Self) -> bool {
        self.shared.data == other.shared.data
    }
}

impl Eq for RefBuf {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_has_one_reference() {
        let buf = RefBuf::from("payload");
        assert_eq!(buf.ref_count(), 1);
        assert_eq!(buf.as_bytes(), &Bytes::from("payload"));
    }

    #[test]
    fn test_retain_release_balance() {
        let buf = RefBuf::from("payload");
        let held = buf.retain();
        assert_eq!(buf.ref_count(), 2);

        assert_eq!(held.release(), 1);
        assert_eq!(buf.release(), 0);
        assert_eq!(buf.ref_count(), 0);
    }

    #[test]
    fn test_clone_does_not_take_a_reference() {
        let buf = RefBuf::from("payload");
        let view = buf.clone();
        assert_eq!(buf.ref_count(), 1);
        assert_eq!(view.ref_count(), 1);
        // Both handles see the same count.
        view.retain();
        assert_eq!(buf.ref_count(), 2);
        view.release();
        buf.release();
    }

    #[test]
    fn test_release_underflow_is_clamped() {
        let buf = RefBuf::from("payload");
        assert_eq!(buf.release(), 0);
        // Double release must not wrap.
        assert_eq!(buf.release(), 0);
        assert_eq!(buf.ref_count(), 0);
    }

    #[test]
    fn test_bytes_remain_readable_while_handle_held() {
        let buf = RefBuf::from(vec![1u8, 2, 3]);
        buf.release();
        // Protocol count is zero, but the handle still pins the memory.
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_empty_buffer() {
        let buf = RefBuf::new(Bytes::new());
        assert!(buf.is_empty());
        assert_eq!(buf.len(), 0);
    }
}
