use thiserror::Error;

/// Errors produced by [`crate::Dbo`] operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DboError {
    /// A constructor argument was zero or otherwise out of range.
    #[error("bad argument: {0}")]
    BadArg(&'static str),

    /// No slot other than the currently committed one has a zero reader count.
    ///
    /// Transient: the caller should retry once any in-flight reader releases.
    #[error("no writable slot available (all other slots are being read)")]
    NoWritableSlot,

    /// A write targeted a range outside `[0, slot_size)`.
    #[error("write of {len} bytes at offset {offset} exceeds slot size {slot_size}")]
    OutOfRange {
        offset: usize,
        len: usize,
        slot_size: usize,
    },

    /// A reader count would have exceeded `n_slots - 1`, or a commit observed
    /// a nonzero reader count on the slot being committed. Indicates the
    /// single-writer / bounded-reader discipline was violated by the caller.
    #[error("double-buffer protocol violation")]
    Violation,
}

pub type Result<T> = std::result::Result<T, DboError>;
