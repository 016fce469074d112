use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

#[cfg(not(feature = "loom"))]
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

#[cfg(feature = "loom")]
use loom::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use crate::backoff::Backoff;
use crate::error::{DboError, Result};
use crate::invariants::{
    debug_assert_bounded_readers, debug_assert_no_readers_on_commit,
    debug_assert_readers_nonnegative, debug_assert_write_excludes_last_written,
};

/// Pads a value to a 128-byte boundary so adjacent atomics never share a
/// cache line. Most x86/ARM cores prefetch a pair of 64-byte lines together,
/// so 128 bytes rather than 64 is used to stay ahead of that.
#[repr(align(128))]
pub(crate) struct CacheAligned<T>(pub T);

impl<T> Deref for CacheAligned<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for CacheAligned<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

struct Slot {
    /// Number of readers currently holding a [`ReadGuard`] on this slot.
    readers: CacheAligned<AtomicU32>,
    /// Index (0 or 1) of the bank currently exposed to readers.
    committed_bank: CacheAligned<AtomicBool>,
    /// Two banks of `slot_size` bytes each, laid out back to back.
    banks: UnsafeCell<Box<[u8]>>,
}

// SAFETY: all access to `banks` is mediated by `readers`/`committed_bank` and
// the single-writer discipline documented on `Dbo`; see `get_write_slot`,
// `WriteGuard`, and `ReadGuard`.
unsafe impl Sync for Slot {}

/// A lock-free, single-writer/multi-reader double-buffer slot array.
///
/// `Dbo` is the base register abstraction of the real-time data plane: each
/// slot holds two banks, one committed (readable) and one free for the next
/// write. A writer claims a slot whose reader count is zero, writes into its
/// free bank, then commits by flipping the bank selector and publishing the
/// slot as `last_written`. Readers never block a writer and a writer never
/// blocks a reader; the only failure mode is [`DboError::NoWritableSlot`]
/// when every non-current slot is occupied by a reader, which callers must
/// avoid by sizing `n_slots` to exceed the maximum number of concurrent
/// readers.
pub struct Dbo {
    slot_size: usize,
    n_slots: usize,
    last_written: CacheAligned<AtomicUsize>,
    slots: Box<[Slot]>,
}

// SAFETY: `Dbo` is designed to be shared across threads under the
// single-writer/multi-reader discipline documented on the type; all mutation
// of slot contents goes through atomically-coordinated guards.
unsafe impl Send for Dbo {}
unsafe impl Sync for Dbo {}

impl Dbo {
    /// Creates a double buffer with `n_slots` slots of `slot_size` bytes
    /// each. Requires `n_slots >= 2` (a writer always needs at least one
    /// slot distinct from `last_written`) and `slot_size >= 1`.
    pub fn new(n_slots: usize, slot_size: usize) -> Result<Self> {
        if n_slots < 2 {
            return Err(DboError::BadArg("n_slots must be >= 2"));
        }
        if slot_size == 0 {
            return Err(DboError::BadArg("slot_size must be >= 1"));
        }

        let mut slots = Vec::with_capacity(n_slots);
        for _ in 0..n_slots {
            slots.push(Slot {
                readers: CacheAligned(AtomicU32::new(0)),
                committed_bank: CacheAligned(AtomicBool::new(false)),
                banks: UnsafeCell::new(vec![0u8; 2 * slot_size].into_boxed_slice()),
            });
        }

        Ok(Self {
            slot_size,
            n_slots,
            last_written: CacheAligned(AtomicUsize::new(0)),
            slots: slots.into_boxed_slice(),
        })
    }

    /// Number of slots.
    #[inline]
    pub fn n_slots(&self) -> usize {
        self.n_slots
    }

    /// Bytes per bank.
    #[inline]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Index of the most recently committed slot.
    #[inline]
    pub fn last_written(&self) -> usize {
        self.last_written.load(Ordering::Acquire)
    }

    /// Scans for a slot distinct from `last_written` whose reader count is
    /// currently zero, starting just after `last_written` so successive
    /// writes rotate through the array rather than reusing one slot.
    pub fn get_write_slot(&self) -> Result<WriteGuard<'_>> {
        let last = self.last_written.load(Ordering::Acquire);
        for step in 1..self.n_slots {
            let candidate = (last + step) % self.n_slots;
            debug_assert_write_excludes_last_written!(candidate, last);
            let slot = &self.slots[candidate];
            if slot.readers.load(Ordering::Acquire) == 0 {
                let write_bank = !slot.committed_bank.load(Ordering::Acquire);
                return Ok(WriteGuard {
                    dbo: self,
                    slot: candidate,
                    write_bank,
                });
            }
        }
        Err(DboError::NoWritableSlot)
    }

    /// Acquires a read reference to the currently committed slot, retrying
    /// the load-then-increment race against a concurrent commit with an
    /// adaptive backoff rather than blocking.
    pub fn get_read_slot(&self) -> ReadGuard<'_> {
        let mut backoff = Backoff::new();
        loop {
            let candidate = self.last_written.load(Ordering::Acquire);
            let slot = &self.slots[candidate];
            let prev = slot.readers.fetch_add(1, Ordering::Acquire);
            debug_assert_bounded_readers!(prev + 1, self.n_slots as u32);

            // If last_written hasn't moved since we sampled it, our
            // increment protected the bank we actually intend to read.
            if self.last_written.load(Ordering::Acquire) == candidate {
                return ReadGuard {
                    dbo: self,
                    slot: candidate,
                };
            }

            // A commit raced us; back off and retry against the new slot.
            slot.readers.fetch_sub(1, Ordering::Release);
            backoff.snooze();
        }
    }

    /// Claims a specific slot by index rather than scanning for one. Used by
    /// layers that assign physical slots themselves (e.g. a message box
    /// mapping event sequence numbers onto slots via modulo arithmetic).
    /// Fails with [`DboError::NoWritableSlot`] if the slot currently has any
    /// readers.
    pub fn write_slot(&self, id: usize) -> Result<WriteGuard<'_>> {
        if id >= self.n_slots {
            return Err(DboError::BadArg("slot id out of range"));
        }
        let slot = &self.slots[id];
        if slot.readers.load(Ordering::Acquire) != 0 {
            return Err(DboError::NoWritableSlot);
        }
        let write_bank = !slot.committed_bank.load(Ordering::Acquire);
        Ok(WriteGuard {
            dbo: self,
            slot: id,
            write_bank,
        })
    }

    /// Acquires a read reference to a specific slot by index rather than
    /// the current `last_written`. Counterpart to [`Dbo::write_slot`].
    pub fn read_slot(&self, id: usize) -> Result<ReadGuard<'_>> {
        if id >= self.n_slots {
            return Err(DboError::BadArg("slot id out of range"));
        }
        let slot = &self.slots[id];
        let prev = slot.readers.fetch_add(1, Ordering::Acquire);
        debug_assert_bounded_readers!(prev + 1, self.n_slots as u32);
        Ok(ReadGuard { dbo: self, slot: id })
    }

    fn bank_slice(&self, slot: usize, bank: bool) -> &[u8] {
        // SAFETY: the bank we read is the one protected by either a live
        // `ReadGuard` (committed bank, guaranteed stable by the reader
        // count) or a live `WriteGuard` (the other, writer-exclusive bank).
        let banks = unsafe { &*self.slots[slot].banks.get() };
        let start = usize::from(bank) * self.slot_size;
        &banks[start..start + self.slot_size]
    }

    #[allow(clippy::mut_from_ref)]
    fn bank_slice_mut(&self, slot: usize, bank: bool) -> &mut [u8] {
        // SAFETY: see `bank_slice`; only a `WriteGuard` calls this, and only
        // for its own exclusive bank.
        let banks = unsafe { &mut *self.slots[slot].banks.get() };
        let start = usize::from(bank) * self.slot_size;
        &mut banks[start..start + self.slot_size]
    }
}

/// A scoped write session over one slot's free bank.
///
/// Dropping the guard without calling [`WriteGuard::commit`] discards the
/// write: because acquiring a write slot never mutates shared state (it only
/// scans reader counts), there is nothing to release on an early return or a
/// panic unwind — the slot simply stays available for the next write
/// attempt.
pub struct WriteGuard<'a> {
    dbo: &'a Dbo,
    slot: usize,
    write_bank: bool,
}

impl<'a> WriteGuard<'a> {
    /// The slot this guard will commit into.
    #[inline]
    pub fn slot_id(&self) -> usize {
        self.slot
    }

    /// Mutable view of the free bank.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.dbo.bank_slice_mut(self.slot, self.write_bank)
    }

    /// Zeroes the free bank.
    pub fn erase(&mut self) {
        self.as_mut_slice().fill(0);
    }

    /// Copies `len` bytes starting at 0 from the currently committed bank of
    /// `last_written` into this guard's free bank. Used to preserve a prefix
    /// that a partial write does not overwrite.
    pub fn copy_prefix_from_last_written(&mut self, len: usize) {
        self.copy_range_from_last_written(0, len);
    }

    /// Copies the `[from, slot_size)` suffix from the currently committed
    /// bank of `last_written` into this guard's free bank.
    pub fn copy_suffix_from_last_written(&mut self, from: usize) {
        let slot_size = self.dbo.slot_size;
        self.copy_range_from_last_written(from, slot_size);
    }

    fn copy_range_from_last_written(&mut self, start: usize, end: usize) {
        if start >= end {
            return;
        }
        let last = self.dbo.last_written.load(Ordering::Acquire);
        let last_bank = self.dbo.slots[last].committed_bank.load(Ordering::Acquire);
        let src = self.dbo.bank_slice(last, last_bank);
        let dst = self.dbo.bank_slice_mut(self.slot, self.write_bank);
        dst[start..end].copy_from_slice(&src[start..end]);
    }

    /// Writes `bytes` at `offset` into the free bank, optionally preserving
    /// the prefix and/or suffix from the previously committed slot, then
    /// commits. Mirrors the partial-write contract of the double buffer:
    /// a write never has to supply a whole slot's worth of bytes.
    pub fn write_partial(
        mut self,
        offset: usize,
        bytes: &[u8],
        keep_prefix: bool,
        keep_suffix: bool,
    ) -> Result<usize> {
        let slot_size = self.dbo.slot_size;
        if offset.checked_add(bytes.len()).is_none() || offset + bytes.len() > slot_size {
            return Err(DboError::OutOfRange {
                offset,
                len: bytes.len(),
                slot_size,
            });
        }
        if keep_prefix {
            self.copy_prefix_from_last_written(offset);
        }
        if keep_suffix {
            self.copy_suffix_from_last_written(offset + bytes.len());
        }
        self.as_mut_slice()[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(self.commit())
    }

    /// Flips the bank selector and publishes this slot as `last_written`.
    /// Returns the committed slot id.
    pub fn commit(self) -> usize {
        let slot = &self.dbo.slots[self.slot];
        debug_assert_no_readers_on_commit!(self.slot, slot.readers.load(Ordering::Acquire));
        slot.committed_bank.store(self.write_bank, Ordering::Release);
        self.dbo.last_written.store(self.slot, Ordering::Release);
        self.slot
    }
}

/// A scoped read session over the currently committed bank of one slot.
///
/// The reader count is decremented on drop, so an early return or panic
/// unwind between [`Dbo::get_read_slot`] and the end of the read always
/// releases the slot.
pub struct ReadGuard<'a> {
    dbo: &'a Dbo,
    slot: usize,
}

impl<'a> ReadGuard<'a> {
    /// The slot this guard is reading.
    #[inline]
    pub fn slot_id(&self) -> usize {
        self.slot
    }

    /// Immutable view of the committed bank.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        let bank = self.dbo.slots[self.slot]
            .committed_bank
            .load(Ordering::Acquire);
        self.dbo.bank_slice(self.slot, bank)
    }

    /// Copies `out.len()` bytes starting at `offset` into `out`.
    pub fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        let data = self.as_slice();
        if offset + out.len() > data.len() {
            return Err(DboError::OutOfRange {
                offset,
                len: out.len(),
                slot_size: data.len(),
            });
        }
        out.copy_from_slice(&data[offset..offset + out.len()]);
        Ok(())
    }
}

impl<'a> Drop for ReadGuard<'a> {
    fn drop(&mut self) {
        let prev = self.dbo.slots[self.slot]
            .readers
            .fetch_sub(1, Ordering::Release);
        debug_assert_readers_nonnegative!(prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_undersized_construction() {
        assert!(Dbo::new(1, 16).is_err());
        assert!(Dbo::new(4, 0).is_err());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dbo = Dbo::new(4, 8).unwrap();
        let mut w = dbo.get_write_slot().unwrap();
        w.as_mut_slice()[0..5].copy_from_slice(b"hello");
        let committed = w.commit();
        assert_eq!(dbo.last_written(), committed);

        let r = dbo.get_read_slot();
        assert_eq!(&r.as_slice()[0..5], b"hello");
    }

    #[test]
    fn write_partial_preserves_prefix_and_suffix() {
        let dbo = Dbo::new(3, 8).unwrap();
        let w = dbo.get_write_slot().unwrap();
        w.write_partial(0, b"AAAAAAAA", false, false).unwrap();

        let w2 = dbo.get_write_slot().unwrap();
        w2.write_partial(2, b"BB", true, true).unwrap();

        let r = dbo.get_read_slot();
        assert_eq!(r.as_slice(), b"AABBAAAA");
    }

    #[test]
    fn write_partial_rejects_out_of_range() {
        let dbo = Dbo::new(3, 4).unwrap();
        let w = dbo.get_write_slot().unwrap();
        let err = w.write_partial(2, b"abc", false, false).unwrap_err();
        assert_eq!(
            err,
            DboError::OutOfRange {
                offset: 2,
                len: 3,
                slot_size: 4
            }
        );
    }

    #[test]
    fn no_writable_slot_when_straggler_reader_holds_the_only_other_slot() {
        // n_slots = 2: a reader that started before the last commit can
        // still be holding the slot that a second write now needs.
        let dbo = Dbo::new(2, 4).unwrap();
        let w = dbo.get_write_slot().unwrap();
        let first = w.commit();
        assert_eq!(first, dbo.last_written());

        // Straggler starts reading the current slot...
        let straggler = dbo.get_read_slot();

        // ...a second write rotates last_written to the other slot...
        let w2 = dbo.get_write_slot().unwrap();
        w2.commit();

        // ...so a third write needs the slot the straggler is still on.
        let err = dbo.get_write_slot().unwrap_err();
        assert_eq!(err, DboError::NoWritableSlot);

        drop(straggler);
        let w3 = dbo.get_write_slot().unwrap();
        w3.commit();
    }

    #[test]
    fn dropping_a_write_guard_without_commit_leaves_last_written_unchanged() {
        let dbo = Dbo::new(3, 4).unwrap();
        let w0 = dbo.get_write_slot().unwrap();
        let first = w0.commit();

        {
            let mut w1 = dbo.get_write_slot().unwrap();
            w1.as_mut_slice().fill(0xFF);
            // dropped without commit
        }
        assert_eq!(dbo.last_written(), first);

        // The slot is still usable for a fresh write afterward.
        let w2 = dbo.get_write_slot().unwrap();
        let second = w2.commit();
        assert_ne!(second, first);
    }

    #[test]
    fn concurrent_writer_and_readers_never_observe_torn_writes() {
        use std::sync::Arc;
        use std::thread;

        let dbo = Arc::new(Dbo::new(4, 8).unwrap());
        {
            let w = dbo.get_write_slot().unwrap();
            let mut w = w;
            w.as_mut_slice().copy_from_slice(&[0xAA; 8]);
            w.commit();
        }

        let writer_dbo = Arc::clone(&dbo);
        let writer = thread::spawn(move || {
            for i in 0..2000u8 {
                let byte = if i % 2 == 0 { 0xAA } else { 0xBB };
                loop {
                    if let Ok(mut w) = writer_dbo.get_write_slot() {
                        w.as_mut_slice().copy_from_slice(&[byte; 8]);
                        w.commit();
                        break;
                    }
                    std::thread::yield_now();
                }
            }
        });

        let mut readers = Vec::new();
        for _ in 0..3 {
            let reader_dbo = Arc::clone(&dbo);
            readers.push(thread::spawn(move || {
                for _ in 0..2000 {
                    let r = reader_dbo.get_read_slot();
                    let data = r.as_slice();
                    let first = data[0];
                    assert!(first == 0xAA || first == 0xBB);
                    assert!(data.iter().all(|&b| b == first), "torn write observed");
                }
            }));
        }

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
