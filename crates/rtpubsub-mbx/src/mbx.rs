use std::sync::atomic::{AtomicU64, Ordering};

use rtpubsub_dbo::{Dbo, ReadGuard, WriteGuard};

use crate::error::{MbxError, Result};
use crate::invariants::debug_assert_cursor_monotonic;

/// Bytes reserved at the front of every slot for the event header
/// (`seq: u64` followed by `len: u32`).
const HEADER_LEN: usize = 12;

fn encode_header(buf: &mut [u8], seq: u64, len: u32) {
    buf[0..8].copy_from_slice(&seq.to_ne_bytes());
    buf[8..12].copy_from_slice(&len.to_ne_bytes());
}

fn decode_header(buf: &[u8]) -> (u64, u32) {
    let seq = u64::from_ne_bytes(buf[0..8].try_into().unwrap());
    let len = u32::from_ne_bytes(buf[8..12].try_into().unwrap());
    (seq, len)
}

/// Read discipline applied by [`Mbx::pop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopMode {
    /// Strict FIFO: returns `read_cursor + 1`, or the oldest event still
    /// held if that one has already been overwritten. Advances the cursor
    /// by exactly one event per call.
    Normal,
    /// Returns the newest event if the client hasn't already seen it,
    /// discarding any intermediate events from that client's perspective.
    NewLatest,
    /// Returns the newest event unconditionally without advancing the
    /// read cursor; repeated calls with no intervening push return the
    /// same event.
    Latest,
}

struct ClientCursor {
    read_cursor: AtomicU64,
}

/// A bounded multi-event queue with per-client read cursors, backed by a
/// [`Dbo`] with one slot per event. The writer rotates through slots by
/// `seq % max_events`; each client tracks its own progress independently,
/// so a slow client never blocks a fast one and vice versa.
pub struct Mbx {
    dbo: Dbo,
    max_events: u64,
    max_payload: usize,
    write_cursor: AtomicU64,
    clients: Box<[ClientCursor]>,
}

impl Mbx {
    /// Creates a message box for up to `max_clients` independent readers,
    /// holding up to `max_events` pending events of at most `max_payload`
    /// bytes each.
    pub fn new(max_clients: usize, max_events: usize, max_payload: usize) -> Result<Self> {
        if max_clients == 0 {
            return Err(MbxError::BadArg("max_clients must be >= 1"));
        }
        if max_events < 2 {
            return Err(MbxError::BadArg("max_events must be >= 2"));
        }
        if max_payload == 0 {
            return Err(MbxError::BadArg("max_payload must be >= 1"));
        }

        let dbo = Dbo::new(max_events, HEADER_LEN + max_payload)
            .map_err(|_| MbxError::BadArg("invalid dbo sizing"))?;
        let clients = (0..max_clients)
            .map(|_| ClientCursor {
                read_cursor: AtomicU64::new(0),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            dbo,
            max_events: max_events as u64,
            max_payload,
            write_cursor: AtomicU64::new(0),
            clients,
        })
    }

    #[inline]
    pub fn max_clients(&self) -> usize {
        self.clients.len()
    }

    #[inline]
    pub fn max_events(&self) -> u64 {
        self.max_events
    }

    #[inline]
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn check_client(&self, client: usize) -> Result<()> {
        if client >= self.clients.len() {
            return Err(MbxError::BadClient {
                id: client,
                max_clients: self.clients.len(),
            });
        }
        Ok(())
    }

    /// Pushes one event. Single-writer: concurrent calls from more than one
    /// thread are not supported, matching the double buffer beneath.
    pub fn push(&self, bytes: &[u8]) -> Result<u64> {
        let mut session = self.push_begin(bytes.len())?;
        session.as_mut_slice()[..bytes.len()].copy_from_slice(bytes);
        Ok(session.commit())
    }

    /// Opens a zero-copy write session for an event of up to `len` bytes.
    /// The session must be committed with [`WriteSession::commit`]; dropping
    /// it without committing abandons the write, matching the underlying
    /// [`WriteGuard`].
    pub fn push_begin(&self, len: usize) -> Result<WriteSession<'_>> {
        if len > self.max_payload {
            return Err(MbxError::Overflow {
                max_payload: self.max_payload,
                got: len,
            });
        }
        let next_seq = self.write_cursor.load(Ordering::Acquire) + 1;
        let idx = ((next_seq - 1) % self.max_events) as usize;
        let guard = self.dbo.write_slot(idx)?;
        Ok(WriteSession {
            mbx: self,
            guard,
            seq: next_seq,
            len,
        })
    }

    /// Oldest sequence number still guaranteed present, given the writer
    /// has advanced to `write_cursor`.
    fn oldest_available(&self, write_cursor: u64) -> u64 {
        if write_cursor > self.max_events {
            write_cursor - self.max_events + 1
        } else if write_cursor == 0 {
            0
        } else {
            1
        }
    }

    /// Pops one event for `client` under `mode`. Returns [`MbxError::Empty`]
    /// when there is nothing new to deliver.
    pub fn pop(&self, client: usize, mode: PopMode) -> Result<PopGuard<'_>> {
        self.check_client(client)?;
        let cursor = &self.clients[client].read_cursor;

        let write_cursor = self.write_cursor.load(Ordering::Acquire);
        if write_cursor == 0 {
            return Err(MbxError::Empty);
        }

        let target = match mode {
            PopMode::Normal => {
                let rc = cursor.load(Ordering::Acquire);
                if rc >= write_cursor {
                    return Err(MbxError::Empty);
                }
                let oldest = self.oldest_available(write_cursor);
                (rc + 1).max(oldest)
            }
            PopMode::NewLatest => {
                let rc = cursor.load(Ordering::Acquire);
                if rc >= write_cursor {
                    return Err(MbxError::Empty);
                }
                write_cursor
            }
            PopMode::Latest => write_cursor,
        };

        let idx = ((target - 1) % self.max_events) as usize;
        let guard = self.dbo.read_slot(idx)?;
        let (delivered_seq, len) = decode_header(guard.as_slice());

        if mode != PopMode::Latest {
            let old = cursor.load(Ordering::Acquire);
            // `delivered_seq` may be ahead of `target` if the writer raced
            // ahead of us between sampling `write_cursor` and acquiring the
            // slot; advancing to the value actually observed keeps the
            // cursor consistent with what we hand back.
            debug_assert_cursor_monotonic!(client, old, delivered_seq);
            cursor.store(delivered_seq, Ordering::Release);
        }

        Ok(PopGuard {
            guard,
            seq: delivered_seq,
            len: len as usize,
        })
    }

    /// Number of events `client` has not yet observed, saturated at
    /// `max_events`.
    pub fn pending(&self, client: usize) -> Result<u64> {
        self.check_client(client)?;
        let write_cursor = self.write_cursor.load(Ordering::Acquire);
        let read_cursor = self.clients[client].read_cursor.load(Ordering::Acquire);
        let pending = write_cursor.saturating_sub(read_cursor).min(self.max_events);
        crate::invariants::debug_assert_pending_bounded!(pending, self.max_events);
        Ok(pending)
    }

    /// Resets all cursors to empty. Caller must ensure no pop or push is
    /// concurrently in flight; this does not free any memory.
    pub fn reset(&self) {
        self.write_cursor.store(0, Ordering::Release);
        for c in self.clients.iter() {
            c.read_cursor.store(0, Ordering::Release);
        }
    }
}

/// A scoped, zero-copy write session opened by [`Mbx::push_begin`].
pub struct WriteSession<'a> {
    mbx: &'a Mbx,
    guard: WriteGuard<'a>,
    seq: u64,
    len: usize,
}

impl<'a> WriteSession<'a> {
    /// Mutable view of the payload region (excludes the event header).
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.guard.as_mut_slice()[HEADER_LEN..]
    }

    /// Records the significant length of the payload written so far.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.mbx.max_payload);
    }

    /// Commits the event, making it visible to readers, and returns its
    /// assigned sequence number. The significant length defaults to the
    /// `len` passed to [`Mbx::push_begin`]; call [`WriteSession::set_len`]
    /// first to record a different actual length.
    pub fn commit(mut self) -> u64 {
        let seq = self.seq;
        let len = self.len as u32;
        encode_header(self.guard.as_mut_slice(), seq, len);
        self.guard.commit();
        self.mbx.write_cursor.store(seq, Ordering::Release);
        seq
    }
}

/// A scoped read reference to one delivered event.
pub struct PopGuard<'a> {
    guard: ReadGuard<'a>,
    seq: u64,
    len: usize,
}

impl<'a> PopGuard<'a> {
    /// Sequence number of the event actually delivered.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Payload bytes of the event.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.guard.as_slice()[HEADER_LEN..HEADER_LEN + self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_undersized_construction() {
        assert!(Mbx::new(0, 4, 8).is_err());
        assert!(Mbx::new(1, 1, 8).is_err());
        assert!(Mbx::new(1, 4, 0).is_err());
    }

    #[test]
    fn push_then_pop_normal_round_trips_exactly_once() {
        let mbx = Mbx::new(1, 4, 8).unwrap();
        mbx.push(b"hello").unwrap();
        let ev = mbx.pop(0, PopMode::Normal).unwrap();
        assert_eq!(ev.seq(), 1);
        assert_eq!(ev.bytes(), b"hello");
        drop(ev);
        assert!(matches!(mbx.pop(0, PopMode::Normal), Err(MbxError::Empty)));
    }

    #[test]
    fn overflow_is_rejected_before_touching_the_dbo() {
        let mbx = Mbx::new(1, 4, 4).unwrap();
        let err = mbx.push(b"too long").unwrap_err();
        assert_eq!(
            err,
            MbxError::Overflow {
                max_payload: 4,
                got: 8
            }
        );
        // write_cursor must not have advanced
        assert!(matches!(mbx.pop(0, PopMode::Normal), Err(MbxError::Empty)));
    }

    #[test]
    fn slow_reader_drop_keeps_only_the_newest_max_events() {
        // Scenario from the spec: max_events=2, one client, 4 pushes with no
        // intervening reads; the first two events are silently dropped.
        let mbx = Mbx::new(1, 2, 8).unwrap();
        mbx.push(b"e1").unwrap();
        mbx.push(b"e2").unwrap();
        mbx.push(b"e3").unwrap();
        mbx.push(b"e4").unwrap();

        let mut seqs = Vec::new();
        loop {
            match mbx.pop(0, PopMode::Normal) {
                Ok(ev) => seqs.push(ev.seq()),
                Err(MbxError::Empty) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(seqs, vec![3, 4]);
    }

    #[test]
    fn two_clients_each_read_all_events_in_order() {
        let mbx = Mbx::new(2, 16, 8).unwrap();
        for i in 0..10u8 {
            mbx.push(&[i]).unwrap();
        }
        for client in 0..2 {
            let mut seen = Vec::new();
            loop {
                match mbx.pop(client, PopMode::Normal) {
                    Ok(ev) => seen.push(ev.bytes()[0]),
                    Err(MbxError::Empty) => break,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            assert_eq!(seen, (0..10).collect::<Vec<_>>());
        }
    }

    #[test]
    fn latest_mode_never_advances_the_cursor() {
        let mbx = Mbx::new(1, 4, 8).unwrap();
        mbx.push(b"a").unwrap();
        let first = mbx.pop(0, PopMode::Latest).unwrap().seq();
        let second = mbx.pop(0, PopMode::Latest).unwrap().seq();
        assert_eq!(first, second);
        assert_eq!(first, 1);

        // Normal mode still sees the same event as unread.
        let normal = mbx.pop(0, PopMode::Normal).unwrap();
        assert_eq!(normal.seq(), 1);
    }

    #[test]
    fn new_latest_mode_skips_intermediate_events() {
        let mbx = Mbx::new(1, 8, 8).unwrap();
        for i in 0..5u8 {
            mbx.push(&[i]).unwrap();
        }
        let ev = mbx.pop(0, PopMode::NewLatest).unwrap();
        assert_eq!(ev.seq(), 5);
        drop(ev);
        assert!(matches!(
            mbx.pop(0, PopMode::NewLatest),
            Err(MbxError::Empty)
        ));
    }

    #[test]
    fn pending_count_reflects_unread_events_saturated_at_capacity() {
        let mbx = Mbx::new(1, 4, 8).unwrap();
        assert_eq!(mbx.pending(0).unwrap(), 0);
        for i in 0..10u8 {
            mbx.push(&[i]).unwrap();
        }
        assert_eq!(mbx.pending(0).unwrap(), 4);
        mbx.pop(0, PopMode::Normal).unwrap();
        assert_eq!(mbx.pending(0).unwrap(), 3);
    }

    #[test]
    fn bad_client_id_is_rejected() {
        let mbx = Mbx::new(2, 4, 8).unwrap();
        assert!(matches!(
            mbx.pop(5, PopMode::Normal),
            Err(MbxError::BadClient {
                id: 5,
                max_clients: 2
            })
        ));
    }

    #[test]
    fn zero_copy_write_session_round_trips() {
        let mbx = Mbx::new(1, 4, 16).unwrap();
        {
            let mut session = mbx.push_begin(5).unwrap();
            session.as_mut_slice()[..5].copy_from_slice(b"zcopy");
            session.commit();
        }
        let ev = mbx.pop(0, PopMode::Normal).unwrap();
        assert_eq!(ev.bytes(), b"zcopy");
    }

    #[test]
    fn reset_clears_all_cursors() {
        let mbx = Mbx::new(2, 4, 8).unwrap();
        mbx.push(b"x").unwrap();
        mbx.pop(0, PopMode::Normal).unwrap();
        mbx.reset();
        assert_eq!(mbx.pending(0).unwrap(), 0);
        assert_eq!(mbx.pending(1).unwrap(), 0);
        assert!(matches!(mbx.pop(0, PopMode::Normal), Err(MbxError::Empty)));
    }
}
