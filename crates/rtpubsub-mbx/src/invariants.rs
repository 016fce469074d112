//! Debug assertion macros for message-box invariants. Zero cost in release
//! builds (`#[cfg(debug_assertions)]` only).

/// Assert that a client's read cursor never moves backwards.
///
/// **Invariant**: `new_cursor >= old_cursor` for every client across calls
/// to `Mbx::pop`.
///
/// Used in: `Mbx::pop()` after computing the delivered sequence number.
macro_rules! debug_assert_cursor_monotonic {
    ($client:expr, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "INV-MBX-01 violated: client {} read cursor went from {} to {}",
            $client,
            $old,
            $new
        )
    };
}

/// Assert that a client's pending count never exceeds `max_events`.
///
/// Used in: `Mbx::pop()` / test harnesses observing `write_cursor -
/// read_cursor`.
macro_rules! debug_assert_pending_bounded {
    ($pending:expr, $max_events:expr) => {
        debug_assert!(
            $pending <= $max_events,
            "INV-MBX-02 violated: pending count {} exceeds max_events {}",
            $pending,
            $max_events
        )
    };
}

pub(crate) use debug_assert_cursor_monotonic;
pub(crate) use debug_assert_pending_bounded;
