//! Debug assertion macros for double-buffer invariants.
//!
//! These macros provide runtime checks for the invariants of [`crate::Dbo`].
//! They are only active in debug builds (`#[cfg(debug_assertions)]`), so there is
//! zero overhead in release builds.

// =============================================================================
// INV-DBO-01: Bounded Reader Count
// =============================================================================

/// Assert that a slot's reader count never exceeds `n_slots - 1`.
///
/// **Invariant**: `0 <= readers(slot) <= n_slots - 1`
///
/// Used in: `Dbo::get_read_slot()` after the fetch-add.
macro_rules! debug_assert_bounded_readers {
    ($count:expr, $n_slots:expr) => {
        debug_assert!(
            $count < $n_slots,
            "INV-DBO-01 violated: reader count {} reached n_slots {}",
            $count,
            $n_slots
        )
    };
}

// =============================================================================
// INV-DBO-02: No Commit Over Live Readers
// =============================================================================

/// Assert that a slot being committed has no outstanding readers.
///
/// **Invariant**: `release_write(s)` only flips the bank selector of `s` when
/// `readers(s) == 0`.
///
/// Used in: `WriteGuard::commit()`.
macro_rules! debug_assert_no_readers_on_commit {
    ($slot:expr, $count:expr) => {
        debug_assert!(
            $count == 0,
            "INV-DBO-02 violated: committing slot {} with {} live readers",
            $slot,
            $count
        )
    };
}

// =============================================================================
// INV-DBO-03: Reader Count Never Goes Negative
// =============================================================================

/// Assert that releasing a read never underflows the reader count.
///
/// Used in: `ReadGuard::drop()`.
macro_rules! debug_assert_readers_nonnegative {
    ($prev:expr) => {
        debug_assert!(
            $prev > 0,
            "INV-DBO-03 violated: released a read with reader count already 0"
        )
    };
}

// =============================================================================
// INV-DBO-04: Write Target Excludes Last Written
// =============================================================================

/// Assert that a chosen write slot is never the currently committed slot.
///
/// Used in: `Dbo::get_write_slot()`.
macro_rules! debug_assert_write_excludes_last_written {
    ($candidate:expr, $last_written:expr) => {
        debug_assert!(
            $candidate != $last_written,
            "INV-DBO-04 violated: selected last-written slot {} as a write target",
            $candidate
        )
    };
}

pub(crate) use debug_assert_bounded_readers;
pub(crate) use debug_assert_no_readers_on_commit;
pub(crate) use debug_assert_readers_nonnegative;
pub(crate) use debug_assert_write_excludes_last_written;
