//! Debug assertion macros for interrupt-timer invariants. Zero cost in
//! release builds (`#[cfg(debug_assertions)]` only).

/// Assert that `cb_start` and `cb_stop` invocations interleave correctly:
/// the count of starts never trails the count of stops by more than one.
///
/// Used in: `Irt::update()` around edge-callback dispatch.
macro_rules! debug_assert_start_stop_interleaved {
    ($starts:expr, $stops:expr) => {
        debug_assert!(
            $starts >= $stops && $starts <= $stops + 1,
            "INV-IRT-01 violated: start/stop interleaving broken (starts={}, stops={})",
            $starts,
            $stops
        )
    };
}

/// Assert that `update` is never re-entered from within a callback it
/// dispatched.
///
/// Used in: `Irt::update()` entry.
macro_rules! debug_assert_not_reentrant {
    ($was_in_progress:expr) => {
        debug_assert!(
            !$was_in_progress,
            "INV-IRT-02 violated: update() re-entered while a tick was in progress"
        )
    };
}

/// Assert the workspace use-counter never underflows past its resting
/// value during a decrement.
macro_rules! debug_assert_use_count_nonnegative {
    ($prev:expr, $base:expr) => {
        debug_assert!(
            $prev > $base,
            "INV-IRT-03 violated: workspace use counter released below baseline"
        )
    };
}

pub(crate) use debug_assert_not_reentrant;
pub(crate) use debug_assert_start_stop_interleaved;
pub(crate) use debug_assert_use_count_nonnegative;
