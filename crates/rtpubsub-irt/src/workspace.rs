use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{IrtError, Result};
use crate::invariants::debug_assert_use_count_nonnegative;

const NOT_INITIALIZED: u32 = 0;
const INITIALIZING: u32 = 1;
const DEINITIALIZING: u32 = 2;
/// Baseline value once initialized, with zero operations in flight. Any
/// value `>= INITIALIZED_BASE` means "initialized, with `value -
/// INITIALIZED_BASE` calls currently holding a [`UseGuard`]".
const INITIALIZED_BASE: u32 = 3;

/// A single atomic word combining the workspace lifecycle state with an
/// in-use reference count, so that `deinitialize` can CAS away from
/// `INITIALIZED_BASE` only when it observes exactly zero calls in flight,
/// and any call racing to enter after that CAS loses outright rather than
/// being let in after teardown has started.
pub(crate) struct Workspace {
    status: AtomicU32,
}

impl Workspace {
    pub(crate) fn new() -> Self {
        Self {
            status: AtomicU32::new(NOT_INITIALIZED),
        }
    }

    /// Transitions `NotInitialized -> Initializing -> Initialized`. Fails
    /// if the workspace is already initialized or mid-transition.
    pub(crate) fn initialize(&self) -> Result<()> {
        self.status
            .compare_exchange(
                NOT_INITIALIZED,
                INITIALIZING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| IrtError::InvalidState)?;
        self.status.store(INITIALIZED_BASE, Ordering::Release);
        Ok(())
    }

    /// Transitions `Initialized -> Deinitializing -> NotInitialized`. Fails
    /// if not initialized, already mid-transition, or any call currently
    /// holds a [`UseGuard`].
    pub(crate) fn deinitialize(&self) -> Result<()> {
        self.status
            .compare_exchange(
                INITIALIZED_BASE,
                DEINITIALIZING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| IrtError::InvalidState)?;
        self.status.store(NOT_INITIALIZED, Ordering::Release);
        Ok(())
    }

    /// Enters a scope that keeps the workspace initialized for its
    /// duration. Every user-facing operation other than `initialize`/
    /// `deinitialize` must hold one of these for its whole body.
    pub(crate) fn enter(&self) -> Result<UseGuard<'_>> {
        let mut cur = self.status.load(Ordering::Acquire);
        loop {
            if cur < INITIALIZED_BASE {
                return Err(IrtError::InvalidState);
            }
            match self.status.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(UseGuard { workspace: self }),
                Err(observed) => cur = observed,
            }
        }
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.status.load(Ordering::Acquire) >= INITIALIZED_BASE
    }
}

/// RAII guard keeping the workspace marked in-use; releases on drop so a
/// panicking or early-returning callback never leaks the use count.
pub(crate) struct UseGuard<'a> {
    workspace: &'a Workspace,
}

impl<'a> Drop for UseGuard<'a> {
    fn drop(&mut self) {
        let prev = self.workspace.status.fetch_sub(1, Ordering::Release);
        debug_assert_use_count_nonnegative!(prev, INITIALIZED_BASE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deinitialize_fails_before_initialize() {
        let ws = Workspace::new();
        assert_eq!(ws.deinitialize(), Err(IrtError::InvalidState));
    }

    #[test]
    fn double_initialize_fails() {
        let ws = Workspace::new();
        ws.initialize().unwrap();
        assert_eq!(ws.initialize(), Err(IrtError::InvalidState));
    }

    #[test]
    fn deinitialize_fails_while_a_use_guard_is_held() {
        let ws = Workspace::new();
        ws.initialize().unwrap();
        let guard = ws.enter().unwrap();
        assert_eq!(ws.deinitialize(), Err(IrtError::InvalidState));
        drop(guard);
        ws.deinitialize().unwrap();
    }

    #[test]
    fn enter_fails_when_not_initialized() {
        let ws = Workspace::new();
        assert_eq!(ws.enter().err(), Some(IrtError::InvalidState));
    }

    #[test]
    fn reinitialize_after_deinitialize_succeeds() {
        let ws = Workspace::new();
        ws.initialize().unwrap();
        ws.deinitialize().unwrap();
        ws.initialize().unwrap();
        assert!(ws.is_initialized());
    }
}
