use std::hint;
use std::thread;

/// Adaptive backoff strategy (Crossbeam-style).
///
/// Progressively increases wait time: spin with PAUSE → yield to OS → give up.
/// Used by [`crate::Dbo::get_read_slot`] to retry the load-then-increment race
/// against a concurrent commit without ever blocking.
#[derive(Debug)]
pub(crate) struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6; // 2^6 = 64 spins max before yielding
    const YIELD_LIMIT: u32 = 10; // Then give up

    #[inline]
    pub(crate) fn new() -> Self {
        Self { step: 0 }
    }

    /// Light spin with PAUSE hints.
    #[inline]
    pub(crate) fn spin(&mut self) {
        let spins = 1 << self.step.min(Self::SPIN_LIMIT);
        for _ in 0..spins {
            hint::spin_loop();
        }
        if self.step <= Self::SPIN_LIMIT {
            self.step += 1;
        }
    }

    /// Heavier backoff: spin then yield.
    #[inline]
    pub(crate) fn snooze(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            self.spin();
        } else {
            thread::yield_now();
            if self.step <= Self::YIELD_LIMIT {
                self.step += 1;
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spin_progresses_and_eventually_yields() {
        let mut b = Backoff::new();
        assert_eq!(b.step, 0);
        b.spin();
        assert!(b.step > 0);
        for _ in 0..(Backoff::YIELD_LIMIT as usize + 2) {
            b.snooze();
        }
        assert!(b.step > Backoff::SPIN_LIMIT);
    }
}
