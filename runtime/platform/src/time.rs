//! Millisecond time sources
//!
//! The kernel only ever asks "what time is it now, in milliseconds". Boards
//! implement [`TimeSource`] over their tick counter; tests and simulations
//! use [`ManualClock`], which is advanced explicitly.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

/// Monotonic millisecond time base
///
/// Implementations must never go backwards. Wrap-around is not handled:
/// a `u64` of milliseconds outlives any device.
pub trait TimeSource {
    /// Milliseconds since an arbitrary, fixed epoch
    fn now_ms(&self) -> u64;
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for alloc::boxed::Box<T> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

/// Explicitly advanced clock
///
/// Clones share the same counter, so a test can keep one handle while the
/// kernel owns another. Advancing is lock-free and may happen from any thread
/// (e.g. a simulated timer interrupt).
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock reading 0 ms
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create a clock reading `ms`
    pub fn starting_at(ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(ms)),
        }
    }

    /// Move time forward by `ms`
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::AcqRel);
    }

    /// Jump to an absolute reading
    ///
    /// Requests to move backwards are ignored to keep the clock monotonic.
    pub fn set(&self, ms: u64) {
        self.now.fetch_max(ms, Ordering::AcqRel);
    }
}

impl TimeSource for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}

/// Host clock backed by `std::time::Instant`
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    epoch: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    /// Start counting from now
    pub fn new() -> Self {
        Self {
            epoch: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl TimeSource for StdClock {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new();
        let kernel_side = clock.clone();

        clock.advance(250);
        assert_eq!(kernel_side.now_ms(), 250);

        kernel_side.advance(50);
        assert_eq!(clock.now_ms(), 300);
    }

    #[test]
    fn test_manual_clock_never_goes_backwards() {
        let clock = ManualClock::starting_at(1_000);
        clock.set(400);
        assert_eq!(clock.now_ms(), 1_000);

        clock.set(1_500);
        assert_eq!(clock.now_ms(), 1_500);
    }

    #[test]
    fn test_time_source_through_reference() {
        fn read<T: TimeSource>(t: T) -> u64 {
            t.now_ms()
        }

        let clock = ManualClock::starting_at(7);
        assert_eq!(read(&clock), 7);
    }
}
