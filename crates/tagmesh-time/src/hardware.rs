//! Hardware tick sources

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic millisecond tick of the local device
pub trait HardwareClock {
    /// Milliseconds since this clock started
    fn now_ms(&self) -> u64;
}

/// Tick source backed by the host's monotonic clock
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareClock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Manually driven tick source
///
/// Clones share the same counter, so a test harness can keep one handle and
/// hand another to the node it drives.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        ManualClock {
            millis: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Advance by `ms`, returning the new reading
    pub fn advance(&self, ms: u64) -> u64 {
        self.millis.fetch_add(ms, Ordering::SeqCst).saturating_add(ms)
    }

    /// Jump to an absolute reading
    pub fn set(&self, ms: u64) {
        self.millis.store(ms, Ordering::SeqCst);
    }
}

impl HardwareClock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

impl<C: HardwareClock + ?Sized> HardwareClock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared() {
        let clock = ManualClock::new(100);
        let handle = clock.clone();

        assert_eq!(handle.advance(50), 150);
        assert_eq!(clock.now_ms(), 150);

        clock.set(7);
        assert_eq!(handle.now_ms(), 7);
    }

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
