//! Logical clock with bounded slew
//!
//! INVARIANT: `now()` is non-decreasing across calls. A backward correction
//! lowers the offset immediately but the reported time holds at its previous
//! value until the hardware tick catches up.

use serde::{Deserialize, Serialize};
use tagmesh_core::LogicalTime;
use tracing::debug;

/// Logical clock configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Largest offset change a single correction may apply (ms)
    pub max_slew_ms: u64,
    /// Corrections with a larger magnitude are discarded (ms)
    pub max_plausible_offset_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        ClockConfig {
            max_slew_ms: 20,
            max_plausible_offset_ms: 24 * 60 * 60 * 1000,
        }
    }
}

impl ClockConfig {
    /// Tight slew for meshes that are already close together
    pub fn fine() -> Self {
        ClockConfig {
            max_slew_ms: 5,
            ..Default::default()
        }
    }
}

/// Per-node logical clock: hardware tick plus a signed offset
#[derive(Debug, Clone)]
pub struct LogicalClock {
    offset: i64,
    floor: LogicalTime,
    config: ClockConfig,
    corrections: u64,
}

impl LogicalClock {
    pub fn new(config: ClockConfig) -> Self {
        LogicalClock {
            offset: 0,
            floor: LogicalTime::ZERO,
            config,
            corrections: 0,
        }
    }

    /// Current logical time for the given hardware reading
    pub fn now(&mut self, local_ms: u64) -> LogicalTime {
        let raw = self.raw(local_ms);
        if raw > self.floor {
            self.floor = raw;
        }
        self.floor
    }

    /// Offset-adjusted hardware time without the monotonic floor
    #[inline]
    pub fn raw(&self, local_ms: u64) -> LogicalTime {
        LogicalTime::from_millis(local_ms).offset_by(self.offset)
    }

    /// Last value returned by `now()`
    #[inline]
    pub fn last(&self) -> LogicalTime {
        self.floor
    }

    #[inline]
    pub fn offset(&self) -> i64 {
        self.offset
    }

    #[inline]
    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    #[inline]
    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    /// Whether a correction of this size is believable at all
    #[inline]
    pub fn is_plausible(&self, delta: i64) -> bool {
        delta.unsigned_abs() <= self.config.max_plausible_offset_ms
    }

    /// Slew the offset toward `delta`, returning the change actually applied
    pub fn apply_offset_correction(&mut self, delta: i64) -> i64 {
        if !self.is_plausible(delta) {
            debug!(delta, "discarding implausible clock correction");
            return 0;
        }
        let max = i64::try_from(self.config.max_slew_ms).unwrap_or(i64::MAX);
        let applied = delta.clamp(-max, max);
        self.shift(applied);
        if applied != 0 {
            debug!(delta, applied, offset = self.offset, "clock slewed");
        }
        applied
    }

    /// One-time unclamped correction used when joining a mesh time base
    pub fn bootstrap(&mut self, delta: i64) -> i64 {
        if !self.is_plausible(delta) {
            debug!(delta, "discarding implausible bootstrap offset");
            return 0;
        }
        self.shift(delta);
        debug!(delta, offset = self.offset, "clock bootstrapped");
        delta
    }

    fn shift(&mut self, delta: i64) {
        self.offset = self.offset.saturating_add(delta);
        self.corrections += 1;
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new(ClockConfig::default())
    }
}
