//! Time primitives for TagMesh
//!
//! `LogicalTime` is the mesh-wide time base: milliseconds since an arbitrary
//! per-mesh epoch. Each node derives it from its local hardware tick plus an
//! offset maintained by the time-sync protocol.

use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Mesh logical time in milliseconds
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalTime(pub u64);

impl LogicalTime {
    pub const ZERO: LogicalTime = LogicalTime(0);
    pub const MAX: LogicalTime = LogicalTime(u64::MAX);

    #[inline]
    pub fn from_millis(millis: u64) -> Self {
        LogicalTime(millis)
    }

    #[inline]
    pub fn from_secs(secs: u64) -> Self {
        LogicalTime(secs.saturating_mul(1000))
    }

    #[inline]
    pub fn as_millis(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn saturating_add(self, duration: Duration) -> Self {
        LogicalTime(self.0.saturating_add(duration_millis(duration)))
    }

    #[inline]
    pub fn saturating_sub(self, duration: Duration) -> Self {
        LogicalTime(self.0.saturating_sub(duration_millis(duration)))
    }

    /// Elapsed time since `earlier`, zero if `earlier` is in the future
    #[inline]
    pub fn saturating_duration_since(self, earlier: LogicalTime) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// Signed difference `self - other` in milliseconds
    #[inline]
    pub fn signed_diff(self, other: LogicalTime) -> i64 {
        let diff = self.0 as i128 - other.0 as i128;
        diff.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// Shift by a signed number of milliseconds, saturating at both ends
    #[inline]
    pub fn offset_by(self, millis: i64) -> Self {
        let shifted = self.0 as i128 + millis as i128;
        LogicalTime(shifted.clamp(0, u64::MAX as i128) as u64)
    }
}

/// Whole milliseconds in a duration, saturating at `u64::MAX`
#[inline]
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Add<Duration> for LogicalTime {
    type Output = LogicalTime;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl Sub<LogicalTime> for LogicalTime {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: LogicalTime) -> Self::Output {
        self.saturating_duration_since(rhs)
    }
}

impl fmt::Debug for LogicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T({}ms)", self.0)
    }
}

impl fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
