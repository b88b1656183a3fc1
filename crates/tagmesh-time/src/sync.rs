//! Time-sync protocol
//!
//! Every `interval_ms` a node broadcasts a single-hop `TimeAnnounce`. On
//! receipt it estimates how far the sender's clock is ahead:
//!
//! ```text
//! observed = peer_time + transit_estimate - local_time
//! ```
//!
//! An anchored node moves half-way toward the sender (pairwise averaging)
//! through the slew-clamped correction, so two neighbours meet in the middle
//! without overshoot. A node that has not joined a time base yet adopts the
//! sender's time in one step instead.

use serde::{Deserialize, Serialize};
use tagmesh_core::{LogicalTime, NodeId};
use tagmesh_wire::TimeAnnounce;
use tracing::{debug, info};

use crate::LogicalClock;

/// Time-sync configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Announce period (ms)
    pub interval_ms: u64,
    /// Expected one-hop latency added to every observation (ms)
    pub transit_estimate_ms: u64,
    /// Start as a time reference instead of adopting the first neighbour
    pub start_anchored: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            interval_ms: 1000,
            transit_estimate_ms: 5,
            start_anchored: false,
        }
    }
}

/// Result of processing one announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Adopted the sender's time base in one step
    Bootstrapped { observed: i64 },
    /// Joined a time base without moving (this node was the reference)
    Anchored { observed: i64 },
    /// Slewed toward the sender
    Corrected { observed: i64, applied: i64 },
    /// Observation was implausible and discarded
    Ignored { observed: i64 },
}

impl SyncOutcome {
    /// Estimated offset of the sender relative to this node
    pub fn observed(&self) -> i64 {
        match *self {
            SyncOutcome::Bootstrapped { observed }
            | SyncOutcome::Anchored { observed }
            | SyncOutcome::Corrected { observed, .. }
            | SyncOutcome::Ignored { observed } => observed,
        }
    }
}

/// Per-node time-sync state
#[derive(Debug, Clone)]
pub struct TimeSync {
    local_id: NodeId,
    config: SyncConfig,
    anchored: bool,
    last_announce_ms: Option<u64>,
    rounds: u64,
}

impl TimeSync {
    pub fn new(local_id: NodeId, config: SyncConfig) -> Self {
        TimeSync {
            local_id,
            config,
            anchored: config.start_anchored,
            last_announce_ms: None,
            rounds: 0,
        }
    }

    /// Whether this node has joined a mesh time base
    #[inline]
    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    /// Observations processed so far
    #[inline]
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    #[inline]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Whether an announcement is due at this hardware reading
    ///
    /// Scheduled on the hardware tick so a bootstrap jump cannot skip or
    /// burst announcements.
    pub fn is_due(&self, local_ms: u64) -> bool {
        match self.last_announce_ms {
            None => true,
            Some(last) => local_ms.saturating_sub(last) >= self.config.interval_ms,
        }
    }

    /// Build the announcement for this round and mark it sent
    pub fn announce(&mut self, now: LogicalTime, local_ms: u64) -> TimeAnnounce {
        self.last_announce_ms = Some(local_ms);
        TimeAnnounce::new(now, self.anchored)
    }

    /// Process an announcement from a direct neighbour
    pub fn observe(
        &mut self,
        from: NodeId,
        announce: &TimeAnnounce,
        local_ms: u64,
        clock: &mut LogicalClock,
    ) -> SyncOutcome {
        self.rounds += 1;

        let local_now = clock.raw(local_ms);
        let observed = announce
            .time
            .offset_by(self.config.transit_estimate_ms as i64)
            .signed_diff(local_now);

        if !clock.is_plausible(observed) {
            debug!(peer = %from, observed, "ignoring implausible time announcement");
            return SyncOutcome::Ignored { observed };
        }

        if self.anchored {
            let applied = clock.apply_offset_correction(observed / 2);
            return SyncOutcome::Corrected { observed, applied };
        }

        self.anchored = true;
        let adopt = if announce.anchored {
            true
        } else if observed == 0 {
            from < self.local_id
        } else {
            observed > 0
        };

        if adopt {
            clock.bootstrap(observed);
            info!(peer = %from, observed, "joined mesh time base");
            SyncOutcome::Bootstrapped { observed }
        } else {
            info!(peer = %from, observed, "anchored as mesh time reference");
            SyncOutcome::Anchored { observed }
        }
    }
}
