//! Node registry - peers this node has heard from

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tagmesh_core::{duration_millis, LogicalTime, NodeId};
use tracing::info;

/// Registry configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Silence after which a peer is dropped (ms)
    pub peer_timeout_ms: u64,
}

impl RegistryConfig {
    #[inline]
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            peer_timeout_ms: 10_000,
        }
    }
}

/// A known peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: NodeId,
    /// Local logical time of the most recent frame; never moves backward
    pub last_seen: LogicalTime,
    /// Latest time-sync estimate of the peer's clock relative to ours (ms)
    pub offset_delta: i64,
    /// Fewest hops observed since the peer joined (1 = direct neighbour)
    pub hops: u8,
    /// Frames attributed to this peer
    pub frames: u64,
}

impl Peer {
    fn new(id: NodeId, seen: LogicalTime, hops: u8) -> Self {
        Peer {
            id,
            last_seen: seen,
            offset_delta: 0,
            hops,
            frames: 0,
        }
    }

    #[inline]
    pub fn is_neighbour(&self) -> bool {
        self.hops <= 1
    }
}

/// Known peers ordered by id
#[derive(Debug, Default)]
pub struct NodeRegistry {
    peers: BTreeMap<NodeId, Peer>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        NodeRegistry {
            peers: BTreeMap::new(),
        }
    }

    /// Insert or refresh a peer; returns true when the peer is new
    pub fn upsert(&mut self, id: NodeId, seen: LogicalTime, hops: u8) -> bool {
        let hops = hops.max(1);
        match self.peers.get_mut(&id) {
            Some(peer) => {
                peer.last_seen = peer.last_seen.max(seen);
                peer.hops = peer.hops.min(hops);
                peer.frames += 1;
                false
            }
            None => {
                let mut peer = Peer::new(id, seen, hops);
                peer.frames = 1;
                self.peers.insert(id, peer);
                info!(peer = %id, hops, "peer joined");
                true
            }
        }
    }

    /// Store the latest clock offset estimate for a known peer
    pub fn record_offset(&mut self, id: NodeId, delta: i64) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.offset_delta = delta;
        }
    }

    /// Remove peers silent for strictly longer than `timeout`
    ///
    /// A peer seen exactly `timeout` ago is kept. Returns the removed ids.
    pub fn prune(&mut self, now: LogicalTime, timeout: Duration) -> Vec<NodeId> {
        let timeout_ms = duration_millis(timeout);
        let mut removed = Vec::new();
        self.peers.retain(|id, peer| {
            let silent = now.as_millis().saturating_sub(peer.last_seen.as_millis());
            if silent > timeout_ms {
                removed.push(*id);
                false
            } else {
                true
            }
        });
        for id in &removed {
            info!(peer = %id, "peer left");
        }
        removed
    }

    /// Peers in id order
    pub fn list(&self) -> impl Iterator<Item = &Peer> + '_ {
        self.peers.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.peers.keys().copied()
    }

    pub fn get(&self, id: NodeId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn t(ms: u64) -> LogicalTime {
        LogicalTime::from_millis(ms)
    }

    #[test]
    fn test_upsert_new_and_refresh() {
        let mut registry = NodeRegistry::new();
        assert!(registry.upsert(NodeId::new(4), t(100), 2));
        assert!(!registry.upsert(NodeId::new(4), t(200), 1));

        let peer = registry.get(NodeId::new(4)).unwrap();
        assert_eq!(peer.last_seen, t(200));
        assert_eq!(peer.hops, 1);
        assert_eq!(peer.frames, 2);
        assert!(peer.is_neighbour());
    }

    #[test]
    fn test_last_seen_never_moves_backward() {
        let mut registry = NodeRegistry::new();
        registry.upsert(NodeId::new(1), t(500), 1);
        registry.upsert(NodeId::new(1), t(300), 1);
        assert_eq!(registry.get(NodeId::new(1)).unwrap().last_seen, t(500));
    }

    #[test]
    fn test_prune_boundary_is_inclusive() {
        let mut registry = NodeRegistry::new();
        registry.upsert(NodeId::new(1), t(0), 1);
        registry.upsert(NodeId::new(2), t(1), 1);

        let timeout = Duration::from_millis(10_000);
        assert!(registry.prune(t(10_000), timeout).is_empty());
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.prune(t(10_001), timeout), vec![NodeId::new(1)]);
        assert!(registry.contains(NodeId::new(2)));
    }

    #[test]
    fn test_list_is_ordered_and_restartable() {
        let mut registry = NodeRegistry::new();
        for id in [9, 3, 6] {
            registry.upsert(NodeId::new(id), t(0), 1);
        }

        let first: Vec<_> = registry.list().map(|p| p.id.raw()).collect();
        let second: Vec<_> = registry.ids().map(NodeId::raw).collect();
        assert_eq!(first, vec![3, 6, 9]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_record_offset_unknown_peer_is_noop() {
        let mut registry = NodeRegistry::new();
        registry.record_offset(NodeId::new(1), 50);
        assert!(registry.is_empty());

        registry.upsert(NodeId::new(1), t(0), 1);
        registry.record_offset(NodeId::new(1), -12);
        assert_eq!(registry.get(NodeId::new(1)).unwrap().offset_delta, -12);
    }

    proptest! {
        #[test]
        fn prop_last_seen_monotonic(seen in proptest::collection::vec(0u64..100_000, 1..50)) {
            let mut registry = NodeRegistry::new();
            let id = NodeId::new(1);
            let mut max = 0;
            for ms in seen {
                registry.upsert(id, t(ms), 1);
                max = max.max(ms);
                prop_assert_eq!(registry.get(id).unwrap().last_seen, t(max));
            }
        }
    }
}
