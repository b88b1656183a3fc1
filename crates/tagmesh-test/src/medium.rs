//! Simulated radio medium
//!
//! Every `SimRadio` shares one medium. A transmission reaches each node
//! adjacent to the sender, subject to the link's loss and duplication
//! rates. Frames sit in the air until `deliver()` is called, so a harness
//! can update every node and then move all frames at once.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tagmesh_core::NodeId;
use tagmesh_mesh::{MeshError, MeshResult, Transport};

/// Link conditions
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinkConfig {
    /// Probability a frame is lost (0.0 - 1.0)
    pub loss_rate: f64,
    /// Probability a delivered frame arrives twice (0.0 - 1.0)
    pub duplicate_rate: f64,
}

impl LinkConfig {
    pub fn perfect() -> Self {
        LinkConfig {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
        }
    }

    pub fn lossy() -> Self {
        LinkConfig {
            loss_rate: 0.2,
            duplicate_rate: 0.05,
        }
    }

    pub fn hostile() -> Self {
        LinkConfig {
            loss_rate: 0.5,
            duplicate_rate: 0.2,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::perfect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MediumStats {
    pub transmitted: u64,
    pub delivered: u64,
    pub lost: u64,
    pub duplicated: u64,
}

struct MediumInner {
    links: HashMap<NodeId, BTreeSet<NodeId>>,
    inboxes: HashMap<NodeId, VecDeque<Bytes>>,
    in_flight: Vec<(NodeId, Bytes)>,
    offline: BTreeSet<NodeId>,
    config: LinkConfig,
    rng: StdRng,
    stats: MediumStats,
}

/// Shared broadcast medium
#[derive(Clone)]
pub struct SimMedium {
    inner: Arc<Mutex<MediumInner>>,
}

impl SimMedium {
    pub fn new(config: LinkConfig, seed: u64) -> Self {
        SimMedium {
            inner: Arc::new(Mutex::new(MediumInner {
                links: HashMap::new(),
                inboxes: HashMap::new(),
                in_flight: Vec::new(),
                offline: BTreeSet::new(),
                config,
                rng: StdRng::seed_from_u64(seed),
                stats: MediumStats::default(),
            })),
        }
    }

    pub fn perfect() -> Self {
        Self::new(LinkConfig::perfect(), 0)
    }

    /// Attach a node and return its radio
    pub fn radio(&self, id: NodeId) -> SimRadio {
        let mut inner = self.inner.lock();
        inner.links.entry(id).or_default();
        inner.inboxes.entry(id).or_default();
        SimRadio {
            id,
            medium: self.clone(),
        }
    }

    /// Bidirectional link
    pub fn connect(&self, a: NodeId, b: NodeId) {
        if a == b {
            return;
        }
        let mut inner = self.inner.lock();
        inner.links.entry(a).or_default().insert(b);
        inner.links.entry(b).or_default().insert(a);
    }

    pub fn disconnect(&self, a: NodeId, b: NodeId) {
        let mut inner = self.inner.lock();
        if let Some(peers) = inner.links.get_mut(&a) {
            peers.remove(&b);
        }
        if let Some(peers) = inner.links.get_mut(&b) {
            peers.remove(&a);
        }
    }

    /// Chain: each node linked to the next
    pub fn connect_line(&self, ids: &[NodeId]) {
        for pair in ids.windows(2) {
            self.connect(pair[0], pair[1]);
        }
    }

    /// Chain closed into a cycle
    pub fn connect_ring(&self, ids: &[NodeId]) {
        self.connect_line(ids);
        if let (Some(&first), Some(&last)) = (ids.first(), ids.last()) {
            if ids.len() > 2 {
                self.connect(last, first);
            }
        }
    }

    /// Every node linked to every other
    pub fn connect_all(&self, ids: &[NodeId]) {
        for (i, &a) in ids.iter().enumerate() {
            for &b in &ids[i + 1..] {
                self.connect(a, b);
            }
        }
    }

    /// Power a node's radio off or on; an offline radio neither sends nor hears
    pub fn set_online(&self, id: NodeId, online: bool) {
        let mut inner = self.inner.lock();
        if online {
            inner.offline.remove(&id);
        } else {
            inner.offline.insert(id);
        }
    }

    /// Drop frames a node has heard but not yet read, as a power cycle would
    pub fn clear_inbox(&self, id: NodeId) -> usize {
        self.inner
            .lock()
            .inboxes
            .get_mut(&id)
            .map(|inbox| inbox.drain(..).count())
            .unwrap_or(0)
    }

    pub fn neighbours(&self, id: NodeId) -> Vec<NodeId> {
        self.inner
            .lock()
            .links
            .get(&id)
            .map(|peers| peers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Move every frame in the air to the receivers' inboxes
    pub fn deliver(&self) -> usize {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let in_flight = std::mem::take(&mut inner.in_flight);
        let mut delivered = 0;

        for (from, frame) in in_flight {
            let receivers: Vec<NodeId> = inner
                .links
                .get(&from)
                .map(|peers| peers.iter().copied().collect())
                .unwrap_or_default();

            for to in receivers {
                if inner.offline.contains(&to) {
                    continue;
                }
                if inner.config.loss_rate > 0.0 && inner.rng.gen_bool(inner.config.loss_rate) {
                    inner.stats.lost += 1;
                    continue;
                }
                let copies = if inner.config.duplicate_rate > 0.0
                    && inner.rng.gen_bool(inner.config.duplicate_rate)
                {
                    inner.stats.duplicated += 1;
                    2
                } else {
                    1
                };
                let inbox = inner.inboxes.entry(to).or_default();
                for _ in 0..copies {
                    inbox.push_back(frame.clone());
                }
                inner.stats.delivered += 1;
                delivered += 1;
            }
        }
        delivered
    }

    /// Frames transmitted but not yet delivered
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    pub fn stats(&self) -> MediumStats {
        self.inner.lock().stats.clone()
    }

    fn transmit(&self, from: NodeId, frame: Bytes) -> MeshResult<()> {
        let mut inner = self.inner.lock();
        if inner.offline.contains(&from) {
            return Err(MeshError::Transport(format!("radio of {} is off", from)));
        }
        inner.stats.transmitted += 1;
        inner.in_flight.push((from, frame));
        Ok(())
    }

    fn receive(&self, id: NodeId) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        if inner.offline.contains(&id) {
            return None;
        }
        inner.inboxes.get_mut(&id).and_then(VecDeque::pop_front)
    }
}

/// One node's view of the medium
#[derive(Clone)]
pub struct SimRadio {
    id: NodeId,
    medium: SimMedium,
}

impl SimRadio {
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl Transport for SimRadio {
    fn transmit(&mut self, frame: Bytes) -> MeshResult<()> {
        self.medium.transmit(self.id, frame)
    }

    fn receive(&mut self) -> Option<Bytes> {
        self.medium.receive(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(n: u32) -> Vec<NodeId> {
        (1..=n).map(NodeId::new).collect()
    }

    #[test]
    fn test_frames_reach_neighbours_only() {
        let medium = SimMedium::perfect();
        let nodes = ids(3);
        let mut radios: Vec<_> = nodes.iter().map(|id| medium.radio(*id)).collect();
        medium.connect_line(&nodes);

        radios[0].transmit(Bytes::from_static(b"a")).unwrap();
        assert!(radios[1].receive().is_none());
        assert_eq!(medium.deliver(), 1);

        assert_eq!(radios[1].receive(), Some(Bytes::from_static(b"a")));
        assert!(radios[2].receive().is_none());
        assert!(radios[0].receive().is_none());
    }

    #[test]
    fn test_ring_topology() {
        let medium = SimMedium::perfect();
        let nodes = ids(4);
        medium.connect_ring(&nodes);
        assert_eq!(medium.neighbours(nodes[0]), vec![nodes[1], nodes[3]]);
    }

    #[test]
    fn test_offline_radio() {
        let medium = SimMedium::perfect();
        let nodes = ids(2);
        let mut a = medium.radio(nodes[0]);
        let mut b = medium.radio(nodes[1]);
        medium.connect_all(&nodes);

        medium.set_online(nodes[1], false);
        a.transmit(Bytes::from_static(b"x")).unwrap();
        medium.deliver();
        assert!(b.receive().is_none());
        assert!(b.transmit(Bytes::from_static(b"y")).is_err());
    }

    #[test]
    fn test_clear_inbox() {
        let medium = SimMedium::perfect();
        let nodes = ids(2);
        let mut a = medium.radio(nodes[0]);
        let mut b = medium.radio(nodes[1]);
        medium.connect_all(&nodes);

        a.transmit(Bytes::from_static(b"x")).unwrap();
        a.transmit(Bytes::from_static(b"y")).unwrap();
        medium.deliver();
        assert_eq!(medium.clear_inbox(nodes[1]), 2);
        assert!(b.receive().is_none());
        assert_eq!(medium.clear_inbox(NodeId::new(9)), 0);
    }

    #[test]
    fn test_loss_is_seeded() {
        let run = |seed| {
            let medium = SimMedium::new(LinkConfig::lossy(), seed);
            let nodes = ids(2);
            let mut a = medium.radio(nodes[0]);
            medium.connect_all(&nodes);
            for _ in 0..200 {
                a.transmit(Bytes::from_static(b"x")).unwrap();
            }
            medium.deliver();
            medium.stats()
        };

        let first = run(7);
        assert_eq!(first, run(7));
        assert!(first.lost > 0);
        assert_eq!(first.lost + first.delivered, 200);
    }

    proptest! {
        #[test]
        fn prop_every_copy_accounted(seed in 0u64..1000, frames in 1usize..50, n in 2u32..6) {
            let medium = SimMedium::new(LinkConfig::hostile(), seed);
            let nodes = ids(n);
            let mut radios: Vec<_> = nodes.iter().map(|id| medium.radio(*id)).collect();
            medium.connect_all(&nodes);

            for _ in 0..frames {
                radios[0].transmit(Bytes::from_static(b"f")).unwrap();
            }
            medium.deliver();

            let stats = medium.stats();
            let links = u64::from(n - 1);
            prop_assert_eq!(stats.lost + stats.delivered, frames as u64 * links);

            let heard: u64 = radios[1..]
                .iter_mut()
                .map(|r| std::iter::from_fn(|| r.receive()).count() as u64)
                .sum();
            prop_assert_eq!(heard, stats.delivered + stats.duplicated);
        }
    }
}
