//! Multi-node scenarios
//!
//! A `SimCluster` steps every node in lock-step: each node updates, the
//! medium delivers what was sent, then every hardware clock advances by one
//! step. A frame sent in one step is therefore heard one step later, which is
//! the transit the nodes are configured to expect.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tagmesh_core::NodeId;
use tagmesh_mesh::{MeshError, MeshParams};
use tagmesh_runtime::{ConfigError, Hardware, MeshNode, NodeConfig, Role};
use tagmesh_time::ManualClock;
use tracing::{info, warn};

use crate::{LinkConfig, SimMedium, SimRadio};

pub type SimNode = MeshNode<SimRadio, ManualClock>;

/// How the cluster's radios are linked
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    FullMesh,
    /// Nodes linked in the order they were added
    Line,
    Ring,
    /// No links; the caller wires the medium
    Manual,
}

/// One node to build
pub struct NodeSpec {
    config: NodeConfig,
    start_ms: u64,
    hardware: Hardware,
}

impl NodeSpec {
    pub fn new(id: u32, role: Role) -> Self {
        NodeSpec {
            config: NodeConfig::hardware_verification(role, NodeId::new(id)),
            start_ms: 0,
            hardware: Hardware::new(),
        }
    }

    /// Hardware clock reading at power-on
    pub fn starting_at(mut self, start_ms: u64) -> Self {
        self.start_ms = start_ms;
        self
    }

    pub fn with_hardware(mut self, hardware: Hardware) -> Self {
        self.hardware = hardware;
        self
    }

    pub fn with_params(mut self, params: MeshParams) -> Self {
        self.config.mesh = params;
        self
    }

    pub fn configure(mut self, f: impl FnOnce(&mut NodeConfig)) -> Self {
        f(&mut self.config);
        self
    }
}

pub struct ScenarioBuilder {
    specs: Vec<NodeSpec>,
    topology: Topology,
    link: LinkConfig,
    seed: u64,
    step: Duration,
}

impl ScenarioBuilder {
    pub fn new() -> Self {
        ScenarioBuilder {
            specs: Vec::new(),
            topology: Topology::FullMesh,
            link: LinkConfig::perfect(),
            seed: 0,
            step: Duration::from_millis(10),
        }
    }

    pub fn node(mut self, spec: NodeSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn link(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    pub fn build(self) -> Result<SimCluster, ConfigError> {
        let step_ms = self.step.as_millis() as u64;
        if step_ms == 0 {
            return Err(ConfigError::Invalid("simulation step must be at least 1 ms".into()));
        }

        let medium = SimMedium::new(self.link, self.seed);
        let mut nodes = Vec::with_capacity(self.specs.len());
        let mut clocks = Vec::with_capacity(self.specs.len());
        let mut configs = Vec::with_capacity(self.specs.len());

        for mut spec in self.specs {
            spec.config.sync.transit_estimate_ms = step_ms;
            let clock = ManualClock::new(spec.start_ms);
            let radio = medium.radio(spec.config.node_id);
            nodes.push(MeshNode::new(&spec.config, spec.hardware, radio, clock.clone())?);
            clocks.push(clock);
            configs.push(spec.config);
        }

        let ids: Vec<NodeId> = nodes.iter().map(|n| n.id()).collect();
        match self.topology {
            Topology::FullMesh => medium.connect_all(&ids),
            Topology::Line => medium.connect_line(&ids),
            Topology::Ring => medium.connect_ring(&ids),
            Topology::Manual => {}
        }

        Ok(SimCluster {
            nodes,
            clocks,
            configs,
            medium,
            step_ms,
            elapsed_ms: 0,
            errors: Vec::new(),
        })
    }
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A message seen by some node's handler
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub to: NodeId,
    pub from: NodeId,
    pub payload: Vec<u8>,
}

/// Messages delivered across the cluster
#[derive(Clone, Default)]
pub struct Inbox {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl Inbox {
    pub fn all(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    pub fn received_by(&self, id: NodeId) -> Vec<Delivery> {
        self.deliveries
            .lock()
            .iter()
            .filter(|d| d.to == id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.deliveries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.lock().is_empty()
    }
}

pub struct SimCluster {
    nodes: Vec<SimNode>,
    clocks: Vec<ManualClock>,
    configs: Vec<NodeConfig>,
    medium: SimMedium,
    step_ms: u64,
    elapsed_ms: u64,
    errors: Vec<(NodeId, MeshError)>,
}

impl SimCluster {
    /// Update every node, deliver, advance every clock
    pub fn step(&mut self) {
        for node in &mut self.nodes {
            if let Err(e) = node.update() {
                warn!(node = %node.id(), error = %e, "node update reported an error");
                self.errors.push((node.id(), e));
            }
        }
        self.medium.deliver();
        for clock in &self.clocks {
            clock.advance(self.step_ms);
        }
        self.elapsed_ms += self.step_ms;
    }

    pub fn run_steps(&mut self, steps: usize) {
        for _ in 0..steps {
            self.step();
        }
    }

    pub fn run_for(&mut self, duration: Duration) {
        let steps = duration.as_millis() as u64 / self.step_ms;
        self.run_steps(steps as usize);
    }

    /// Record every message delivered from now on
    pub fn capture_messages(&mut self) -> Inbox {
        let inbox = Inbox::default();
        for node in &mut self.nodes {
            let to = node.id();
            let sink = inbox.deliveries.clone();
            node.on_receive(move |from, payload| {
                sink.lock().push(Delivery {
                    to,
                    from,
                    payload: payload.to_vec(),
                });
            });
        }
        inbox
    }

    /// Power-cycle a node: same id and config, fresh state, hardware clock at
    /// zero and no peripherals attached
    ///
    /// Returns false when no node has that id.
    pub fn restart(&mut self, id: u32) -> Result<bool, ConfigError> {
        let id = NodeId::new(id);
        let Some(index) = self.nodes.iter().position(|n| n.id() == id) else {
            return Ok(false);
        };

        self.medium.clear_inbox(id);
        let clock = ManualClock::new(0);
        let radio = self.medium.radio(id);
        self.nodes[index] =
            MeshNode::new(&self.configs[index], Hardware::new(), radio, clock.clone())?;
        self.clocks[index] = clock;
        info!(node = %id, "node restarted");
        Ok(true)
    }

    pub fn node(&self, id: u32) -> Option<&SimNode> {
        let id = NodeId::new(id);
        self.nodes.iter().find(|n| n.id() == id)
    }

    pub fn node_mut(&mut self, id: u32) -> Option<&mut SimNode> {
        let id = NodeId::new(id);
        self.nodes.iter_mut().find(|n| n.id() == id)
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id()).collect()
    }

    /// Largest difference between any two nodes' mesh time (ms)
    pub fn max_skew(&mut self) -> u64 {
        let times: Vec<u64> = self.nodes.iter_mut().map(|n| n.now().as_millis()).collect();
        match (times.iter().min(), times.iter().max()) {
            (Some(min), Some(max)) => max - min,
            _ => 0,
        }
    }

    pub fn medium(&self) -> &SimMedium {
        &self.medium
    }

    /// Errors returned by `update()`, in order
    pub fn errors(&self) -> &[(NodeId, MeshError)] {
        &self.errors
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}
