//! TagMesh Node - single update entry point
//!
//! One `MeshNode` owns everything a node needs: its logical clock, the
//! time-sync state, the peer registry, the router and the scheduler with
//! the role's tasks. The host calls `update()` in a loop; each call:
//!
//! 1. Ingests every frame the transport heard
//! 2. Feeds time announcements to the time-sync protocol
//! 3. Queues this node's own announcement and beacon when due
//! 4. Prunes silent peers
//! 5. Runs due scheduler tasks
//! 6. Flushes the outbound queue to the transport
//!
//! Several nodes can live in one process; nothing here is global.

use std::time::Duration;

use bytes::Bytes;
use tagmesh_core::{LogicalTime, Message, NodeId};
use tagmesh_mesh::{
    MeshResult, NodeRegistry, Peer, Router, RouterStats, Transport,
};
use tagmesh_time::{HardwareClock, LogicalClock, TimeSync};
use tagmesh_wire::{Beacon, Frame, FrameKind, TimeAnnounce};
use tracing::{debug, info, trace, warn};

use crate::{
    ConfigError, Hardware, InputBank, NodeConfig, Peripheral, PeripheralReport,
    PeripheralStatus, Role, RoleCoordinator, Scheduler, SchedulerStats, StatusReport, StepOutcome,
    TaskControl, TaskId,
};

/// A peripheral owned by the node and the task that steps it
pub struct PeripheralSlot {
    pub(crate) peripheral: Box<dyn Peripheral>,
    pub(crate) status: PeripheralStatus,
    pub(crate) restart_delay: Duration,
    pub(crate) task: TaskId,
}

impl PeripheralSlot {
    pub fn name(&self) -> &str {
        self.peripheral.name()
    }

    pub fn status(&self) -> PeripheralStatus {
        self.status
    }

    pub fn task(&self) -> TaskId {
        self.task
    }
}

/// Node state shared with scheduler tasks
pub struct NodeState {
    id: NodeId,
    label: String,
    role: Role,
    clock: LogicalClock,
    sync: TimeSync,
    registry: NodeRegistry,
    router: Router,
    pub(crate) peripherals: Vec<PeripheralSlot>,
    pub(crate) inputs: Option<Box<dyn InputBank>>,
    mesh_now: LogicalTime,
    last_report: Option<StatusReport>,
}

impl NodeState {
    fn new(config: &NodeConfig) -> Self {
        let mut router = Router::new(config.node_id, config.mesh.tag(), config.router);
        router.on_receive(|from, payload| {
            info!(from = %from, msg = %String::from_utf8_lossy(payload), "Received message");
        });

        NodeState {
            id: config.node_id,
            label: config.label(),
            role: config.role.role,
            clock: LogicalClock::new(config.clock),
            sync: TimeSync::new(config.node_id, config.sync),
            registry: NodeRegistry::new(),
            router,
            peripherals: Vec::new(),
            inputs: None,
            mesh_now: LogicalTime::ZERO,
            last_report: None,
        }
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Mesh time as of the current update
    #[inline]
    pub fn mesh_time(&self) -> LogicalTime {
        self.mesh_now
    }

    #[inline]
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Queue an application message from inside a task
    pub fn send(&mut self, message: Message) -> MeshResult<()> {
        self.router.send(message, self.mesh_now)
    }

    pub fn peripherals(&self) -> &[PeripheralSlot] {
        &self.peripherals
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            node_id: self.id,
            label: self.label.clone(),
            time: self.mesh_now,
            peer_count: self.registry.len(),
            peripherals: self
                .peripherals
                .iter()
                .map(|slot| PeripheralReport {
                    name: slot.name().to_string(),
                    status: slot.status,
                })
                .collect(),
            inputs: self
                .inputs
                .as_ref()
                .map(|bank| bank.read_inputs())
                .unwrap_or_default(),
        }
    }

    pub(crate) fn report_status(&mut self) {
        let report = self.status_report();
        info!(node = %self.id, "{}", report);
        self.last_report = Some(report);
    }

    pub(crate) fn step_peripheral(&mut self, index: usize, ctl: &mut TaskControl) {
        let now = self.mesh_now;
        let Some(slot) = self.peripherals.get_mut(index) else {
            ctl.disable();
            return;
        };

        match slot.peripheral.step(now) {
            StepOutcome::Continue => {}
            StepOutcome::Finished => {
                debug!(
                    peripheral = slot.peripheral.name(),
                    delay_ms = slot.restart_delay.as_millis() as u64,
                    "peripheral finished, re-checking later"
                );
                ctl.restart_delayed(slot.restart_delay);
            }
            StepOutcome::RestartAfter(delay) => ctl.restart_delayed(delay),
            StepOutcome::Disable => {
                debug!(peripheral = slot.peripheral.name(), "peripheral disabled itself");
                ctl.disable();
            }
        }

        slot.status = if slot.peripheral.is_busy() {
            PeripheralStatus::Running
        } else {
            PeripheralStatus::Idle
        };
    }

    fn handle_control(&mut self, frame: &Frame, local_ms: u64) {
        let from = frame.header.origin;
        match frame.header.kind {
            FrameKind::TimeAnnounce => {
                if frame.header.hops != 0 {
                    debug!(peer = %from, hops = frame.header.hops, "ignoring relayed time announcement");
                    return;
                }
                match TimeAnnounce::decode(&frame.payload) {
                    Ok(announce) => {
                        let outcome = self.sync.observe(from, &announce, local_ms, &mut self.clock);
                        self.registry.record_offset(from, outcome.observed());
                        trace!(peer = %from, ?outcome, "time announcement");
                    }
                    Err(e) => debug!(peer = %from, error = %e, "bad time announcement"),
                }
            }
            FrameKind::Beacon => match Beacon::decode(&frame.payload) {
                Ok(beacon) => trace!(peer = %from, peers = beacon.peer_count, "beacon"),
                Err(e) => debug!(peer = %from, error = %e, "bad beacon"),
            },
            FrameKind::Data => {}
        }
    }
}

/// Update loop counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub updates: u64,
    pub frames_in: u64,
    pub collisions: u64,
    pub peers_pruned: u64,
}

/// A mesh node bound to a transport and a hardware clock
pub struct MeshNode<T, C> {
    transport: T,
    hardware_clock: C,
    scheduler: Scheduler<NodeState>,
    state: NodeState,
    peer_timeout: Duration,
    beacon_interval_ms: u64,
    last_beacon_ms: Option<u64>,
    stats: NodeStats,
}

impl<T: Transport, C: HardwareClock> MeshNode<T, C> {
    /// Build a node and install its role's tasks
    pub fn new(
        config: &NodeConfig,
        hardware: Hardware,
        transport: T,
        hardware_clock: C,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut state = NodeState::new(config);
        let mut scheduler = Scheduler::new(config.scheduler);
        let now = state.clock.now(hardware_clock.now_ms());
        state.mesh_now = now;
        RoleCoordinator::install(&config.role, hardware, &mut scheduler, &mut state, now);

        info!(
            node = %config.node_id,
            label = %state.label,
            role = %config.role.role,
            "node started"
        );

        Ok(MeshNode {
            transport,
            hardware_clock,
            scheduler,
            state,
            peer_timeout: config.registry.peer_timeout(),
            beacon_interval_ms: config.beacon_interval_ms,
            last_beacon_ms: None,
            stats: NodeStats::default(),
        })
    }

    /// Run one iteration of the node loop
    ///
    /// An id collision is reported after the whole iteration has run; the
    /// node keeps working and the caller decides what to do.
    pub fn update(&mut self) -> MeshResult<()> {
        let local_ms = self.hardware_clock.now_ms();
        self.stats.updates += 1;
        let mut result = Ok(());

        let now = self.state.clock.now(local_ms);
        while let Some(raw) = self.transport.receive() {
            self.stats.frames_in += 1;
            match self.state.router.ingest(&raw, now, &mut self.state.registry) {
                Ok(Some(frame)) => self.state.handle_control(&frame, local_ms),
                Ok(None) => {}
                Err(e) => {
                    self.stats.collisions += 1;
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }

        let now = self.state.clock.now(local_ms);
        self.state.mesh_now = now;
        self.queue_announcements(local_ms, now);

        for id in self.state.registry.prune(now, self.peer_timeout) {
            self.state.router.forget(id);
            self.stats.peers_pruned += 1;
        }

        // Mesh time never runs backward, so a slewed-back clock holds tasks
        // rather than letting them fire early
        self.scheduler.tick(now, &mut self.state);

        self.state.router.flush(&mut self.transport);
        result
    }

    fn queue_announcements(&mut self, local_ms: u64, now: LogicalTime) {
        if self.state.sync.is_due(local_ms) {
            let announce = self.state.sync.announce(now, local_ms);
            if let Err(e) =
                self.state
                    .router
                    .send_control(FrameKind::TimeAnnounce, announce.encode(), now)
            {
                warn!(error = %e, "failed to queue time announcement");
            }
        }

        let beacon_due = self.beacon_interval_ms > 0
            && self
                .last_beacon_ms
                .map_or(true, |last| local_ms.saturating_sub(last) >= self.beacon_interval_ms);
        if beacon_due {
            self.last_beacon_ms = Some(local_ms);
            let peers = u16::try_from(self.state.registry.len()).unwrap_or(u16::MAX);
            if let Err(e) =
                self.state
                    .router
                    .send_control(FrameKind::Beacon, Beacon::new(peers).encode(), now)
            {
                warn!(error = %e, "failed to queue beacon");
            }
        }
    }

    /// Current mesh time
    pub fn now(&mut self) -> LogicalTime {
        let local_ms = self.hardware_clock.now_ms();
        self.state.clock.now(local_ms)
    }

    /// Queue a message; non-blocking, no delivery guarantee
    pub fn send(&mut self, message: Message) -> MeshResult<()> {
        if message.sender() != self.state.id {
            debug!(
                sender = %message.sender(),
                node = %self.state.id,
                "message sender differs from node id, sending as this node"
            );
        }
        let now = self.now();
        self.state.router.send(message, now)
    }

    pub fn broadcast(&mut self, payload: impl Into<Bytes>) -> MeshResult<()> {
        self.send(Message::broadcast(self.state.id, payload))
    }

    pub fn send_to(&mut self, target: NodeId, payload: impl Into<Bytes>) -> MeshResult<()> {
        self.send(Message::targeted(self.state.id, target, payload))
    }

    /// Register the inbound message handler, replacing the default logger
    pub fn on_receive<F>(&mut self, handler: F)
    where
        F: FnMut(NodeId, &[u8]) + 'static,
    {
        self.state.router.on_receive(handler);
    }

    /// Status report on demand
    pub fn status_report(&mut self) -> StatusReport {
        self.state.mesh_now = self.now();
        self.state.status_report()
    }

    /// Report produced by the most recent status task run
    pub fn last_status_report(&self) -> Option<&StatusReport> {
        self.state.last_report.as_ref()
    }

    /// Known node ids in ascending order, optionally including this node
    pub fn node_list(&self, include_self: bool) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.state.registry.ids().collect();
        if include_self {
            let at = nodes.partition_point(|id| *id < self.state.id);
            nodes.insert(at, self.state.id);
        }
        nodes
    }

    pub fn peers(&self) -> impl Iterator<Item = &Peer> + '_ {
        self.state.registry.list()
    }

    pub fn peer_count(&self) -> usize {
        self.state.registry.len()
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.state.id
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.state.label
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.state.role
    }

    pub fn is_anchored(&self) -> bool {
        self.state.sync.is_anchored()
    }

    pub fn clock_offset(&self) -> i64 {
        self.state.clock.offset()
    }

    pub fn peripheral_status(&self, name: &str) -> Option<PeripheralStatus> {
        self.state
            .peripherals
            .iter()
            .find(|slot| slot.name() == name)
            .map(|slot| slot.status)
    }

    pub fn router_stats(&self) -> &RouterStats {
        self.state.router.stats()
    }

    pub fn scheduler_stats(&self) -> &SchedulerStats {
        self.scheduler.stats()
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn scheduler(&self) -> &Scheduler<NodeState> {
        &self.scheduler
    }

    /// For registering application tasks alongside the role's
    pub fn scheduler_mut(&mut self) -> &mut Scheduler<NodeState> {
        &mut self.scheduler
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AudioPlayback, AudioPlayer, Iterations, PeripheralError, RoleConfig};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use tagmesh_mesh::{MeshError, RouterConfig};
    use tagmesh_time::ManualClock;

    /// Transport whose inbox and outbox are visible to the test
    #[derive(Clone, Default)]
    struct Wire {
        inbox: Rc<RefCell<VecDeque<Bytes>>>,
        outbox: Rc<RefCell<Vec<Bytes>>>,
    }

    impl Transport for Wire {
        fn transmit(&mut self, frame: Bytes) -> MeshResult<()> {
            self.outbox.borrow_mut().push(frame);
            Ok(())
        }

        fn receive(&mut self) -> Option<Bytes> {
            self.inbox.borrow_mut().pop_front()
        }
    }

    /// Plays for a fixed number of pumps and records when it was stepped
    #[derive(Clone)]
    struct Track {
        remaining: Rc<RefCell<u32>>,
        fail: bool,
    }

    impl AudioPlayer for Track {
        fn begin(&mut self) -> Result<(), PeripheralError> {
            if self.fail {
                return Err(PeripheralError::InitFailed {
                    name: "audio".into(),
                    reason: "no codec".into(),
                });
            }
            Ok(())
        }

        fn is_running(&self) -> bool {
            *self.remaining.borrow() > 0
        }

        fn pump(&mut self) {
            *self.remaining.borrow_mut() -= 1;
        }

        fn stop(&mut self) {}
    }

    fn config(id: u32) -> NodeConfig {
        NodeConfig::hardware_verification(Role::Target, NodeId::new(id))
    }

    fn node(id: u32, hardware: Hardware) -> (MeshNode<Wire, ManualClock>, Wire, ManualClock) {
        let wire = Wire::default();
        let clock = ManualClock::new(0);
        let node = MeshNode::new(&config(id), hardware, wire.clone(), clock.clone()).unwrap();
        (node, wire, clock)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = MeshNode::new(
            &NodeConfig::default(),
            Hardware::new(),
            Wire::default(),
            ManualClock::new(0),
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_lone_node_keeps_clock_and_announces() {
        let (mut node, wire, clock) = node(1, Hardware::new());

        for _ in 0..250 {
            node.update().unwrap();
            clock.advance(10);
        }

        assert_eq!(node.clock_offset(), 0);
        assert!(!node.is_anchored());
        assert_eq!(node.peer_count(), 0);
        assert_eq!(node.node_list(true), vec![NodeId::new(1)]);

        // Announcement and beacon at 0, 1000 and 2000 ms
        let kinds: Vec<_> = wire
            .outbox
            .borrow()
            .iter()
            .map(|raw| Frame::decode(raw).unwrap().header.kind)
            .collect();
        assert_eq!(kinds.len(), 6);
        assert_eq!(
            kinds.iter().filter(|k| **k == FrameKind::TimeAnnounce).count(),
            3
        );
    }

    #[test]
    fn test_status_task_reports_every_second() {
        let (mut node, _wire, clock) = node(1, Hardware::new());
        node.update().unwrap();
        let first = node.last_status_report().cloned().unwrap();
        assert_eq!(first.time, LogicalTime::ZERO);

        clock.advance(999);
        node.update().unwrap();
        assert_eq!(node.last_status_report().unwrap().time, LogicalTime::ZERO);

        clock.advance(1);
        node.update().unwrap();
        assert_eq!(
            node.last_status_report().unwrap().time,
            LogicalTime::from_millis(1000)
        );
    }

    #[test]
    fn test_audio_restart_delayed() {
        let remaining = Rc::new(RefCell::new(3));
        let track = Track {
            remaining: remaining.clone(),
            fail: false,
        };
        let (mut node, _wire, clock) = node(1, Hardware::new().with_audio(AudioPlayback::new(track)));
        let audio = node.state().peripherals()[0].task();

        // Three pumps at 0, 10, 20 then stopped at 30
        for _ in 0..4 {
            node.update().unwrap();
            clock.advance(10);
        }
        assert_eq!(node.peripheral_status("audio"), Some(PeripheralStatus::Idle));
        let info = node.scheduler().task_info(audio).unwrap();
        assert_eq!(info.next_due, LogicalTime::from_millis(5_030));
        assert_eq!(info.runs, 4);

        // No earlier re-execution
        while clock.now_ms() < 5_030 {
            node.update().unwrap();
            clock.advance(10);
        }
        assert_eq!(node.scheduler().task_info(audio).unwrap().runs, 4);

        node.update().unwrap();
        assert_eq!(node.scheduler().task_info(audio).unwrap().runs, 5);
    }

    #[test]
    fn test_restart_delay_holds_while_clock_slews_back() {
        let remaining = Rc::new(RefCell::new(1));
        let track = Track {
            remaining: remaining.clone(),
            fail: false,
        };
        let mut cfg = config(1);
        cfg.sync.start_anchored = true;
        let wire = Wire::default();
        let clock = ManualClock::new(10_000);
        let mut node = MeshNode::new(
            &cfg,
            Hardware::new().with_audio(AudioPlayback::new(track)),
            wire.clone(),
            clock.clone(),
        )
        .unwrap();
        let audio = node.state().peripherals()[0].task();

        // A neighbour running 2 s behind announces every update
        let mut neighbour = Router::new(NodeId::new(2), cfg.mesh.tag(), RouterConfig::default());
        let feeder = Wire::default();

        let mut finished = None;
        let mut rerun = None;
        for _ in 0..1000 {
            let behind = LogicalTime::from_millis(clock.now_ms() - 2_000);
            neighbour
                .send_control(
                    FrameKind::TimeAnnounce,
                    TimeAnnounce::new(behind, true).encode(),
                    behind,
                )
                .unwrap();
            neighbour.flush(&mut feeder.clone());
            wire.inbox.borrow_mut().extend(feeder.outbox.borrow_mut().drain(..));
            wire.outbox.borrow_mut().clear();

            node.update().unwrap();
            match node.scheduler().task_info(audio).unwrap().runs {
                2 if finished.is_none() => finished = Some(node.now()),
                3 if rerun.is_none() => rerun = Some(node.now()),
                _ => {}
            }
            clock.advance(10);
        }

        assert!(node.clock_offset() < -1_900);
        let finished = finished.unwrap();
        let rerun = rerun.unwrap();
        assert!(rerun.signed_diff(finished) >= 5_000);
    }

    #[test]
    fn test_failed_peripheral_offline_and_never_enabled() {
        let track = Track {
            remaining: Rc::new(RefCell::new(10)),
            fail: true,
        };
        let (mut node, _wire, clock) = node(1, Hardware::new().with_audio(AudioPlayback::new(track)));
        let audio = node.state().peripherals()[0].task();

        for _ in 0..10 {
            node.update().unwrap();
            clock.advance(10);
        }

        assert!(!node.scheduler().is_enabled(audio));
        assert_eq!(node.scheduler().task_info(audio).unwrap().runs, 0);
        assert_eq!(node.peripheral_status("audio"), Some(PeripheralStatus::Offline));
        assert!(node.status_report().to_string().contains("audio: offline"));
    }

    #[test]
    fn test_message_delivery_between_nodes() {
        let (mut a, a_wire, _) = node(1, Hardware::new());
        let (mut b, b_wire, _) = node(2, Hardware::new());
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        b.on_receive(move |from, payload| sink.borrow_mut().push((from, payload.to_vec())));

        a.broadcast(&b"hello"[..]).unwrap();
        a.update().unwrap();
        b_wire.inbox.borrow_mut().extend(a_wire.outbox.borrow_mut().drain(..));
        b.update().unwrap();

        assert_eq!(received.borrow().as_slice(), &[(NodeId::new(1), b"hello".to_vec())]);
        assert_eq!(b.node_list(true), vec![NodeId::new(1), NodeId::new(2)]);
        assert_eq!(b.node_list(false), vec![NodeId::new(1)]);
    }

    #[test]
    fn test_collision_reported_but_node_keeps_running() {
        let (mut a, a_wire, _) = node(1, Hardware::new());
        let (mut impostor, impostor_wire, _) = node(1, Hardware::new());

        impostor.broadcast(&b"x"[..]).unwrap();
        impostor.update().unwrap();
        // Only the data frame; a has not sent anything yet
        a_wire
            .inbox
            .borrow_mut()
            .extend(impostor_wire.outbox.borrow_mut().drain(..).take(1));

        let err = a.update().unwrap_err();
        assert_eq!(err, MeshError::NodeIdCollision(NodeId::new(1)));
        assert_eq!(a.stats().collisions, 1);
        assert!(a.update().is_ok());
    }

    #[test]
    fn test_application_task_can_send() {
        let (mut node, wire, _clock) = node(1, Hardware::new());
        let now = node.now();
        let id = node.scheduler_mut().add_task(
            "app",
            Duration::from_secs(1),
            Iterations::Once,
            |state: &mut NodeState, _: &mut TaskControl| {
                let message = Message::broadcast(state.id(), &b"from task"[..]);
                state.send(message).unwrap();
            },
        );
        node.scheduler_mut().enable(id, now).unwrap();
        node.update().unwrap();

        let payloads: Vec<_> = wire
            .outbox
            .borrow()
            .iter()
            .map(|raw| Frame::decode(raw).unwrap())
            .filter(|f| f.header.kind == FrameKind::Data)
            .map(|f| f.payload)
            .collect();
        assert_eq!(payloads, vec![Bytes::from_static(b"from task")]);
    }

    #[test]
    fn test_controller_role_without_hardware() {
        let mut config = config(4);
        config.role = RoleConfig::controller();
        let node = MeshNode::new(&config, Hardware::new(), Wire::default(), ManualClock::new(0))
            .unwrap();
        assert_eq!(node.role(), Role::Controller);
        assert_eq!(node.label(), "Controller");
        // Only the status task
        assert_eq!(node.scheduler().len(), 1);
    }
}
