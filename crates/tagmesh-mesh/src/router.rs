//! Message router - flood relay with duplicate suppression
//!
//! Outbound frames are queued and drained to the transport once per update.
//! Inbound frames go through, in order:
//! 1. decode (malformed frames are counted and dropped)
//! 2. mesh tag check (frames from other meshes are ignored)
//! 3. self-origin check (our own frames echoed back vs. an id collision)
//! 4. last-hop refresh in the registry
//! 5. per-origin duplicate window, then origin refresh in the registry
//! 6. control frames are handed back to the caller; data frames are
//!    delivered to the handler and relayed with a decremented hop budget

use std::collections::VecDeque;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tagmesh_core::{LogicalTime, Message, NodeId, TagmeshError};
use tagmesh_wire::{Frame, FrameHeader, FrameKind, MAX_PAYLOAD_SIZE};
use tracing::{debug, error, info, trace, warn};

use crate::{Admission, DedupFilter, MeshError, MeshResult, NodeRegistry, Transport};

/// Inbound application handler: `(sender, payload)`
pub type MessageHandler = Box<dyn FnMut(NodeId, &[u8])>;

/// Router configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Outbound queue capacity; new frames are dropped when full
    pub max_outbound: usize,
    /// Hop budget given to application frames
    pub max_hops: u8,
    /// Per-origin duplicate window (at most 64)
    pub dedup_window: u16,
    /// Own sequence numbers remembered to recognise echoes
    pub echo_window: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            max_outbound: 64,
            max_hops: 8,
            dedup_window: 64,
            echo_window: 256,
        }
    }
}

impl RouterConfig {
    /// Small queues for constrained targets
    pub fn constrained() -> Self {
        RouterConfig {
            max_outbound: 16,
            max_hops: 4,
            dedup_window: 32,
            echo_window: 64,
        }
    }
}

/// Router counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Frames handed to the transport
    pub sent: u64,
    /// Distinct frames accepted from the medium
    pub received: u64,
    /// Application payloads passed to the handler
    pub delivered: u64,
    /// Frames forwarded on behalf of other nodes
    pub relayed: u64,
    /// Duplicates and echoes of our own frames
    pub duplicates: u64,
    /// Frames from other meshes
    pub foreign: u64,
    /// Frames that failed to decode
    pub malformed: u64,
    /// Frames dropped because the outbound queue was full
    pub dropped: u64,
    pub transmit_errors: u64,
    pub collisions: u64,
}

pub struct Router {
    local: NodeId,
    mesh_tag: u32,
    config: RouterConfig,
    session: u32,
    next_seq: u16,
    outbound: VecDeque<Frame>,
    dedup: DedupFilter,
    sent_seqs: VecDeque<u16>,
    handler: Option<MessageHandler>,
    stats: RouterStats,
}

impl Router {
    /// Router with a random session for this boot
    pub fn new(local: NodeId, mesh_tag: u32, config: RouterConfig) -> Self {
        Self::with_session(local, mesh_tag, config, rand::random())
    }

    pub fn with_session(local: NodeId, mesh_tag: u32, config: RouterConfig, session: u32) -> Self {
        Router {
            local,
            mesh_tag,
            config,
            session,
            next_seq: 0,
            outbound: VecDeque::with_capacity(config.max_outbound),
            dedup: DedupFilter::new(config.dedup_window),
            sent_seqs: VecDeque::with_capacity(config.echo_window),
            handler: None,
            stats: RouterStats::default(),
        }
    }

    #[inline]
    pub fn local_id(&self) -> NodeId {
        self.local
    }

    #[inline]
    pub fn mesh_tag(&self) -> u32 {
        self.mesh_tag
    }

    /// Session stamped on every frame this router originates
    #[inline]
    pub fn session(&self) -> u32 {
        self.session
    }

    #[inline]
    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    /// Frames waiting for the next flush
    #[inline]
    pub fn pending(&self) -> usize {
        self.outbound.len()
    }

    /// Register the inbound handler, replacing any previous one
    pub fn on_receive<F>(&mut self, handler: F)
    where
        F: FnMut(NodeId, &[u8]) + 'static,
    {
        self.handler = Some(Box::new(handler));
    }

    /// Queue an application message for flooding
    ///
    /// Never blocks. A full queue drops the message and counts it.
    pub fn send(&mut self, message: Message, now: LogicalTime) -> MeshResult<()> {
        let mut header = self.originate(FrameKind::Data, now);
        header.ttl = self.config.max_hops.max(1);
        header.target = message.target();
        self.enqueue_new(header, message.into_payload())
    }

    /// Queue a single-hop control frame
    pub fn send_control(
        &mut self,
        kind: FrameKind,
        payload: Bytes,
        now: LogicalTime,
    ) -> MeshResult<()> {
        let mut header = self.originate(kind, now);
        header.ttl = 1;
        self.enqueue_new(header, payload)
    }

    /// Process one raw frame heard from the medium
    ///
    /// Returns control frames for the caller to interpret. Only an id
    /// collision is an error; everything else is counted and dropped.
    pub fn ingest(
        &mut self,
        raw: &[u8],
        now: LogicalTime,
        registry: &mut NodeRegistry,
    ) -> MeshResult<Option<Frame>> {
        let frame = match Frame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.malformed += 1;
                trace!(error = %e, len = raw.len(), "dropping malformed frame");
                return Ok(None);
            }
        };
        let header = &frame.header;

        if header.mesh_tag != self.mesh_tag {
            self.stats.foreign += 1;
            trace!(tag = header.mesh_tag, "ignoring frame from another mesh");
            return Ok(None);
        }

        if !header.origin.is_assigned() {
            self.stats.malformed += 1;
            trace!("dropping frame without origin");
            return Ok(None);
        }

        if header.origin == self.local {
            if header.session == self.session && self.sent_seqs.contains(&header.seq) {
                self.stats.duplicates += 1;
                trace!(seq = header.seq, "own frame echoed back");
                return Ok(None);
            }
            self.stats.collisions += 1;
            error!(
                node = %self.local,
                seq = header.seq,
                session = header.session,
                via = %header.last_hop,
                "another node is using this node id"
            );
            return Err(MeshError::NodeIdCollision(self.local));
        }

        if header.last_hop != header.origin && header.last_hop != self.local {
            registry.upsert(header.last_hop, now, 1);
        }

        match self.dedup.accept(header.origin, header.session, header.seq) {
            Admission::Accepted => {}
            Admission::Restarted => {
                info!(origin = %header.origin, session = header.session, "peer restarted");
            }
            Admission::Duplicate => {
                self.stats.duplicates += 1;
                debug!(origin = %header.origin, seq = header.seq, "duplicate frame suppressed");
                return Ok(None);
            }
        }
        registry.upsert(header.origin, now, header.hops.saturating_add(1));

        self.stats.received += 1;
        trace!(
            origin = %header.origin,
            seq = header.seq,
            kind = ?header.kind,
            hops = header.hops,
            "frame accepted"
        );

        if header.kind.is_control() {
            return Ok(Some(frame));
        }

        self.route_data(frame);
        Ok(None)
    }

    /// Forget duplicate state for origins that left the mesh
    pub fn forget(&mut self, origin: NodeId) {
        self.dedup.forget(origin);
    }

    /// Drain the outbound queue to the transport
    ///
    /// Returns the number of frames transmitted. Failed frames are dropped.
    pub fn flush<T: Transport + ?Sized>(&mut self, transport: &mut T) -> usize {
        let mut transmitted = 0;
        while let Some(frame) = self.outbound.pop_front() {
            let bytes = match frame.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "failed to encode outbound frame");
                    self.stats.transmit_errors += 1;
                    continue;
                }
            };
            match transport.transmit(bytes) {
                Ok(()) => {
                    self.stats.sent += 1;
                    transmitted += 1;
                }
                Err(e) => {
                    warn!(error = %e, seq = frame.header.seq, "transmit failed");
                    self.stats.transmit_errors += 1;
                }
            }
        }
        transmitted
    }

    fn route_data(&mut self, frame: Frame) {
        let header = &frame.header;
        let for_us = header.target.map_or(true, |t| t == self.local);
        let only_us = header.target == Some(self.local);

        if for_us {
            match self.handler.as_mut() {
                Some(handler) => {
                    handler(header.origin, &frame.payload);
                    self.stats.delivered += 1;
                }
                None => trace!(origin = %header.origin, "no handler registered"),
            }
        }

        if only_us || header.ttl <= 1 {
            return;
        }

        let mut relay = frame.header.clone();
        relay.ttl -= 1;
        relay.hops = relay.hops.saturating_add(1);
        relay.last_hop = self.local;
        relay.flags.set_relayed(true);
        debug!(
            origin = %relay.origin,
            seq = relay.seq,
            ttl = relay.ttl,
            "relaying frame"
        );
        if self.enqueue(Frame::new(relay, frame.payload)) {
            self.stats.relayed += 1;
        }
    }

    fn originate(&mut self, kind: FrameKind, now: LogicalTime) -> FrameHeader {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        let mut header = FrameHeader::new(kind, self.mesh_tag, self.local);
        header.session = self.session;
        header.seq = seq;
        header.timestamp = now;
        header
    }

    fn enqueue_new(&mut self, header: FrameHeader, payload: Bytes) -> MeshResult<()> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TagmeshError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            }
            .into());
        }

        if self.sent_seqs.len() >= self.config.echo_window.max(1) {
            self.sent_seqs.pop_front();
        }
        self.sent_seqs.push_back(header.seq);

        self.enqueue(Frame::new(header, payload));
        Ok(())
    }

    fn enqueue(&mut self, frame: Frame) -> bool {
        if self.outbound.len() >= self.config.max_outbound {
            self.stats.dropped += 1;
            warn!(
                seq = frame.header.seq,
                capacity = self.config.max_outbound,
                "outbound queue full, dropping frame"
            );
            return false;
        }
        self.outbound.push_back(frame);
        true
    }
}
