//! Fixed header for the TagMesh wire protocol
//!
//! Fixed header is 38 bytes:
//! - Byte 0: Version
//! - Byte 1: Frame kind
//! - Byte 2: Flags
//! - Byte 3: TTL (remaining hop budget)
//! - Byte 4: Hops travelled so far
//! - Byte 5: Reserved (zero)
//! - Bytes 6-7: Origin sequence number (LE)
//! - Bytes 8-11: Mesh tag (LE)
//! - Bytes 12-15: Origin node ID (LE)
//! - Bytes 16-19: Origin session, random per boot (LE)
//! - Bytes 20-23: Last hop node ID (LE)
//! - Bytes 24-27: Target node ID (LE, zero when broadcast)
//! - Bytes 28-35: Origin logical timestamp, ms (LE)
//! - Bytes 36-37: Payload length (LE)

use bytes::{Buf, BufMut};
use tagmesh_core::{LogicalTime, NodeId, TagmeshError, TagmeshResult};

use crate::FrameFlags;

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = 38;

/// Current wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Frame kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Application payload, relayed across the mesh
    Data = 0x01,
    /// Clock announcement, single hop
    TimeAnnounce = 0x02,
    /// Neighbour presence beacon, single hop
    Beacon = 0x03,
}

impl FrameKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(FrameKind::Data),
            0x02 => Some(FrameKind::TimeAnnounce),
            0x03 => Some(FrameKind::Beacon),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Control frames are consumed by the node itself and never relayed
    #[inline]
    pub fn is_control(self) -> bool {
        !matches!(self, FrameKind::Data)
    }
}

/// Fixed header structure
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub kind: FrameKind,
    pub flags: FrameFlags,
    /// Remaining hops this frame may still be forwarded
    pub ttl: u8,
    /// Hops travelled (0 when received straight from the origin's radio)
    pub hops: u8,
    /// Per-origin sequence number used for duplicate suppression
    pub seq: u16,
    /// Derived from the mesh join parameters
    pub mesh_tag: u32,
    pub origin: NodeId,
    /// Chosen by the origin at startup; sequence numbers restart with it
    pub session: u32,
    pub last_hop: NodeId,
    pub target: Option<NodeId>,
    /// Origin's logical time when the frame was created
    pub timestamp: LogicalTime,
    pub payload_len: u16,
}

impl FrameHeader {
    /// Create a header for a frame originating at `origin`
    pub fn new(kind: FrameKind, mesh_tag: u32, origin: NodeId) -> Self {
        FrameHeader {
            version: WIRE_VERSION,
            kind,
            flags: FrameFlags::NONE,
            ttl: 1,
            hops: 0,
            seq: 0,
            mesh_tag,
            origin,
            session: 0,
            last_hop: origin,
            target: None,
            timestamp: LogicalTime::ZERO,
            payload_len: 0,
        }
    }

    /// Parse header from bytes
    pub fn parse(mut buf: &[u8]) -> TagmeshResult<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(TagmeshError::BufferTooShort {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let version = buf.get_u8();
        if version != WIRE_VERSION {
            return Err(TagmeshError::UnsupportedVersion(version));
        }

        let kind_byte = buf.get_u8();
        let kind =
            FrameKind::from_byte(kind_byte).ok_or(TagmeshError::UnknownFrameKind(kind_byte))?;

        let flags = FrameFlags::new(buf.get_u8());
        if flags.unknown_bits() != 0 {
            return Err(TagmeshError::InvalidWireFormat(format!(
                "Unknown flag bits {:#04x}",
                flags.unknown_bits()
            )));
        }

        let ttl = buf.get_u8();
        let hops = buf.get_u8();
        let _reserved = buf.get_u8();
        let seq = buf.get_u16_le();
        let mesh_tag = buf.get_u32_le();
        let origin = NodeId::new(buf.get_u32_le());
        let session = buf.get_u32_le();
        let last_hop = NodeId::new(buf.get_u32_le());
        let raw_target = NodeId::new(buf.get_u32_le());
        let timestamp = LogicalTime::from_millis(buf.get_u64_le());
        let payload_len = buf.get_u16_le();

        let target = if flags.is_targeted() {
            if !raw_target.is_assigned() {
                return Err(TagmeshError::InvalidWireFormat(
                    "Targeted frame without target".into(),
                ));
            }
            Some(raw_target)
        } else {
            None
        };

        Ok(FrameHeader {
            version,
            kind,
            flags,
            ttl,
            hops,
            seq,
            mesh_tag,
            origin,
            session,
            last_hop,
            target,
            timestamp,
            payload_len,
        })
    }

    /// Serialize header into `buf`
    pub fn write_to(&self, buf: &mut impl BufMut) {
        let mut flags = self.flags;
        flags.set_targeted(self.target.is_some());

        buf.put_u8(self.version);
        buf.put_u8(self.kind.to_byte());
        buf.put_u8(flags.0);
        buf.put_u8(self.ttl);
        buf.put_u8(self.hops);
        buf.put_u8(0);
        buf.put_u16_le(self.seq);
        buf.put_u32_le(self.mesh_tag);
        buf.put_u32_le(self.origin.raw());
        buf.put_u32_le(self.session);
        buf.put_u32_le(self.last_hop.raw());
        buf.put_u32_le(self.target.unwrap_or(NodeId::UNASSIGNED).raw());
        buf.put_u64_le(self.timestamp.as_millis());
        buf.put_u16_le(self.payload_len);
    }
}

impl Default for FrameHeader {
    fn default() -> Self {
        FrameHeader::new(FrameKind::Data, 0, NodeId::UNASSIGNED)
    }
}
