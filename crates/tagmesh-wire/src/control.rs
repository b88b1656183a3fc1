//! Control payloads carried by single-hop frames

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tagmesh_core::{LogicalTime, TagmeshError, TagmeshResult};

/// Clock announcement payload
///
/// Layout: time u64 LE, anchored u8
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeAnnounce {
    /// Sender's logical time at transmission
    pub time: LogicalTime,
    /// Sender has joined the shared time base
    pub anchored: bool,
}

impl TimeAnnounce {
    pub const SIZE: usize = 9;

    pub fn new(time: LogicalTime, anchored: bool) -> Self {
        TimeAnnounce { time, anchored }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u64_le(self.time.as_millis());
        buf.put_u8(self.anchored as u8);
        buf.freeze()
    }

    pub fn decode(mut buf: &[u8]) -> TagmeshResult<Self> {
        if buf.len() < Self::SIZE {
            return Err(TagmeshError::BufferTooShort {
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }
        let time = LogicalTime::from_millis(buf.get_u64_le());
        let anchored = match buf.get_u8() {
            0 => false,
            1 => true,
            other => {
                return Err(TagmeshError::InvalidWireFormat(format!(
                    "Invalid anchored marker {}",
                    other
                )))
            }
        };
        Ok(TimeAnnounce { time, anchored })
    }
}

/// Neighbour presence payload
///
/// Layout: peer_count u16 LE
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Beacon {
    /// Number of peers the sender currently knows
    pub peer_count: u16,
}

impl Beacon {
    pub const SIZE: usize = 2;

    pub fn new(peer_count: u16) -> Self {
        Beacon { peer_count }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u16_le(self.peer_count);
        buf.freeze()
    }

    pub fn decode(mut buf: &[u8]) -> TagmeshResult<Self> {
        if buf.len() < Self::SIZE {
            return Err(TagmeshError::BufferTooShort {
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }
        Ok(Beacon {
            peer_count: buf.get_u16_le(),
        })
    }
}
