//! Complete frame: header plus payload

use bytes::{BufMut, Bytes, BytesMut};
use tagmesh_core::{TagmeshError, TagmeshResult};

use crate::{FrameHeader, HEADER_SIZE};

/// Largest frame the radio carries in one transmission
pub const MAX_FRAME_SIZE: usize = 1400;

/// Largest payload that fits next to the fixed header
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - HEADER_SIZE;

/// A frame as carried on the medium
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(header: FrameHeader, payload: Bytes) -> Self {
        Frame { header, payload }
    }

    /// Serialize to bytes, filling in the payload length
    pub fn encode(&self) -> TagmeshResult<Bytes> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TagmeshError::PayloadTooLarge {
                len: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut header = self.header.clone();
        header.payload_len = self.payload.len() as u16;

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        header.write_to(&mut buf);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Parse a frame from raw bytes
    ///
    /// Trailing bytes past the declared payload length are ignored.
    pub fn decode(buf: &[u8]) -> TagmeshResult<Self> {
        if buf.len() > MAX_FRAME_SIZE {
            return Err(TagmeshError::PayloadTooLarge {
                len: buf.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let header = FrameHeader::parse(buf)?;
        let end = HEADER_SIZE + header.payload_len as usize;
        if buf.len() < end {
            return Err(TagmeshError::BufferTooShort {
                expected: end,
                actual: buf.len(),
            });
        }

        let payload = Bytes::copy_from_slice(&buf[HEADER_SIZE..end]);
        Ok(Frame { header, payload })
    }

    /// Total encoded size
    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FrameKind;
    use proptest::prelude::*;
    use tagmesh_core::{LogicalTime, NodeId};

    fn data_frame(payload: &'static [u8]) -> Frame {
        let mut header = FrameHeader::new(FrameKind::Data, 0x1234_5678, NodeId::new(7));
        header.seq = 42;
        header.ttl = 8;
        header.timestamp = LogicalTime::from_millis(5_000);
        Frame::new(header, Bytes::from_static(payload))
    }

    #[test]
    fn test_frame_encode_decode() {
        let frame = data_frame(b"hello mesh");
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded.len(), frame.encoded_len());

        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded.payload, frame.payload);
        assert_eq!(decoded.header.origin, NodeId::new(7));
        assert_eq!(decoded.header.seq, 42);
        assert_eq!(decoded.header.payload_len, 10);
    }

    #[test]
    fn test_frame_truncated_payload() {
        let encoded = data_frame(b"hello mesh").encode().unwrap();
        let err = Frame::decode(&encoded[..encoded.len() - 3]).unwrap_err();
        assert!(matches!(err, TagmeshError::BufferTooShort { .. }));
    }

    #[test]
    fn test_frame_payload_too_large() {
        let mut frame = data_frame(b"");
        frame.payload = Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE + 1]);
        assert!(matches!(
            frame.encode(),
            Err(TagmeshError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_frame_max_payload_fits() {
        let mut frame = data_frame(b"");
        frame.payload = Bytes::from(vec![0xAB; MAX_PAYLOAD_SIZE]);
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded.len(), MAX_FRAME_SIZE);
        assert!(Frame::decode(&encoded).is_ok());
    }

    proptest! {
        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = Frame::decode(&bytes);
        }
    }
}
