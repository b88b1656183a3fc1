//! Application messages carried over the mesh

use bytes::Bytes;

use crate::NodeId;

/// An application message.
///
/// Immutable once built. The payload is reference counted, so handing a
/// message to the router's outbound queue does not copy it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    sender: NodeId,
    payload: Bytes,
    target: Option<NodeId>,
}

impl Message {
    /// Message for every reachable node
    pub fn broadcast(sender: NodeId, payload: impl Into<Bytes>) -> Self {
        Message {
            sender,
            payload: payload.into(),
            target: None,
        }
    }

    /// Message for a single node, relayed through the mesh if needed
    pub fn targeted(sender: NodeId, target: NodeId, payload: impl Into<Bytes>) -> Self {
        Message {
            sender,
            payload: payload.into(),
            target: Some(target),
        }
    }

    #[inline]
    pub fn sender(&self) -> NodeId {
        self.sender
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline]
    pub fn target(&self) -> Option<NodeId> {
        self.target
    }

    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.target.is_none()
    }

    /// Whether `node` should hand this message to its application handler
    #[inline]
    pub fn is_for(&self, node: NodeId) -> bool {
        self.target.map_or(true, |t| t == node)
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
