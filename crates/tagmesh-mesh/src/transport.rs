//! Physical transport seam
//!
//! The radio is an external collaborator. A transport moves opaque frame
//! bytes to every direct neighbour and hands back what it heard, in arrival
//! order.

use bytes::Bytes;

use crate::MeshResult;

pub trait Transport {
    /// Broadcast one encoded frame to direct neighbours
    fn transmit(&mut self, frame: Bytes) -> MeshResult<()>;

    /// Next frame heard from a neighbour, if any
    fn receive(&mut self) -> Option<Bytes>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn transmit(&mut self, frame: Bytes) -> MeshResult<()> {
        (**self).transmit(frame)
    }

    fn receive(&mut self) -> Option<Bytes> {
        (**self).receive()
    }
}
