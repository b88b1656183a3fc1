//! Mesh layer errors

use tagmesh_core::{NodeId, TagmeshError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// A frame claiming our id arrived that we never sent
    #[error("Node id collision: another node is using {0}")]
    NodeIdCollision(NodeId),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Wire(#[from] TagmeshError),
}

pub type MeshResult<T> = Result<T, MeshError>;
