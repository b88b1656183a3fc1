//! TagMesh Mesh - Self-organizing flood mesh
//!
//! Nodes discover each other from the frames they hear. Application frames
//! are flooded: every node delivers a frame at most once and forwards it at
//! most once, with a hop budget bounding relay on cyclic topologies.

pub mod dedup;
pub mod error;
pub mod params;
pub mod registry;
pub mod router;
pub mod transport;

pub use dedup::*;
pub use error::*;
pub use params::*;
pub use registry::*;
pub use router::*;
pub use transport::*;
