//! TagMesh Core - Fundamental types shared by every layer
//!
//! This crate defines:
//! - Node identity (`NodeId`)
//! - Mesh-wide logical time (`LogicalTime`)
//! - Application messages (`Message`)
//! - Wire-level error types

pub mod error;
pub mod id;
pub mod message;
pub mod time;

pub use error::*;
pub use id::*;
pub use message::*;
pub use time::*;
