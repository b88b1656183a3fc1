//! TagMesh Runtime - Node update loop and cooperative scheduling
//!
//! This crate ties the mesh layers together for one node:
//! - `scheduler`: run-to-completion periodic tasks on a single thread
//! - `peripheral`: the step contract for external collaborators
//! - `role`: Controller / Target task plans
//! - `node`: `MeshNode`, the single update entry point
//! - `status`: line-oriented status report
//! - `config` / `logging`: node configuration and tracing setup

pub mod config;
pub mod error;
pub mod logging;
pub mod node;
pub mod peripheral;
pub mod role;
pub mod scheduler;
pub mod status;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use node::*;
pub use peripheral::*;
pub use role::*;
pub use scheduler::*;
pub use status::*;
