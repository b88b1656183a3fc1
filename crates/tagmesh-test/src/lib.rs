//! TagMesh Test Harness - Multi-node simulation
//!
//! This crate provides:
//! - A simulated radio medium with configurable topology and loss
//! - Fake audio, pixel strip, display and GPIO collaborators
//! - A cluster runner that steps many nodes in lock-step
//! - End-to-end scenarios for sync convergence and relay

pub mod fakes;
pub mod medium;
pub mod scenario;

pub use fakes::*;
pub use medium::*;
pub use scenario::*;
