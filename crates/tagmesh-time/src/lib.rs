//! TagMesh Time - Mesh-wide logical time
//!
//! Each node keeps a `LogicalClock`: its hardware tick plus an offset that
//! the time-sync protocol slews toward its neighbours. Logical time never
//! moves backward on a node, whatever corrections are applied.
//!
//! - `hardware`: millisecond tick sources (system, manual for tests)
//! - `clock`: offset, slew clamp and monotonic floor
//! - `sync`: announce/observe exchange between adjacent nodes

pub mod clock;
pub mod hardware;
pub mod sync;

pub use clock::*;
pub use hardware::*;
pub use sync::*;
