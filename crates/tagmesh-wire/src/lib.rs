//! TagMesh Wire Protocol - Binary frame format
//!
//! Every frame on the radio is:
//! - Fixed header (38 bytes): routing, dedup and timing fields
//! - Payload: application bytes or a control record
//!
//! The physical encoding of frames onto the medium belongs to the transport;
//! this crate only defines the bytes the transport carries.

pub mod control;
pub mod flags;
pub mod frame;
pub mod header;

pub use control::*;
pub use flags::*;
pub use frame::*;
pub use header::*;
