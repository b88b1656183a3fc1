//! Error types for TagMesh wire handling

use thiserror::Error;

/// Core TagMesh errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TagmeshError {
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Unsupported wire version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown frame kind: {0}")]
    UnknownFrameKind(u8),

    #[error("Payload too large: {len} > {max}")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Result type for TagMesh wire operations
pub type TagmeshResult<T> = Result<T, TagmeshError>;
