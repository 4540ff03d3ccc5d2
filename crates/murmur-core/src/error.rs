//! Error types for the murmur mesh

use thiserror::Error;

use crate::id::{NodeId, RoleTag};

/// Core murmur errors
#[derive(Error, Debug)]
pub enum MurmurError {
    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("Field too long: {field} is {actual} bytes, limit {limit}")]
    FieldTooLong {
        field: &'static str,
        actual: usize,
        limit: usize,
    },

    // OTA errors
    #[error("Chunk index {index} out of range (total {total})")]
    ChunkOutOfRange { index: u32, total: u32 },

    #[error("Checksum mismatch for role {role}")]
    ChecksumMismatch { role: RoleTag },

    #[error("OTA session already in flight for role {0}")]
    SessionBusy(RoleTag),

    #[error("No staged firmware image")]
    NothingStaged,

    // Gateway errors
    #[error("Telemetry uplink unavailable: {0}")]
    UplinkUnavailable(String),

    #[error("Uplink rejected push: {0}")]
    UplinkRejected(String),

    // Runtime errors
    #[error("Unknown peer {0}")]
    UnknownPeer(NodeId),
}

/// Result type for murmur operations
pub type MurmurResult<T> = Result<T, MurmurError>;
