//! Murmur Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout the murmur mesh:
//! - Identifiers (NodeId, RoleTag)
//! - Version stamps for last-writer-wins ordering
//! - Peer bookkeeping
//! - Shared error types

pub mod error;
pub mod id;
pub mod peer;
pub mod stamp;

pub use error::*;
pub use id::*;
pub use peer::*;
pub use stamp::*;

/// Local tick count, the coarse clock the whole mesh runs on.
///
/// One tick is one pass of the runtime loop; all timing knobs (telemetry
/// intervals, OTA timeouts) are expressed in ticks.
pub type Tick = u64;
