//! Murmur Runtime - the node facade and its cooperative tick loop
//!
//! One `SwarmNode` per device. The transport feeds it raw payloads and
//! topology events; everything else happens inside `tick()`, single
//! threaded, with no stage ever blocking on IO. Outbound traffic is pulled
//! by the transport via `pop_outgoing`.

pub mod commands;
pub mod node;

pub use commands::*;
pub use node::*;
