//! Version stamps - the last-writer-wins ordering primitive
//!
//! Every state write carries a `(tick, origin)` pair. Comparing two stamps
//! lexicographically decides which write wins; the derived `Ord` on the
//! field order below IS the conflict-resolution rule. Equal ticks fall back
//! to the numerically greater origin id, so every node picks the same
//! winner no matter which write arrives first.

use crate::id::NodeId;
use crate::Tick;

/// Write version: local tick at write time plus the writing node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VersionStamp {
    /// Tick of the originating node's Lamport clock at write time
    pub tick: Tick,
    /// Node that produced the write
    pub origin: NodeId,
}

impl VersionStamp {
    #[inline]
    pub fn new(tick: Tick, origin: NodeId) -> Self {
        VersionStamp { tick, origin }
    }

    /// Serialized size on the wire (tick u64 + origin u32, little-endian)
    pub const WIRE_SIZE: usize = 12;

    pub fn to_bytes(self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0..8].copy_from_slice(&self.tick.to_le_bytes());
        buf[8..12].copy_from_slice(&self.origin.to_bytes());
        buf
    }

    pub fn from_bytes(bytes: [u8; Self::WIRE_SIZE]) -> Self {
        let tick = Tick::from_le_bytes(bytes[0..8].try_into().unwrap());
        let origin = NodeId::from_bytes(bytes[8..12].try_into().unwrap());
        VersionStamp { tick, origin }
    }
}
