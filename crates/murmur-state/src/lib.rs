//! Murmur State - replicated key-value store
//!
//! Every node holds the full map. Writes are stamped (tick, origin) and
//! reconciled under last-writer-wins, so delivery order, duplication and
//! partitions all collapse to the same converged state. Watchers observe
//! accepted changes only.

pub mod store;
pub mod watch;

pub use store::*;
pub use watch::*;
