//! Murmur Elect - coordinator selection
//!
//! Not an election protocol: the coordinator is a pure function of the
//! locally visible node ids, recomputed on every topology change. Nodes
//! with identical views compute identical coordinators; during churn,
//! views differ briefly and so may the answers. That staleness is bounded
//! and self-healing, not an error.

pub mod selector;

pub use selector::*;
