//! Murmur Test Harness - chaos links and whole-swarm simulation
//!
//! This crate provides:
//! - Seeded per-link chaos (delay, loss, duplication, reordering)
//! - A deterministic multi-node swarm simulator with partition controls
//! - End-to-end scenario tests over real `SwarmNode`s

pub mod chaos;
pub mod integration;
pub mod simulator;

pub use chaos::*;
pub use simulator::*;
