//! End-to-end scenario tests
//!
//! Whole-swarm runs over chaos links, checking the properties the mesh
//! promises: replica convergence, idempotent delivery, deterministic
//! tie-breaks, a single coordinator per settled view, atomic firmware
//! updates and bounded telemetry failure handling.
