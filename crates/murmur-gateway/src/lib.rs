//! Murmur Gateway - telemetry bridge
//!
//! Active only on gateway-role nodes. Collects telemetry broadcasts from
//! the mesh plus the gateway's own snapshot and relays them to an external
//! endpoint over the secondary uplink. Strictly mesh-to-external: failures
//! are retried with bounded backoff then dropped, and nothing flows back
//! into the mesh.

pub mod bridge;
pub mod uplink;

pub use bridge::*;
pub use uplink::*;

/// Telemetry payload pushed upstream, identical to what the mesh carries.
pub use murmur_wire::TelemetryBody as TelemetryRecord;
