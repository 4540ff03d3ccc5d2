//! Murmur OTA - firmware distribution over the mesh
//!
//! The gateway fetches images from the external server and streams them
//! into the mesh as a manifest plus fixed-size chunks; target nodes buffer
//! chunks into a staging slot, request only what they missed, verify the
//! whole image, and mark it pending for the bootloader. A session either
//! activates a complete, checksum-verified image or leaves the running
//! firmware untouched. There is no partial activation.

pub mod distributor;
pub mod firmware;
pub mod receiver;
pub mod session;

pub use distributor::*;
pub use firmware::*;
pub use receiver::*;
pub use session::*;

use sha2::{Digest, Sha256};

/// Whole-image checksum carried by the manifest.
pub fn image_checksum(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
