//! Firmware slot seam
//!
//! The platform owns the real dual-slot flash layout and its
//! rollback-on-bad-boot behavior; this trait is the capability the OTA
//! engine needs from it. `MemoryFirmwareStore` backs tests and RAM-staged
//! images with the same contract.

use std::collections::BTreeMap;

use murmur_core::{MurmurError, MurmurResult};

use crate::image_checksum;

/// Staging and activation capability of the platform firmware slots.
pub trait FirmwareStore {
    /// Open the staging slot for a new image of `total_chunks` parts.
    /// Discards anything previously staged.
    fn begin(&mut self, total_chunks: u32) -> MurmurResult<()>;

    /// Write one chunk into the staging slot.
    fn stage(&mut self, index: u32, chunk: &[u8]) -> MurmurResult<()>;

    /// Check the fully-staged image against the expected checksum.
    fn verify(&mut self, expected: &[u8; 32]) -> MurmurResult<bool>;

    /// Mark the staged image pending; the platform boots into it on the
    /// next restart and keeps the previous image for rollback.
    fn activate(&mut self) -> MurmurResult<()>;

    /// Tell the platform the currently-running image has proven itself.
    fn mark_valid(&mut self) -> MurmurResult<()>;

    /// Discard the staged image. The running firmware is untouched.
    fn rollback(&mut self) -> MurmurResult<()>;
}

impl<T: FirmwareStore + ?Sized> FirmwareStore for Box<T> {
    fn begin(&mut self, total_chunks: u32) -> MurmurResult<()> {
        (**self).begin(total_chunks)
    }
    fn stage(&mut self, index: u32, chunk: &[u8]) -> MurmurResult<()> {
        (**self).stage(index, chunk)
    }
    fn verify(&mut self, expected: &[u8; 32]) -> MurmurResult<bool> {
        (**self).verify(expected)
    }
    fn activate(&mut self) -> MurmurResult<()> {
        (**self).activate()
    }
    fn mark_valid(&mut self) -> MurmurResult<()> {
        (**self).mark_valid()
    }
    fn rollback(&mut self) -> MurmurResult<()> {
        (**self).rollback()
    }
}

/// In-memory firmware store: the test double, and a usable RAM staging
/// area for hosted builds.
#[derive(Debug, Default)]
pub struct MemoryFirmwareStore {
    total_chunks: Option<u32>,
    staged: BTreeMap<u32, Vec<u8>>,
    pending: Option<Vec<u8>>,
    running_valid: bool,
}

impl MemoryFirmwareStore {
    pub fn new() -> Self {
        MemoryFirmwareStore::default()
    }

    /// The image marked pending for next boot, if any.
    pub fn pending_image(&self) -> Option<&[u8]> {
        self.pending.as_deref()
    }

    pub fn running_valid(&self) -> bool {
        self.running_valid
    }

    pub fn staged_chunks(&self) -> usize {
        self.staged.len()
    }

    fn assemble(&self) -> MurmurResult<Vec<u8>> {
        let total = self.total_chunks.ok_or(MurmurError::NothingStaged)?;
        if self.staged.len() != total as usize {
            return Err(MurmurError::NothingStaged);
        }
        let mut image = Vec::new();
        for chunk in self.staged.values() {
            image.extend_from_slice(chunk);
        }
        Ok(image)
    }
}

impl FirmwareStore for MemoryFirmwareStore {
    fn begin(&mut self, total_chunks: u32) -> MurmurResult<()> {
        self.total_chunks = Some(total_chunks);
        self.staged.clear();
        Ok(())
    }

    fn stage(&mut self, index: u32, chunk: &[u8]) -> MurmurResult<()> {
        let total = self.total_chunks.ok_or(MurmurError::NothingStaged)?;
        if index >= total {
            return Err(MurmurError::ChunkOutOfRange { index, total });
        }
        self.staged.insert(index, chunk.to_vec());
        Ok(())
    }

    fn verify(&mut self, expected: &[u8; 32]) -> MurmurResult<bool> {
        let image = self.assemble()?;
        Ok(&image_checksum(&image) == expected)
    }

    fn activate(&mut self) -> MurmurResult<()> {
        let image = self.assemble()?;
        self.pending = Some(image);
        self.staged.clear();
        self.total_chunks = None;
        Ok(())
    }

    fn mark_valid(&mut self) -> MurmurResult<()> {
        self.running_valid = true;
        Ok(())
    }

    fn rollback(&mut self) -> MurmurResult<()> {
        self.staged.clear();
        self.total_chunks = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_verify_activate() {
        let mut store = MemoryFirmwareStore::new();
        let image = vec![0xAB; 100];
        let checksum = image_checksum(&image);

        store.begin(2).unwrap();
        store.stage(0, &image[..64]).unwrap();
        store.stage(1, &image[64..]).unwrap();

        assert!(store.verify(&checksum).unwrap());
        store.activate().unwrap();
        assert_eq!(store.pending_image(), Some(&image[..]));
        assert_eq!(store.staged_chunks(), 0);
    }

    #[test]
    fn test_verify_incomplete_fails() {
        let mut store = MemoryFirmwareStore::new();
        store.begin(2).unwrap();
        store.stage(0, &[1, 2, 3]).unwrap();
        assert!(store.verify(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_verify_detects_corruption() {
        let image = vec![7u8; 32];
        let checksum = image_checksum(&image);

        let mut store = MemoryFirmwareStore::new();
        store.begin(1).unwrap();
        store.stage(0, &[8u8; 32]).unwrap();
        assert!(!store.verify(&checksum).unwrap());
    }

    #[test]
    fn test_rollback_discards_staging_only() {
        let mut store = MemoryFirmwareStore::new();
        store.begin(1).unwrap();
        store.stage(0, &[1]).unwrap();
        store.rollback().unwrap();

        assert_eq!(store.staged_chunks(), 0);
        assert!(store.pending_image().is_none());
        assert!(store.stage(0, &[1]).is_err());
    }

    #[test]
    fn test_stage_out_of_range() {
        let mut store = MemoryFirmwareStore::new();
        store.begin(2).unwrap();
        assert!(matches!(
            store.stage(2, &[0]),
            Err(MurmurError::ChunkOutOfRange { .. })
        ));
    }

    #[test]
    fn test_begin_restarts_staging() {
        let mut store = MemoryFirmwareStore::new();
        store.begin(1).unwrap();
        store.stage(0, &[1]).unwrap();
        store.begin(3).unwrap();
        assert_eq!(store.staged_chunks(), 0);
    }
}
