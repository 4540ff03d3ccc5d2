//! Receive side of firmware distribution.
//!
//! A node listens for manifests matching its own role, stages chunks into
//! the platform firmware store, and walks the session through verify and
//! activate. Verification and activation each take one `service()` call so
//! a tick never does more than one expensive step.

use tracing::{debug, info, warn};

use murmur_core::{MurmurResult, RoleTag, Tick};
use murmur_wire::{Message, MAX_NACK_INDICES};

use crate::firmware::FirmwareStore;
use crate::session::{ChunkBitmap, OtaPhase};

/// Receive-side tuning knobs.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Ticks between gap re-requests while chunks are outstanding.
    pub nack_interval: Tick,
    /// Ticks without progress before the session is abandoned.
    pub session_timeout: Tick,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            nack_interval: 20,
            session_timeout: 200,
        }
    }
}

/// Receive-side counters.
#[derive(Debug, Default, Clone)]
pub struct ReceiverStats {
    pub completed: u64,
    pub aborted_checksum: u64,
    pub aborted_timeout: u64,
    pub chunks_received: u64,
    pub nacks_sent: u64,
    pub manifests_ignored: u64,
}

struct Session {
    version: u32,
    checksum: [u8; 32],
    bitmap: ChunkBitmap,
    phase: OtaPhase,
    last_progress: Tick,
    last_nack: Tick,
}

/// Stages announced firmware images and activates them once verified.
pub struct OtaReceiver<S: FirmwareStore> {
    role: RoleTag,
    running_version: u32,
    store: S,
    config: ReceiverConfig,
    session: Option<Session>,
    reboot_pending: bool,
    stats: ReceiverStats,
}

impl<S: FirmwareStore> OtaReceiver<S> {
    pub fn new(role: RoleTag, running_version: u32, store: S, config: ReceiverConfig) -> Self {
        OtaReceiver {
            role,
            running_version,
            store,
            config,
            session: None,
            reboot_pending: false,
            stats: ReceiverStats::default(),
        }
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    pub fn running_version(&self) -> u32 {
        self.running_version
    }

    /// True once an activated image is waiting for a restart.
    pub fn reboot_pending(&self) -> bool {
        self.reboot_pending
    }

    /// The version currently being transferred, if any.
    pub fn session_version(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.version)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Report the running image healthy to the platform, closing its
    /// rollback window.
    pub fn mark_running_valid(&mut self) -> MurmurResult<()> {
        self.store.mark_valid()
    }

    /// React to an update announcement. Manifests for other roles, stale
    /// versions, or while a session is in flight are ignored.
    pub fn handle_manifest(
        &mut self,
        role: &RoleTag,
        version: u32,
        total_chunks: u32,
        checksum: [u8; 32],
        now: Tick,
    ) -> MurmurResult<()> {
        if *role != self.role || version <= self.running_version || total_chunks == 0 {
            self.stats.manifests_ignored += 1;
            return Ok(());
        }
        if let Some(session) = &self.session {
            if session.version >= version {
                self.stats.manifests_ignored += 1;
                return Ok(());
            }
            // A newer manifest supersedes the one in flight.
            debug!(
                superseded = session.version,
                version, "restarting transfer for newer firmware"
            );
        }
        self.store.begin(total_chunks)?;
        info!(role = %self.role, version, total_chunks, "firmware transfer started");
        self.session = Some(Session {
            version,
            checksum,
            bitmap: ChunkBitmap::new(total_chunks),
            phase: OtaPhase::Receiving,
            last_progress: now,
            last_nack: now,
        });
        Ok(())
    }

    /// Stage one arriving chunk. Duplicates and chunks outside a session
    /// are ignored.
    pub fn handle_chunk(
        &mut self,
        role: &RoleTag,
        index: u32,
        payload: &[u8],
        now: Tick,
    ) -> MurmurResult<()> {
        if *role != self.role {
            return Ok(());
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if session.phase != OtaPhase::Receiving || !session.bitmap.set(index) {
            return Ok(());
        }
        self.store.stage(index, payload)?;
        self.stats.chunks_received += 1;
        session.last_progress = now;
        if session.bitmap.is_complete() {
            debug!(version = session.version, "all chunks staged");
            session.phase = OtaPhase::Verifying;
        }
        Ok(())
    }

    /// Advance the session one step and emit any gap re-requests.
    pub fn service(&mut self, now: Tick) -> MurmurResult<Vec<Message>> {
        let mut out = Vec::new();
        let Some(session) = self.session.as_mut() else {
            return Ok(out);
        };

        match session.phase {
            OtaPhase::Receiving => {
                if now.saturating_sub(session.last_progress) >= self.config.session_timeout {
                    warn!(
                        version = session.version,
                        received = session.bitmap.received(),
                        total = session.bitmap.total(),
                        "transfer stalled, abandoning"
                    );
                    self.store.rollback()?;
                    self.session = None;
                    self.stats.aborted_timeout += 1;
                } else if now.saturating_sub(session.last_nack) >= self.config.nack_interval {
                    let indices = session.bitmap.missing(MAX_NACK_INDICES);
                    if !indices.is_empty() {
                        session.last_nack = now;
                        self.stats.nacks_sent += 1;
                        out.push(Message::OtaChunkRequest {
                            role: self.role.clone(),
                            indices,
                        });
                    }
                }
            }
            OtaPhase::Verifying => {
                if self.store.verify(&session.checksum)? {
                    session.phase = OtaPhase::Activating;
                } else {
                    warn!(version = session.version, "checksum mismatch, discarding image");
                    self.store.rollback()?;
                    self.session = None;
                    self.stats.aborted_checksum += 1;
                }
            }
            OtaPhase::Activating => {
                self.store.activate()?;
                info!(version = session.version, "firmware activated, restart pending");
                self.running_version = session.version;
                self.reboot_pending = true;
                self.session = None;
                self.stats.completed += 1;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::MemoryFirmwareStore;
    use crate::image_checksum;

    fn receiver(version: u32) -> OtaReceiver<MemoryFirmwareStore> {
        OtaReceiver::new(
            RoleTag("sensor".into()),
            version,
            MemoryFirmwareStore::new(),
            ReceiverConfig::default(),
        )
    }

    fn role() -> RoleTag {
        RoleTag("sensor".into())
    }

    #[test]
    fn test_full_transfer_activates() {
        let mut rx = receiver(1);
        let image: Vec<u8> = (0u16..1500).map(|b| b as u8).collect();
        let checksum = image_checksum(&image);

        rx.handle_manifest(&role(), 2, 2, checksum, 0).unwrap();
        rx.handle_chunk(&role(), 0, &image[..1024], 1).unwrap();
        rx.handle_chunk(&role(), 1, &image[1024..], 2).unwrap();

        // verify, then activate, one step per call
        assert!(rx.service(3).unwrap().is_empty());
        assert!(rx.session_version().is_some());
        rx.service(4).unwrap();

        assert!(rx.reboot_pending());
        assert_eq!(rx.running_version(), 2);
        assert_eq!(rx.store().pending_image(), Some(&image[..]));
        assert_eq!(rx.stats().completed, 1);
    }

    #[test]
    fn test_checksum_mismatch_discards_without_touching_running() {
        let mut rx = receiver(1);
        rx.handle_manifest(&role(), 2, 1, [0u8; 32], 0).unwrap();
        rx.handle_chunk(&role(), 0, &[1, 2, 3], 1).unwrap();

        rx.service(2).unwrap();

        assert!(rx.session_version().is_none());
        assert!(!rx.reboot_pending());
        assert_eq!(rx.running_version(), 1);
        assert_eq!(rx.stats().aborted_checksum, 1);
        assert!(rx.store().pending_image().is_none());
    }

    #[test]
    fn test_ignores_other_roles_and_stale_versions() {
        let mut rx = receiver(3);
        rx.handle_manifest(&RoleTag("pump".into()), 9, 1, [0u8; 32], 0)
            .unwrap();
        rx.handle_manifest(&role(), 3, 1, [0u8; 32], 0).unwrap();
        rx.handle_manifest(&role(), 2, 1, [0u8; 32], 0).unwrap();

        assert!(rx.session_version().is_none());
        assert_eq!(rx.stats().manifests_ignored, 3);
    }

    #[test]
    fn test_nack_names_missing_chunks() {
        let mut rx = receiver(1);
        let image = vec![5u8; 3000];
        rx.handle_manifest(&role(), 2, 3, image_checksum(&image), 0)
            .unwrap();
        rx.handle_chunk(&role(), 1, &image[1024..2048], 5).unwrap();

        // before the nack interval: silence
        assert!(rx.service(10).unwrap().is_empty());

        let out = rx.service(20).unwrap();
        assert_eq!(out.len(), 1);
        match &out[0] {
            Message::OtaChunkRequest { role, indices } => {
                assert_eq!(role.0, "sensor");
                assert_eq!(indices, &vec![0, 2]);
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert_eq!(rx.stats().nacks_sent, 1);

        // the interval restarts from the nack
        assert!(rx.service(25).unwrap().is_empty());
    }

    #[test]
    fn test_stalled_session_times_out() {
        let mut rx = receiver(1);
        rx.handle_manifest(&role(), 2, 4, [0u8; 32], 0).unwrap();
        rx.handle_chunk(&role(), 0, &[1], 10).unwrap();

        // nacks fire but no chunks land
        for now in (20..210).step_by(20) {
            rx.service(now).unwrap();
        }
        rx.service(210).unwrap();

        assert!(rx.session_version().is_none());
        assert_eq!(rx.stats().aborted_timeout, 1);
        assert!(!rx.reboot_pending());
    }

    #[test]
    fn test_duplicate_chunks_staged_once() {
        let mut rx = receiver(1);
        let image = vec![9u8; 10];
        rx.handle_manifest(&role(), 2, 1, image_checksum(&image), 0)
            .unwrap();
        rx.handle_chunk(&role(), 0, &image, 1).unwrap();
        rx.handle_chunk(&role(), 0, &image, 2).unwrap();
        assert_eq!(rx.stats().chunks_received, 1);
    }

    #[test]
    fn test_newer_manifest_supersedes_in_flight() {
        let mut rx = receiver(1);
        rx.handle_manifest(&role(), 2, 4, [0u8; 32], 0).unwrap();
        rx.handle_chunk(&role(), 0, &[1], 1).unwrap();

        let image = vec![3u8; 8];
        rx.handle_manifest(&role(), 3, 1, image_checksum(&image), 2)
            .unwrap();
        assert_eq!(rx.session_version(), Some(3));

        rx.handle_chunk(&role(), 0, &image, 3).unwrap();
        rx.service(4).unwrap();
        rx.service(5).unwrap();
        assert_eq!(rx.running_version(), 3);
    }

    #[test]
    fn test_mark_running_valid() {
        let mut rx = receiver(1);
        rx.mark_running_valid().unwrap();
        assert!(rx.store().running_valid());
    }
}
