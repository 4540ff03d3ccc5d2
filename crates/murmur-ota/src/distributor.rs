//! Distribution side of firmware updates, run by the gateway node.
//!
//! An out-of-band source (HTTP poll, serial drop, test fixture) hands the
//! distributor complete images; it splits them into wire chunks and streams
//! them at a bounded per-tick rate, then lingers in a drain window serving
//! retransmission requests before going idle.

use std::collections::BTreeMap;

use tracing::{debug, info};

use murmur_core::{MurmurResult, RoleTag, Tick};
use murmur_wire::Message;

use crate::image_checksum;

/// A complete firmware image ready for distribution.
#[derive(Clone, Debug)]
pub struct FirmwareImage {
    pub role: RoleTag,
    pub version: u32,
    pub data: Vec<u8>,
}

/// Where new firmware comes from. Polled only while no session is active.
pub trait ManifestSource {
    fn poll(&mut self) -> MurmurResult<Option<FirmwareImage>>;
}

impl<T: ManifestSource + ?Sized> ManifestSource for Box<T> {
    fn poll(&mut self) -> MurmurResult<Option<FirmwareImage>> {
        (**self).poll()
    }
}

/// Distribution tuning knobs.
#[derive(Debug, Clone)]
pub struct DistributorConfig {
    /// Ticks between source polls while idle.
    pub poll_interval: Tick,
    /// Bytes per chunk. Matches the receiver's staging granularity.
    pub chunk_size: usize,
    /// Chunks emitted per tick during the initial stream.
    pub chunks_per_tick: usize,
    /// Ticks to keep serving retransmissions after the last send.
    pub drain_window: Tick,
    /// Ticks between manifest re-announcements while a session is open,
    /// so targets that missed the first one still join.
    pub announce_interval: Tick,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        DistributorConfig {
            poll_interval: 300,
            chunk_size: 1024,
            chunks_per_tick: 8,
            drain_window: 100,
            announce_interval: 25,
        }
    }
}

/// Distribution counters.
#[derive(Debug, Default, Clone)]
pub struct DistributorStats {
    pub sessions_started: u64,
    pub sessions_finished: u64,
    pub chunks_sent: u64,
    pub chunks_resent: u64,
    pub images_skipped: u64,
}

enum Phase {
    /// Initial pass through the image; `next` is the first unsent index.
    Streaming { next: u32 },
    /// Initial pass done; answering gap requests until `until`.
    Draining { until: Tick },
}

struct Session {
    image: FirmwareImage,
    total_chunks: u32,
    checksum: [u8; 32],
    phase: Phase,
    last_announce: Tick,
}

/// Splits polled firmware images into chunks and paces them onto the mesh.
pub struct OtaDistributor<M: ManifestSource> {
    source: M,
    config: DistributorConfig,
    session: Option<Session>,
    /// Highest version already distributed, per role.
    distributed: BTreeMap<RoleTag, u32>,
    next_poll: Tick,
    stats: DistributorStats,
}

impl<M: ManifestSource> OtaDistributor<M> {
    pub fn new(source: M, config: DistributorConfig) -> Self {
        OtaDistributor {
            source,
            config,
            session: None,
            distributed: BTreeMap::new(),
            next_poll: 0,
            stats: DistributorStats::default(),
        }
    }

    pub fn stats(&self) -> &DistributorStats {
        &self.stats
    }

    pub fn session_active(&self) -> bool {
        self.session.is_some()
    }

    fn begin_session(&mut self, image: FirmwareImage, now: Tick) -> Message {
        let total_chunks = image.data.len().div_ceil(self.config.chunk_size) as u32;
        let checksum = image_checksum(&image.data);
        info!(
            role = %image.role,
            version = image.version,
            total_chunks,
            "distributing firmware update"
        );
        self.stats.sessions_started += 1;
        let manifest = Message::OtaManifest {
            role: image.role.clone(),
            version: image.version,
            total_chunks,
            checksum,
        };
        self.session = Some(Session {
            image,
            total_chunks,
            checksum,
            phase: Phase::Streaming { next: 0 },
            last_announce: now,
        });
        manifest
    }

    /// A receiver named the chunks it is missing. Ignored when no session
    /// is active or the role does not match.
    pub fn handle_chunk_request(
        &mut self,
        role: &RoleTag,
        indices: &[u32],
        now: Tick,
    ) -> Vec<Message> {
        let chunk_size = self.config.chunk_size;
        let drain_window = self.config.drain_window;
        let mut out = Vec::new();
        let Some(session) = self.session.as_mut() else {
            return out;
        };
        if session.image.role != *role {
            return out;
        }
        for &index in indices {
            if index < session.total_chunks {
                out.push(chunk_message(&session.image, index, chunk_size));
            }
        }
        // retransmissions extend the drain window
        if let Phase::Draining { until } = &mut session.phase {
            *until = now + drain_window;
        }
        self.stats.chunks_resent += out.len() as u64;
        out
    }

    /// Drive polling and streaming for one tick.
    pub fn service(&mut self, now: Tick) -> MurmurResult<Vec<Message>> {
        let mut out = Vec::new();

        if self.session.is_none() && now >= self.next_poll {
            self.next_poll = now + self.config.poll_interval;
            if let Some(image) = self.source.poll()? {
                let known = self.distributed.get(&image.role).copied().unwrap_or(0);
                if image.version <= known || image.data.is_empty() {
                    debug!(role = %image.role, version = image.version, "skipping image");
                    self.stats.images_skipped += 1;
                } else {
                    out.push(self.begin_session(image, now));
                }
            }
        }

        let chunk_size = self.config.chunk_size;
        let Some(session) = self.session.as_mut() else {
            return Ok(out);
        };

        match session.phase {
            Phase::Streaming { next } => {
                let last = (next as usize + self.config.chunks_per_tick)
                    .min(session.total_chunks as usize) as u32;
                for index in next..last {
                    out.push(chunk_message(&session.image, index, chunk_size));
                }
                self.stats.chunks_sent += u64::from(last - next);
                session.phase = if last == session.total_chunks {
                    Phase::Draining {
                        until: now + self.config.drain_window,
                    }
                } else {
                    Phase::Streaming { next: last }
                };
            }
            Phase::Draining { until } => {
                if now >= until {
                    if let Some(session) = self.session.take() {
                        info!(
                            role = %session.image.role,
                            version = session.image.version,
                            "distribution finished"
                        );
                        self.distributed
                            .insert(session.image.role, session.image.version);
                        self.stats.sessions_finished += 1;
                    }
                }
            }
        }

        // Re-announce while the session is open so targets that missed the
        // first manifest still join.
        if let Some(session) = self.session.as_mut() {
            if now.saturating_sub(session.last_announce) >= self.config.announce_interval {
                session.last_announce = now;
                out.push(Message::OtaManifest {
                    role: session.image.role.clone(),
                    version: session.image.version,
                    total_chunks: session.total_chunks,
                    checksum: session.checksum,
                });
            }
        }
        Ok(out)
    }
}

fn chunk_message(image: &FirmwareImage, index: u32, chunk_size: usize) -> Message {
    let start = index as usize * chunk_size;
    let end = (start + chunk_size).min(image.data.len());
    Message::OtaChunk {
        role: image.role.clone(),
        index,
        payload: image.data[start..end].to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct QueueSource {
        images: Vec<FirmwareImage>,
        polls: u32,
    }

    impl QueueSource {
        fn new(images: Vec<FirmwareImage>) -> Self {
            QueueSource { images, polls: 0 }
        }
    }

    impl ManifestSource for QueueSource {
        fn poll(&mut self) -> MurmurResult<Option<FirmwareImage>> {
            self.polls += 1;
            if self.images.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.images.remove(0)))
            }
        }
    }

    fn image(role: &str, version: u32, len: usize) -> FirmwareImage {
        FirmwareImage {
            role: RoleTag::from(role),
            version,
            data: vec![version as u8; len],
        }
    }

    fn config() -> DistributorConfig {
        DistributorConfig {
            poll_interval: 10,
            chunk_size: 4,
            chunks_per_tick: 2,
            drain_window: 5,
            announce_interval: 25,
        }
    }

    #[test]
    fn test_manifest_reannounced_while_session_open() {
        let source = QueueSource::new(vec![image("sensor", 2, 4)]);
        let mut dist = OtaDistributor::new(
            source,
            DistributorConfig {
                announce_interval: 2,
                ..config()
            },
        );
        dist.service(0).unwrap();

        let out = dist.service(2).unwrap();
        assert!(matches!(out[0], Message::OtaManifest { version: 2, .. }));
        assert_eq!(dist.stats().sessions_started, 1);
    }

    #[test]
    fn test_manifest_then_paced_chunks() {
        let source = QueueSource::new(vec![image("sensor", 2, 10)]);
        let mut dist = OtaDistributor::new(source, config());

        // tick 0: manifest plus the first chunk budget
        let out = dist.service(0).unwrap();
        assert_eq!(out.len(), 3);
        match &out[0] {
            Message::OtaManifest {
                role,
                version,
                total_chunks,
                checksum,
            } => {
                assert_eq!(role.as_str(), "sensor");
                assert_eq!(*version, 2);
                assert_eq!(*total_chunks, 3);
                assert_eq!(checksum, &image_checksum(&vec![2u8; 10]));
            }
            other => panic!("expected manifest, got {other:?}"),
        }
        assert!(matches!(out[1], Message::OtaChunk { index: 0, .. }));
        assert!(matches!(out[2], Message::OtaChunk { index: 1, .. }));

        // tick 1: the short final chunk
        let out = dist.service(1).unwrap();
        assert_eq!(out.len(), 1);
        match &out[0] {
            Message::OtaChunk { index, payload, .. } => {
                assert_eq!(*index, 2);
                assert_eq!(payload.len(), 2);
            }
            other => panic!("expected chunk, got {other:?}"),
        }
        assert_eq!(dist.stats().chunks_sent, 3);
        assert!(dist.session_active());
    }

    #[test]
    fn test_drain_window_closes_session() {
        let source = QueueSource::new(vec![image("sensor", 2, 4)]);
        let mut dist = OtaDistributor::new(source, config());

        dist.service(0).unwrap();
        assert!(dist.session_active());

        // drain holds the session open, then it closes
        dist.service(3).unwrap();
        assert!(dist.session_active());
        dist.service(5).unwrap();
        assert!(!dist.session_active());
        assert_eq!(dist.stats().sessions_finished, 1);
    }

    #[test]
    fn test_retransmission_extends_drain() {
        let source = QueueSource::new(vec![image("sensor", 2, 8)]);
        let mut dist = OtaDistributor::new(source, config());
        dist.service(0).unwrap();
        assert!(dist.session_active());

        let resent = dist.handle_chunk_request(&RoleTag::from("sensor"), &[1, 99], 4);
        assert_eq!(resent.len(), 1);
        assert!(matches!(resent[0], Message::OtaChunk { index: 1, .. }));
        assert_eq!(dist.stats().chunks_resent, 1);

        // old deadline would have been 5; the request pushed it to 9
        dist.service(5).unwrap();
        assert!(dist.session_active());
        dist.service(9).unwrap();
        assert!(!dist.session_active());
    }

    #[test]
    fn test_requests_for_other_roles_ignored() {
        let source = QueueSource::new(vec![image("sensor", 2, 4)]);
        let mut dist = OtaDistributor::new(source, config());
        dist.service(0).unwrap();

        let resent = dist.handle_chunk_request(&RoleTag::from("pump"), &[0], 1);
        assert!(resent.is_empty());
    }

    #[test]
    fn test_already_distributed_version_skipped() {
        let source = QueueSource::new(vec![image("sensor", 2, 4), image("sensor", 2, 4)]);
        let mut dist = OtaDistributor::new(source, config());

        dist.service(0).unwrap();
        dist.service(5).unwrap();
        assert!(!dist.session_active());

        // next poll returns the same version again
        let out = dist.service(10).unwrap();
        assert!(out.is_empty());
        assert_eq!(dist.stats().images_skipped, 1);
    }

    #[test]
    fn test_empty_image_skipped() {
        let source = QueueSource::new(vec![image("sensor", 3, 0)]);
        let mut dist = OtaDistributor::new(source, config());
        let out = dist.service(0).unwrap();
        assert!(out.is_empty());
        assert_eq!(dist.stats().images_skipped, 1);
    }

    #[test]
    fn test_no_poll_while_session_active() {
        let source = QueueSource::new(vec![image("sensor", 2, 100)]);
        let mut dist = OtaDistributor::new(source, config());
        dist.service(0).unwrap();
        for now in 1..20 {
            dist.service(now).unwrap();
        }
        assert_eq!(dist.stats().sessions_started, 1);
    }
}
