//! Mesh message kinds and their (de)serialization
//!
//! Layout per message, after the 1-byte type tag:
//! - StateSet:        key, value, stamp (tick u64 LE + origin u32 LE)
//! - SyncRequest:     requester u32 LE
//! - SyncResponse:    count u16 LE, then count x (key, value, stamp)
//! - Telemetry:       node u32, role, uptime u64, peer_count u16,
//!                    collected_at u64, count u16, then count x (key, value)
//! - OtaManifest:     role, version u32, total_chunks u32, checksum [32]
//! - OtaChunk:        role, index u32, payload (u16-prefixed)
//! - OtaChunkRequest: role, count u16, then count x index u32
//!
//! Strings are u16-length-prefixed UTF-8.

use bytes::{Buf, BufMut};

use murmur_core::{MurmurError, MurmurResult, NodeId, RoleTag, Tick, VersionStamp};

/// Maximum key length in bytes
pub const MAX_KEY_LEN: usize = 128;

/// Maximum value length in bytes
pub const MAX_VALUE_LEN: usize = 512;

/// Maximum OTA chunk payload (matches the server's firmware part size)
pub const MAX_CHUNK_PAYLOAD: usize = 1024;

/// Maximum entries carried by one sync response
pub const MAX_SYNC_ENTRIES: usize = 256;

/// Maximum missing indices named by one chunk request
pub const MAX_NACK_INDICES: usize = 64;

/// One replicated key/value with its write version, as carried in syncs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireEntry {
    pub key: String,
    pub value: String,
    pub stamp: VersionStamp,
}

/// Telemetry snapshot a node reports toward the gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetryBody {
    pub node: NodeId,
    pub role: RoleTag,
    pub uptime_ticks: Tick,
    pub peer_count: u16,
    pub collected_at: Tick,
    pub state: Vec<(String, String)>,
}

/// All mesh wire messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Propagate one state write
    StateSet {
        key: String,
        value: String,
        stamp: VersionStamp,
    },
    /// Newcomer asks any connected peer for a full snapshot
    SyncRequest { requester: NodeId },
    /// Full snapshot reply, merged entry-by-entry under last-writer-wins
    SyncResponse { entries: Vec<WireEntry> },
    /// Node-to-gateway report
    Telemetry(TelemetryBody),
    /// Announce an available firmware update for one role tag
    OtaManifest {
        role: RoleTag,
        version: u32,
        total_chunks: u32,
        checksum: [u8; 32],
    },
    /// One firmware fragment
    OtaChunk {
        role: RoleTag,
        index: u32,
        payload: Vec<u8>,
    },
    /// Request retransmission of the named missing fragments
    OtaChunkRequest { role: RoleTag, indices: Vec<u32> },
}

impl Message {
    /// Wire type tag
    pub fn tag(&self) -> u8 {
        match self {
            Message::StateSet { .. } => 1,
            Message::SyncRequest { .. } => 2,
            Message::SyncResponse { .. } => 3,
            Message::Telemetry(_) => 4,
            Message::OtaManifest { .. } => 5,
            Message::OtaChunk { .. } => 6,
            Message::OtaChunkRequest { .. } => 7,
        }
    }

    /// Serialize to a fresh buffer.
    pub fn encode(&self) -> MurmurResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(64);
        buf.put_u8(self.tag());

        match self {
            Message::StateSet { key, value, stamp } => {
                put_str(&mut buf, "key", key, MAX_KEY_LEN)?;
                put_str(&mut buf, "value", value, MAX_VALUE_LEN)?;
                buf.put_slice(&stamp.to_bytes());
            }
            Message::SyncRequest { requester } => {
                buf.put_slice(&requester.to_bytes());
            }
            Message::SyncResponse { entries } => {
                if entries.len() > MAX_SYNC_ENTRIES {
                    return Err(MurmurError::FieldTooLong {
                        field: "entries",
                        actual: entries.len(),
                        limit: MAX_SYNC_ENTRIES,
                    });
                }
                buf.put_u16_le(entries.len() as u16);
                for entry in entries {
                    put_str(&mut buf, "key", &entry.key, MAX_KEY_LEN)?;
                    put_str(&mut buf, "value", &entry.value, MAX_VALUE_LEN)?;
                    buf.put_slice(&entry.stamp.to_bytes());
                }
            }
            Message::Telemetry(body) => {
                buf.put_slice(&body.node.to_bytes());
                put_str(&mut buf, "role", body.role.as_str(), MAX_KEY_LEN)?;
                buf.put_u64_le(body.uptime_ticks);
                buf.put_u16_le(body.peer_count);
                buf.put_u64_le(body.collected_at);
                if body.state.len() > MAX_SYNC_ENTRIES {
                    return Err(MurmurError::FieldTooLong {
                        field: "state",
                        actual: body.state.len(),
                        limit: MAX_SYNC_ENTRIES,
                    });
                }
                buf.put_u16_le(body.state.len() as u16);
                for (key, value) in &body.state {
                    put_str(&mut buf, "key", key, MAX_KEY_LEN)?;
                    put_str(&mut buf, "value", value, MAX_VALUE_LEN)?;
                }
            }
            Message::OtaManifest {
                role,
                version,
                total_chunks,
                checksum,
            } => {
                put_str(&mut buf, "role", role.as_str(), MAX_KEY_LEN)?;
                buf.put_u32_le(*version);
                buf.put_u32_le(*total_chunks);
                buf.put_slice(checksum);
            }
            Message::OtaChunk {
                role,
                index,
                payload,
            } => {
                put_str(&mut buf, "role", role.as_str(), MAX_KEY_LEN)?;
                buf.put_u32_le(*index);
                if payload.len() > MAX_CHUNK_PAYLOAD {
                    return Err(MurmurError::FieldTooLong {
                        field: "payload",
                        actual: payload.len(),
                        limit: MAX_CHUNK_PAYLOAD,
                    });
                }
                buf.put_u16_le(payload.len() as u16);
                buf.put_slice(payload);
            }
            Message::OtaChunkRequest { role, indices } => {
                put_str(&mut buf, "role", role.as_str(), MAX_KEY_LEN)?;
                if indices.len() > MAX_NACK_INDICES {
                    return Err(MurmurError::FieldTooLong {
                        field: "indices",
                        actual: indices.len(),
                        limit: MAX_NACK_INDICES,
                    });
                }
                buf.put_u16_le(indices.len() as u16);
                for index in indices {
                    buf.put_u32_le(*index);
                }
            }
        }

        Ok(buf)
    }

    /// Parse a message from bytes. Trailing bytes are rejected.
    pub fn decode(mut buf: &[u8]) -> MurmurResult<Self> {
        let tag = get_u8(&mut buf)?;

        let message = match tag {
            1 => {
                let key = get_str(&mut buf, MAX_KEY_LEN)?;
                let value = get_str(&mut buf, MAX_VALUE_LEN)?;
                let stamp = get_stamp(&mut buf)?;
                Message::StateSet { key, value, stamp }
            }
            2 => Message::SyncRequest {
                requester: get_node_id(&mut buf)?,
            },
            3 => {
                let count = get_u16(&mut buf)? as usize;
                if count > MAX_SYNC_ENTRIES {
                    return Err(MurmurError::InvalidWireFormat(format!(
                        "sync response claims {count} entries"
                    )));
                }
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = get_str(&mut buf, MAX_KEY_LEN)?;
                    let value = get_str(&mut buf, MAX_VALUE_LEN)?;
                    let stamp = get_stamp(&mut buf)?;
                    entries.push(WireEntry { key, value, stamp });
                }
                Message::SyncResponse { entries }
            }
            4 => {
                let node = get_node_id(&mut buf)?;
                let role = RoleTag::new(get_str(&mut buf, MAX_KEY_LEN)?);
                let uptime_ticks = get_u64(&mut buf)?;
                let peer_count = get_u16(&mut buf)?;
                let collected_at = get_u64(&mut buf)?;
                let count = get_u16(&mut buf)? as usize;
                if count > MAX_SYNC_ENTRIES {
                    return Err(MurmurError::InvalidWireFormat(format!(
                        "telemetry claims {count} state entries"
                    )));
                }
                let mut state = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = get_str(&mut buf, MAX_KEY_LEN)?;
                    let value = get_str(&mut buf, MAX_VALUE_LEN)?;
                    state.push((key, value));
                }
                Message::Telemetry(TelemetryBody {
                    node,
                    role,
                    uptime_ticks,
                    peer_count,
                    collected_at,
                    state,
                })
            }
            5 => {
                let role = RoleTag::new(get_str(&mut buf, MAX_KEY_LEN)?);
                let version = get_u32(&mut buf)?;
                let total_chunks = get_u32(&mut buf)?;
                let checksum = get_array::<32>(&mut buf)?;
                Message::OtaManifest {
                    role,
                    version,
                    total_chunks,
                    checksum,
                }
            }
            6 => {
                let role = RoleTag::new(get_str(&mut buf, MAX_KEY_LEN)?);
                let index = get_u32(&mut buf)?;
                let len = get_u16(&mut buf)? as usize;
                if len > MAX_CHUNK_PAYLOAD {
                    return Err(MurmurError::InvalidWireFormat(format!(
                        "chunk payload claims {len} bytes"
                    )));
                }
                let payload = get_bytes(&mut buf, len)?;
                Message::OtaChunk {
                    role,
                    index,
                    payload,
                }
            }
            7 => {
                let role = RoleTag::new(get_str(&mut buf, MAX_KEY_LEN)?);
                let count = get_u16(&mut buf)? as usize;
                if count > MAX_NACK_INDICES {
                    return Err(MurmurError::InvalidWireFormat(format!(
                        "chunk request names {count} indices"
                    )));
                }
                let mut indices = Vec::with_capacity(count);
                for _ in 0..count {
                    indices.push(get_u32(&mut buf)?);
                }
                Message::OtaChunkRequest { role, indices }
            }
            other => return Err(MurmurError::UnknownMessageType(other)),
        };

        if buf.has_remaining() {
            return Err(MurmurError::InvalidWireFormat(format!(
                "{} trailing bytes",
                buf.remaining()
            )));
        }

        Ok(message)
    }
}

fn put_str(buf: &mut Vec<u8>, field: &'static str, s: &str, limit: usize) -> MurmurResult<()> {
    if s.len() > limit {
        return Err(MurmurError::FieldTooLong {
            field,
            actual: s.len(),
            limit,
        });
    }
    buf.put_u16_le(s.len() as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn need(buf: &[u8], n: usize) -> MurmurResult<()> {
    if buf.remaining() < n {
        return Err(MurmurError::BufferTooShort {
            expected: n,
            actual: buf.remaining(),
        });
    }
    Ok(())
}

fn get_u8(buf: &mut &[u8]) -> MurmurResult<u8> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut &[u8]) -> MurmurResult<u16> {
    need(buf, 2)?;
    Ok(buf.get_u16_le())
}

fn get_u32(buf: &mut &[u8]) -> MurmurResult<u32> {
    need(buf, 4)?;
    Ok(buf.get_u32_le())
}

fn get_u64(buf: &mut &[u8]) -> MurmurResult<u64> {
    need(buf, 8)?;
    Ok(buf.get_u64_le())
}

fn get_node_id(buf: &mut &[u8]) -> MurmurResult<NodeId> {
    need(buf, 4)?;
    Ok(NodeId::new(buf.get_u32_le()))
}

fn get_stamp(buf: &mut &[u8]) -> MurmurResult<VersionStamp> {
    let tick = get_u64(buf)?;
    let origin = get_node_id(buf)?;
    Ok(VersionStamp::new(tick, origin))
}

fn get_bytes(buf: &mut &[u8], len: usize) -> MurmurResult<Vec<u8>> {
    need(buf, len)?;
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

fn get_array<const N: usize>(buf: &mut &[u8]) -> MurmurResult<[u8; N]> {
    need(buf, N)?;
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

fn get_str(buf: &mut &[u8], limit: usize) -> MurmurResult<String> {
    let len = get_u16(buf)? as usize;
    if len > limit {
        return Err(MurmurError::InvalidWireFormat(format!(
            "string claims {len} bytes, limit {limit}"
        )));
    }
    let bytes = get_bytes(buf, len)?;
    String::from_utf8(bytes).map_err(|_| MurmurError::InvalidWireFormat("non-UTF8 string".into()))
}
