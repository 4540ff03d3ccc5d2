//! The node runtime loop

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use murmur_core::{NodeId, PeerTable, RoleTag, Tick};
use murmur_elect::{CoordinatorSelector, CoordinatorState, RoleChange};
use murmur_gateway::{BridgeConfig, BridgeStats, GatewayBridge, TelemetryRecord, TelemetryUplink};
use murmur_ota::{
    DistributorConfig, FirmwareStore, ManifestSource, OtaDistributor, OtaReceiver, ReceiverConfig,
};
use murmur_state::{Applied, StateStore, WatchHandler, WatchPattern};
use murmur_wire::{Message, MAX_SYNC_ENTRIES};

/// Node configuration
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Application role category of this device
    pub role: RoleTag,
    /// Version of the firmware currently running
    pub firmware_version: u32,
    /// Maximum buffered incoming payloads
    pub max_incoming: usize,
    /// Maximum buffered outbound payloads
    pub max_outgoing: usize,
    /// Ticks between telemetry reports
    pub telemetry_interval: Tick,
    /// Ticks between full-state rebroadcasts
    pub resync_interval: Tick,
    pub bridge: BridgeConfig,
    pub receiver: ReceiverConfig,
    pub distributor: DistributorConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            role: RoleTag::default(),
            firmware_version: 1,
            max_incoming: 256,
            max_outgoing: 256,
            telemetry_interval: 30,
            resync_interval: 100,
            bridge: BridgeConfig::default(),
            receiver: ReceiverConfig::default(),
            distributor: DistributorConfig::default(),
        }
    }
}

/// Loop counters, exposed on the command surface.
#[derive(Clone, Copy, Debug, Default)]
pub struct RuntimeStats {
    pub ticks: u64,
    pub messages_in: u64,
    pub messages_out: u64,
    pub decode_errors: u64,
    pub syncs_served: u64,
    pub outgoing_dropped: u64,
}

/// Where the transport should deliver one outbound payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destination {
    Broadcast,
    Node(NodeId),
}

/// One encoded payload ready for the transport.
#[derive(Clone, Debug)]
pub struct Outbound {
    pub dest: Destination,
    pub payload: Vec<u8>,
}

type RoleChangeHook = Box<dyn FnMut(&RoleChange)>;

/// The per-device runtime: store, coordinator view, optional gateway and
/// OTA components, all driven by `tick()`.
pub struct SwarmNode {
    id: NodeId,
    config: NodeConfig,
    store: StateStore,
    peers: PeerTable,
    selector: CoordinatorSelector,
    bridge: Option<GatewayBridge<Box<dyn TelemetryUplink>>>,
    distributor: Option<OtaDistributor<Box<dyn ManifestSource>>>,
    receiver: Option<OtaReceiver<Box<dyn FirmwareStore>>>,
    incoming: VecDeque<(NodeId, Vec<u8>)>,
    outgoing: VecDeque<Outbound>,
    role_hooks: Vec<RoleChangeHook>,
    commands: crate::commands::CommandRegistry,
    view_changed: bool,
    local_change_pending: bool,
    reboot_requested: bool,
    last_telemetry: Tick,
    last_resync: Tick,
    stats: RuntimeStats,
}

impl SwarmNode {
    pub fn new(id: NodeId, config: NodeConfig) -> Self {
        SwarmNode {
            id,
            store: StateStore::new(id),
            peers: PeerTable::new(),
            selector: CoordinatorSelector::new(id),
            bridge: None,
            distributor: None,
            receiver: None,
            incoming: VecDeque::new(),
            outgoing: VecDeque::new(),
            role_hooks: Vec::new(),
            commands: crate::commands::CommandRegistry::default(),
            view_changed: true,
            local_change_pending: false,
            reboot_requested: false,
            last_telemetry: 0,
            last_resync: 0,
            stats: RuntimeStats::default(),
            config,
        }
    }

    /// Turn this node into the gateway: telemetry flows out through the
    /// uplink and firmware images in through the manifest source.
    pub fn enable_gateway(
        &mut self,
        uplink: impl TelemetryUplink + 'static,
        source: impl ManifestSource + 'static,
    ) {
        self.bridge = Some(GatewayBridge::new(
            self.config.bridge.clone(),
            Box::new(uplink),
        ));
        self.distributor = Some(OtaDistributor::new(
            Box::new(source),
            self.config.distributor.clone(),
        ));
    }

    /// Accept firmware updates announced for this node's role.
    pub fn enable_ota(&mut self, store: impl FirmwareStore + 'static) {
        self.receiver = Some(OtaReceiver::new(
            self.config.role.clone(),
            self.config.firmware_version,
            Box::new(store),
            self.config.receiver.clone(),
        ));
    }

    pub fn node_id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> &RoleTag {
        &self.config.role
    }

    pub fn is_gateway(&self) -> bool {
        self.bridge.is_some()
    }

    pub fn stats(&self) -> RuntimeStats {
        self.stats
    }

    pub fn coordinator(&self) -> CoordinatorState {
        self.selector.state()
    }

    pub fn is_coordinator(&self) -> bool {
        self.selector.is_coordinator()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn bridge_stats(&self) -> Option<BridgeStats> {
        self.bridge.as_ref().map(|b| b.stats())
    }

    /// True once a restart is wanted, whether commanded or after a
    /// firmware activation. The embedding decides when to actually reboot.
    pub fn reboot_pending(&self) -> bool {
        self.reboot_requested
            || self
                .receiver
                .as_ref()
                .map(|r| r.reboot_pending())
                .unwrap_or(false)
    }

    pub(crate) fn request_reboot(&mut self) {
        self.reboot_requested = true;
    }

    pub fn firmware_version(&self) -> u32 {
        self.receiver
            .as_ref()
            .map(|r| r.running_version())
            .unwrap_or(self.config.firmware_version)
    }

    /// Report the running firmware healthy, closing the bootloader's
    /// rollback window. Call once the application considers itself sane.
    pub fn mark_firmware_valid(&mut self) -> murmur_core::MurmurResult<()> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.mark_running_valid(),
            None => Ok(()),
        }
    }

    // ---- shared state ----

    /// Write a key locally and broadcast the change.
    pub fn set(&mut self, key: &str, value: &str) {
        if let Some(broadcast) = self.store.set(key, value) {
            self.send(Destination::Broadcast, &broadcast);
            self.local_change_pending = true;
        }
    }

    pub fn set_many<'a>(&mut self, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) {
        for broadcast in self.store.set_many(pairs) {
            self.send(Destination::Broadcast, &broadcast);
            self.local_change_pending = true;
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.store.get(key)
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.store.get_or(key, default)
    }

    pub fn watch(&mut self, pattern: WatchPattern, handler: WatchHandler) {
        self.store.watch(pattern, handler);
    }

    pub fn on_role_change(&mut self, hook: impl FnMut(&RoleChange) + 'static) {
        self.role_hooks.push(Box::new(hook));
    }

    /// Register an application command, shadowing any built-in of the
    /// same name.
    pub fn on_command(
        &mut self,
        name: impl Into<String>,
        handler: impl FnMut(&mut dyn std::fmt::Write) + 'static,
    ) {
        self.commands.register(name, Box::new(handler));
    }

    pub(crate) fn dispatch_custom(&mut self, name: &str, out: &mut dyn std::fmt::Write) -> bool {
        self.commands.dispatch(name, out)
    }

    /// Full copy of the replicated state, for inspection and harnesses.
    pub fn state_snapshot(&self) -> Vec<murmur_wire::WireEntry> {
        self.store.snapshot()
    }

    pub(crate) fn store(&self) -> &StateStore {
        &self.store
    }

    pub(crate) fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub(crate) fn receiver(&self) -> Option<&OtaReceiver<Box<dyn FirmwareStore>>> {
        self.receiver.as_ref()
    }

    pub(crate) fn distributor(&self) -> Option<&OtaDistributor<Box<dyn ManifestSource>>> {
        self.distributor.as_ref()
    }

    // ---- transport surface ----

    /// Buffer one received payload for the next tick.
    pub fn queue_incoming(&mut self, from: NodeId, payload: Vec<u8>) {
        if self.incoming.len() >= self.config.max_incoming {
            warn!(%from, "incoming buffer full, payload discarded");
            return;
        }
        self.incoming.push_back((from, payload));
    }

    /// Next payload for the transport to deliver, if any.
    pub fn pop_outgoing(&mut self) -> Option<Outbound> {
        self.outgoing.pop_front()
    }

    /// A direct connection to `peer` came up. Triggers a join resync: we
    /// ask the mesh for a full snapshot to cover whatever we missed.
    pub fn peer_connected(&mut self, peer: NodeId) {
        let now = self.stats.ticks;
        self.peers.joined(peer, now);
        self.view_changed = true;
        debug!(%peer, "peer connected, requesting resync");
        self.send(
            Destination::Broadcast,
            &Message::SyncRequest { requester: self.id },
        );
    }

    /// A direct connection dropped.
    pub fn peer_dropped(&mut self, peer: NodeId) {
        if self.peers.left(peer).is_some() {
            self.view_changed = true;
            debug!(%peer, "peer dropped");
        }
    }

    /// The transport handed us a whole new reachability view.
    pub fn topology_changed(&mut self, view: &[NodeId]) {
        let now = self.stats.ticks;
        self.peers.retain_view(view, now);
        self.view_changed = true;
    }

    // ---- the loop ----

    /// One pass of the runtime loop. Never blocks; every stage is bounded.
    pub fn tick(&mut self) {
        self.stats.ticks += 1;
        let now = self.stats.ticks;
        self.store.advance();

        self.ingest(now);
        self.recompute_coordinator();
        self.service_resync(now);
        self.service_telemetry(now);
        self.service_ota(now);
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.service(now);
        }
    }

    fn ingest(&mut self, now: Tick) {
        // Payloads queued during this tick wait for the next one.
        let batch: Vec<(NodeId, Vec<u8>)> = self.incoming.drain(..).collect();
        for (from, payload) in batch {
            match Message::decode(&payload) {
                Ok(message) => {
                    self.stats.messages_in += 1;
                    self.dispatch(from, message, now);
                }
                Err(err) => {
                    self.stats.decode_errors += 1;
                    warn!(%from, %err, "undecodable payload discarded");
                }
            }
        }
    }

    fn dispatch(&mut self, from: NodeId, message: Message, now: Tick) {
        self.peers.saw(from, None, now);

        match message {
            Message::StateSet { key, value, stamp } => {
                if self.store.apply_remote(&key, &value, stamp) == Applied::Stale {
                    trace!(%from, key, "stale write");
                }
            }
            Message::SyncRequest { requester } => {
                if requester != self.id {
                    self.serve_sync(requester);
                }
            }
            Message::SyncResponse { entries } => {
                let accepted = self.store.merge_snapshot(&entries);
                if accepted > 0 {
                    debug!(%from, accepted, "snapshot entries merged");
                }
            }
            Message::Telemetry(body) => {
                self.peers.saw(body.node, Some(&body.role), now);
                if let Some(bridge) = self.bridge.as_mut() {
                    bridge.enqueue_remote(body, now);
                }
            }
            Message::OtaManifest {
                role,
                version,
                total_chunks,
                checksum,
            } => {
                if let Some(receiver) = self.receiver.as_mut() {
                    if let Err(err) =
                        receiver.handle_manifest(&role, version, total_chunks, checksum, now)
                    {
                        warn!(%err, "manifest rejected");
                    }
                }
            }
            Message::OtaChunk {
                role,
                index,
                payload,
            } => {
                if let Some(receiver) = self.receiver.as_mut() {
                    if let Err(err) = receiver.handle_chunk(&role, index, &payload, now) {
                        warn!(%err, index, "chunk rejected");
                    }
                }
            }
            Message::OtaChunkRequest { role, indices } => {
                let chunks = match self.distributor.as_mut() {
                    Some(distributor) => distributor.handle_chunk_request(&role, &indices, now),
                    None => Vec::new(),
                };
                for chunk in &chunks {
                    self.send(Destination::Broadcast, chunk);
                }
            }
        }
    }

    /// Reply with the full store, directly to the requester, split into
    /// wire-sized snapshots.
    fn serve_sync(&mut self, requester: NodeId) {
        self.stats.syncs_served += 1;
        let snapshot = self.store.snapshot();
        if snapshot.is_empty() {
            return;
        }
        for window in snapshot.chunks(MAX_SYNC_ENTRIES) {
            self.send(
                Destination::Node(requester),
                &Message::SyncResponse {
                    entries: window.to_vec(),
                },
            );
        }
    }

    fn recompute_coordinator(&mut self) {
        if !self.view_changed {
            return;
        }
        self.view_changed = false;
        let view: Vec<NodeId> = self.peers.ids().collect();
        if let Some(change) = self.selector.recompute(view) {
            for hook in &mut self.role_hooks {
                hook(&change);
            }
        }
    }

    /// Periodic full-state rebroadcast, the safety net under lost
    /// StateSet broadcasts.
    fn service_resync(&mut self, now: Tick) {
        if now.saturating_sub(self.last_resync) < self.config.resync_interval {
            return;
        }
        self.last_resync = now;
        if self.peers.is_empty() {
            return;
        }
        let snapshot = self.store.snapshot();
        for window in snapshot.chunks(MAX_SYNC_ENTRIES) {
            self.send(
                Destination::Broadcast,
                &Message::SyncResponse {
                    entries: window.to_vec(),
                },
            );
        }
    }

    fn telemetry_record(&self) -> TelemetryRecord {
        TelemetryRecord {
            node: self.id,
            role: self.config.role.clone(),
            uptime_ticks: self.stats.ticks,
            peer_count: self.peers.len() as u16,
            collected_at: self.store.clock(),
            state: self.store.kv_pairs(),
        }
    }

    fn service_telemetry(&mut self, now: Tick) {
        if self.bridge.is_none() {
            if now.saturating_sub(self.last_telemetry) >= self.config.telemetry_interval {
                self.last_telemetry = now;
                self.local_change_pending = false;
                let record = self.telemetry_record();
                self.send(Destination::Broadcast, &Message::Telemetry(record));
            }
            return;
        }

        // The gateway's own record goes straight to the uplink queue; the
        // interval and the change debounce both feed it.
        let local_change = self.local_change_pending;
        let due = self
            .bridge
            .as_mut()
            .map(|b| b.periodic_due(now) || (local_change && b.on_local_change(now)))
            .unwrap_or(false);
        if due {
            self.local_change_pending = false;
            let record = self.telemetry_record();
            if let Some(bridge) = self.bridge.as_mut() {
                bridge.enqueue_local(record, now);
            }
        }
    }

    /// Force a telemetry report out this tick, bypassing the interval.
    pub(crate) fn push_telemetry(&mut self, now: Tick) {
        let record = self.telemetry_record();
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.enqueue_local(record, now);
        } else {
            self.last_telemetry = now;
            self.send(Destination::Broadcast, &Message::Telemetry(record));
        }
    }

    fn service_ota(&mut self, now: Tick) {
        let staged = match self.receiver.as_mut() {
            Some(receiver) => match receiver.service(now) {
                Ok(messages) => messages,
                Err(err) => {
                    warn!(%err, "firmware staging failed");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        for message in &staged {
            self.send(Destination::Broadcast, message);
        }

        let streamed = match self.distributor.as_mut() {
            Some(distributor) => match distributor.service(now) {
                Ok(messages) => messages,
                Err(err) => {
                    warn!(%err, "firmware source poll failed");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        for message in &streamed {
            self.send(Destination::Broadcast, message);
        }
    }

    fn send(&mut self, dest: Destination, message: &Message) {
        if self.outgoing.len() >= self.config.max_outgoing {
            self.stats.outgoing_dropped += 1;
            warn!("outgoing buffer full, payload discarded");
            return;
        }
        match message.encode() {
            Ok(payload) => {
                self.stats.messages_out += 1;
                self.outgoing.push_back(Outbound { dest, payload });
            }
            Err(err) => warn!(%err, "unencodable message discarded"),
        }
    }
}

impl std::fmt::Debug for SwarmNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwarmNode")
            .field("id", &self.id)
            .field("role", &self.config.role)
            .field("peers", &self.peers.len())
            .field("gateway", &self.bridge.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}
