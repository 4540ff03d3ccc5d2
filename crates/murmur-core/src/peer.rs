//! Peer bookkeeping
//!
//! Peers come and go with the transport's topology events. The table only
//! caches what the mesh has told us: identity, optionally a role tag learned
//! from telemetry, and when we last heard anything.

use std::collections::BTreeMap;

use crate::id::{NodeId, RoleTag};
use crate::Tick;

/// One known peer in the local topology view.
#[derive(Clone, Debug)]
pub struct Peer {
    pub id: NodeId,
    /// Role category, learned from the peer's telemetry broadcasts
    pub role: Option<RoleTag>,
    /// Tick at which the peer last appeared in a topology event or message
    pub last_seen: Tick,
}

/// Local view of the connected peers, keyed by id for stable iteration.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: BTreeMap<NodeId, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        PeerTable::default()
    }

    /// Record a peer joining (or refresh it if already present).
    pub fn joined(&mut self, id: NodeId, now: Tick) -> &mut Peer {
        self.peers
            .entry(id)
            .and_modify(|p| p.last_seen = now)
            .or_insert(Peer {
                id,
                role: None,
                last_seen: now,
            })
    }

    /// Drop a peer on a topology-leave event.
    pub fn left(&mut self, id: NodeId) -> Option<Peer> {
        self.peers.remove(&id)
    }

    /// Refresh liveness and optionally the role from a received message.
    pub fn saw(&mut self, id: NodeId, role: Option<&RoleTag>, now: Tick) {
        let peer = self.joined(id, now);
        if let Some(role) = role {
            peer.role = Some(role.clone());
        }
    }

    /// Replace the whole view from a topology-change notification.
    pub fn retain_view(&mut self, view: &[NodeId], now: Tick) {
        self.peers.retain(|id, _| view.contains(id));
        for &id in view {
            self.joined(id, now);
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.peers.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_leave() {
        let mut table = PeerTable::new();
        table.joined(NodeId::new(5), 10);
        table.joined(NodeId::new(3), 11);

        assert_eq!(table.len(), 2);
        assert!(table.contains(NodeId::new(5)));

        let gone = table.left(NodeId::new(5)).unwrap();
        assert_eq!(gone.id, NodeId::new(5));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_saw_learns_role() {
        let mut table = PeerTable::new();
        let id = NodeId::new(9);
        table.joined(id, 1);
        assert!(table.get(id).unwrap().role.is_none());

        table.saw(id, Some(&RoleTag::from("button")), 2);
        let peer = table.get(id).unwrap();
        assert_eq!(peer.role.as_ref().unwrap().as_str(), "button");
        assert_eq!(peer.last_seen, 2);
    }

    #[test]
    fn test_retain_view_evicts_absent() {
        let mut table = PeerTable::new();
        table.joined(NodeId::new(1), 0);
        table.joined(NodeId::new(2), 0);
        table.joined(NodeId::new(3), 0);

        table.retain_view(&[NodeId::new(2), NodeId::new(4)], 5);

        assert!(!table.contains(NodeId::new(1)));
        assert!(!table.contains(NodeId::new(3)));
        assert!(table.contains(NodeId::new(2)));
        assert!(table.contains(NodeId::new(4)));
    }

    #[test]
    fn test_ids_sorted() {
        let mut table = PeerTable::new();
        table.joined(NodeId::new(30), 0);
        table.joined(NodeId::new(10), 0);
        table.joined(NodeId::new(20), 0);

        let ids: Vec<_> = table.ids().collect();
        assert_eq!(ids, vec![NodeId::new(10), NodeId::new(20), NodeId::new(30)]);
    }
}
