//! Whole-swarm simulator: real nodes over chaos links
//!
//! Runs actual `SwarmNode`s against a simulated broadcast mesh. Each
//! directed pair gets its own seeded `ChaosLink`; partitions cut
//! visibility (and drop traffic already in flight across the cut), healing
//! restores it through the nodes' normal topology callbacks so join
//! resyncs fire exactly as they would on hardware.

use std::collections::{BTreeMap, BTreeSet};

use murmur_core::{NodeId, RoleTag};
use murmur_runtime::{Destination, NodeConfig, SwarmNode};

use crate::chaos::{ChaosConfig, ChaosLink};

pub struct SwarmSimulator {
    config: ChaosConfig,
    nodes: Vec<SwarmNode>,
    links: BTreeMap<(NodeId, NodeId), ChaosLink>,
    group_of: BTreeMap<NodeId, usize>,
    visible: BTreeMap<NodeId, BTreeSet<NodeId>>,
    next_seed: u64,
}

impl SwarmSimulator {
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        SwarmSimulator {
            config,
            nodes: Vec::new(),
            links: BTreeMap::new(),
            group_of: BTreeMap::new(),
            visible: BTreeMap::new(),
            next_seed: seed,
        }
    }

    /// Add a plain sensor-role node.
    pub fn add_node(&mut self, id: u32) -> NodeId {
        self.add_swarm_node(SwarmNode::new(
            NodeId::new(id),
            NodeConfig {
                role: RoleTag::from("sensor"),
                ..NodeConfig::default()
            },
        ))
    }

    /// Add a preconfigured node (gateway, OTA target, custom role).
    pub fn add_swarm_node(&mut self, node: SwarmNode) -> NodeId {
        let id = node.node_id();
        self.group_of.insert(id, 0);
        self.visible.insert(id, BTreeSet::new());
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &SwarmNode {
        self.nodes
            .iter()
            .find(|n| n.node_id() == id)
            .expect("unknown node")
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut SwarmNode {
        self.nodes
            .iter_mut()
            .find(|n| n.node_id() == id)
            .expect("unknown node")
    }

    /// Make every node see every other node in its group.
    pub fn connect_full_mesh(&mut self) {
        self.apply_visibility();
    }

    /// Split the swarm; nodes in different groups cannot hear each other.
    pub fn partition(&mut self, groups: &[Vec<NodeId>]) {
        for (index, group) in groups.iter().enumerate() {
            for &id in group {
                self.group_of.insert(id, index);
            }
        }
        self.apply_visibility();
    }

    /// Put everyone back in one group.
    pub fn heal(&mut self) {
        for group in self.group_of.values_mut() {
            *group = 0;
        }
        self.apply_visibility();
    }

    fn apply_visibility(&mut self) {
        let ids: Vec<NodeId> = self.nodes.iter().map(|n| n.node_id()).collect();
        for &id in &ids {
            let group = self.group_of[&id];
            let target: BTreeSet<NodeId> = ids
                .iter()
                .copied()
                .filter(|&other| other != id && self.group_of[&other] == group)
                .collect();

            let current = self.visible[&id].clone();
            let node = self
                .nodes
                .iter_mut()
                .find(|n| n.node_id() == id)
                .expect("unknown node");
            for &gone in current.difference(&target) {
                node.peer_dropped(gone);
            }
            for &appeared in target.difference(&current) {
                node.peer_connected(appeared);
            }
            self.visible.insert(id, target);
        }
    }

    fn link(&mut self, from: NodeId, to: NodeId) -> &mut ChaosLink {
        let config = self.config.clone();
        // one rng stream per directed pair, derived from the base seed
        let seed = self
            .next_seed
            .wrapping_add((u64::from(from.0) << 32) | u64::from(to.0));
        self.links
            .entry((from, to))
            .or_insert_with(|| ChaosLink::with_seed(config, seed))
    }

    /// One simulation step: every node ticks, outbound traffic enters the
    /// links, due traffic is delivered for the nodes' next tick.
    pub fn step(&mut self) {
        for node in &mut self.nodes {
            node.tick();
        }

        let ids: Vec<NodeId> = self.nodes.iter().map(|n| n.node_id()).collect();
        for &from in &ids {
            loop {
                let Some(out) = self.node_mut(from).pop_outgoing() else {
                    break;
                };
                let targets: Vec<NodeId> = match out.dest {
                    Destination::Broadcast => self.visible[&from].iter().copied().collect(),
                    Destination::Node(to) if self.visible[&from].contains(&to) => vec![to],
                    Destination::Node(_) => Vec::new(),
                };
                for to in targets {
                    self.link(from, to).send(out.payload.clone());
                }
            }
        }

        let mut deliveries: Vec<(NodeId, NodeId, Vec<u8>)> = Vec::new();
        for (&(from, to), link) in &mut self.links {
            for payload in link.tick() {
                deliveries.push((from, to, payload));
            }
        }
        for (from, to, payload) in deliveries {
            // traffic in flight across a partition cut is lost
            if self.visible[&from].contains(&to) {
                self.node_mut(to).queue_incoming(from, payload);
            }
        }
    }

    pub fn run(&mut self, steps: u64) {
        for _ in 0..steps {
            self.step();
        }
    }

    /// All replicas hold byte-identical state.
    pub fn converged(&self) -> bool {
        let mut snapshots = self.nodes.iter().map(|n| n.state_snapshot());
        match snapshots.next() {
            Some(first) => snapshots.all(|s| s == first),
            None => true,
        }
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.node_id()).collect()
    }

    /// Ids of the nodes that currently consider themselves coordinator.
    pub fn coordinators(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.is_coordinator())
            .map(|n| n.node_id())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_ideal_nodes_share_a_write() {
        let mut sim = SwarmSimulator::new(ChaosConfig::ideal(), 1);
        let a = sim.add_node(1);
        let b = sim.add_node(2);
        sim.connect_full_mesh();
        sim.run(2);

        sim.node_mut(a).set("led", "1");
        sim.run(3);

        assert_eq!(sim.node(b).get("led"), Some("1"));
        assert!(sim.converged());
    }

    #[test]
    fn test_partition_blocks_traffic() {
        let mut sim = SwarmSimulator::new(ChaosConfig::ideal(), 1);
        let a = sim.add_node(1);
        let b = sim.add_node(2);
        sim.connect_full_mesh();
        sim.run(2);

        sim.partition(&[vec![a], vec![b]]);
        sim.node_mut(a).set("led", "1");
        sim.run(5);

        assert_eq!(sim.node(b).get("led"), None);
    }

    #[test]
    fn test_deterministic_replay() {
        let run = |seed| {
            let mut sim = SwarmSimulator::new(ChaosConfig::hostile(), seed);
            let a = sim.add_node(1);
            sim.add_node(2);
            sim.add_node(3);
            sim.connect_full_mesh();
            sim.run(2);
            for i in 0..10 {
                sim.node_mut(a).set(&format!("k{i}"), "v");
                sim.run(5);
            }
            sim.run(200);
            sim.node_ids()
                .iter()
                .map(|&id| sim.node(id).state_snapshot())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(7), run(7));
    }
}
