//! The replicated store and its reconciliation rules

use std::collections::BTreeMap;

use murmur_core::{NodeId, Tick, VersionStamp};
use murmur_wire::{Message, WireEntry};

use crate::{WatchHandler, WatchPattern, WatcherRegistry};

/// One stored value with its write version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateEntry {
    pub value: String,
    pub stamp: VersionStamp,
}

/// Outcome of applying a remote write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// The write won the last-writer-wins comparison and replaced the entry
    Accepted,
    /// Stale or duplicate delivery, silently discarded
    Stale,
}

/// The local replica of the mesh-wide key-value state.
///
/// The store owns a Lamport-style tick clock: it advances once per runtime
/// tick and is raised past any greater stamp seen from the mesh, so a fresh
/// local write always out-stamps whatever is currently stored.
pub struct StateStore {
    local: NodeId,
    clock: Tick,
    entries: BTreeMap<String, StateEntry>,
    watchers: WatcherRegistry,
}

impl StateStore {
    pub fn new(local: NodeId) -> Self {
        StateStore {
            local,
            clock: 0,
            entries: BTreeMap::new(),
            watchers: WatcherRegistry::new(),
        }
    }

    pub fn local_node(&self) -> NodeId {
        self.local
    }

    /// Current Lamport clock value.
    pub fn clock(&self) -> Tick {
        self.clock
    }

    /// Advance the clock by one runtime tick.
    pub fn advance(&mut self) -> Tick {
        self.clock += 1;
        self.clock
    }

    /// Write a key locally and return the broadcast for the mesh.
    ///
    /// Always succeeds locally. Returns `None` when the value is unchanged,
    /// in which case nothing fires and nothing is broadcast.
    pub fn set(&mut self, key: &str, value: &str) -> Option<Message> {
        let old = self.entries.get(key).map(|e| e.value.clone());
        if old.as_deref() == Some(value) {
            return None;
        }

        self.clock += 1;
        let stamp = VersionStamp::new(self.clock, self.local);
        self.entries.insert(
            key.to_string(),
            StateEntry {
                value: value.to_string(),
                stamp,
            },
        );

        tracing::debug!(key, value, tick = stamp.tick, "local state write");
        self.watchers.dispatch(key, value, old.as_deref());

        Some(Message::StateSet {
            key: key.to_string(),
            value: value.to_string(),
            stamp,
        })
    }

    /// Batch write; returns one broadcast per key that actually changed.
    pub fn set_many<'a>(
        &mut self,
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Vec<Message> {
        pairs
            .into_iter()
            .filter_map(|(key, value)| self.set(key, value))
            .collect()
    }

    /// Read the locally-held value. Never blocks, never touches the network.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|e| e.value.as_str())
    }

    /// Read with a fallback default.
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    pub fn entry(&self, key: &str) -> Option<&StateEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a watcher for accepted changes to keys matching `pattern`.
    pub fn watch(&mut self, pattern: WatchPattern, handler: WatchHandler) {
        self.watchers.register(pattern, handler);
    }

    /// Apply one remote write under last-writer-wins.
    ///
    /// Accepted iff the stamp is strictly greater than the stored one or the
    /// key is unknown. Anything else is a stale or duplicate delivery and is
    /// discarded without firing watchers, which makes redelivery idempotent.
    pub fn apply_remote(&mut self, key: &str, value: &str, stamp: VersionStamp) -> Applied {
        // Raise the clock past any stamp observed from the mesh.
        self.clock = self.clock.max(stamp.tick);

        let old = match self.entries.get(key) {
            Some(existing) if stamp <= existing.stamp => {
                tracing::trace!(key, "stale write discarded");
                return Applied::Stale;
            }
            Some(existing) => Some(existing.value.clone()),
            None => None,
        };

        self.entries.insert(
            key.to_string(),
            StateEntry {
                value: value.to_string(),
                stamp,
            },
        );

        tracing::debug!(
            key,
            value,
            tick = stamp.tick,
            origin = %stamp.origin,
            "remote state write accepted"
        );
        self.watchers.dispatch(key, value, old.as_deref());
        Applied::Accepted
    }

    /// Full snapshot for a sync response, keys in sorted order.
    pub fn snapshot(&self) -> Vec<WireEntry> {
        self.entries
            .iter()
            .map(|(key, entry)| WireEntry {
                key: key.clone(),
                value: entry.value.clone(),
                stamp: entry.stamp,
            })
            .collect()
    }

    /// Merge a peer's snapshot entry-by-entry under the same rule as single
    /// writes. Returns how many entries were accepted. This is the rejoin
    /// path: two previously-partitioned groups converge by swapping
    /// snapshots.
    pub fn merge_snapshot(&mut self, entries: &[WireEntry]) -> usize {
        entries
            .iter()
            .filter(|e| self.apply_remote(&e.key, &e.value, e.stamp) == Applied::Accepted)
            .count()
    }

    /// Key/value pairs for telemetry snapshots.
    pub fn kv_pairs(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StateEntry)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), e))
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("local", &self.local)
            .field("clock", &self.clock)
            .field("entries", &self.entries.len())
            .field("watchers", &self.watchers)
            .finish()
    }
}
