//! Coordinator recomputation over the topology view

use murmur_core::NodeId;

/// Current designation, as computed from the local view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CoordinatorState {
    /// Smallest visible node id, None before the first recomputation
    pub coordinator: Option<NodeId>,
    /// Incremented on every recomputation
    pub epoch: u64,
}

/// Emitted when the local node's own status flips.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoleChange {
    pub is_coordinator: bool,
    pub coordinator: NodeId,
    pub epoch: u64,
}

/// Recomputes the coordinator designation for one node.
#[derive(Debug)]
pub struct CoordinatorSelector {
    local: NodeId,
    state: CoordinatorState,
    was_coordinator: bool,
}

impl CoordinatorSelector {
    pub fn new(local: NodeId) -> Self {
        CoordinatorSelector {
            local,
            state: CoordinatorState::default(),
            was_coordinator: false,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn is_coordinator(&self) -> bool {
        self.state.coordinator == Some(self.local)
    }

    /// Recompute from the currently-connected peer ids (self is implied).
    ///
    /// The coordinator is the numerically smallest visible id. The epoch
    /// increments unconditionally; the returned change is `Some` only when
    /// the local node's own coordinator status flipped.
    pub fn recompute(&mut self, peers: impl IntoIterator<Item = NodeId>) -> Option<RoleChange> {
        let coordinator = peers
            .into_iter()
            .chain(std::iter::once(self.local))
            .min()
            .unwrap_or(self.local);

        self.state.epoch += 1;
        self.state.coordinator = Some(coordinator);

        let is_coordinator = coordinator == self.local;
        if is_coordinator == self.was_coordinator {
            return None;
        }
        self.was_coordinator = is_coordinator;

        tracing::debug!(
            coordinator = %coordinator,
            epoch = self.state.epoch,
            is_coordinator,
            "coordinator status changed"
        );

        Some(RoleChange {
            is_coordinator,
            coordinator,
            epoch: self.state.epoch,
        })
    }
}
