//! Metrics collection for simulation analysis.

use hashbrown::HashMap;
use sprout::{RouterState, Timestamp, AUTO};

use crate::SimId;

/// Per-node mesh state at a point in simulated time.
#[derive(Debug, Clone)]
pub struct MeshSnapshot {
    /// When this snapshot was taken.
    pub time: Timestamp,
    /// Router state of each node.
    pub states: HashMap<SimId, RouterState>,
    /// Radio address of each node (AUTO while unassigned).
    pub addresses: HashMap<SimId, u8>,
    /// Parent address of each node.
    pub parents: HashMap<SimId, u8>,
    /// Hop distance of each node.
    pub distances: HashMap<SimId, u8>,
}

impl MeshSnapshot {
    pub fn new(time: Timestamp) -> Self {
        Self {
            time,
            states: HashMap::new(),
            addresses: HashMap::new(),
            parents: HashMap::new(),
            distances: HashMap::new(),
        }
    }

    /// Record one node's state.
    pub fn record_node(
        &mut self,
        id: SimId,
        state: RouterState,
        address: u8,
        parent: u8,
        distance: u8,
    ) {
        self.states.insert(id, state);
        self.addresses.insert(id, address);
        self.parents.insert(id, parent);
        self.distances.insert(id, distance);
    }

    /// True when every node is routing normally with a resolved address.
    pub fn converged(&self) -> bool {
        self.states.values().all(|&s| s == RouterState::Normal)
            && self.addresses.values().all(|&a| a != AUTO)
    }

    /// Largest hop distance in the mesh.
    pub fn max_distance(&self) -> u8 {
        self.distances.values().copied().max().unwrap_or(0)
    }

    /// Nodes still waiting for an address or a parent.
    pub fn unconverged(&self) -> Vec<SimId> {
        let mut ids: Vec<SimId> = self
            .states
            .iter()
            .filter(|(_, &s)| s != RouterState::Normal)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Counters and snapshots collected over a simulation run.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    /// Snapshots in chronological order.
    pub snapshots: Vec<MeshSnapshot>,
    /// Frames handed to the simulated ether.
    pub frames_sent: u64,
    /// Frames dropped by per-link loss.
    pub frames_lost: u64,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent snapshot, if any.
    pub fn latest_snapshot(&self) -> Option<&MeshSnapshot> {
        self.snapshots.last()
    }

    /// Earliest snapshot time at which the mesh was converged.
    pub fn convergence_time(&self) -> Option<Timestamp> {
        self.snapshots
            .iter()
            .find(|snapshot| snapshot.converged())
            .map(|snapshot| snapshot.time)
    }
}

/// Outcome of a scenario run.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub metrics: SimMetrics,
}

impl SimulationResult {
    /// True when the final snapshot shows a fully formed mesh.
    pub fn converged(&self) -> bool {
        self.metrics
            .latest_snapshot()
            .map(|snapshot| snapshot.converged())
            .unwrap_or(false)
    }
}
