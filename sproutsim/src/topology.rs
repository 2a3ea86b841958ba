//! Network topology: which nodes hear which, and how well.

use hashbrown::HashMap;
use sprout::Duration;

use crate::SimId;

/// Properties of a radio link between two nodes.
#[derive(Debug, Clone)]
pub struct Link {
    /// Packet loss rate (0.0 to 1.0), applied per delivered frame.
    pub loss_rate: f64,
    /// Propagation plus processing delay.
    pub delay: Duration,
    /// Whether the link currently carries frames.
    pub active: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            delay: Duration::from_millis(1),
            active: true,
        }
    }
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Bidirectional connectivity between simulated nodes.
///
/// Links are stored with the smaller id first; lookups normalize the
/// pair, so `link(a, b)` and `link(b, a)` see the same state.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    links: HashMap<(SimId, SimId), Link>,
}

fn key(a: SimId, b: SimId) -> (SimId, SimId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Topology {
    /// Empty topology: nobody hears anybody.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect two nodes with default link properties.
    pub fn connect(&mut self, a: SimId, b: SimId) {
        self.connect_with(a, b, Link::default());
    }

    /// Connect two nodes with explicit link properties.
    pub fn connect_with(&mut self, a: SimId, b: SimId, link: Link) {
        if a != b {
            self.links.insert(key(a, b), link);
        }
    }

    /// Remove the link entirely.
    pub fn disconnect(&mut self, a: SimId, b: SimId) {
        self.links.remove(&key(a, b));
    }

    /// Enable or disable an existing link.
    pub fn set_active(&mut self, a: SimId, b: SimId, active: bool) {
        if let Some(link) = self.links.get_mut(&key(a, b)) {
            link.active = active;
        }
    }

    /// Set the loss rate on an existing link.
    pub fn set_loss_rate(&mut self, a: SimId, b: SimId, rate: f64) {
        if let Some(link) = self.links.get_mut(&key(a, b)) {
            link.loss_rate = rate.clamp(0.0, 1.0);
        }
    }

    /// Link properties between two nodes, if connected.
    pub fn link(&self, a: SimId, b: SimId) -> Option<&Link> {
        self.links.get(&key(a, b))
    }

    /// Nodes with an active link to `node`.
    pub fn neighbors(&self, node: SimId) -> Vec<SimId> {
        let mut neighbors: Vec<SimId> = self
            .links
            .iter()
            .filter(|(_, link)| link.active)
            .filter_map(|(&(a, b), _)| {
                if a == node {
                    Some(b)
                } else if b == node {
                    Some(a)
                } else {
                    None
                }
            })
            .collect();
        neighbors.sort_unstable();
        neighbors
    }

    /// Every node connected to every other.
    pub fn fully_connected(count: usize) -> Self {
        let mut topology = Self::new();
        for a in 0..count {
            for b in a + 1..count {
                topology.connect(a, b);
            }
        }
        topology
    }

    /// A line: node i hears only i-1 and i+1.
    pub fn chain(count: usize) -> Self {
        let mut topology = Self::new();
        for i in 1..count {
            topology.connect(i - 1, i);
        }
        topology
    }

    /// Node 0 as hub, everyone else a spoke.
    pub fn star(count: usize) -> Self {
        let mut topology = Self::new();
        for i in 1..count {
            topology.connect(0, i);
        }
        topology
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_links_are_bidirectional() {
        let mut topology = Topology::new();
        topology.connect(1, 3);
        assert!(topology.link(1, 3).is_some());
        assert!(topology.link(3, 1).is_some());
        assert_eq!(topology.neighbors(1), vec![3]);
        assert_eq!(topology.neighbors(3), vec![1]);
    }

    #[test]
    fn test_inactive_links_have_no_neighbors() {
        let mut topology = Topology::new();
        topology.connect(0, 1);
        topology.set_active(0, 1, false);
        assert!(topology.neighbors(0).is_empty());
        topology.set_active(0, 1, true);
        assert_eq!(topology.neighbors(0), vec![1]);
    }

    #[test]
    fn test_generators() {
        let full = Topology::fully_connected(4);
        assert_eq!(full.neighbors(0), vec![1, 2, 3]);

        let chain = Topology::chain(4);
        assert_eq!(chain.neighbors(0), vec![1]);
        assert_eq!(chain.neighbors(1), vec![0, 2]);
        assert_eq!(chain.neighbors(3), vec![2]);

        let star = Topology::star(4);
        assert_eq!(star.neighbors(0), vec![1, 2, 3]);
        assert_eq!(star.neighbors(2), vec![0]);
    }
}
