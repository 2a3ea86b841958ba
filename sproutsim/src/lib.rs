//! sproutsim - discrete event network simulator for sprout mesh testing.
//!
//! Simulates whole meshes in one process with no real-time delays:
//! deterministic event ordering, per-link loss/delay/partition control,
//! a scenario builder, and mesh-state metrics. Nodes run the real
//! `sprout` protocol code, driven purely through its public synchronous
//! API (`process`, `send`) and injected mock collaborators - the same
//! seam a hardware port uses, so what converges here converges on
//! radios.
//!
//! # Example
//!
//! ```
//! use sproutsim::ScenarioBuilder;
//! use sprout::Duration;
//!
//! // Gateway plus three repeaters in a line, addresses preprovisioned.
//! let result = ScenarioBuilder::new(4)
//!     .with_seed(42)
//!     .chain_topology()
//!     .static_ids()
//!     .run_for(Duration::from_secs(60));
//!
//! assert!(result.converged());
//! ```
//!
//! # Architecture
//!
//! A priority queue of events ordered by `(time, sequence)`. The loop
//! pops an event, advances simulated time, drives the affected node's
//! `process()`/`send()`, collects its transmitted frames, and routes
//! them through the topology as future deliveries. The gateway's
//! controller (id assignment, config, time) runs against delivered
//! messages the same way a host application would.

pub mod event;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod sim;
pub mod topology;

/// Stable handle of a simulated node (assignment order), distinct from
/// its radio address, which may start unassigned.
pub type SimId = usize;

pub use event::{Event, ScenarioAction, ScheduledEvent};
pub use metrics::{MeshSnapshot, SimMetrics, SimulationResult};
pub use node::{Controller, SimNode, SimTransport};
pub use scenario::ScenarioBuilder;
pub use sim::Simulator;
pub use topology::{Link, Topology};

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use sprout::{Duration, RouterState, Timestamp};

    use super::*;

    #[test]
    fn test_lone_gateway_converges() {
        let result = ScenarioBuilder::new(1)
            .with_seed(42)
            .run_for(Duration::from_secs(5));
        assert!(result.converged());
        let snapshot = result.metrics.latest_snapshot().unwrap();
        assert_eq!(snapshot.max_distance(), 0);
    }

    #[test]
    fn test_leaf_joins_gateway_with_auto_id() {
        let (mut sim, ids) = ScenarioBuilder::new(2).with_seed(42).build();
        sim.run_for(Duration::from_secs(30));

        let leaf = sim.node(ids[1]).unwrap();
        assert_eq!(leaf.node.state(), RouterState::Normal);
        assert_eq!(leaf.address(), 1);
        assert_eq!(leaf.node.parent_node_id(), 0);
        assert_eq!(leaf.node.distance(), 1);
    }

    #[test]
    fn test_star_with_static_ids_converges() {
        let (mut sim, ids) = ScenarioBuilder::new(5)
            .with_seed(7)
            .star_topology()
            .static_ids()
            .build();
        sim.run_for(Duration::from_secs(60));
        sim.take_snapshot();

        for &id in &ids[1..] {
            let node = sim.node(id).unwrap();
            assert_eq!(node.node.state(), RouterState::Normal);
            assert_eq!(node.node.parent_node_id(), 0);
            assert_eq!(node.node.distance(), 1);
        }
    }

    #[test]
    fn test_chain_forms_multi_hop_tree() {
        // Parent adoption ripples outward from the gateway: each ring
        // only finds a parent once the previous ring routes normally.
        let (mut sim, ids) = ScenarioBuilder::new(4)
            .with_seed(42)
            .chain_topology()
            .static_ids()
            .build();
        sim.run_for(Duration::from_secs(60));

        for (hops, &id) in ids[1..].iter().enumerate() {
            let node = sim.node(id).unwrap();
            assert_eq!(node.node.state(), RouterState::Normal);
            assert_eq!(node.node.distance(), hops as u8 + 1);
            assert_eq!(node.node.parent_node_id(), hops as u8);
        }
    }

    #[test]
    fn test_delivery_up_and_down_the_chain() {
        let (mut sim, ids) = ScenarioBuilder::new(4)
            .with_seed(42)
            .chain_topology()
            .static_ids()
            .build();
        sim.run_for(Duration::from_secs(60));
        assert_eq!(
            sim.node(ids[3]).unwrap().node.state(),
            RouterState::Normal
        );

        // Leaf (address 3) to gateway, relayed by both repeaters.
        sim.schedule_app_send(
            Timestamp::from_secs(61),
            ids[3],
            sprout::GATEWAY_ADDRESS,
            b"ping".to_vec(),
        );
        // Gateway back down to the leaf over learned routes.
        sim.schedule_app_send(Timestamp::from_secs(65), ids[0], 3, b"pong".to_vec());
        sim.run_until(Timestamp::from_secs(80));

        let up = sim.node(ids[0]).unwrap().app_received();
        assert!(up
            .iter()
            .any(|msg| msg.sender == 3 && msg.payload == b"ping"));

        let down = sim.node(ids[3]).unwrap().app_received();
        assert!(down
            .iter()
            .any(|msg| msg.sender == 0 && msg.payload == b"pong"));
    }

    #[test]
    fn test_failover_reparents_to_backup_repeater() {
        // Diamond: gateway 0 at the top, repeaters 1 and 2 both in
        // gateway range, leaf 3 hearing only the repeaters.
        let mut topology = Topology::new();
        topology.connect(0, 1);
        topology.connect(0, 2);
        topology.connect(1, 3);
        topology.connect(2, 3);

        let (mut sim, ids) = ScenarioBuilder::new(4)
            .with_seed(42)
            .topology(topology)
            .static_ids()
            .at(
                Timestamp::from_secs(30),
                ScenarioAction::DisableLink { a: 3, b: 1 },
            )
            .build();
        sim.run_for(Duration::from_secs(30) - Duration::from_millis(1));

        // Both candidates advertise distance 1; the first response wins.
        assert_eq!(sim.node(ids[3]).unwrap().node.parent_node_id(), 1);

        // The dead parent only shows through failed transmissions, so
        // generate upstream traffic after the link drops.
        for i in 0..sprout::SEARCH_FAILURES {
            sim.schedule_app_send(
                Timestamp::from_secs(31 + i as u64),
                ids[3],
                sprout::GATEWAY_ADDRESS,
                b"up".to_vec(),
            );
        }
        sim.run_until(Timestamp::from_secs(50));

        let leaf = sim.node(ids[3]).unwrap();
        assert_eq!(leaf.node.state(), RouterState::Normal);
        assert_eq!(leaf.node.parent_node_id(), 2);
        assert_eq!(leaf.node.distance(), 2);
    }

    #[test]
    fn test_controller_config_reaches_leaf() {
        let (mut sim, ids) = ScenarioBuilder::new(2).with_seed(9).build();
        sim.controller_mut().is_metric = false;
        sim.run_for(Duration::from_secs(30));

        let leaf = sim.node(ids[1]).unwrap();
        assert_eq!(leaf.node.state(), RouterState::Normal);
        assert!(!leaf.node.config().is_metric);
    }

    #[test]
    fn test_time_request_round_trip() {
        let (mut sim, ids) = ScenarioBuilder::new(2).with_seed(5).build();
        sim.run_for(Duration::from_secs(30));

        let seen = Rc::new(Cell::new(0u32));
        {
            let leaf = sim.node_mut(ids[1]).unwrap();
            let seen_in_callback = seen.clone();
            leaf.node.on_time(move |secs| seen_in_callback.set(secs));
            leaf.node.request_time().unwrap();
        }
        sim.flush(ids[1]);
        sim.run_for(Duration::from_secs(5));

        assert_eq!(seen.get(), 1_700_000_000);
    }

    #[test]
    fn test_lossy_chain_still_converges() {
        let result = ScenarioBuilder::new(3)
            .with_seed(1234)
            .chain_topology()
            .static_ids()
            .with_loss_rate(0.3)
            .run_for(Duration::from_secs(240));

        assert!(result.converged(), "mesh did not form under 30% loss");
        assert!(result.metrics.frames_lost > 0, "loss was never exercised");
    }
}
