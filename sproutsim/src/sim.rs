//! Discrete event simulator for sprout meshes.
//!
//! A priority queue of `(time, sequence)`-ordered events drives the
//! whole network in one process with no real-time delays. The loop:
//! pop the next event, advance simulated time, drive the affected
//! node's synchronous `process()`/`send()` entry points, collect
//! whatever it transmitted, and route those frames through the topology
//! as future delivery events. Nodes are exercised purely through their
//! public API and injected mock collaborators.

use std::collections::BinaryHeap;

use hashbrown::{HashMap, HashSet};
use log::trace;
use rand_core::{RngCore, SeedableRng};
use rand_wyrand::WyRand;
use sprout::types::CMD_SET;
use sprout::{Duration, Message, NodeOptions, Timestamp, BROADCAST_ADDRESS, AUTO};

use crate::event::{Event, ScenarioAction, ScheduledEvent, SequenceNumber};
use crate::metrics::{MeshSnapshot, SimMetrics};
use crate::node::{Controller, SimNode};
use crate::topology::Topology;
use crate::SimId;

/// Default interval between process() ticks per node. Discovery windows
/// are hundreds of milliseconds, so this resolves them comfortably.
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Discrete event simulator for a sprout mesh.
pub struct Simulator {
    nodes: HashMap<SimId, SimNode>,
    topology: Topology,
    controller: Controller,
    current_time: Timestamp,
    event_queue: BinaryHeap<ScheduledEvent>,
    metrics: SimMetrics,
    next_seq: u64,
    rng: WyRand,
    tick_interval: Duration,
}

impl Simulator {
    /// Create a simulator with a deterministic RNG seed.
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: HashMap::new(),
            topology: Topology::new(),
            controller: Controller::new(),
            current_time: Timestamp::ZERO,
            event_queue: BinaryHeap::new(),
            metrics: SimMetrics::new(),
            next_seq: 0,
            rng: WyRand::seed_from_u64(seed),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    /// Set the network topology. Node ids are assigned sequentially from
    /// zero by [`add_node`](Simulator::add_node), so a topology can be
    /// built before the nodes exist.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Add a node and bring it up at the current simulated time.
    pub fn add_node(&mut self, options: NodeOptions) -> SimId {
        let id = self.nodes.len();
        let mut node = SimNode::new(options);
        node.clock.set(self.current_time);
        node.node.begin();
        self.nodes.insert(id, node);

        self.refresh_reachability();
        self.collect_outgoing(id);
        let first_tick = self.current_time + self.tick_interval;
        self.schedule(first_tick, Event::Tick { node: id });
        id
    }

    pub fn node(&self, id: SimId) -> Option<&SimNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: SimId) -> Option<&mut SimNode> {
        self.nodes.get_mut(&id)
    }

    /// The controller program behind the gateway.
    pub fn controller_mut(&mut self) -> &mut Controller {
        &mut self.controller
    }

    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    /// Schedule an event at an absolute time.
    fn schedule(&mut self, time: Timestamp, event: Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, event));
    }

    /// Schedule a scenario action.
    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        self.schedule(time, Event::Action(action));
    }

    /// Schedule an application-level send.
    pub fn schedule_app_send(
        &mut self,
        time: Timestamp,
        from: SimId,
        destination: u8,
        payload: Vec<u8>,
    ) {
        self.schedule(
            time,
            Event::AppSend {
                from,
                destination,
                payload,
            },
        );
    }

    /// Push frames a node queued outside the event loop (after driving
    /// its API directly from a test) into the ether.
    pub fn flush(&mut self, id: SimId) {
        self.collect_outgoing(id);
        self.refresh_reachability();
    }

    /// Run until the given absolute time, then take a closing snapshot.
    pub fn run_until(&mut self, until: Timestamp) {
        while let Some(next) = self.event_queue.peek() {
            if next.time > until {
                break;
            }
            let scheduled = self.event_queue.pop().expect("peeked event");
            self.current_time = scheduled.time;
            self.handle_event(scheduled.event);
        }
        self.current_time = until;
        self.take_snapshot();
    }

    /// Run for a span of simulated time.
    pub fn run_for(&mut self, duration: Duration) {
        self.run_until(self.current_time + duration);
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::FrameDelivery { to, bytes } => {
                if let Some(node) = self.nodes.get(&to) {
                    node.transport.inject(bytes);
                }
                self.drive_node(to);
            }
            Event::Tick { node } => {
                self.drive_node(node);
                let next = self.current_time + self.tick_interval;
                self.schedule(next, Event::Tick { node });
            }
            Event::AppSend {
                from,
                destination,
                payload,
            } => {
                if let Some(node) = self.nodes.get_mut(&from) {
                    node.clock.set(self.current_time);
                    let mut msg = Message::new(destination, CMD_SET, 0);
                    if msg.set_payload(&payload).is_ok() {
                        let _ = node.node.send(&mut msg, false);
                    }
                }
                self.collect_outgoing(from);
                self.refresh_reachability();
            }
            Event::Action(action) => self.handle_action(action),
        }
    }

    fn handle_action(&mut self, action: ScenarioAction) {
        match action {
            ScenarioAction::DisableLink { a, b } => self.topology.set_active(a, b, false),
            ScenarioAction::EnableLink { a, b } => self.topology.set_active(a, b, true),
            ScenarioAction::SetLossRate { a, b, rate } => self.topology.set_loss_rate(a, b, rate),
            ScenarioAction::TakeSnapshot => self.take_snapshot(),
        }
        self.refresh_reachability();
    }

    /// Drive one node: align its clock, drain its inbound queue through
    /// `process()`, let the controller answer anything delivered at the
    /// gateway, then route what it transmitted.
    fn drive_node(&mut self, id: SimId) {
        {
            let Some(node) = self.nodes.get_mut(&id) else {
                return;
            };
            node.clock.set(self.current_time);
            loop {
                let delivered = node.node.process();
                if delivered && node.gateway {
                    let msg = node.node.last_message().clone();
                    self.controller.respond(&mut node.node, &msg);
                }
                if !node.transport.pending() {
                    break;
                }
            }
        }
        self.collect_outgoing(id);
        // Discovery may have changed this node's address.
        self.refresh_reachability();
    }

    /// Route everything a node transmitted through the topology,
    /// applying per-link loss and delay.
    fn collect_outgoing(&mut self, from: SimId) {
        let Some(node) = self.nodes.get(&from) else {
            return;
        };
        let frames = node.transport.take_sent();
        for frame in frames {
            self.metrics.frames_sent += 1;
            for to in self.topology.neighbors(from) {
                let Some(link) = self.topology.link(from, to) else {
                    continue;
                };
                let (loss_rate, delay) = (link.loss_rate, link.delay);
                let to_address = self.nodes.get(&to).map(|n| n.address()).unwrap_or(AUTO);
                let hears = frame.address == BROADCAST_ADDRESS
                    || (to_address != AUTO && frame.address == to_address);
                if !hears {
                    continue;
                }
                if self.roll(loss_rate) {
                    self.metrics.frames_lost += 1;
                    trace!("frame {} -> {} lost", from, to);
                    continue;
                }
                let at = self.current_time + delay;
                self.schedule(
                    at,
                    Event::FrameDelivery {
                        to,
                        bytes: frame.bytes.clone(),
                    },
                );
            }
        }
    }

    /// Recompute, for every node, which radio addresses currently answer
    /// a hardware ack: the addresses of its active, configured
    /// neighbors.
    fn refresh_reachability(&mut self) {
        let ids: Vec<SimId> = self.nodes.keys().copied().collect();
        for &id in &ids {
            let mut reachable = HashSet::new();
            for neighbor in self.topology.neighbors(id) {
                if let Some(node) = self.nodes.get(&neighbor) {
                    let address = node.address();
                    if address != AUTO {
                        reachable.insert(address);
                    }
                }
            }
            if let Some(node) = self.nodes.get(&id) {
                node.transport.set_reachable(reachable);
            }
        }
    }

    /// True when a frame on this link is lost.
    fn roll(&mut self, loss_rate: f64) -> bool {
        if loss_rate <= 0.0 {
            return false;
        }
        let sample = (self.rng.next_u64() >> 11) as f64 / (1u64 << 53) as f64;
        sample < loss_rate
    }

    /// Record the mesh state of every node.
    pub fn take_snapshot(&mut self) {
        let mut snapshot = MeshSnapshot::new(self.current_time);
        for (&id, node) in &self.nodes {
            snapshot.record_node(
                id,
                node.node.state(),
                node.address(),
                node.node.parent_node_id(),
                node.node.distance(),
            );
        }
        self.metrics.snapshots.push(snapshot);
    }
}
