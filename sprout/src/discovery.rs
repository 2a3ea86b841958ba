//! Parent discovery: the id-request and parent-search sub-protocols.
//!
//! Both are broadcast request/response rounds with no arbiter other
//! than the gateway, and both are driven from `process()` rather than
//! blocking: a round opens a listen window, responses are collected as
//! they arrive, and window expiry is checked on later cycles. A node
//! that gets no answers stays in its discovery state and retries after
//! a cooldown - unconfigured is not fatal, it just means the host loop
//! keeps cycling.
//!
//! Id requests are answered by the gateway alone, which hands them to
//! its controller through the message callback; responses come back as
//! broadcasts because the requester has no routable address yet. Parent
//! searches are answered by the gateway and by repeater-capable
//! configured neighbors - a leaf cannot forward traffic, so it never
//! advertises itself as a parent.

use log::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::time::Timestamp;
use crate::traits::{Clock, Storage, Transport};
use crate::types::{
    is_routable, Message, RouterState, BROADCAST_ADDRESS, CMD_INTERNAL, DISTANCE_INVALID,
    GATEWAY_ADDRESS, ID_REQUEST_COOLDOWN, ID_REQUEST_RETRIES, ID_REQUEST_WINDOW, INT_CONFIG,
    INT_FIND_PARENT, INT_FIND_PARENT_RESPONSE, INT_ID_REQUEST, INT_ID_RESPONSE, INT_TIME_RESPONSE,
    NODE_PIPE, PARENT_SEARCH_COOLDOWN, PARENT_SEARCH_WINDOW,
};
use crate::Node;

/// Phase of the current discovery round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Round {
    /// No round in progress.
    Idle,
    /// A request was broadcast; collecting responses until the window
    /// closes. `attempt` counts broadcasts within this round.
    Listening { ends: Timestamp, attempt: u8 },
    /// Round exhausted without a result; retry after this time.
    Cooldown { until: Timestamp },
}

/// Mutable state of the discovery protocols.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DiscoveryState {
    pub(crate) round: Round,
    /// Best parent candidate seen this round: `(address, distance)`.
    /// Lowest distance wins; the first responder keeps ties.
    pub(crate) best_parent: Option<(u8, u8)>,
}

impl Default for DiscoveryState {
    fn default() -> Self {
        Self {
            round: Round::Idle,
            best_parent: None,
        }
    }
}

impl<T, S, C> Node<T, S, C>
where
    T: Transport,
    S: Storage,
    C: Clock,
{
    /// Broadcast an id request and open the listen window.
    pub(crate) fn start_id_request(&mut self) {
        let now = self.clock.now();
        self.discovery.round = Round::Listening {
            ends: now + ID_REQUEST_WINDOW,
            attempt: 1,
        };
        debug!("requesting node id");
        let mut msg = Message::new(BROADCAST_ADDRESS, CMD_INTERNAL, INT_ID_REQUEST);
        msg.sender = self.identity.node_id;
        self.transmit(BROADCAST_ADDRESS, &mut msg);
    }

    /// Broadcast a find-parent frame and open the listen window.
    pub(crate) fn start_parent_search(&mut self) {
        let now = self.clock.now();
        self.discovery.best_parent = None;
        self.discovery.round = Round::Listening {
            ends: now + PARENT_SEARCH_WINDOW,
            attempt: 1,
        };
        debug!("searching for parent");
        let mut msg = Message::new(BROADCAST_ADDRESS, CMD_INTERNAL, INT_FIND_PARENT);
        msg.sender = self.identity.node_id;
        self.transmit(BROADCAST_ADDRESS, &mut msg);
    }

    /// Advance the discovery state machine: close expired windows, fire
    /// retries, end cooldowns. Called on every `process()` cycle; a
    /// no-op in Normal state.
    pub(crate) fn maintain_discovery(&mut self) {
        let now = self.clock.now();
        match self.state {
            RouterState::Normal => {}
            RouterState::RequestingId => match self.discovery.round {
                Round::Listening { ends, attempt } if now >= ends => {
                    if attempt >= ID_REQUEST_RETRIES {
                        warn!("no id response after {} attempts; cooling down", attempt);
                        self.discovery.round = Round::Cooldown {
                            until: now + ID_REQUEST_COOLDOWN,
                        };
                    } else {
                        // Rebroadcast with a doubled listen window.
                        let window = ID_REQUEST_WINDOW.saturating_mul(1 << attempt);
                        self.discovery.round = Round::Listening {
                            ends: now + window,
                            attempt: attempt + 1,
                        };
                        let mut msg =
                            Message::new(BROADCAST_ADDRESS, CMD_INTERNAL, INT_ID_REQUEST);
                        msg.sender = self.identity.node_id;
                        self.transmit(BROADCAST_ADDRESS, &mut msg);
                    }
                }
                Round::Cooldown { until } if now >= until => self.start_id_request(),
                _ => {}
            },
            RouterState::SearchingParent => match self.discovery.round {
                Round::Listening { ends, .. } if now >= ends => {
                    match self.discovery.best_parent.take() {
                        Some((address, distance)) => self.adopt_parent(address, distance),
                        None => {
                            debug!("no parent candidates; cooling down");
                            self.discovery.round = Round::Cooldown {
                                until: now + PARENT_SEARCH_COOLDOWN,
                            };
                        }
                    }
                }
                Round::Cooldown { until } if now >= until => self.start_parent_search(),
                _ => {}
            },
        }
    }

    /// Take the selected parent, persist the identity, and return to
    /// normal routing.
    fn adopt_parent(&mut self, address: u8, distance: u8) {
        self.identity.parent_node_id = address;
        self.identity.distance = distance.saturating_add(1);
        self.identity.commit(&mut self.storage);
        self.discovery.round = Round::Idle;
        info!(
            "parent {} adopted at distance {}",
            address, self.identity.distance
        );
        self.enter_state(RouterState::Normal);
        self.request_controller_config();
    }

    /// Intercept a control frame before any destination matching.
    /// Returns true when the frame was consumed here; anything not
    /// consumed continues into normal delivery and relaying.
    pub(crate) fn handle_control(&mut self, msg: &Message) -> bool {
        match msg.kind {
            INT_FIND_PARENT => {
                if self.can_parent() && is_routable(msg.sender) {
                    let mut reply =
                        Message::new(msg.sender, CMD_INTERNAL, INT_FIND_PARENT_RESPONSE);
                    reply.sender = self.identity.node_id;
                    reply.set_payload_u8(self.identity.distance);
                    self.transmit(msg.sender, &mut reply);
                }
                true
            }
            INT_FIND_PARENT_RESPONSE => {
                self.consider_parent(msg);
                true
            }
            INT_ID_REQUEST => {
                // The gateway hands the request to its controller via
                // normal broadcast delivery; everyone else drops it.
                !self.identity.is_gateway()
            }
            INT_ID_RESPONSE => {
                self.accept_id_response(msg);
                true
            }
            INT_CONFIG => self.accept_config(msg),
            INT_TIME_RESPONSE => self.accept_time(msg),
            _ => false,
        }
    }

    /// Whether this node may advertise itself as a parent: configured,
    /// routing normally, relay-capable, with a finite distance.
    fn can_parent(&self) -> bool {
        self.state == RouterState::Normal
            && self.identity.is_configured()
            && (self.options.repeater || self.identity.is_gateway())
            && self.identity.distance != DISTANCE_INVALID
    }

    /// Track the best candidate of the current search window. Responses
    /// outside a window (late, duplicate, or unsolicited) are ignored.
    fn consider_parent(&mut self, msg: &Message) {
        if self.state != RouterState::SearchingParent {
            return;
        }
        if !matches!(self.discovery.round, Round::Listening { .. }) {
            return;
        }
        let Some(distance) = msg.payload_u8() else {
            return;
        };
        if distance == DISTANCE_INVALID || !is_routable(msg.sender) {
            return;
        }
        debug!("parent candidate {} at distance {}", msg.sender, distance);
        match self.discovery.best_parent {
            Some((_, best)) if best <= distance => {}
            _ => self.discovery.best_parent = Some((msg.sender, distance)),
        }
    }

    /// Adopt an assigned node id while in the id-request state.
    fn accept_id_response(&mut self, msg: &Message) {
        if self.state != RouterState::RequestingId {
            return;
        }
        let Some(node_id) = msg.payload_u8() else {
            return;
        };
        if !is_routable(node_id) || node_id == GATEWAY_ADDRESS {
            return;
        }
        self.identity.node_id = node_id;
        self.identity.commit(&mut self.storage);
        self.transport.open_read_pipe(NODE_PIPE, node_id);
        self.discovery.round = Round::Idle;
        info!("assigned node id {}", node_id);

        if self.identity.is_configured() {
            // Parent was pinned or already persisted.
            self.enter_state(RouterState::Normal);
            self.request_controller_config();
        } else {
            self.enter_state(RouterState::SearchingParent);
            self.start_parent_search();
        }
    }

    /// Persist a controller-config push addressed to this node. The
    /// gateway never consumes config traffic - its controller does.
    fn accept_config(&mut self, msg: &Message) -> bool {
        if self.identity.is_gateway() {
            return false;
        }
        // Destination must match a real address; AUTO matches nothing.
        if !self.identity.has_node_id() || msg.destination != self.identity.node_id {
            return false;
        }
        let Some(flag) = msg.payload_u8() else {
            return false;
        };
        self.controller_config = ControllerConfig {
            is_metric: flag != 0,
        };
        self.controller_config.store(&mut self.storage);
        debug!("controller config: metric={}", self.controller_config.is_metric);
        true
    }

    /// Hand a time response addressed to this node to the time callback.
    fn accept_time(&mut self, msg: &Message) -> bool {
        if !self.identity.has_node_id() || msg.destination != self.identity.node_id {
            return false;
        }
        let Some(seconds) = msg.payload_u32() else {
            return false;
        };
        if let Some(mut callback) = self.time_callback.take() {
            callback(seconds);
            self.time_callback = Some(callback);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use core::cell::Cell;

    use super::Round;
    use crate::config::NodeOptions;
    use crate::identity::{layout, NodeIdentity};
    use crate::traits::test_impls::{MockClock, MockStorage, MockTransport};
    use crate::traits::Storage;
    use crate::types::{
        Message, RouterState, AUTO, BROADCAST_ADDRESS, CMD_INTERNAL, DISTANCE_INVALID,
        GATEWAY_ADDRESS, ID_REQUEST_COOLDOWN, ID_REQUEST_RETRIES, INT_CONFIG, INT_FIND_PARENT,
        INT_FIND_PARENT_RESPONSE, INT_ID_REQUEST, INT_ID_RESPONSE, INT_TIME_RESPONSE,
        PARENT_SEARCH_COOLDOWN, PARENT_SEARCH_WINDOW,
    };
    use crate::Node;

    type TestNode = Node<MockTransport, MockStorage, MockClock>;

    struct Harness {
        node: TestNode,
        transport: MockTransport,
        storage: MockStorage,
        clock: MockClock,
    }

    fn boot(identity: Option<(u8, u8, u8)>, options: NodeOptions) -> Harness {
        let transport = MockTransport::new();
        let storage = MockStorage::new();
        let clock = MockClock::new();
        if let Some((node_id, parent, distance)) = identity {
            let mut storage = storage.clone();
            NodeIdentity {
                node_id,
                parent_node_id: parent,
                distance,
            }
            .commit(&mut storage);
        }
        let mut node = Node::new(transport.clone(), storage.clone(), clock.clone(), options);
        node.begin();
        Harness {
            node,
            transport,
            storage,
            clock,
        }
    }

    fn control(sender: u8, last: u8, destination: u8, kind: u8) -> Message {
        let mut msg = Message::new(destination, CMD_INTERNAL, kind);
        msg.sender = sender;
        msg.last = last;
        msg
    }

    fn parent_response(sender: u8, distance: u8, destination: u8) -> Message {
        let mut msg = control(sender, sender, destination, INT_FIND_PARENT_RESPONSE);
        msg.set_payload_u8(distance);
        msg
    }

    #[test]
    fn test_fresh_node_broadcasts_id_request() {
        let h = boot(None, NodeOptions::new());
        assert_eq!(h.node.state(), RouterState::RequestingId);

        let sent = h.transport.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].address, BROADCAST_ADDRESS);
        let msg = sent[0].message();
        assert_eq!((msg.command, msg.kind), (CMD_INTERNAL, INT_ID_REQUEST));
        assert_eq!(msg.sender, AUTO);
    }

    #[test]
    fn test_id_response_is_adopted_and_persisted() {
        let mut h = boot(None, NodeOptions::new());
        h.transport.take_sent();

        let mut response = control(
            GATEWAY_ADDRESS,
            GATEWAY_ADDRESS,
            BROADCAST_ADDRESS,
            INT_ID_RESPONSE,
        );
        response.set_payload_u8(7);
        h.transport.inject(&response);
        h.node.process();

        assert_eq!(h.node.node_id(), 7);
        assert_eq!(h.storage.read(layout::NODE_ID), 7);
        // Out of RequestingId and straight into the parent search.
        assert_eq!(h.node.state(), RouterState::SearchingParent);
        let sent = h.transport.take_sent();
        assert_eq!(sent.last().unwrap().message().kind, INT_FIND_PARENT);
    }

    #[test]
    fn test_id_response_ignored_when_configured() {
        let mut h = boot(Some((5, 2, 1)), NodeOptions::new());
        h.transport.take_sent();

        let mut response = control(
            GATEWAY_ADDRESS,
            GATEWAY_ADDRESS,
            BROADCAST_ADDRESS,
            INT_ID_RESPONSE,
        );
        response.set_payload_u8(9);
        h.transport.inject(&response);
        assert!(!h.node.process());
        assert_eq!(h.node.node_id(), 5);
    }

    #[test]
    fn test_id_request_backoff_and_cooldown() {
        let mut h = boot(None, NodeOptions::new());
        assert_eq!(h.transport.sent_len(), 1);

        // Each expired window rebroadcasts, up to the retry budget.
        for attempt in 1..ID_REQUEST_RETRIES {
            h.clock.advance(crate::types::ID_REQUEST_WINDOW.saturating_mul(1 << attempt));
            h.node.process();
            assert_eq!(h.transport.sent_len(), attempt as usize + 1);
        }

        // Budget exhausted: the round cools down, no more broadcasts.
        h.clock
            .advance(crate::types::ID_REQUEST_WINDOW.saturating_mul(1 << ID_REQUEST_RETRIES));
        h.node.process();
        let sent_before = h.transport.sent_len();
        h.node.process();
        assert_eq!(h.transport.sent_len(), sent_before);
        assert_eq!(h.node.state(), RouterState::RequestingId);

        // After the cooldown a fresh round begins.
        h.clock.advance(ID_REQUEST_COOLDOWN);
        h.node.process();
        assert_eq!(h.transport.sent_len(), sent_before + 1);
    }

    #[test]
    fn test_parent_search_selects_lowest_distance() {
        // Id 5 persisted, parent unknown: boots into SearchingParent.
        let mut h = boot(Some((5, AUTO, DISTANCE_INVALID)), NodeOptions::new());
        assert_eq!(h.node.state(), RouterState::SearchingParent);
        h.transport.take_sent();

        h.transport.inject(&parent_response(9, 3, 5));
        h.transport.inject(&parent_response(2, 1, 5));
        h.node.process();
        h.node.process();

        h.clock.advance(PARENT_SEARCH_WINDOW);
        h.node.process();

        assert_eq!(h.node.state(), RouterState::Normal);
        assert_eq!(h.node.parent_node_id(), 2);
        assert_eq!(h.node.distance(), 2); // responder's distance + 1
        assert_eq!(h.storage.read(layout::PARENT_NODE_ID), 2);
        assert_eq!(h.storage.read(layout::DISTANCE), 2);
    }

    #[test]
    fn test_parent_search_first_seen_wins_ties() {
        let mut h = boot(Some((5, AUTO, DISTANCE_INVALID)), NodeOptions::new());
        h.transport.take_sent();

        h.transport.inject(&parent_response(2, 1, 5));
        h.transport.inject(&parent_response(3, 1, 5));
        h.node.process();
        h.node.process();
        h.clock.advance(PARENT_SEARCH_WINDOW);
        h.node.process();

        assert_eq!(h.node.parent_node_id(), 2);
    }

    #[test]
    fn test_late_parent_response_ignored() {
        let mut h = boot(Some((5, AUTO, DISTANCE_INVALID)), NodeOptions::new());
        h.transport.take_sent();
        h.transport.inject(&parent_response(2, 1, 5));
        h.node.process();
        h.clock.advance(PARENT_SEARCH_WINDOW);
        h.node.process();
        assert_eq!(h.node.parent_node_id(), 2);

        // A straggler with a better distance changes nothing.
        h.transport.inject(&parent_response(4, 0, 5));
        h.node.process();
        assert_eq!(h.node.parent_node_id(), 2);
        assert_eq!(h.node.distance(), 2);
    }

    #[test]
    fn test_empty_window_cools_down_then_retries() {
        let mut h = boot(Some((5, AUTO, DISTANCE_INVALID)), NodeOptions::new());
        assert_eq!(h.transport.sent_len(), 1);

        h.clock.advance(PARENT_SEARCH_WINDOW);
        h.node.process();
        assert_eq!(h.node.state(), RouterState::SearchingParent);
        assert_eq!(h.transport.sent_len(), 1);

        h.clock.advance(PARENT_SEARCH_COOLDOWN);
        h.node.process();
        assert_eq!(h.transport.sent_len(), 2);
        assert_eq!(
            h.transport.take_sent().last().unwrap().message().kind,
            INT_FIND_PARENT
        );
    }

    #[test]
    fn test_repeater_answers_find_parent() {
        let mut h = boot(Some((6, 2, 1)), NodeOptions::new().repeater());
        h.transport.take_sent();

        h.transport
            .inject(&control(5, 5, BROADCAST_ADDRESS, INT_FIND_PARENT));
        assert!(!h.node.process());

        let sent = h.transport.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].address, 5);
        let reply = sent[0].message();
        assert_eq!(reply.kind, INT_FIND_PARENT_RESPONSE);
        assert_eq!(reply.payload_u8(), Some(1));
        assert_eq!(reply.sender, 6);
    }

    #[test]
    fn test_gateway_answers_find_parent_with_distance_zero() {
        let mut h = boot(None, NodeOptions::new().gateway());
        h.transport.take_sent();

        h.transport
            .inject(&control(5, 5, BROADCAST_ADDRESS, INT_FIND_PARENT));
        h.node.process();
        let reply = h.transport.take_sent()[0].message();
        assert_eq!(reply.payload_u8(), Some(0));
    }

    #[test]
    fn test_leaf_does_not_answer_find_parent() {
        let mut h = boot(Some((6, 2, 1)), NodeOptions::new());
        h.transport.take_sent();
        h.transport
            .inject(&control(5, 5, BROADCAST_ADDRESS, INT_FIND_PARENT));
        h.node.process();
        assert_eq!(h.transport.sent_len(), 0);
    }

    #[test]
    fn test_searching_node_does_not_answer_find_parent() {
        let mut h = boot(Some((6, AUTO, DISTANCE_INVALID)), NodeOptions::new().repeater());
        h.transport.take_sent();
        h.transport
            .inject(&control(5, 5, BROADCAST_ADDRESS, INT_FIND_PARENT));
        h.node.process();
        assert_eq!(h.transport.sent_len(), 0);
    }

    #[test]
    fn test_gateway_hands_id_request_to_controller() {
        let mut h = boot(None, NodeOptions::new().gateway());
        h.transport.take_sent();
        let seen = Rc::new(Cell::new(0u8));
        let seen_in_callback = seen.clone();
        h.node.on_message(move |msg| seen_in_callback.set(msg.kind));

        h.transport
            .inject(&control(AUTO, AUTO, BROADCAST_ADDRESS, INT_ID_REQUEST));
        assert!(h.node.process());
        assert_eq!(seen.get(), INT_ID_REQUEST);
    }

    #[test]
    fn test_repeater_drops_id_request() {
        let mut h = boot(Some((6, 2, 1)), NodeOptions::new().repeater());
        h.transport.take_sent();
        h.transport
            .inject(&control(AUTO, AUTO, BROADCAST_ADDRESS, INT_ID_REQUEST));
        assert!(!h.node.process());
        assert_eq!(h.transport.sent_len(), 0);
    }

    #[test]
    fn test_config_push_is_persisted_silently() {
        let mut h = boot(Some((5, 2, 1)), NodeOptions::new());
        h.transport.take_sent();

        let mut push = control(GATEWAY_ADDRESS, 2, 5, INT_CONFIG);
        push.set_payload_u8(0);
        h.transport.inject(&push);
        assert!(!h.node.process());
        assert!(!h.node.config().is_metric);
        assert_eq!(h.storage.read(layout::CONTROLLER_CONFIG), 0);
    }

    #[test]
    fn test_time_response_reaches_time_callback() {
        let mut h = boot(Some((5, 2, 1)), NodeOptions::new());
        h.transport.take_sent();
        let seen = Rc::new(Cell::new(0u32));
        let seen_in_callback = seen.clone();
        h.node.on_time(move |secs| seen_in_callback.set(secs));

        let mut response = control(GATEWAY_ADDRESS, 2, 5, INT_TIME_RESPONSE);
        response.set_payload_u32(1_700_000_000);
        h.transport.inject(&response);
        assert!(!h.node.process());
        assert_eq!(seen.get(), 1_700_000_000);
    }

    #[test]
    fn test_failover_search_finds_new_parent() {
        let mut h = boot(Some((5, 2, 1)), NodeOptions::new());
        h.transport.take_sent();
        h.transport.fail_next(crate::types::SEARCH_FAILURES as u32);

        for _ in 0..crate::types::SEARCH_FAILURES {
            let mut msg = Message::new(GATEWAY_ADDRESS, crate::types::CMD_SET, 0);
            let _ = h.node.send(&mut msg, false);
        }
        assert_eq!(h.node.state(), RouterState::SearchingParent);
        assert!(matches!(h.node.discovery.round, Round::Listening { .. }));

        h.transport.inject(&parent_response(9, 2, 5));
        h.node.process();
        h.clock.advance(PARENT_SEARCH_WINDOW);
        h.node.process();

        assert_eq!(h.node.state(), RouterState::Normal);
        assert_eq!(h.node.parent_node_id(), 9);
        assert_eq!(h.node.distance(), 3);
    }
}
