//! Simulated nodes: transport, wrapper, and the gateway controller.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use hashbrown::HashSet;
use sprout::config::RadioSetup;
use sprout::traits::test_impls::{MockClock, MockStorage};
use sprout::traits::Transport;
use sprout::types::{
    CMD_INTERNAL, INT_CONFIG, INT_ID_REQUEST, INT_ID_RESPONSE, INT_TIME_REQUEST,
    INT_TIME_RESPONSE,
};
use sprout::{Duration, Message, Node, NodeOptions, BROADCAST_ADDRESS};

/// One frame captured from a simulated radio.
#[derive(Clone, Debug)]
pub struct SentFrame {
    /// Radio address the frame was written to.
    pub address: u8,
    /// Raw frame bytes.
    pub bytes: Vec<u8>,
}

/// Simulated radio transport.
///
/// Outgoing frames are captured for the simulator to route through the
/// topology; incoming frames are queued by the simulator. The hardware
/// ack is modeled through a reachability set the simulator refreshes
/// from the topology: a unicast send is acked iff some node with that
/// address is currently in radio range.
#[derive(Clone, Default)]
pub struct SimTransport {
    rx: Rc<RefCell<VecDeque<Vec<u8>>>>,
    sent: Rc<RefCell<Vec<SentFrame>>>,
    write_address: Rc<Cell<u8>>,
    reachable: Rc<RefCell<HashSet<u8>>>,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame as if it arrived over the air.
    pub fn inject(&self, bytes: Vec<u8>) {
        self.rx.borrow_mut().push_back(bytes);
    }

    /// Drain the frames transmitted since the last collection.
    pub fn take_sent(&self) -> Vec<SentFrame> {
        self.sent.borrow_mut().drain(..).collect()
    }

    /// True while received frames are waiting to be processed.
    pub fn pending(&self) -> bool {
        !self.rx.borrow().is_empty()
    }

    /// Replace the set of addresses currently in radio range.
    pub fn set_reachable(&self, addresses: HashSet<u8>) {
        *self.reachable.borrow_mut() = addresses;
    }
}

impl Transport for SimTransport {
    fn configure(&mut self, _setup: &RadioSetup) {}

    fn open_write_pipe(&mut self, address: u8) {
        self.write_address.set(address);
    }

    fn open_read_pipe(&mut self, _pipe: u8, _address: u8) {}

    fn send(&mut self, frame: &[u8]) -> bool {
        let address = self.write_address.get();
        self.sent.borrow_mut().push(SentFrame {
            address,
            bytes: frame.to_vec(),
        });
        address == BROADCAST_ADDRESS || self.reachable.borrow().contains(&address)
    }

    fn available(&mut self) -> bool {
        !self.rx.borrow().is_empty()
    }

    fn read(&mut self) -> Option<Vec<u8>> {
        self.rx.borrow_mut().pop_front()
    }

    fn sleep(&mut self) {}

    fn wake(&mut self) {}
}

/// A sprout node wired to simulated collaborators.
pub struct SimNode {
    pub node: Node<SimTransport, MockStorage, MockClock>,
    pub transport: SimTransport,
    pub clock: MockClock,
    pub gateway: bool,
    received: Rc<RefCell<Vec<Message>>>,
}

impl SimNode {
    /// Build a node from its startup options. `begin` is left to the
    /// simulator so the clock can be aligned first.
    pub fn new(options: NodeOptions) -> Self {
        let transport = SimTransport::new();
        // Simulated time is driven entirely by the event loop.
        let clock = MockClock::new().with_tick(Duration::ZERO);
        let gateway = options.gateway;
        let mut node = Node::new(
            transport.clone(),
            MockStorage::new(),
            clock.clone(),
            options,
        );
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        node.on_message(move |msg| sink.borrow_mut().push(msg.clone()));
        Self {
            node,
            transport,
            clock,
            gateway,
            received,
        }
    }

    /// Current radio address (AUTO until assigned).
    pub fn address(&self) -> u8 {
        self.node.node_id()
    }

    /// Every message delivered locally so far.
    pub fn received(&self) -> Vec<Message> {
        self.received.borrow().clone()
    }

    /// Delivered messages excluding protocol-internal traffic.
    pub fn app_received(&self) -> Vec<Message> {
        self.received
            .borrow()
            .iter()
            .filter(|msg| !msg.is_internal())
            .cloned()
            .collect()
    }
}

/// The controller behind the gateway: assigns node ids sequentially and
/// answers config and time requests.
pub struct Controller {
    next_id: u8,
    pub is_metric: bool,
    pub time_seconds: u32,
}

impl Default for Controller {
    fn default() -> Self {
        Self {
            next_id: 1,
            is_metric: true,
            time_seconds: 1_700_000_000,
        }
    }
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    /// React to a message delivered at the gateway. Replies go straight
    /// back out through the gateway's normal send path.
    pub fn respond(
        &mut self,
        gateway: &mut Node<SimTransport, MockStorage, MockClock>,
        msg: &Message,
    ) {
        if !msg.is_internal() {
            return;
        }
        match msg.kind {
            INT_ID_REQUEST => {
                let id = self.next_id;
                self.next_id = self.next_id.saturating_add(1).min(254);
                let mut reply = Message::new(BROADCAST_ADDRESS, CMD_INTERNAL, INT_ID_RESPONSE);
                reply.set_payload_u8(id);
                let _ = gateway.send(&mut reply, false);
            }
            INT_CONFIG => {
                let mut reply = Message::new(msg.sender, CMD_INTERNAL, INT_CONFIG);
                reply.set_payload_u8(self.is_metric as u8);
                let _ = gateway.send(&mut reply, false);
            }
            INT_TIME_REQUEST => {
                let mut reply = Message::new(msg.sender, CMD_INTERNAL, INT_TIME_RESPONSE);
                reply.set_payload_u32(self.time_seconds);
                let _ = gateway.send(&mut reply, false);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unicast_ack_follows_reachability() {
        let mut transport = SimTransport::new();
        transport.open_write_pipe(5);
        assert!(!transport.send(&[0u8; 8]));

        let mut reachable = HashSet::new();
        reachable.insert(5);
        transport.set_reachable(reachable);
        assert!(transport.send(&[0u8; 8]));

        transport.open_write_pipe(BROADCAST_ADDRESS);
        assert!(transport.send(&[0u8; 8]));
        assert_eq!(transport.take_sent().len(), 3);
    }

    #[test]
    fn test_controller_assigns_sequential_ids() {
        let mut controller = Controller::new();
        let mut gateway = SimNode::new(NodeOptions::new().gateway());
        gateway.node.begin();
        gateway.transport.take_sent();

        let mut request = Message::new(BROADCAST_ADDRESS, CMD_INTERNAL, INT_ID_REQUEST);
        request.sender = sprout::AUTO;
        controller.respond(&mut gateway.node, &request);
        controller.respond(&mut gateway.node, &request);

        let sent = gateway.transport.take_sent();
        assert_eq!(sent.len(), 2);
        let first = sprout::wire::parse(&sent[0].bytes).unwrap();
        let second = sprout::wire::parse(&sent[1].bytes).unwrap();
        assert_eq!(first.payload_u8(), Some(1));
        assert_eq!(second.payload_u8(), Some(2));
    }
}
