//! Node state and public API.
//!
//! [`Node`] owns all protocol state - identity, routing table, router
//! state machine, failure counter, single-slot message buffers - plus
//! the injected collaborators. There is exactly one logical thread of
//! control: the host loop calls [`process`](Node::process) and
//! [`send`](Node::send) synchronously, and nothing here is touched from
//! anywhere else. The routing, link, discovery, and power logic live in
//! impl blocks in their own modules.
//!
//! # Usage
//!
//! ```ignore
//! use sprout::traits::test_impls::{MockClock, MockStorage, MockTransport};
//! use sprout::{Node, NodeOptions};
//!
//! let mut node = Node::new(
//!     MockTransport::new(),
//!     MockStorage::new(),
//!     MockClock::new(),
//!     NodeOptions::new(),
//! );
//! node.begin();
//!
//! // Host loop: pump inbound traffic, then do application work.
//! node.process();
//! ```

use alloc::boxed::Box;
use alloc::string::String;
use log::info;

use crate::config::{ControllerConfig, NodeOptions};
use crate::discovery::DiscoveryState;
use crate::identity::{layout, NodeIdentity};
use crate::routes::RoutingTable;
use crate::traits::{Clock, Storage, Transport};
use crate::types::{
    Error, Message, RouterState, AUTO, BROADCAST_PIPE, BROADCAST_ADDRESS, CMD_INTERNAL,
    CMD_PRESENTATION, CMD_REQ, GATEWAY_ADDRESS, INT_BATTERY_LEVEL, INT_CONFIG, INT_SKETCH_NAME,
    INT_SKETCH_VERSION, INT_TIME_REQUEST, NODE_PIPE,
};

/// Callback invoked from `process()` for each locally destined,
/// checksum-valid message. Must not block or sleep.
pub type MessageCallback = Box<dyn FnMut(&Message)>;

/// Callback invoked with the controller's wall-clock time (seconds since
/// 1970) in response to [`Node::request_time`].
pub type TimeCallback = Box<dyn FnMut(u32)>;

/// A mesh node.
///
/// Generic over:
/// - `T`: radio transport
/// - `S`: non-volatile storage
/// - `C`: monotonic clock
pub struct Node<T, S, C> {
    pub(crate) transport: T,
    pub(crate) storage: S,
    pub(crate) clock: C,

    pub(crate) options: NodeOptions,
    pub(crate) identity: NodeIdentity,
    pub(crate) routes: RoutingTable,
    pub(crate) controller_config: ControllerConfig,

    pub(crate) state: RouterState,
    pub(crate) failed_transmissions: u8,
    pub(crate) auto_find_parent: bool,
    pub(crate) discovery: DiscoveryState,
    pub(crate) config_requested: bool,

    // Single-slot buffers: one inbound message, one ack echo. There is
    // no queueing in either direction.
    pub(crate) msg: Message,
    pub(crate) ack: Message,

    pub(crate) msg_callback: Option<MessageCallback>,
    pub(crate) time_callback: Option<TimeCallback>,
}

impl<T, S, C> Node<T, S, C>
where
    T: Transport,
    S: Storage,
    C: Clock,
{
    /// Create a node. Nothing touches the radio or storage until
    /// [`begin`](Node::begin).
    pub fn new(transport: T, storage: S, clock: C, options: NodeOptions) -> Self {
        Self {
            transport,
            storage,
            clock,
            auto_find_parent: options.parent_node_id == AUTO && !options.gateway,
            options,
            identity: NodeIdentity::default(),
            routes: RoutingTable::new(),
            controller_config: ControllerConfig::default(),
            state: RouterState::Normal,
            failed_transmissions: 0,
            discovery: DiscoveryState::default(),
            config_requested: false,
            msg: Message::default(),
            ack: Message::default(),
            msg_callback: None,
            time_callback: None,
        }
    }

    /// Bring the node up: configure the radio, restore persisted state,
    /// apply startup options, open the receive pipes, and enter the
    /// initial router state (kicking off discovery when id or parent is
    /// unresolved).
    pub fn begin(&mut self) {
        self.transport.configure(&self.options.radio);

        self.identity = NodeIdentity::load(&self.storage);
        self.routes = RoutingTable::load(&self.storage);
        self.controller_config = ControllerConfig::load(&self.storage);

        if self.options.gateway {
            self.identity.set_gateway();
        } else {
            if self.options.node_id != AUTO {
                self.identity.node_id = self.options.node_id;
            }
            if self.options.parent_node_id != AUTO {
                self.identity.parent_node_id = self.options.parent_node_id;
            }
        }
        self.identity.commit(&mut self.storage);

        self.transport
            .open_read_pipe(BROADCAST_PIPE, BROADCAST_ADDRESS);
        if self.identity.has_node_id() {
            self.transport.open_read_pipe(NODE_PIPE, self.identity.node_id);
        }

        info!(
            "node up: id={} parent={} distance={} repeater={} gateway={}",
            self.identity.node_id,
            self.identity.parent_node_id,
            self.identity.distance,
            self.options.repeater,
            self.options.gateway,
        );

        if !self.identity.has_node_id() {
            self.enter_state(RouterState::RequestingId);
            self.start_id_request();
        } else if !self.identity.is_configured() && self.auto_find_parent {
            self.enter_state(RouterState::SearchingParent);
            self.start_parent_search();
        } else {
            self.enter_state(RouterState::Normal);
            self.request_controller_config();
        }
    }

    /// Register the callback for locally destined messages.
    pub fn on_message(&mut self, callback: impl FnMut(&Message) + 'static) {
        self.msg_callback = Some(Box::new(callback));
    }

    /// Register the callback for time responses.
    pub fn on_time(&mut self, callback: impl FnMut(u32) + 'static) {
        self.time_callback = Some(Box::new(callback));
    }

    /// This node's address, or [`AUTO`] while unassigned.
    pub fn node_id(&self) -> u8 {
        self.identity.node_id
    }

    /// Current parent address, or [`AUTO`] while unknown.
    pub fn parent_node_id(&self) -> u8 {
        self.identity.parent_node_id
    }

    /// Hop count to the gateway.
    pub fn distance(&self) -> u8 {
        self.identity.distance
    }

    /// Current router state.
    pub fn state(&self) -> RouterState {
        self.state
    }

    /// Whether this node forwards traffic for others.
    pub fn is_repeater(&self) -> bool {
        self.options.repeater
    }

    /// The most recent controller configuration.
    pub fn config(&self) -> ControllerConfig {
        self.controller_config
    }

    /// The most recently received locally destined message.
    pub fn last_message(&self) -> &Message {
        &self.msg
    }

    /// Number of learned routes (for diagnostics).
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Transport accessor, mainly for test harnesses.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Announce a child sensor to the controller.
    pub fn present(&mut self, sensor: u8, sensor_type: u8, ack: bool) -> Result<(), Error> {
        let mut msg = Message::new(GATEWAY_ADDRESS, CMD_PRESENTATION, sensor_type);
        msg.sensor = sensor;
        self.send(&mut msg, ack)
    }

    /// Report the battery level (0-100 %) to the controller.
    pub fn send_battery_level(&mut self, level: u8, ack: bool) -> Result<(), Error> {
        let mut msg = Message::new(GATEWAY_ADDRESS, CMD_INTERNAL, INT_BATTERY_LEVEL);
        msg.set_payload_u8(level.min(100));
        self.send(&mut msg, ack)
    }

    /// Send sketch name and version to the controller.
    pub fn send_sketch_info(&mut self, name: &str, version: &str) -> Result<(), Error> {
        let mut msg = Message::new(GATEWAY_ADDRESS, CMD_INTERNAL, INT_SKETCH_NAME);
        msg.set_payload(truncated(name).as_bytes())?;
        self.send(&mut msg, false)?;
        let mut msg = Message::new(GATEWAY_ADDRESS, CMD_INTERNAL, INT_SKETCH_VERSION);
        msg.set_payload(truncated(version).as_bytes())?;
        self.send(&mut msg, false)
    }

    /// Request a value from the gateway or another node; the response
    /// arrives through the message callback.
    pub fn request(&mut self, sensor: u8, kind: u8, destination: u8) -> Result<(), Error> {
        let mut msg = Message::new(destination, CMD_REQ, kind);
        msg.sensor = sensor;
        self.send(&mut msg, false)
    }

    /// Ask the controller for wall-clock time; the answer arrives
    /// through the time callback.
    pub fn request_time(&mut self) -> Result<(), Error> {
        let mut msg = Message::new(GATEWAY_ADDRESS, CMD_INTERNAL, INT_TIME_REQUEST);
        self.send(&mut msg, false)
    }

    /// Store one byte of application state in the reserved region.
    /// Positions run 0-255; writes are change-only to spare the EEPROM.
    pub fn save_state(&mut self, pos: u8, value: u8) {
        self.storage.update(layout::LOCAL_CONFIG + pos as u16, value);
    }

    /// Load one byte of application state.
    pub fn load_state(&self, pos: u8) -> u8 {
        self.storage.read(layout::LOCAL_CONFIG + pos as u16)
    }

    /// Switch router state, resetting the failure counter on entry to
    /// Normal.
    pub(crate) fn enter_state(&mut self, state: RouterState) {
        if self.state != state {
            info!("router state {:?} -> {:?}", self.state, state);
        }
        self.state = state;
        if state == RouterState::Normal {
            self.failed_transmissions = 0;
        }
    }

    /// Ask the gateway for the controller configuration, once, after the
    /// node first becomes configured. Best-effort: a lost request just
    /// means the persisted (or default) config stays in effect.
    pub(crate) fn request_controller_config(&mut self) {
        if self.config_requested || self.identity.is_gateway() {
            return;
        }
        self.config_requested = true;
        let mut msg = Message::new(GATEWAY_ADDRESS, CMD_INTERNAL, INT_CONFIG);
        let _ = self.send(&mut msg, false);
    }
}

/// Clip a string to the payload bound without splitting a UTF-8
/// character.
fn truncated(s: &str) -> String {
    let mut end = s.len().min(crate::types::MAX_PAYLOAD);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&s[..end])
}
