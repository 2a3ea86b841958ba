#![forbid(unsafe_code)]
//! sprout - network layer for a low-power multi-hop sensor radio mesh.
//!
//! A mesh of battery-operated sensor and actuator nodes talks to a
//! single gateway over short-range radios. Nodes that cannot reach the
//! gateway directly relay through repeater nodes. This crate is the
//! network layer running on every node: it assigns addresses
//! automatically, discovers and maintains a path to the gateway,
//! forwards messages up toward the gateway and down toward specific
//! children, detects link failure and re-routes, and persists its state
//! in a few hundred bytes of non-volatile memory so a node rejoins the
//! mesh after a power cycle.
//!
//! This crate is `no_std` but requires `alloc` (frames and payloads are
//! small heap buffers). All hardware is injected behind traits, so the
//! protocol runs unchanged against real radios and against the
//! `sproutsim` discrete-event simulator.
//!
//! # Key properties
//!
//! - Tree topology rooted at the gateway (address 0); each node keeps
//!   one parent and its hop distance
//! - Routing-table-first forwarding with parent fallback; routes are
//!   learned from observed traffic and persisted
//! - Broadcast-based discovery: id assignment via the gateway's
//!   controller, parent selection by lowest advertised distance
//! - CRC-8 framing; corrupt frames are dropped, never delivered
//! - Single-threaded and synchronous: the host loop calls `process()`
//!   and `send()`; the only suspension points are the bounded reply
//!   wait and explicit power sleeps
//!
//! # Example
//!
//! ```ignore
//! use sprout::{Node, NodeOptions};
//!
//! // Transport, storage, and clock implement the traits in `traits`.
//! let mut node = Node::new(transport, storage, clock, NodeOptions::new().repeater());
//! node.on_message(|msg| {
//!     // Locally destined, checksum-valid messages land here.
//! });
//! node.begin();
//!
//! loop {
//!     node.process();
//!     // ... sample sensors, node.send(...), node.sleep(...) ...
//! }
//! ```
//!
//! # Module structure
//!
//! - [`types`] - addresses, constants, [`Message`], errors
//! - [`wire`] - frame layout, CRC-8, strict decoding
//! - [`traits`] - Transport, Storage, Clock, Sleeper collaborators
//! - [`identity`] - persisted node identity and the storage layout
//! - [`routes`] - the bounded persistent routing table
//! - [`config`] - startup options and controller configuration
//! - [`node`] - the [`Node`] itself and the application surface
//! - `router` / `link` / `discovery` - process/send, transmit glue,
//!   and the discovery state machines (impl blocks on [`Node`])
//! - [`power`] - sleep scheduling
//! - [`time`] - millisecond timestamp/duration newtypes

#![no_std]

extern crate alloc;

pub mod config;
mod discovery;
pub mod identity;
mod link;
pub mod node;
pub mod power;
mod router;
pub mod routes;
pub mod time;
pub mod traits;
pub mod types;
pub mod wire;

pub use config::{ControllerConfig, DataRate, NodeOptions, PaLevel, RadioSetup};
pub use identity::NodeIdentity;
pub use node::{MessageCallback, Node, TimeCallback};
pub use power::{TriggerMode, WakeCause};
pub use routes::RoutingTable;
pub use time::{Duration, Timestamp};
pub use types::{
    Error, Message, RouterState, AUTO, BROADCAST_ADDRESS, GATEWAY_ADDRESS, MAX_PAYLOAD,
    SEARCH_FAILURES,
};
