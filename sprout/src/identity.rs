//! Node identity and the persistent storage layout.
//!
//! A node's identity is the triple `{node_id, parent_node_id, distance}`.
//! It is read from non-volatile storage at startup and written back on
//! every change, so a node rejoins the mesh after a power cycle without
//! redoing discovery. Unprogrammed storage reads as 0xFF, which is
//! exactly the AUTO / unknown sentinel, so a factory-fresh device boots
//! straight into discovery with no initialization step.

use log::debug;

use crate::traits::Storage;
use crate::types::{AUTO, DISTANCE_INVALID, GATEWAY_ADDRESS};

/// Reserved regions of the non-volatile storage.
///
/// The library owns everything below [`layout::LOCAL_CONFIG`]; the
/// application state region is exposed through `save_state`/`load_state`
/// on the node. The firmware metadata region is only reserved here - it
/// belongs to an external update mechanism.
pub mod layout {
    /// This node's own address (1 byte).
    pub const NODE_ID: u16 = 0;
    /// Parent node address (1 byte).
    pub const PARENT_NODE_ID: u16 = 1;
    /// Hop count to the gateway (1 byte).
    pub const DISTANCE: u16 = 2;
    /// Routing table: one next-hop byte per possible child address.
    pub const ROUTES: u16 = 3;
    pub const ROUTES_LEN: u16 = 256;
    /// Controller-pushed configuration block.
    pub const CONTROLLER_CONFIG: u16 = ROUTES + ROUTES_LEN;
    pub const CONTROLLER_CONFIG_LEN: u16 = 24;
    /// Firmware metadata, reserved for an external update mechanism.
    pub const FIRMWARE_TYPE: u16 = CONTROLLER_CONFIG + CONTROLLER_CONFIG_LEN;
    pub const FIRMWARE_VERSION: u16 = FIRMWARE_TYPE + 2;
    pub const FIRMWARE_BLOCKS: u16 = FIRMWARE_VERSION + 2;
    pub const FIRMWARE_CRC: u16 = FIRMWARE_BLOCKS + 2;
    /// Application state region, 256 bytes.
    pub const LOCAL_CONFIG: u16 = FIRMWARE_CRC + 2;
    pub const LOCAL_CONFIG_LEN: u16 = 256;
}

/// This node's place in the mesh.
///
/// Invariant: a non-gateway node with a resolved `node_id` always has a
/// resolved `parent_node_id` and a finite `distance`, and its distance
/// is its parent's distance plus one. The router enforces this by
/// resolving the id before searching for a parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Own address, 1-254, or [`AUTO`] when unassigned.
    pub node_id: u8,
    /// Parent address, or [`AUTO`] when no parent is known.
    pub parent_node_id: u8,
    /// Hop count to the gateway; 0 means this node is the gateway.
    pub distance: u8,
}

impl Default for NodeIdentity {
    fn default() -> Self {
        Self {
            node_id: AUTO,
            parent_node_id: AUTO,
            distance: DISTANCE_INVALID,
        }
    }
}

impl NodeIdentity {
    /// Restore the identity from storage. Absent or corrupt storage
    /// yields the unconfigured default (0xFF is the sentinel for every
    /// field).
    pub fn load<S: Storage>(storage: &S) -> Self {
        let identity = Self {
            node_id: storage.read(layout::NODE_ID),
            parent_node_id: storage.read(layout::PARENT_NODE_ID),
            distance: storage.read(layout::DISTANCE),
        };
        debug!(
            "identity loaded: id={} parent={} distance={}",
            identity.node_id, identity.parent_node_id, identity.distance
        );
        identity
    }

    /// Write the identity back to storage. Only bytes that changed are
    /// written, to spare EEPROM wear.
    pub fn commit<S: Storage>(&self, storage: &mut S) {
        storage.update(layout::NODE_ID, self.node_id);
        storage.update(layout::PARENT_NODE_ID, self.parent_node_id);
        storage.update(layout::DISTANCE, self.distance);
    }

    /// Mark this node as the network root: address 0, its own parent,
    /// distance 0.
    pub fn set_gateway(&mut self) {
        self.node_id = GATEWAY_ADDRESS;
        self.parent_node_id = GATEWAY_ADDRESS;
        self.distance = 0;
    }

    /// True once the node has an assigned address.
    pub fn has_node_id(&self) -> bool {
        self.node_id != AUTO
    }

    /// True for the distance-0 root.
    pub fn is_gateway(&self) -> bool {
        self.node_id == GATEWAY_ADDRESS && self.distance == 0
    }

    /// True once both the address and the upward path are resolved.
    pub fn is_configured(&self) -> bool {
        self.has_node_id() && (self.is_gateway() || self.parent_node_id != AUTO)
    }
}
