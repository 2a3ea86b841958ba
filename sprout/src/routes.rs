//! Persistent routing table: child address to next-hop address.
//!
//! The table is a fixed 256-byte array, one next-hop byte per possible
//! child address, mirrored byte-for-byte into its reserved storage
//! region. The fixed capacity is a hardware constraint (the storage
//! region is 256 bytes), not an implementation detail: this is a bounded
//! associative array with an explicit not-present sentinel, never a
//! growable map. Mutations write through to storage immediately, one
//! byte each, so the table survives power cycles without a separate
//! flush step.
//!
//! Entries are learned by the router from observed traffic and removed
//! only explicitly; there is no eviction. A missing entry is not an
//! error - unknown destinations fall back to parent routing.

use log::debug;

use crate::identity::layout;
use crate::traits::Storage;
use crate::types::{is_routable, GATEWAY_ADDRESS};

/// Sentinel stored for "no route known".
pub const NO_ROUTE: u8 = 0xFF;

/// Child address to next-hop mapping, bounded at 254 usable entries
/// (addresses 1-254; the gateway and the broadcast sentinel are never
/// children).
pub struct RoutingTable {
    next_hop: [u8; layout::ROUTES_LEN as usize],
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self {
            next_hop: [NO_ROUTE; layout::ROUTES_LEN as usize],
        }
    }
}

impl RoutingTable {
    /// Empty table, all entries absent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore the table from its storage region. Unprogrammed bytes
    /// read as [`NO_ROUTE`].
    pub fn load<S: Storage>(storage: &S) -> Self {
        let mut table = Self::new();
        storage.read_block(layout::ROUTES, &mut table.next_hop);
        table
    }

    /// Next hop toward `child`, if one has been learned.
    pub fn next_hop(&self, child: u8) -> Option<u8> {
        let hop = self.next_hop[child as usize];
        if hop == NO_ROUTE {
            None
        } else {
            Some(hop)
        }
    }

    /// Record that `child` is reachable through `hop`, writing the entry
    /// through to storage. A direct neighbor is recorded as its own next
    /// hop. Ignores unroutable addresses and the gateway (which is
    /// reached via the parent chain, never via the table).
    pub fn set<S: Storage>(&mut self, child: u8, hop: u8, storage: &mut S) {
        if !is_routable(child) || !is_routable(hop) || child == GATEWAY_ADDRESS {
            return;
        }
        if self.next_hop[child as usize] != hop {
            debug!("route learned: {} via {}", child, hop);
            self.next_hop[child as usize] = hop;
            storage.update(layout::ROUTES + child as u16, hop);
        }
    }

    /// Explicitly forget the route to `child`.
    pub fn remove<S: Storage>(&mut self, child: u8, storage: &mut S) {
        if self.next_hop[child as usize] != NO_ROUTE {
            self.next_hop[child as usize] = NO_ROUTE;
            storage.update(layout::ROUTES + child as u16, NO_ROUTE);
        }
    }

    /// Number of known routes.
    pub fn len(&self) -> usize {
        self.next_hop.iter().filter(|&&hop| hop != NO_ROUTE).count()
    }

    /// True when no routes are known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::test_impls::MockStorage;
    use crate::types::BROADCAST_ADDRESS;

    #[test]
    fn test_empty_table() {
        let table = RoutingTable::new();
        assert!(table.is_empty());
        assert_eq!(table.next_hop(8), None);
    }

    #[test]
    fn test_set_and_get() {
        let mut storage = MockStorage::new();
        let mut table = RoutingTable::new();
        table.set(8, 6, &mut storage);
        assert_eq!(table.next_hop(8), Some(6));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_persists_across_reload() {
        let mut storage = MockStorage::new();
        let mut table = RoutingTable::new();
        table.set(8, 6, &mut storage);
        table.set(9, 6, &mut storage);

        let reloaded = RoutingTable::load(&storage);
        assert_eq!(reloaded.next_hop(8), Some(6));
        assert_eq!(reloaded.next_hop(9), Some(6));
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn test_remove() {
        let mut storage = MockStorage::new();
        let mut table = RoutingTable::new();
        table.set(8, 6, &mut storage);
        table.remove(8, &mut storage);
        assert_eq!(table.next_hop(8), None);
        assert_eq!(RoutingTable::load(&storage).next_hop(8), None);
    }

    #[test]
    fn test_rejects_unroutable_entries() {
        let mut storage = MockStorage::new();
        let mut table = RoutingTable::new();
        table.set(BROADCAST_ADDRESS, 6, &mut storage);
        table.set(8, BROADCAST_ADDRESS, &mut storage);
        table.set(GATEWAY_ADDRESS, 6, &mut storage);
        assert!(table.is_empty());
    }

    #[test]
    fn test_direct_neighbor_routes_to_itself() {
        let mut storage = MockStorage::new();
        let mut table = RoutingTable::new();
        table.set(8, 8, &mut storage);
        assert_eq!(table.next_hop(8), Some(8));
    }

    #[test]
    fn test_unchanged_entry_writes_nothing() {
        let mut storage = MockStorage::new();
        let mut table = RoutingTable::new();
        table.set(8, 6, &mut storage);
        let writes = storage.write_count();
        table.set(8, 6, &mut storage);
        assert_eq!(storage.write_count(), writes);
    }
}
