//! Core types and constants for the sprout protocol.

use alloc::vec::Vec;
use core::fmt;

use crate::time::Duration;

/// Address of the gateway, the distance-0 root of the mesh.
pub const GATEWAY_ADDRESS: u8 = 0;
/// Destination address that every node in range receives.
pub const BROADCAST_ADDRESS: u8 = 0xFF;
/// Sentinel for an unresolved node or parent id.
///
/// Shares its value with [`BROADCAST_ADDRESS`]; 0xFF is never a routable
/// destination, and the router intercepts discovery frames before any
/// destination comparison could confuse the two.
pub const AUTO: u8 = 0xFF;
/// Sentinel for an unknown hop count.
pub const DISTANCE_INVALID: u8 = 0xFF;

/// Radio pipe indices. The transport keeps one pipe open for writing,
/// one listening on this node's own address, and one on the broadcast
/// address.
pub const WRITE_PIPE: u8 = 0;
pub const NODE_PIPE: u8 = 1;
pub const BROADCAST_PIPE: u8 = 2;

/// Hardware frame limit of the target radio class.
pub const MAX_FRAME_SIZE: usize = 32;
/// Fixed header size on the wire.
pub const HEADER_SIZE: usize = 8;
/// Maximum payload carried by one frame.
pub const MAX_PAYLOAD: usize = MAX_FRAME_SIZE - HEADER_SIZE;

/// Wire protocol version carried in every frame header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Consecutive failed transmissions to the parent before a new parent
/// search is started.
pub const SEARCH_FAILURES: u8 = 5;

// Discovery round timing. Both protocols are driven from process() and
// never block: a round opens a listen window, and expiry is checked on
// subsequent cycles.
pub const ID_REQUEST_WINDOW: Duration = Duration::from_millis(500);
pub const ID_REQUEST_RETRIES: u8 = 4;
pub const ID_REQUEST_COOLDOWN: Duration = Duration::from_secs(10);
pub const PARENT_SEARCH_WINDOW: Duration = Duration::from_secs(2);
pub const PARENT_SEARCH_COOLDOWN: Duration = Duration::from_secs(10);

// Commands (0-4 valid; anything else fails decoding)
pub const CMD_PRESENTATION: u8 = 0;
pub const CMD_SET: u8 = 1;
pub const CMD_REQ: u8 = 2;
pub const CMD_INTERNAL: u8 = 3;
pub const CMD_STREAM: u8 = 4;

// Internal message kinds (CMD_INTERNAL subtypes)
pub const INT_BATTERY_LEVEL: u8 = 0;
pub const INT_TIME_REQUEST: u8 = 1;
pub const INT_TIME_RESPONSE: u8 = 2;
pub const INT_ID_REQUEST: u8 = 3;
pub const INT_ID_RESPONSE: u8 = 4;
pub const INT_FIND_PARENT: u8 = 5;
pub const INT_FIND_PARENT_RESPONSE: u8 = 6;
pub const INT_CONFIG: u8 = 7;
pub const INT_SKETCH_NAME: u8 = 8;
pub const INT_SKETCH_VERSION: u8 = 9;

/// True for addresses a frame can be routed to: the gateway and ordinary
/// nodes, but not the broadcast/AUTO sentinel.
#[inline]
pub const fn is_routable(address: u8) -> bool {
    address != BROADCAST_ADDRESS
}

/// One protocol message.
///
/// `sender` and `destination` are end-to-end and never rewritten in
/// transit; `last` is the address of the node that most recently
/// transmitted the frame and is rewritten at every hop. The checksum is
/// a wire-level concern and lives in [`wire`](crate::wire), not here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Node that most recently forwarded this frame.
    pub last: u8,
    /// Originating node.
    pub sender: u8,
    /// Final destination.
    pub destination: u8,
    /// Child sensor id within the destination node.
    pub sensor: u8,
    /// Command class (CMD_*).
    pub command: u8,
    /// Subtype within the command class (INT_* for CMD_INTERNAL,
    /// sensor-specific otherwise).
    pub kind: u8,
    /// The destination should echo this message back as an ack.
    pub ack_request: bool,
    /// This message is such an echo.
    pub is_ack: bool,
    /// Application payload, at most [`MAX_PAYLOAD`] bytes.
    pub payload: Vec<u8>,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            last: AUTO,
            sender: AUTO,
            destination: GATEWAY_ADDRESS,
            sensor: 0,
            command: CMD_INTERNAL,
            kind: 0,
            ack_request: false,
            is_ack: false,
            payload: Vec::new(),
        }
    }
}

impl Message {
    /// Create a message with an empty payload. `sender` and `last` are
    /// filled in by the router when the message is sent.
    pub fn new(destination: u8, command: u8, kind: u8) -> Self {
        Self {
            destination,
            command,
            kind,
            ..Self::default()
        }
    }

    /// Replace the payload, rejecting anything over [`MAX_PAYLOAD`].
    pub fn set_payload(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if bytes.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge);
        }
        self.payload.clear();
        self.payload.extend_from_slice(bytes);
        Ok(())
    }

    /// Set a single-byte payload.
    pub fn set_payload_u8(&mut self, value: u8) {
        self.payload.clear();
        self.payload.push(value);
    }

    /// Set a big-endian u32 payload (used by the time protocol).
    pub fn set_payload_u32(&mut self, value: u32) {
        self.payload.clear();
        self.payload.extend_from_slice(&value.to_be_bytes());
    }

    /// First payload byte, if present.
    pub fn payload_u8(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// Payload as a big-endian u32, if it is exactly four bytes.
    pub fn payload_u32(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.payload.as_slice().try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }

    /// Payload as UTF-8 text, if valid.
    pub fn payload_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.payload).ok()
    }

    /// True for protocol-internal control traffic.
    pub fn is_internal(&self) -> bool {
        self.command == CMD_INTERNAL
    }
}

/// Router operating state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouterState {
    /// Configured: id and parent resolved, routing normally.
    Normal,
    /// Parent lost or never known; running parent-search rounds.
    SearchingParent,
    /// No node id yet; running id-request rounds.
    RequestingId,
}

/// Error type for node operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// Destination is this node itself.
    SelfAddressed,
    /// Node id or parent not resolved yet; send refused rather than queued.
    Unconfigured,
    /// Gateway has no routing entry for the destination.
    NoRoute,
    /// First hop did not acknowledge the frame.
    Transmit,
    /// No reply arrived within the bound.
    Timeout,
    /// Payload exceeds [`MAX_PAYLOAD`].
    PayloadTooLarge,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SelfAddressed => write!(f, "message addressed to this node"),
            Error::Unconfigured => write!(f, "node id or parent not configured"),
            Error::NoRoute => write!(f, "no route to destination"),
            Error::Transmit => write!(f, "first hop did not acknowledge"),
            Error::Timeout => write!(f, "no reply within timeout"),
            Error::PayloadTooLarge => write!(f, "payload too large"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_bounds() {
        let mut msg = Message::new(1, CMD_SET, 0);
        assert!(msg.set_payload(&[0u8; MAX_PAYLOAD]).is_ok());
        assert_eq!(
            msg.set_payload(&[0u8; MAX_PAYLOAD + 1]),
            Err(Error::PayloadTooLarge)
        );
        // A failed set leaves the previous payload untouched.
        assert_eq!(msg.payload.len(), MAX_PAYLOAD);
    }

    #[test]
    fn test_payload_accessors() {
        let mut msg = Message::new(1, CMD_INTERNAL, INT_TIME_RESPONSE);
        msg.set_payload_u32(0x0102_0304);
        assert_eq!(msg.payload_u32(), Some(0x0102_0304));
        assert_eq!(msg.payload_u8(), Some(0x01));

        msg.set_payload_u8(42);
        assert_eq!(msg.payload_u8(), Some(42));
        assert_eq!(msg.payload_u32(), None);
    }

    #[test]
    fn test_routable_addresses() {
        assert!(is_routable(GATEWAY_ADDRESS));
        assert!(is_routable(1));
        assert!(is_routable(254));
        assert!(!is_routable(BROADCAST_ADDRESS));
        assert!(!is_routable(AUTO));
    }
}
