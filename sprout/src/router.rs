//! The message router: forward vs. relay decisions, acknowledgments,
//! route learning, and the failure-driven failover path.
//!
//! Every outbound message resolves its next hop routing-table first
//! (this node is an ancestor of the destination) with the parent as the
//! default upward path. Every inbound frame is either delivered locally,
//! relayed with `last` rewritten, or dropped. Nothing in this layer is
//! fatal: failures degrade to "drop and continue" or "retry next cycle".

use log::debug;

use crate::traits::{Clock, Storage, Transport};
use crate::types::{
    is_routable, Error, Message, RouterState, AUTO, BROADCAST_ADDRESS,
};
use crate::wire;
use crate::Node;

impl<T, S, C> Node<T, S, C>
where
    T: Transport,
    S: Storage,
    C: Clock,
{
    /// Send a message into the mesh.
    ///
    /// Returns `Ok` only if the first hop accepted the frame; end-to-end
    /// delivery is best-effort and not guaranteed by the result. With
    /// `ack_request`, the destination echoes the message back and the
    /// echo arrives through the message callback with `is_ack` set;
    /// retrying on a missing echo is the caller's decision.
    ///
    /// Sends are refused while the node is unconfigured - nothing is
    /// queued.
    pub fn send(&mut self, msg: &mut Message, ack_request: bool) -> Result<(), Error> {
        if self.state != RouterState::Normal {
            return Err(Error::Unconfigured);
        }
        if msg.destination == self.identity.node_id {
            return Err(Error::SelfAddressed);
        }
        msg.sender = self.identity.node_id;
        msg.ack_request = ack_request;
        let next_hop = self.next_hop_for(msg.destination)?;
        if self.transmit(next_hop, msg) {
            Ok(())
        } else {
            Err(Error::Transmit)
        }
    }

    /// Resolve the next hop for a destination: routing table first,
    /// parent as the default upward path. The gateway has no parent to
    /// fall back to, so an unknown destination there is a routing error.
    pub(crate) fn next_hop_for(&self, destination: u8) -> Result<u8, Error> {
        if destination == BROADCAST_ADDRESS {
            return Ok(BROADCAST_ADDRESS);
        }
        if let Some(next_hop) = self.routes.next_hop(destination) {
            return Ok(next_hop);
        }
        if self.identity.is_gateway() {
            return Err(Error::NoRoute);
        }
        if self.identity.parent_node_id == AUTO {
            return Err(Error::Unconfigured);
        }
        Ok(self.identity.parent_node_id)
    }

    /// Pump one inbound frame and run discovery maintenance.
    ///
    /// Invoked repeatedly by the host loop. Returns true only when a
    /// checksum-valid message addressed to this node (or broadcast) was
    /// delivered; control traffic, relayed frames, and empty cycles all
    /// return false. Never blocks.
    pub fn process(&mut self) -> bool {
        self.maintain_discovery();

        if !self.transport.available() {
            return false;
        }
        let Some(bytes) = self.transport.read() else {
            return false;
        };
        let msg = match wire::parse(&bytes) {
            Ok(msg) => msg,
            Err(err) => {
                debug!("frame dropped: {:?}", err);
                return false;
            }
        };

        // A frame we transmitted ourselves, looped back by a
        // promiscuous transport.
        if self.identity.has_node_id() && msg.last == self.identity.node_id {
            return false;
        }

        // Control frames are intercepted before any destination
        // comparison: AUTO and BROADCAST_ADDRESS share 0xFF, so a
        // discovery frame must never reach the address-match logic of
        // an unconfigured node.
        if msg.is_internal() && self.handle_control(&msg) {
            return false;
        }

        self.learn_route(&msg);

        // An unconfigured node has no address, so nothing can be "for"
        // it - in particular 0xFF destinations are broadcasts, not
        // unicasts to the AUTO sentinel.
        let to_me = self.identity.has_node_id() && msg.destination == self.identity.node_id;
        let broadcast =
            msg.destination == BROADCAST_ADDRESS && self.identity.has_node_id();

        if to_me || broadcast {
            self.msg = msg;
            if to_me && self.msg.ack_request && !self.msg.is_ack {
                self.echo_ack();
            }
            self.invoke_message_callback();
            return true;
        }

        if self.options.repeater && self.identity.is_configured() && is_routable(msg.destination) {
            self.relay(msg);
        }
        false
    }

    /// Learn that `sender` is reachable through the neighbor that
    /// transmitted its frame. Applied to every valid inbound frame,
    /// relayed ones included: an ancestor only ever sees its
    /// grandchildren through relayed traffic, and a direct child is
    /// recorded as its own next hop (which is what lets the gateway send
    /// downstream at all).
    fn learn_route(&mut self, msg: &Message) {
        if msg.sender != self.identity.node_id {
            self.routes.set(msg.sender, msg.last, &mut self.storage);
        }
    }

    /// Forward a frame on behalf of other nodes: rewrite `last` to this
    /// node's address (re-sealing the checksum) and retransmit toward
    /// the destination. `sender` and `destination` are never touched. A
    /// frame with no resolvable next hop is dropped.
    fn relay(&mut self, mut msg: Message) {
        match self.next_hop_for(msg.destination) {
            Ok(next_hop) => {
                debug!(
                    "relay {} -> {} via {}",
                    msg.sender, msg.destination, next_hop
                );
                let _ = self.transmit(next_hop, &mut msg);
            }
            Err(err) => debug!("relay dropped: {}", err),
        }
    }

    /// Echo the received message back to its sender from the single ack
    /// slot.
    fn echo_ack(&mut self) {
        self.ack = self.msg.clone();
        self.ack.is_ack = true;
        self.ack.ack_request = false;
        self.ack.destination = self.msg.sender;
        self.ack.sender = self.identity.node_id;
        if let Ok(next_hop) = self.next_hop_for(self.ack.destination) {
            let mut echo = self.ack.clone();
            let _ = self.transmit(next_hop, &mut echo);
            self.ack = echo;
        }
    }

    /// Run the message callback over the inbound slot. The callback is
    /// taken out for the call so it cannot alias the node.
    fn invoke_message_callback(&mut self) {
        if let Some(mut callback) = self.msg_callback.take() {
            callback(&self.msg);
            self.msg_callback = Some(callback);
        }
    }
}
