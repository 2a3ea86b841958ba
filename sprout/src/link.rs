//! Link layer glue over the radio transport.
//!
//! One frame out, addressed per hop through the write pipe, with the
//! transport's hardware ack as the only success signal. Failed unicast
//! transmits feed the shared failure counter; enough consecutive
//! failures toward the current parent trigger a new parent search.

use log::warn;

use crate::time::Duration;
use crate::traits::{Clock, Storage, Transport};
use crate::types::{Error, Message, RouterState, BROADCAST_ADDRESS, SEARCH_FAILURES};
use crate::wire;
use crate::Node;

impl<T, S, C> Node<T, S, C>
where
    T: Transport,
    S: Storage,
    C: Clock,
{
    /// Frame and transmit a message to a next-hop address.
    ///
    /// Rewrites `last` to this node's own address (the checksum is
    /// computed afterwards, so it seals the rewritten header). Returns
    /// whether the first hop acknowledged; broadcast transmits have no
    /// hardware ack and always count as accepted.
    pub(crate) fn transmit(&mut self, next_hop: u8, msg: &mut Message) -> bool {
        msg.last = self.identity.node_id;
        let bytes = wire::frame(msg);
        self.transport.open_write_pipe(next_hop);
        let acked = self.transport.send(&bytes);

        if next_hop == BROADCAST_ADDRESS {
            return true;
        }

        if acked {
            self.failed_transmissions = 0;
        } else {
            self.failed_transmissions = self.failed_transmissions.saturating_add(1);
            warn!(
                "transmit to {} failed ({} consecutive)",
                next_hop, self.failed_transmissions
            );
            if next_hop == self.identity.parent_node_id
                && self.failed_transmissions >= SEARCH_FAILURES
                && self.can_fail_over()
            {
                self.enter_state(RouterState::SearchingParent);
                self.start_parent_search();
            }
        }
        acked
    }

    /// Whether losing the parent link may trigger a parent search.
    fn can_fail_over(&self) -> bool {
        self.auto_find_parent
            && self.identity.has_node_id()
            && !self.identity.is_gateway()
            && self.state == RouterState::Normal
    }

    /// Block until a locally delivered message matches `filter` or the
    /// timeout elapses.
    ///
    /// This is a bounded synchronous poll: it keeps pumping
    /// [`process`](Node::process), so relaying and control handling
    /// continue while waiting. There is no cancellation; the call runs
    /// to its deadline at the latest.
    pub fn wait_for_reply<F>(&mut self, timeout: Duration, mut filter: F) -> Result<Message, Error>
    where
        F: FnMut(&Message) -> bool,
    {
        let deadline = self.clock.now() + timeout;
        loop {
            if self.process() && filter(&self.msg) {
                return Ok(self.msg.clone());
            }
            if self.clock.now() >= deadline {
                return Err(Error::Timeout);
            }
        }
    }
}
