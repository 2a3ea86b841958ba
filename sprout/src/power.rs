//! Power scheduling: bounded or interrupt-terminated suspension.
//!
//! Sleeping trades reachability for battery life: the radio is put into
//! its lowest-power mode and the host is suspended, so no inbound
//! traffic is processed until the node wakes. Callers must not expect
//! delivery guarantees across a sleep window.

use crate::time::Duration;
use crate::traits::{Clock, Sleeper, Storage, Transport};
use crate::Node;

/// Edge or level condition arming the external wake signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerMode {
    Rising,
    Falling,
    Change,
}

/// What ended an interrupt-or-timer suspension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WakeCause {
    /// The timer bound elapsed.
    Timer,
    /// The external signal fired first.
    Interrupt,
}

impl<T, S, C> Node<T, S, C>
where
    T: Transport,
    S: Storage,
    C: Clock,
{
    /// Suspend the node and its radio for up to `duration`. The timer
    /// is the only wake cause, so nothing is returned.
    pub fn sleep<P: Sleeper>(&mut self, sleeper: &mut P, duration: Duration) {
        self.transport.sleep();
        sleeper.sleep(duration);
        self.transport.wake();
    }

    /// Suspend until the external signal fires in the given mode or,
    /// when `duration` is nonzero, until the timer elapses - whichever
    /// comes first. A zero duration accepts indefinite suspension.
    pub fn sleep_until<P: Sleeper>(
        &mut self,
        sleeper: &mut P,
        source: u8,
        mode: TriggerMode,
        duration: Duration,
    ) -> WakeCause {
        self.transport.sleep();
        let cause = sleeper.sleep_until(source, mode, duration);
        self.transport.wake();
        cause
    }
}
