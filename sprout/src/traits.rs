//! Collaborator traits for radio, storage, time, and power abstraction.
//!
//! The protocol holds capability-typed handles to its collaborators
//! instead of extending a driver type, so the same routing logic runs
//! against:
//! - Transport layers (nRF24-class radios, a simulated network)
//! - Storage backends (EEPROM, flash emulation, in-memory mocks)
//! - Time sources (hardware timers, simulated time)
//! - Sleep primitives (MCU power-down modes, no-op mocks)

use alloc::vec::Vec;

use crate::config::RadioSetup;
use crate::power::{TriggerMode, WakeCause};
use crate::time::{Duration, Timestamp};

/// Radio transport collaborator.
///
/// The router addresses the radio per hop through a fixed set of pipes:
/// one write pipe (retargeted for every transmit), one receive pipe on
/// this node's own address, and one on the broadcast address. `send`
/// reports the transport's own hardware acknowledgment - whether the
/// first hop accepted the frame - which is unrelated to any
/// application-level ack.
///
/// The protocol itself is single-threaded, but an implementation with
/// interrupt-driven reception must keep its inbound frame buffer from
/// being overwritten from interrupt context while `read` is copying it
/// out - a brief critical section, not a lock, since there is no second
/// thread.
pub trait Transport {
    /// Apply physical radio parameters.
    fn configure(&mut self, setup: &RadioSetup);

    /// Retarget the write pipe at a node address.
    fn open_write_pipe(&mut self, address: u8);

    /// Open a receive pipe on a node address.
    fn open_read_pipe(&mut self, pipe: u8, address: u8);

    /// Transmit one frame to the current write pipe. Returns whether
    /// the hardware ack confirmed reception at the first hop. Broadcast
    /// transmits have no ack; callers ignore the result for those.
    fn send(&mut self, frame: &[u8]) -> bool;

    /// True when a received frame is waiting.
    fn available(&mut self) -> bool;

    /// Take the next pending frame, if any.
    fn read(&mut self) -> Option<Vec<u8>>;

    /// Put the radio into its lowest-power mode.
    fn sleep(&mut self);

    /// Restore the radio from sleep.
    fn wake(&mut self);
}

/// Byte-addressable non-volatile storage collaborator.
///
/// The reserved regions are defined in [`layout`](crate::identity::layout).
pub trait Storage {
    /// Read one byte.
    fn read(&self, address: u16) -> u8;

    /// Write one byte.
    fn write(&mut self, address: u16, value: u8);

    /// Write one byte only if it differs from what is stored. EEPROM
    /// cells survive a limited number of write cycles; every persistence
    /// path in this crate goes through `update`.
    fn update(&mut self, address: u16, value: u8) {
        if self.read(address) != value {
            self.write(address, value);
        }
    }

    /// Read a contiguous block.
    fn read_block(&self, address: u16, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read(address + i as u16);
        }
    }

    /// Write a contiguous block, change-only per byte.
    fn update_block(&mut self, address: u16, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            self.update(address + i as u16, byte);
        }
    }
}

/// Monotonic time source.
pub trait Clock {
    /// Current timestamp. Must be monotonic; the epoch is arbitrary.
    fn now(&self) -> Timestamp;
}

/// Host low-power suspension primitive.
pub trait Sleeper {
    /// Suspend the host for the given span. The timer is the only wake
    /// cause.
    fn sleep(&mut self, duration: Duration);

    /// Suspend until the external signal fires in the given trigger
    /// mode, or until `duration` elapses when it is nonzero. A zero
    /// duration means interrupt-only: the suspension is unbounded until
    /// the signal arrives.
    fn sleep_until(&mut self, source: u8, mode: TriggerMode, duration: Duration) -> WakeCause;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock implementations of the collaborator traits.
    //!
    //! The mocks share their state through `Rc` handles: cloning a mock
    //! yields a handle onto the same queues and cells, so a test can
    //! move one clone into a node and keep another for injecting frames
    //! and inspecting what was transmitted.

    use alloc::collections::VecDeque;
    use alloc::rc::Rc;
    use alloc::vec::Vec;
    use core::cell::{Cell, RefCell};

    use super::*;
    use crate::types::Message;
    use crate::wire;

    /// One frame captured by [`MockTransport`].
    #[derive(Clone, Debug)]
    pub struct SentFrame {
        /// Write-pipe address the frame was sent to.
        pub address: u8,
        /// Raw frame bytes.
        pub bytes: Vec<u8>,
    }

    impl SentFrame {
        /// Decode the captured frame.
        pub fn message(&self) -> Message {
            wire::parse(&self.bytes).expect("captured frame should parse")
        }
    }

    /// In-memory radio with injectable receive queue and captured sends.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        rx: Rc<RefCell<VecDeque<Vec<u8>>>>,
        sent: Rc<RefCell<Vec<SentFrame>>>,
        fail_budget: Rc<Cell<u32>>,
        write_address: Rc<Cell<u8>>,
        awake: Rc<Cell<bool>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            let transport = Self::default();
            transport.awake.set(true);
            transport
        }

        /// Queue a raw frame as if it had been received.
        pub fn inject_raw(&self, bytes: Vec<u8>) {
            self.rx.borrow_mut().push_back(bytes);
        }

        /// Frame and queue a message as if it had been received.
        pub fn inject(&self, msg: &Message) {
            self.inject_raw(wire::frame(msg));
        }

        /// Fail the next `n` transmissions (no hardware ack).
        pub fn fail_next(&self, n: u32) {
            self.fail_budget.set(self.fail_budget.get() + n);
        }

        /// Number of frames transmitted so far.
        pub fn sent_len(&self) -> usize {
            self.sent.borrow().len()
        }

        /// Drain and return all captured frames.
        pub fn take_sent(&self) -> Vec<SentFrame> {
            self.sent.borrow_mut().drain(..).collect()
        }

        /// Whether the radio is currently awake.
        pub fn is_awake(&self) -> bool {
            self.awake.get()
        }
    }

    impl Transport for MockTransport {
        fn configure(&mut self, _setup: &RadioSetup) {}

        fn open_write_pipe(&mut self, address: u8) {
            self.write_address.set(address);
        }

        fn open_read_pipe(&mut self, _pipe: u8, _address: u8) {}

        fn send(&mut self, frame: &[u8]) -> bool {
            self.sent.borrow_mut().push(SentFrame {
                address: self.write_address.get(),
                bytes: frame.to_vec(),
            });
            if self.fail_budget.get() > 0 {
                self.fail_budget.set(self.fail_budget.get() - 1);
                return false;
            }
            true
        }

        fn available(&mut self) -> bool {
            !self.rx.borrow().is_empty()
        }

        fn read(&mut self) -> Option<Vec<u8>> {
            self.rx.borrow_mut().pop_front()
        }

        fn sleep(&mut self) {
            self.awake.set(false);
        }

        fn wake(&mut self) {
            self.awake.set(true);
        }
    }

    /// 1 KiB of emulated EEPROM, erased to 0xFF like the real part.
    #[derive(Clone)]
    pub struct MockStorage {
        cells: Rc<RefCell<[u8; 1024]>>,
        writes: Rc<Cell<u32>>,
    }

    impl Default for MockStorage {
        fn default() -> Self {
            Self {
                cells: Rc::new(RefCell::new([0xFF; 1024])),
                writes: Rc::new(Cell::new(0)),
            }
        }
    }

    impl MockStorage {
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of physical writes performed (change-only writes that
        /// found the value unchanged do not count).
        pub fn write_count(&self) -> u32 {
            self.writes.get()
        }
    }

    impl Storage for MockStorage {
        fn read(&self, address: u16) -> u8 {
            self.cells.borrow()[address as usize]
        }

        fn write(&mut self, address: u16, value: u8) {
            self.cells.borrow_mut()[address as usize] = value;
            self.writes.set(self.writes.get() + 1);
        }
    }

    /// Manually driven clock that also advances itself by a fixed tick
    /// on every read, so bounded poll loops make progress in tests
    /// without a real timer. The default tick is 1 ms.
    #[derive(Clone)]
    pub struct MockClock {
        now_ms: Rc<Cell<u64>>,
        tick_ms: Rc<Cell<u64>>,
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self {
                now_ms: Rc::new(Cell::new(0)),
                tick_ms: Rc::new(Cell::new(1)),
            }
        }
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
        }

        /// Set the per-read tick (0 freezes time entirely).
        pub fn with_tick(self, tick: Duration) -> Self {
            self.tick_ms.set(tick.as_millis());
            self
        }

        /// Jump to an absolute time.
        pub fn set(&self, time: Timestamp) {
            self.now_ms.set(time.as_millis());
        }

        /// Move time forward.
        pub fn advance(&self, duration: Duration) {
            self.now_ms.set(self.now_ms.get() + duration.as_millis());
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Timestamp {
            let now = self.now_ms.get();
            self.now_ms.set(now + self.tick_ms.get());
            Timestamp::from_millis(now)
        }
    }

    /// Record of one suspension requested from [`MockSleeper`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum SleepCall {
        Timer(Duration),
        Interrupt {
            source: u8,
            mode: TriggerMode,
            duration: Duration,
        },
    }

    /// Sleep primitive that records calls and returns a scripted wake
    /// cause.
    #[derive(Clone)]
    pub struct MockSleeper {
        calls: Rc<RefCell<Vec<SleepCall>>>,
        wake_cause: Rc<Cell<WakeCause>>,
    }

    impl Default for MockSleeper {
        fn default() -> Self {
            Self {
                calls: Rc::new(RefCell::new(Vec::new())),
                wake_cause: Rc::new(Cell::new(WakeCause::Timer)),
            }
        }
    }

    impl MockSleeper {
        pub fn new() -> Self {
            Self::default()
        }

        /// Script the cause returned by the next interrupt-form sleeps.
        pub fn wake_with(&self, cause: WakeCause) {
            self.wake_cause.set(cause);
        }

        /// All suspensions requested so far.
        pub fn calls(&self) -> Vec<SleepCall> {
            self.calls.borrow().clone()
        }
    }

    impl Sleeper for MockSleeper {
        fn sleep(&mut self, duration: Duration) {
            self.calls.borrow_mut().push(SleepCall::Timer(duration));
        }

        fn sleep_until(&mut self, source: u8, mode: TriggerMode, duration: Duration) -> WakeCause {
            self.calls.borrow_mut().push(SleepCall::Interrupt {
                source,
                mode,
                duration,
            });
            self.wake_cause.get()
        }
    }
}
