//! The boundary between the poller and the request/response transport.
//!
//! A transport carries at most one register read at a time. It is started with
//! [`Transport::read_input_registers`] and then polled from the main loop until it reports
//! [`TransactionState::Complete`]. Completion is therefore always observed from inside the poller's
//! own tick, never from an interrupt or another thread.

/// Time base used throughout the crate, in milliseconds.
pub type Instant = fugit::TimerInstantU32<1000>;
/// Millisecond duration.
pub type Duration = fugit::TimerDurationU32<1000>;

/// How a transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// A valid response is available through [`Transport::response_register`].
    Success,
    /// No valid response arrived in time.
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Nothing has been requested.
    Idle,
    /// Waiting for the response.
    Pending,
    /// The outstanding transaction resolved. Reported once, after which the transport is idle
    /// again.
    Complete(Completion),
}

/// A non-blocking Modbus master.
pub trait Transport {
    type Error: core::fmt::Debug;

    /// Unit id used by subsequent requests.
    fn set_slave_address(&mut self, address: u8);

    /// How long to wait for a response before reporting [`Completion::Timeout`].
    fn set_timeout(&mut self, timeout: Duration);

    /// Start reading `count` input registers (function 0x04) from `start`. Does not wait for the
    /// response.
    fn read_input_registers(&mut self, start: u16, count: u16, now: Instant)
    -> Result<(), Self::Error>;

    /// Advance the outstanding transaction.
    fn poll(&mut self, now: Instant) -> TransactionState;

    /// Register `index` of the last successful response, if the response was that long.
    fn response_register(&self, index: usize) -> Option<u16>;
}

/// Hooks run around every transmission on a half-duplex bus, e.g. to switch an RS-485 driver
/// between transmit and receive.
pub trait DirectionControl {
    /// Called right before the request is written.
    fn pre_transmission(&mut self);
    /// Called right after the request is written.
    fn post_transmission(&mut self);
}

/// No direction control, for full-duplex links or transceivers with automatic direction.
impl DirectionControl for () {
    fn pre_transmission(&mut self) {}
    fn post_transmission(&mut self) {}
}
