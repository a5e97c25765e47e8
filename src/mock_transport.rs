//! Scripted transport used in unit tests to drive device groups without a bus.

use crate::transport::{Completion, Duration, Instant, TransactionState, Transport};

/// What the mocked device does with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Answer with these registers (unused trailing entries are `None`).
    Registers([Option<u16>; 2]),
    /// Never answer.
    Timeout,
    /// The request cannot even be sent.
    Refuse,
}

impl Reply {
    /// Two register answer, high register second as on the wire.
    pub const fn pair(low: u16, high: u16) -> Self {
        Reply::Registers([Some(low), Some(high)])
    }

    pub const fn single(value: u16) -> Self {
        Reply::Registers([Some(value), None])
    }
}

/// A request as seen on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub address: u8,
    pub start: u16,
    pub count: u16,
}

#[derive(Debug)]
pub struct Refused;

pub struct MockTransport {
    /// Decides the reply to each request.
    responder: fn(&Request) -> Reply,
    /// Number of polls a request stays pending before it resolves.
    latency: u32,
    address: u8,
    timeout: Option<Duration>,
    in_flight: Option<(Reply, u32)>,
    registers: [Option<u16>; 2],
    requests: heapless::Vec<Request, 512>,
}

impl MockTransport {
    pub fn new(responder: fn(&Request) -> Reply) -> Self {
        Self {
            responder,
            latency: 0,
            address: 0,
            timeout: None,
            in_flight: None,
            registers: [None; 2],
            requests: heapless::Vec::new(),
        }
    }

    pub fn with_latency(mut self, polls: u32) -> Self {
        self.latency = polls;
        self
    }

    /// Requests issued so far, oldest first.
    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl Transport for MockTransport {
    type Error = Refused;

    fn set_slave_address(&mut self, address: u8) {
        self.address = address;
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    fn read_input_registers(
        &mut self,
        start: u16,
        count: u16,
        _now: Instant,
    ) -> Result<(), Self::Error> {
        assert!(self.in_flight.is_none(), "overlapping transactions");
        let request = Request {
            address: self.address,
            start,
            count,
        };
        let reply = (self.responder)(&request);
        if reply == Reply::Refuse {
            return Err(Refused);
        }
        self.requests.push(request).expect("request log full");
        self.in_flight = Some((reply, self.latency));
        Ok(())
    }

    fn poll(&mut self, _now: Instant) -> TransactionState {
        match self.in_flight.take() {
            None => TransactionState::Idle,
            Some((reply, remaining)) if remaining > 0 => {
                self.in_flight = Some((reply, remaining - 1));
                TransactionState::Pending
            }
            Some((Reply::Registers(registers), _)) => {
                self.registers = registers;
                TransactionState::Complete(Completion::Success)
            }
            Some(_) => {
                self.registers = [None; 2];
                TransactionState::Complete(Completion::Timeout)
            }
        }
    }

    fn response_register(&self, index: usize) -> Option<u16> {
        self.registers.get(index).copied().flatten()
    }
}
