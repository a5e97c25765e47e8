//! Modbus RTU transport over a serial port.
//!
//! You can create a [`RtuTransport`] using any interface which implements [embedded_io::Read],
//! [embedded_io::Write] & [embedded_io::ReadReady]. Requests are framed with `rmodbus`; the
//! response is collected byte by byte from [`Transport::poll`] so the caller's loop never blocks on
//! the bus.

use embedded_io::{Read, ReadReady, Write};
use log::warn;
use rmodbus::{ModbusProto, client::ModbusRequest};

use crate::{
    error::{Error, Result},
    transport::{Completion, DirectionControl, Duration, Instant, TransactionState, Transport},
};

/// Unit id + function + byte count, the shortest prefix that tells the frame length.
const HEADER_LEN: usize = 3;
/// Unit id + exception function + exception code + CRC.
const EXCEPTION_FRAME_LEN: usize = 5;
/// Unit id + function + byte count + CRC, without the data bytes.
const FRAME_OVERHEAD: usize = 5;

/// Transaction in flight.
struct InFlight {
    request: ModbusRequest,
    started: Instant,
}

/// Non-blocking Modbus RTU master on a half-duplex serial link.
///
/// `H` switches the bus driver direction around each transmission, `L` is the size of the receive
/// buffer.
pub struct RtuTransport<S, H = (), const L: usize = 128>
where
    S: Read + Write + ReadReady,
    H: DirectionControl,
{
    interface: S,
    direction: H,
    /// Default for most field devices is 0x01.
    unit_id: u8,
    timeout: Duration,
    in_flight: Option<InFlight>,
    rx: heapless::Vec<u8, L>,
    registers: heapless::Vec<u16, 64>,
}

impl<S, H, const L: usize> RtuTransport<S, H, L>
where
    S: Read + Write + ReadReady,
    H: DirectionControl,
{
    /// Create a new transport on `interface`, addressing `unit_id` until told otherwise.
    pub fn new(interface: S, direction: H, unit_id: u8, timeout: Duration) -> Self {
        Self {
            interface,
            direction,
            unit_id,
            timeout,
            in_flight: None,
            rx: heapless::Vec::new(),
            registers: heapless::Vec::new(),
        }
    }

    /// Give back the serial interface and direction control.
    pub fn release(self) -> (S, H) {
        (self.interface, self.direction)
    }

    /// Write the request frame to the bus, wrapped in the direction hooks.
    fn transmit(&mut self, frame: &[u8]) -> Result<(), S::Error> {
        self.direction.pre_transmission();
        let written = self
            .interface
            .write_all(frame)
            .and_then(|()| self.interface.flush());
        self.direction.post_transmission();
        written.map_err(Error::SerialError)
    }

    /// Move everything the port has buffered into our receive buffer.
    fn receive(&mut self) -> Result<(), S::Error> {
        let mut temp_buf = [0u8; 8];
        while self.interface.read_ready().map_err(Error::SerialError)? {
            let bytes_read = self
                .interface
                .read(&mut temp_buf)
                .map_err(Error::SerialError)?;
            if bytes_read == 0 {
                break;
            }
            if self.rx.extend_from_slice(&temp_buf[..bytes_read]).is_err() {
                return Err(Error::BufferError);
            }
        }
        Ok(())
    }

    /// Parse a complete response frame into `registers`.
    fn parse(&mut self, request: &ModbusRequest, frame_len: usize) -> Result<(), S::Error> {
        self.registers.clear();
        request
            .parse_u16(&self.rx[..frame_len], &mut self.registers)
            .map_err(|_| Error::InvalidResponse)
    }

    fn finish(&mut self, completion: Completion) -> TransactionState {
        self.in_flight = None;
        if completion == Completion::Timeout {
            self.registers.clear();
        }
        TransactionState::Complete(completion)
    }
}

/// Length of the RTU response frame starting in `buf`, once the header has arrived.
fn expected_frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    if buf[1] & 0x80 != 0 {
        Some(EXCEPTION_FRAME_LEN)
    } else {
        Some(FRAME_OVERHEAD + buf[2] as usize)
    }
}

impl<S, H, const L: usize> Transport for RtuTransport<S, H, L>
where
    S: Read + Write + ReadReady,
    H: DirectionControl,
{
    type Error = Error<S::Error>;

    fn set_slave_address(&mut self, address: u8) {
        self.unit_id = address;
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn read_input_registers(
        &mut self,
        start: u16,
        count: u16,
        now: Instant,
    ) -> Result<(), S::Error> {
        if self.in_flight.is_some() {
            return Err(Error::Busy);
        }

        let mut frame: heapless::Vec<u8, L> = heapless::Vec::new();
        let mut request = ModbusRequest::new(self.unit_id, ModbusProto::Rtu);
        request.generate_get_inputs(start, count, &mut frame)?;

        // Anything still in the receive path belongs to an earlier, abandoned exchange.
        self.rx.clear();
        self.registers.clear();

        self.transmit(&frame)?;
        self.in_flight = Some(InFlight {
            request,
            started: now,
        });
        Ok(())
    }

    fn poll(&mut self, now: Instant) -> TransactionState {
        let Some(in_flight) = self.in_flight.take() else {
            return TransactionState::Idle;
        };

        if let Err(err) = self.receive() {
            warn!("Unit {}: receive failed: {:?}", self.unit_id, err);
            return self.finish(Completion::Timeout);
        }

        if let Some(frame_len) = expected_frame_len(&self.rx) {
            if self.rx.len() >= frame_len {
                let completion = match self.parse(&in_flight.request, frame_len) {
                    Ok(()) => Completion::Success,
                    Err(err) => {
                        warn!("Unit {}: {}", self.unit_id, err);
                        Completion::Timeout
                    }
                };
                return self.finish(completion);
            }
        }

        let expired = now
            .checked_duration_since(in_flight.started)
            .is_some_and(|elapsed| elapsed >= self.timeout);
        if expired {
            warn!(
                "Unit {}: no response within {} ms",
                self.unit_id,
                self.timeout.to_millis()
            );
            return self.finish(Completion::Timeout);
        }

        self.in_flight = Some(in_flight);
        TransactionState::Pending
    }

    fn response_register(&self, index: usize) -> Option<u16> {
        self.registers.get(index).copied()
    }
}
