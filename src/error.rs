//! Our error types for the field-bus transport.
//!
//! None of these are fatal to the poller. A failed transaction is fed into the link health state
//! machine and polling carries on with the next slot.

use thiserror::Error;

pub type Result<T, I> = core::result::Result<T, Error<I>>;

/// Error type for Modbus RTU communications with a field device.
#[derive(Error, Debug)]
pub enum Error<I: embedded_io::Error> {
    #[error("Serial communication error")]
    SerialError(I),
    #[error("Modbus protocol error: {0}")]
    ModbusError(rmodbus::ErrorKind),
    #[error("Communication timeout")]
    Timeout,
    #[error("Invalid response received")]
    InvalidResponse,
    #[error("Response does not fit the receive buffer")]
    BufferError,
    #[error("A transaction is already outstanding")]
    Busy,
}

impl<I: embedded_io::Error> From<rmodbus::ErrorKind> for Error<I> {
    fn from(err: rmodbus::ErrorKind) -> Self {
        Error::ModbusError(err)
    }
}
