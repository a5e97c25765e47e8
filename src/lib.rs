//! This crate polls the field devices of a hybrid PV/genset power plant over Modbus and keeps
//! fleet-wide power totals up to date for the plant controller.
//!
//! It supports `no-std` environments by use of the `no_std` feature flag.
//!
//! Two device groups share the controller, each on its own RS-485 bus:
//! * PV inverters, up to 20 nodes (Sungrow, with ABB and Fronius recognised but not yet mapped)
//! * Genset controllers, up to 32 nodes (SICES)
//!
//! Every node is read for its active and nominal power with function 0x04 (read input registers),
//! one transaction at a time per bus. A small health state machine tracks each node's link from the
//! outcome of its transactions. A cooperative [`dispatcher::Dispatcher`] drives both groups from
//! the main loop, never blocking, and aggregates new readings into [`aggregate::Totals`].
//!
//! The serial ports should be configured like so:
//! * Default baud rate: 115200
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None
//!
//! ```ignore
//! let mut inverters: InverterGroup<_> = GroupBuilder::new("inverters")
//!     .with_nodes(4)
//!     .with_all_devices(InverterModel::Sungrow)
//!     .build(RtuTransport::new(pv_port, (), DEFAULT_SLAVE_ADDRESS, DEFAULT_TIMEOUT))?;
//! ```

#![cfg_attr(feature = "no_std", no_std)]

pub mod aggregate;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod flags;
pub mod group;
pub mod health;
pub mod node;
pub mod profile;
pub mod rtu;
pub mod scaling;
pub mod transport;

#[cfg(test)]
mod mock_serial;
#[cfg(test)]
mod mock_transport;

pub use aggregate::{LinkEvent, LinkObserver, Totals};
pub use config::{DispatcherConfig, GensetGroup, GroupBuilder, InverterGroup};
pub use dispatcher::{Dispatcher, Fleet, Housekeeping, LoopStats};
pub use group::{DeviceGroup, PollStatus};
pub use health::LinkState;
pub use profile::{GensetController, InverterModel, RegisterProfile, Variable};
pub use rtu::RtuTransport;
pub use transport::{Duration, Instant, Transport};
