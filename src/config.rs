//! Plant configuration: fleet sizes, bus defaults, group construction and dispatcher timing.

use thiserror::Error;

use crate::{
    group::DeviceGroup,
    node::NodeRegistry,
    profile::{GensetController, InverterModel, RegisterProfile},
    transport::{Duration, Transport},
};

/// Max. PV inverters supported.
pub const PV_MAX_NODES: usize = 20;
/// Max. genset controllers supported.
pub const GENSET_MAX_NODES: usize = 32;
/// Address of the first node of a group unless configured otherwise.
pub const DEFAULT_SLAVE_ADDRESS: u8 = 1;
/// Highest unit id usable by a single Modbus device.
pub const MAX_SLAVE_ADDRESS: u8 = 247;
/// Default baud rate of the RS-485 buses.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
/// Response timeout used unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::millis(100);

/// The PV inverter fleet.
pub type InverterGroup<T> = DeviceGroup<InverterModel, T, PV_MAX_NODES>;
/// The genset controller fleet.
pub type GensetGroup<T> = DeviceGroup<GensetController, T, GENSET_MAX_NODES>;

/// Rejected runtime reconfiguration. The registry is left unchanged.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Node index {index} out of range, group has {len} nodes")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Invalid Modbus address {0}")]
    InvalidAddress(u8),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    #[error("A group needs at least one node")]
    NoNodes,
    #[error("Requested {requested} nodes, capacity is {capacity}")]
    TooManyNodes { requested: usize, capacity: usize },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Check `address` is a valid unit id for a single device (1-247).
pub fn validate_address(address: u8) -> Result<u8, ConfigError> {
    if (1..=MAX_SLAVE_ADDRESS).contains(&address) {
        Ok(address)
    } else {
        Err(ConfigError::InvalidAddress(address))
    }
}

/// Use this type to create a [`DeviceGroup`].
///
/// By default the group has `N` nodes with addresses counting up from [`DEFAULT_SLAVE_ADDRESS`],
/// all without a device, and uses [`DEFAULT_TIMEOUT`].
pub struct GroupBuilder<D, const N: usize> {
    label: &'static str,
    nodes: Option<usize>,
    first_address: u8,
    timeout: Duration,
    devices: [Option<D>; N],
    /// Device of every node without an explicit one.
    fallback: Option<D>,
    /// First device index given beyond the capacity, reported by `build`.
    bad_index: Option<usize>,
}

impl<D: RegisterProfile, const N: usize> GroupBuilder<D, N> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            nodes: None,
            first_address: DEFAULT_SLAVE_ADDRESS,
            timeout: DEFAULT_TIMEOUT,
            devices: [None; N],
            fallback: None,
            bad_index: None,
        }
    }

    /// Number of nodes in use, at most `N`.
    pub fn with_nodes(mut self, count: usize) -> Self {
        self.nodes = Some(count);
        self
    }

    /// Address of node 0. Node `i` gets `first_address + i`.
    pub fn with_first_address(mut self, address: u8) -> Self {
        self.first_address = address;
        self
    }

    /// Response timeout handed to the transport.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Device type of node `index`.
    pub fn with_device(mut self, index: usize, device: D) -> Self {
        match self.devices.get_mut(index) {
            Some(slot) => *slot = Some(device),
            None => {
                self.bad_index.get_or_insert(index);
            }
        }
        self
    }

    /// Device type of every node not given one with [`Self::with_device`].
    pub fn with_all_devices(mut self, device: D) -> Self {
        self.fallback = Some(device);
        self
    }

    /// Let's build it!
    pub fn build<T: Transport>(
        self,
        mut transport: T,
    ) -> Result<DeviceGroup<D, T, N>, BuildError> {
        let count = self.nodes.unwrap_or(N);
        if count == 0 {
            return Err(BuildError::NoNodes);
        }
        if count > N {
            return Err(BuildError::TooManyNodes {
                requested: count,
                capacity: N,
            });
        }

        let first = validate_address(self.first_address)?;
        let last = first as usize + count - 1;
        if last > MAX_SLAVE_ADDRESS as usize {
            return Err(ConfigError::InvalidAddress(MAX_SLAVE_ADDRESS).into());
        }

        let out_of_range = self.bad_index.or_else(|| {
            self.devices
                .iter()
                .enumerate()
                .skip(count)
                .find_map(|(index, device)| device.is_some().then_some(index))
        });
        if let Some(index) = out_of_range {
            return Err(ConfigError::IndexOutOfRange { index, len: count }.into());
        }

        transport.set_timeout(self.timeout);
        transport.set_slave_address(first);

        let mut nodes = NodeRegistry::new(count, first);
        for (index, device) in self.devices.iter().take(count).enumerate() {
            if let Some(device) = device.or(self.fallback) {
                nodes.set_device(index, device);
            }
        }
        Ok(DeviceGroup::new(self.label, transport, nodes))
    }
}

/// Periods of the dispatcher's cadence buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Poll scheduler of the active group.
    pub poll_period: Duration,
    /// Aggregation of groups with new data.
    pub aggregate_period: Duration,
    /// Input and keyboard edge processing.
    pub housekeeping_period: Duration,
    /// Run indicator and loop statistics.
    pub heartbeat_period: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_period: Duration::millis(1),
            aggregate_period: Duration::millis(10),
            housekeeping_period: Duration::millis(100),
            heartbeat_period: Duration::millis(500),
        }
    }
}
