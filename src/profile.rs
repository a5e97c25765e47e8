//! Register profiles of the supported field devices.
//!
//! A profile maps each polled [`Variable`] to the input registers holding it on one device type.
//! Profiles are static data; a slot holding no device, or a device whose register map for a
//! variable is not known, fails the lookup and the scheduler skips it without issuing a request.

use strum_macros::{EnumCount, EnumIter, IntoStaticStr};
use thiserror::Error;

use crate::scaling::Scale;

/// The variables polled from every node, in polling order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, EnumCount, IntoStaticStr)]
pub enum Variable {
    /// Actual active power being generated.
    ActivePower,
    /// Nominal (deliverable) power of the device.
    NominalPower,
}

impl Variable {
    /// The variable polled after this one. Wraps from the last back to the first.
    pub const fn next(self) -> Self {
        match self {
            Variable::ActivePower => Variable::NominalPower,
            Variable::NominalPower => Variable::ActivePower,
        }
    }

    /// Whether this is the last variable of a node's poll cycle.
    pub const fn is_last(self) -> bool {
        matches!(self, Variable::NominalPower)
    }
}

/// Location and scaling of one variable in a device's input register map (function 0x04).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterSpec {
    /// First input register address.
    pub address: u16,
    /// Number of consecutive registers to read.
    pub count: u16,
    /// Conversion from raw register value to kW.
    pub scale: Scale,
}

impl RegisterSpec {
    pub const fn new(address: u16, count: u16, scale: Scale) -> Self {
        Self {
            address,
            count,
            scale,
        }
    }
}

/// Rebuild a value from the two response registers.
///
/// The high register is shifted by 8 bits, not 16, and OR'ed with the low register. This is the bit
/// layout the deployed controllers expect and must not be changed to a full 32-bit merge.
#[inline]
pub const fn decode_register_pair(high: u16, low: u16) -> u32 {
    ((high as u32) << 8) | low as u32
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileError {
    #[error("No device configured for this slot")]
    NoDevice,
    #[error("{variable:?} is not mapped for {device}")]
    Unsupported {
        device: &'static str,
        variable: Variable,
    },
}

/// Implemented by the device-type tag of a device group.
///
/// The [`Default`] value must be the "no device" tag.
pub trait RegisterProfile: Copy + Default + core::fmt::Debug {
    /// Human readable device type, used in logs and errors.
    fn name(&self) -> &'static str;

    /// Whether this slot holds a device at all.
    fn is_populated(&self) -> bool;

    /// Look up where `variable` lives on this device type.
    fn register(&self, variable: Variable) -> Result<RegisterSpec, ProfileError>;
}

/// PV inverter models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumIter, IntoStaticStr)]
pub enum InverterModel {
    /// No inverter on this node.
    #[default]
    NoInverter,
    /// SG33KTL-M, SG40KTL-M, SG49K5J, SG50KTL-M, SG60KU(-M), SG60KTL(-M), SG36KTL-M, SG8KTL-M,
    /// SG10KTL-M, SG12KTL-M, SG80KTL(-M), SG80HV, SG125HV.
    Sungrow,
    /// Register map not yet available.
    Abb,
    /// Register map not yet available.
    Fronius,
}

impl InverterModel {
    const SUNGROW_NOMINAL_POWER: RegisterSpec = RegisterSpec::new(5001, 1, Scale::new(0.1));
    const SUNGROW_ACTIVE_POWER: RegisterSpec = RegisterSpec::new(5031, 2, Scale::UNITY);
}

impl RegisterProfile for InverterModel {
    fn name(&self) -> &'static str {
        self.into()
    }

    fn is_populated(&self) -> bool {
        !matches!(self, InverterModel::NoInverter)
    }

    fn register(&self, variable: Variable) -> Result<RegisterSpec, ProfileError> {
        match (self, variable) {
            (InverterModel::NoInverter, _) => Err(ProfileError::NoDevice),
            (InverterModel::Sungrow, Variable::ActivePower) => Ok(Self::SUNGROW_ACTIVE_POWER),
            (InverterModel::Sungrow, Variable::NominalPower) => Ok(Self::SUNGROW_NOMINAL_POWER),
            (device, variable) => Err(ProfileError::Unsupported {
                device: device.name(),
                variable,
            }),
        }
    }
}

/// Genset controller models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumIter, IntoStaticStr)]
pub enum GensetController {
    /// No genset controller on this node.
    #[default]
    NoGenset,
    /// Sices GC600 / GC600Mains.
    Sices,
}

impl GensetController {
    const SICES_NOMINAL_POWER: RegisterSpec = RegisterSpec::new(13018, 1, Scale::UNITY);
    // Active power is reported in 1/256 kW.
    const SICES_ACTIVE_POWER: RegisterSpec = RegisterSpec::new(61, 2, Scale::new(1.0 / 256.0));
}

impl RegisterProfile for GensetController {
    fn name(&self) -> &'static str {
        self.into()
    }

    fn is_populated(&self) -> bool {
        !matches!(self, GensetController::NoGenset)
    }

    fn register(&self, variable: Variable) -> Result<RegisterSpec, ProfileError> {
        match (self, variable) {
            (GensetController::NoGenset, _) => Err(ProfileError::NoDevice),
            (GensetController::Sices, Variable::ActivePower) => Ok(Self::SICES_ACTIVE_POWER),
            (GensetController::Sices, Variable::NominalPower) => Ok(Self::SICES_NOMINAL_POWER),
        }
    }
}
