//! New-data synchronisation flags of a device group.
//!
//! Set by the transaction completion handler, consumed and cleared by the aggregator.

use modular_bitfield::prelude::*;

use crate::profile::Variable;

/// Bitset of pending updates. Bit 0: active power, bit 1: nominal power, bit 2: comm status.
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncFlags {
    /// New active power read from some node.
    pub active_power: bool,
    /// New nominal power read from some node.
    pub nominal_power: bool,
    /// Some node changed its communication status.
    pub comm_status: bool,
    #[skip]
    __: B5,
}

impl SyncFlags {
    /// Raw bitmask, for consumers that poll the flags as a word.
    pub fn bits(&self) -> u8 {
        self.into_bytes()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.bits() == 0
    }

    /// Flag for new data of `variable`.
    pub fn variable(&self, variable: Variable) -> bool {
        match variable {
            Variable::ActivePower => self.active_power(),
            Variable::NominalPower => self.nominal_power(),
        }
    }

    pub fn set_variable(&mut self, variable: Variable, new_data: bool) {
        match variable {
            Variable::ActivePower => self.set_active_power(new_data),
            Variable::NominalPower => self.set_nominal_power(new_data),
        }
    }

    /// Clear exactly the flags set in `consumed`.
    pub fn clear(&mut self, consumed: SyncFlags) {
        *self = SyncFlags::from_bytes([self.bits() & !consumed.bits()]);
    }
}
