//! Consumption side of the new-data flags: fleet totals and link state notifications.

use log::debug;

use crate::{
    flags::SyncFlags,
    group::DeviceGroup,
    health::LinkState,
    profile::{RegisterProfile, Variable},
    transport::Transport,
};

/// Sum over the populated nodes of a group, in kW.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    pub active_power: f32,
    pub nominal_power: f32,
}

impl Totals {
    pub fn get(&self, variable: Variable) -> f32 {
        match variable {
            Variable::ActivePower => self.active_power,
            Variable::NominalPower => self.nominal_power,
        }
    }

    fn set(&mut self, variable: Variable, value: f32) {
        match variable {
            Variable::ActivePower => self.active_power = value,
            Variable::NominalPower => self.nominal_power = value,
        }
    }
}

/// A node whose link state changed since the previous aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEvent {
    /// Label of the group the node belongs to.
    pub group: &'static str,
    pub node: usize,
    pub address: u8,
    /// State at aggregation time.
    pub state: LinkState,
}

/// Receives link state changes, e.g. to update a display or an upstream SCADA.
pub trait LinkObserver {
    fn link_changed(&mut self, event: LinkEvent);
}

impl<F: FnMut(LinkEvent)> LinkObserver for F {
    fn link_changed(&mut self, event: LinkEvent) {
        self(event)
    }
}

impl<D: RegisterProfile, T: Transport, const N: usize> DeviceGroup<D, T, N> {
    /// Consume the pending new-data flags.
    ///
    /// Totals are recomputed for every variable with new data, and every node whose link state
    /// changed is reported to `observer`. Returns the flags that were consumed; calling again
    /// without new data does nothing and returns empty flags.
    pub fn aggregate(&mut self, observer: &mut dyn LinkObserver) -> SyncFlags {
        let consumed = self.flags;

        for variable in [Variable::ActivePower, Variable::NominalPower] {
            if consumed.variable(variable) {
                let total = self.nodes.total(variable);
                debug!("{}: total {:?} = {} kW", self.label(), variable, total);
                self.totals.set(variable, total);
            }
        }

        if consumed.comm_status() {
            let group = self.label();
            for (index, node) in self.nodes.iter_mut().enumerate() {
                if node.link_changed() {
                    observer.link_changed(LinkEvent {
                        group,
                        node: index,
                        address: node.address(),
                        state: node.link_state(),
                    });
                    node.acknowledge_link_change();
                }
            }
        }

        self.flags.clear(consumed);
        consumed
    }
}
