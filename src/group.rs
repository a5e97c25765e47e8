//! A fleet of same-protocol field devices polled over one bus.
//!
//! The group walks a cursor over its nodes, reading every [`Variable`] of a node before moving to
//! the next one, with never more than one transaction outstanding. When a transaction resolves the
//! result is decoded into the node, the node's link health is updated and the matching
//! [`SyncFlags`] are raised for the aggregator.

use log::{debug, info, trace, warn};

use crate::{
    aggregate::Totals,
    config::{ConfigError, validate_address},
    flags::SyncFlags,
    node::{Node, NodeRegistry, Reading},
    profile::{RegisterProfile, Variable, decode_register_pair},
    scaling::Scale,
    transport::{Completion, Duration, Instant, TransactionState, Transport},
};

/// Which node and variable the scheduler is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub node: usize,
    pub variable: Variable,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            node: 0,
            variable: Variable::ActivePower,
        }
    }
}

/// Result of one slot of the poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A response was decoded into the node.
    Success,
    /// The request failed or went unanswered. Stored values are untouched.
    Timeout,
    /// No request was issued: the slot is empty or its device does not map the variable.
    Skipped,
}

/// A finished slot, reported once per [`PollStatus::Advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub node: usize,
    pub variable: Variable,
    pub outcome: Outcome,
}

impl Transaction {
    /// Whether this was the last variable of the node, i.e. the cursor moved on to the next node.
    pub fn completes_node(&self) -> bool {
        self.variable.is_last()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// A transaction is outstanding.
    Busy,
    /// The current slot is finished and the cursor has moved.
    Advance(Transaction),
}

#[derive(Debug, Clone, Copy)]
struct Outstanding {
    node: usize,
    variable: Variable,
    scale: Scale,
}

/// Polling engine, node registry and totals of one fleet.
///
/// `D` is the device-type tag selecting each node's register profile, `T` the bus transport and `N`
/// the node capacity. Build one with [`GroupBuilder`](crate::config::GroupBuilder).
pub struct DeviceGroup<D, T, const N: usize> {
    label: &'static str,
    transport: T,
    pub(crate) nodes: NodeRegistry<D, N>,
    cursor: Cursor,
    outstanding: Option<Outstanding>,
    pub(crate) flags: SyncFlags,
    pub(crate) totals: Totals,
}

impl<D: RegisterProfile, T: Transport, const N: usize> DeviceGroup<D, T, N> {
    pub(crate) fn new(label: &'static str, transport: T, nodes: NodeRegistry<D, N>) -> Self {
        Self {
            label,
            transport,
            nodes,
            cursor: Cursor::default(),
            outstanding: None,
            flags: SyncFlags::new(),
            totals: Totals::default(),
        }
    }

    /// Advance the poll cycle by one step. Never blocks.
    pub fn poll(&mut self, now: Instant) -> PollStatus {
        let Some(outstanding) = self.outstanding else {
            return self.issue(now);
        };

        let completion = match self.transport.poll(now) {
            TransactionState::Pending => return PollStatus::Busy,
            TransactionState::Complete(completion) => completion,
            TransactionState::Idle => {
                warn!(
                    "{}: transport dropped the transaction for node {}",
                    self.label, outstanding.node
                );
                Completion::Timeout
            }
        };
        self.outstanding = None;
        let outcome = self.complete(outstanding, completion);
        self.advance(outcome)
    }

    /// Start the transaction for the slot under the cursor, or skip the slot if there is nothing to
    /// read.
    fn issue(&mut self, now: Instant) -> PollStatus {
        let Cursor { node: index, variable } = self.cursor;
        let Some(node) = self.nodes.get(index) else {
            return self.advance(Outcome::Skipped);
        };

        let spec = match node.device().register(variable) {
            Ok(spec) => spec,
            Err(err) => {
                trace!("{}: node {} skipped: {}", self.label, index, err);
                return self.advance(Outcome::Skipped);
            }
        };

        let address = node.address();
        self.transport.set_slave_address(address);
        match self
            .transport
            .read_input_registers(spec.address, spec.count, now)
        {
            Ok(()) => {
                debug!(
                    "{}: node {} (unit {}) read {:?} @{} x{}",
                    self.label, index, address, variable, spec.address, spec.count
                );
                self.outstanding = Some(Outstanding {
                    node: index,
                    variable,
                    scale: spec.scale,
                });
                PollStatus::Busy
            }
            Err(err) => {
                warn!(
                    "{}: node {} (unit {}) request failed: {:?}",
                    self.label, index, address, err
                );
                self.record_outcome(index, false);
                self.advance(Outcome::Timeout)
            }
        }
    }

    /// Transaction completion handler.
    fn complete(&mut self, outstanding: Outstanding, completion: Completion) -> Outcome {
        let Outstanding {
            node: index,
            variable,
            scale,
        } = outstanding;

        let low = match completion {
            Completion::Success => self.transport.response_register(0),
            Completion::Timeout => None,
        };
        let Some(low) = low else {
            warn!("{}: node {} {:?} timed out", self.label, index, variable);
            self.record_outcome(index, false);
            return Outcome::Timeout;
        };
        // Single register variables have no high word.
        let high = self.transport.response_register(1).unwrap_or(0);

        let raw = decode_register_pair(high, low);
        if let Some(node) = self.nodes.get_mut(index) {
            node.store(variable, Reading::new(raw, scale));
        }
        self.flags.set_variable(variable, true);
        self.record_outcome(index, true);
        Outcome::Success
    }

    /// Feed an outcome into the node's link health and flag any state change.
    fn record_outcome(&mut self, index: usize, success: bool) {
        let Some(node) = self.nodes.get_mut(index) else {
            return;
        };
        if let Some(transition) = node.record_outcome(success) {
            info!(
                "{}: node {} (unit {}) link {:?} -> {:?}",
                self.label,
                index,
                node.address(),
                transition.from,
                transition.to
            );
            self.flags.set_comm_status(true);
        }
    }

    /// Report the slot under the cursor as finished and move the cursor on.
    fn advance(&mut self, outcome: Outcome) -> PollStatus {
        let Cursor { node, variable } = self.cursor;
        self.cursor.variable = variable.next();
        if variable.is_last() {
            self.cursor.node = match self.nodes.len() {
                0 => 0,
                len => (node + 1) % len,
            };
        }
        PollStatus::Advance(Transaction {
            node,
            variable,
            outcome,
        })
    }

    /// Change the Modbus address of node `index`. Out of range indices and invalid addresses are
    /// rejected and leave the registry unchanged.
    pub fn set_node_address(&mut self, index: usize, address: u8) -> Result<(), ConfigError> {
        let address = validate_address(address).inspect_err(|err| {
            warn!("{}: node {}: {}", self.label, index, err);
        })?;
        if self.nodes.set_address(index, address) {
            Ok(())
        } else {
            Err(self.out_of_range(index))
        }
    }

    /// Change the device type of node `index`. Out of range indices are rejected.
    ///
    /// Populating or emptying a slot changes the totals, so both power flags are raised for the
    /// aggregator.
    pub fn set_node_type(&mut self, index: usize, device: D) -> Result<(), ConfigError> {
        let Some(was_populated) = self.nodes.get(index).map(Node::is_populated) else {
            return Err(self.out_of_range(index));
        };
        self.nodes.set_device(index, device);
        if device.is_populated() != was_populated {
            self.flags.set_active_power(true);
            self.flags.set_nominal_power(true);
        }
        Ok(())
    }

    fn out_of_range(&self, index: usize) -> ConfigError {
        let err = ConfigError::IndexOutOfRange {
            index,
            len: self.nodes.len(),
        };
        warn!("{}: {}", self.label, err);
        err
    }

    /// Response timeout for all transactions of this group.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.transport.set_timeout(timeout);
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Whether a transaction is outstanding.
    pub fn is_busy(&self) -> bool {
        self.outstanding.is_some()
    }

    pub fn node(&self, index: usize) -> Option<&Node<D>> {
        self.nodes.get(index)
    }

    pub fn nodes(&self) -> &NodeRegistry<D, N> {
        &self.nodes
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Pending new-data flags, not yet consumed by the aggregator.
    pub fn flags(&self) -> SyncFlags {
        self.flags
    }

    pub fn has_new_active_power(&self) -> bool {
        self.flags.active_power()
    }

    pub fn has_new_nominal_power(&self) -> bool {
        self.flags.nominal_power()
    }

    pub fn has_new_comm_status(&self) -> bool {
        self.flags.comm_status()
    }

    /// Totals as of the last aggregation.
    pub fn totals(&self) -> Totals {
        self.totals
    }
}
