//! Registry of the nodes of one device group.
//!
//! Nodes are created once, when the group is built, and are never removed. Their address and device
//! type can be changed at runtime.

use crate::{
    health::{LinkHealth, LinkState, Transition},
    profile::{RegisterProfile, Variable},
    scaling::Scale,
};

/// Last successfully decoded value of one variable, together with the scale of the profile that
/// produced it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Reading {
    raw: u32,
    scale: Scale,
}

impl Reading {
    pub const fn new(raw: u32, scale: Scale) -> Self {
        Self { raw, scale }
    }

    /// Decoded register value before scaling.
    pub const fn raw(&self) -> u32 {
        self.raw
    }

    /// Value in kW.
    pub fn value(&self) -> f32 {
        self.scale.apply(self.raw)
    }
}

/// One field device on the bus.
#[derive(Debug, Clone)]
pub struct Node<D> {
    address: u8,
    device: D,
    active_power: Reading,
    nominal_power: Reading,
    link: LinkHealth,
    /// Link state changed since the last aggregation.
    link_changed: bool,
}

impl<D: RegisterProfile> Node<D> {
    fn new(address: u8) -> Self {
        Self {
            address,
            device: D::default(),
            active_power: Reading::default(),
            nominal_power: Reading::default(),
            link: LinkHealth::new(),
            link_changed: false,
        }
    }

    /// Modbus unit id.
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn device(&self) -> D {
        self.device
    }

    pub fn is_populated(&self) -> bool {
        self.device.is_populated()
    }

    pub fn reading(&self, variable: Variable) -> Reading {
        match variable {
            Variable::ActivePower => self.active_power,
            Variable::NominalPower => self.nominal_power,
        }
    }

    /// Active power in kW.
    pub fn active_power(&self) -> f32 {
        self.active_power.value()
    }

    /// Nominal power in kW.
    pub fn nominal_power(&self) -> f32 {
        self.nominal_power.value()
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    pub fn link_health(&self) -> LinkHealth {
        self.link
    }

    pub(crate) fn store(&mut self, variable: Variable, reading: Reading) {
        match variable {
            Variable::ActivePower => self.active_power = reading,
            Variable::NominalPower => self.nominal_power = reading,
        }
    }

    pub(crate) fn record_outcome(&mut self, success: bool) -> Option<Transition> {
        let transition = self.link.record(success);
        if transition.is_some() {
            self.link_changed = true;
        }
        transition
    }

    pub(crate) fn link_changed(&self) -> bool {
        self.link_changed
    }

    pub(crate) fn acknowledge_link_change(&mut self) {
        self.link_changed = false;
    }
}

/// Fixed capacity set of nodes, `len()` of which are in use.
#[derive(Debug)]
pub struct NodeRegistry<D, const N: usize> {
    nodes: heapless::Vec<Node<D>, N>,
}

impl<D: RegisterProfile, const N: usize> NodeRegistry<D, N> {
    /// Create `count` nodes (at most `N`) with sequential addresses starting at `first_address`.
    ///
    /// All nodes start with no device, no readings and a disconnected link.
    pub fn new(count: usize, first_address: u8) -> Self {
        let mut nodes = heapless::Vec::new();
        for i in 0..count.min(N) {
            let address = first_address.wrapping_add(i as u8);
            if nodes.push(Node::new(address)).is_err() {
                break;
            }
        }
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn get(&self, index: usize) -> Option<&Node<D>> {
        self.nodes.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Node<D>> {
        self.nodes.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node<D>> {
        self.nodes.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node<D>> {
        self.nodes.iter_mut()
    }

    /// Sum of `variable` in kW over all populated nodes.
    pub fn total(&self, variable: Variable) -> f32 {
        self.nodes
            .iter()
            .filter(|node| node.is_populated())
            .map(|node| node.reading(variable).value())
            .sum()
    }

    pub(crate) fn set_address(&mut self, index: usize, address: u8) -> bool {
        match self.nodes.get_mut(index) {
            Some(node) => {
                node.address = address;
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_device(&mut self, index: usize, device: D) -> bool {
        match self.nodes.get_mut(index) {
            Some(node) => {
                node.device = device;
                true
            }
            None => false,
        }
    }
}
