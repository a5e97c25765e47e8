//! Communication health of a single node.
//!
//! A hysteresis filter over transaction outcomes. A node has to fail repeatedly before it is
//! reported disconnected, and a disconnected node has to pass back through [`LinkState::Timeout`]
//! before it is reported connected again.

/// Error count at which a node in [`LinkState::Timeout`] becomes [`LinkState::Connected`].
pub const MIN_COMM_ERRORS: u8 = 0;
/// Error count at which a node in [`LinkState::Timeout`] becomes [`LinkState::Disconnected`].
pub const MAX_COMM_ERRORS: u8 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Disconnected,
    Timeout,
    Connected,
}

/// A state change produced by one transaction outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: LinkState,
    pub to: LinkState,
}

/// Link state plus the saturating error counter driving it.
///
/// The counter is kept within [`MIN_COMM_ERRORS`]..=[`MAX_COMM_ERRORS`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkHealth {
    state: LinkState,
    errors: u8,
}

impl LinkHealth {
    pub const fn new() -> Self {
        Self {
            state: LinkState::Disconnected,
            errors: 0,
        }
    }

    pub const fn state(&self) -> LinkState {
        self.state
    }

    pub const fn error_count(&self) -> u8 {
        self.errors
    }

    /// Feed one transaction outcome. Returns the transition if the state changed.
    pub fn record(&mut self, success: bool) -> Option<Transition> {
        let from = self.state;
        match (self.state, success) {
            (LinkState::Connected, true) => {}
            // A single miss leaves the connected state straight away.
            (LinkState::Connected, false) => {
                self.errors = self.errors.saturating_add(1).min(MAX_COMM_ERRORS);
                self.state = LinkState::Timeout;
            }
            (LinkState::Timeout, true) => {
                self.errors = self.errors.saturating_sub(1);
                if self.errors == MIN_COMM_ERRORS {
                    self.state = LinkState::Connected;
                }
            }
            (LinkState::Timeout, false) => {
                self.errors = self.errors.saturating_add(1).min(MAX_COMM_ERRORS);
                if self.errors == MAX_COMM_ERRORS {
                    self.state = LinkState::Disconnected;
                }
            }
            (LinkState::Disconnected, true) => {
                self.errors = self.errors.saturating_sub(1);
                self.state = LinkState::Timeout;
            }
            (LinkState::Disconnected, false) => {}
        }

        (from != self.state).then_some(Transition {
            from,
            to: self.state,
        })
    }
}
