//! Per-origin state machine.

use std::fmt;

/// Whether an origin is eligible for traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OriginState {
    /// Eligible for traffic.
    Active,
    /// Failed its health checks; still monitored.
    Inactive,
    /// Taken out by an operator; not monitored.
    Disabled,
}

impl OriginState {
    /// Value reported by the `origin_status` gauge.
    pub fn gauge_value(self) -> i64 {
        match self {
            OriginState::Active => 1,
            OriginState::Inactive => 0,
            OriginState::Disabled => -1,
        }
    }

    /// Next state for an event, or `None` when the event does not apply here.
    pub fn on(self, event: OriginEvent) -> Option<OriginState> {
        use OriginEvent::*;
        use OriginState::*;

        match (self, event) {
            (Active, Unhealthy) => Some(Inactive),
            (Active, Disable) => Some(Disabled),
            (Inactive, Healthy) => Some(Active),
            (Inactive, Disable) => Some(Disabled),
            (Disabled, Enable) => Some(Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for OriginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OriginState::Active => "ACTIVE",
            OriginState::Inactive => "INACTIVE",
            OriginState::Disabled => "DISABLED",
        };
        f.write_str(name)
    }
}

/// Events that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginEvent {
    Healthy,
    Unhealthy,
    Disable,
    Enable,
}

/// A state change produced by applying an event.
///
/// The caller applies the side effects: gauge update, monitoring changes
/// and listener notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: OriginState,
    pub to: OriginState,
}

impl Transition {
    /// Monitoring stops when an origin is disabled.
    pub fn stops_monitoring(&self) -> bool {
        self.to == OriginState::Disabled
    }

    /// Monitoring resumes when an origin leaves the disabled state.
    pub fn starts_monitoring(&self) -> bool {
        self.from == OriginState::Disabled && self.to != OriginState::Disabled
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}
