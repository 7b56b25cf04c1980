//! Probe-counter health model for tag-described objects.
//!
//! Objects carry their health as tags: a `state:<name>` tag and, while a
//! streak is in progress, a `healthCheck=on;probesNOK:<n>` (active object
//! failing) or `healthCheck=on;probesOK:<n>` (unreachable object recovering)
//! tag. Each probe result moves the object through [`HealthCheckFunction`].

use std::collections::BTreeSet;

pub const STATE_ACTIVE: &str = "active";
pub const STATE_UNREACHABLE: &str = "unreachable";

const STATE_PREFIX: &str = "state:";
const HEALTH_PREFIX: &str = "healthCheck=";
const HEALTH_FAIL: &str = "healthCheck=on;probesNOK";
const HEALTH_SUCCESS: &str = "healthCheck=on;probesOK";

/// Health of one object as read from its tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectHealth {
    /// Serving traffic; counts consecutive failed probes.
    Active(u32),
    /// Out of rotation; counts consecutive successful probes.
    Unreachable(u32),
    /// Any other state. Not touched by health checking.
    Other(String),
}

impl ObjectHealth {
    pub fn state(&self) -> &str {
        match self {
            ObjectHealth::Active(_) => STATE_ACTIVE,
            ObjectHealth::Unreachable(_) => STATE_UNREACHABLE,
            ObjectHealth::Other(state) => state,
        }
    }

    /// The health tag value, or `None` when no streak is being counted.
    pub fn health(&self) -> Option<String> {
        match self {
            ObjectHealth::Active(n) if *n > 0 => Some(format!("{HEALTH_FAIL}:{n}")),
            ObjectHealth::Unreachable(n) if *n > 0 => Some(format!("{HEALTH_SUCCESS}:{n}")),
            _ => None,
        }
    }

    /// Decodes the state and health tag values.
    ///
    /// A missing state counts as unreachable; a counter that does not belong
    /// to the state is ignored.
    pub fn from_tags(state: Option<&str>, health: Option<&str>) -> Self {
        match state {
            Some(STATE_ACTIVE) => ObjectHealth::Active(counter(health, HEALTH_FAIL).unwrap_or(0)),
            Some(STATE_UNREACHABLE) | None => {
                ObjectHealth::Unreachable(counter(health, HEALTH_SUCCESS).unwrap_or(0))
            }
            Some(other) => ObjectHealth::Other(other.to_string()),
        }
    }

    /// Decodes from a full tag set.
    pub fn from_tag_set<'a, I>(tags: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut state = None;
        let mut health = None;
        for tag in tags {
            if let Some(value) = tag.strip_prefix(STATE_PREFIX) {
                state = Some(value);
            } else if tag.starts_with(HEALTH_PREFIX) {
                health = Some(tag);
            }
        }
        Self::from_tags(state, health)
    }
}

fn counter(health: Option<&str>, prefix: &str) -> Option<u32> {
    health?.strip_prefix(prefix)?.strip_prefix(':')?.parse().ok()
}

pub fn state_tag(state: &str) -> String {
    format!("{STATE_PREFIX}{state}")
}

pub fn is_state_tag(tag: &str) -> bool {
    tag.starts_with(STATE_PREFIX)
}

pub fn is_health_tag(tag: &str) -> bool {
    tag.starts_with(HEALTH_PREFIX)
}

/// Replaces the state and health tags with those of `health`, keeping every other tag.
pub fn retag(tags: &BTreeSet<String>, health: &ObjectHealth) -> BTreeSet<String> {
    tags.iter()
        .filter(|tag| !is_state_tag(tag) && !is_health_tag(tag))
        .cloned()
        .chain(std::iter::once(state_tag(health.state())))
        .chain(health.health())
        .collect()
}

/// State transition applied on every probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckFunction {
    active_threshold: u32,
    inactive_threshold: u32,
}

/// Builds the transition function.
///
/// An unreachable object becomes active after `active_threshold` consecutive
/// successes; an active object becomes unreachable after `inactive_threshold`
/// consecutive failures.
pub fn health_check_function(active_threshold: u32, inactive_threshold: u32) -> HealthCheckFunction {
    HealthCheckFunction {
        active_threshold,
        inactive_threshold,
    }
}

impl HealthCheckFunction {
    pub fn apply(&self, previous: &ObjectHealth, reachable: bool) -> ObjectHealth {
        match (previous, reachable) {
            (ObjectHealth::Unreachable(n), true) => {
                let streak = n.saturating_add(1);
                if streak < self.active_threshold {
                    ObjectHealth::Unreachable(streak)
                } else {
                    ObjectHealth::Active(0)
                }
            }
            (ObjectHealth::Unreachable(_), false) => ObjectHealth::Unreachable(0),
            (ObjectHealth::Active(n), false) => {
                let streak = n.saturating_add(1);
                if streak < self.inactive_threshold {
                    ObjectHealth::Active(streak)
                } else {
                    ObjectHealth::Unreachable(0)
                }
            }
            (ObjectHealth::Active(_), true) => ObjectHealth::Active(0),
            (ObjectHealth::Other(_), _) => previous.clone(),
        }
    }
}
