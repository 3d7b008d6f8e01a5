//! Worker lifecycle
//!
//! A worker moves through installing → waiting → active → redundant.
//! Only an active worker intercepts requests.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::error::CoreError;

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Install in progress, required assets being cached
    Installing,
    /// Installed, waiting to take over
    Waiting,
    /// Activated and controlling every client
    Active,
    /// Failed to install or replaced
    Redundant,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Installing => "installing",
            WorkerState::Waiting => "waiting",
            WorkerState::Active => "active",
            WorkerState::Redundant => "redundant",
        }
    }

    /// Check if this state allows fetch interception
    pub fn can_intercept(&self) -> bool {
        matches!(self, WorkerState::Active)
    }

    fn can_transition_to(&self, next: WorkerState) -> bool {
        matches!(
            (self, next),
            (WorkerState::Installing, WorkerState::Waiting)
                | (WorkerState::Waiting, WorkerState::Active)
                | (_, WorkerState::Redundant)
        ) && *self != WorkerState::Redundant
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle bookkeeping for a worker
#[derive(Debug, Clone, Serialize)]
pub struct Lifecycle {
    pub state: WorkerState,
    pub version: String,
    /// Set once the worker has taken over all clients
    pub clients_claimed: bool,
    pub installed_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
}

impl Lifecycle {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            state: WorkerState::Installing,
            version: version.into(),
            clients_claimed: false,
            installed_at: None,
            activated_at: None,
        }
    }

    /// Move to the next state
    pub fn transition(&mut self, next: WorkerState) -> Result<(), CoreError> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidState(format!("{} -> {}", self.state, next)));
        }

        match next {
            WorkerState::Waiting => self.installed_at = Some(Utc::now()),
            WorkerState::Active => {
                self.activated_at = Some(Utc::now());
                self.clients_claimed = true;
            }
            WorkerState::Redundant => self.clients_claimed = false,
            WorkerState::Installing => {}
        }

        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut lifecycle = Lifecycle::new("v1");
        assert_eq!(lifecycle.state, WorkerState::Installing);
        assert!(!lifecycle.state.can_intercept());

        lifecycle.transition(WorkerState::Waiting).unwrap();
        assert!(lifecycle.installed_at.is_some());
        assert!(!lifecycle.state.can_intercept());

        lifecycle.transition(WorkerState::Active).unwrap();
        assert!(lifecycle.clients_claimed);
        assert!(lifecycle.state.can_intercept());

        lifecycle.transition(WorkerState::Redundant).unwrap();
        assert!(!lifecycle.clients_claimed);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut lifecycle = Lifecycle::new("v1");
        assert!(lifecycle.transition(WorkerState::Active).is_err());

        lifecycle.transition(WorkerState::Redundant).unwrap();
        assert!(lifecycle.transition(WorkerState::Waiting).is_err());
        assert!(lifecycle.transition(WorkerState::Redundant).is_err());
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&WorkerState::Active).unwrap();
        assert_eq!(json, "\"active\"");
    }
}
