//! Per-resource lifecycle
//!
//! `pending -> in-flight -> realized | failed`, plus `pending -> skipped`
//! for resources that never start.

use crate::error::StateMachineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one resource within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceState {
    /// Waiting for dependencies
    Pending,
    /// Creation call issued
    InFlight,
    /// Created; runtime attributes published
    Realized,
    /// Creation failed
    Failed,
    /// Never started: blocked by a failure, halted by policy, or aborted
    Skipped,
}

impl ResourceState {
    /// No further transition is possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Realized | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InFlight => "in-flight",
            Self::Realized => "realized",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Validates a state transition.
///
/// # Errors
/// `IllegalTransition` when `to` is not reachable from `from`.
pub fn validate_transition(from: ResourceState, to: ResourceState) -> Result<(), StateMachineError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition { from, to })
    }
}

/// States reachable from `from` in one step; empty for terminal states
#[must_use]
pub fn allowed_transitions(from: ResourceState) -> &'static [ResourceState] {
    use ResourceState::*;
    match from {
        Pending => &[InFlight, Skipped],
        InFlight => &[Realized, Failed],
        Realized | Failed | Skipped => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ResourceState::*;

    #[test]
    fn happy_path_and_failure_path() {
        assert!(validate_transition(Pending, InFlight).is_ok());
        assert!(validate_transition(InFlight, Realized).is_ok());
        assert!(validate_transition(InFlight, Failed).is_ok());
        assert!(validate_transition(Pending, Skipped).is_ok());
    }

    #[test]
    fn no_shortcuts_or_reentry() {
        assert!(validate_transition(Pending, Realized).is_err());
        assert!(validate_transition(InFlight, Skipped).is_err());
        assert!(validate_transition(Realized, InFlight).is_err());
        assert!(validate_transition(Failed, Pending).is_err());
        for s in [Realized, Failed, Skipped] {
            assert!(s.is_terminal());
            assert!(allowed_transitions(s).is_empty());
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for state in [Pending, InFlight, Realized, Failed, Skipped] {
            assert_eq!(allowed_transitions(state).is_empty(), state.is_terminal(), "{state}");
        }
    }
}
