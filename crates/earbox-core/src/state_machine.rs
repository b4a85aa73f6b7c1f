//! Orchestration state machine
//!
//! One invocation starts at `NoTarget`, moves to `Launching` or `Resolving`,
//! then to `Ready` or a failure, and from `Ready` to one action outcome.
//! Every state after that is terminal.

use crate::error::StateMachineError;
use crate::types::InstanceState;

/// Validates an orchestration state transition.
pub fn validate_transition(from: InstanceState, to: InstanceState) -> Result<(), StateMachineError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition { from, to })
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: InstanceState) -> Vec<InstanceState> {
    use InstanceState::*;
    match from {
        NoTarget => vec![Launching, Resolving],
        Launching => vec![Ready, LaunchFailed],
        Resolving => vec![Ready, NotFound],
        Ready => vec![JobDispatched, BootstrapReplayed, DispatchFailed],
        NotFound => vec![],
        LaunchFailed => vec![],
        JobDispatched => vec![],
        BootstrapReplayed => vec![],
        DispatchFailed => vec![],
    }
}

/// Whether no transition leaves `state`
#[must_use]
pub fn is_terminal(state: InstanceState) -> bool {
    allowed_transitions(state).is_empty()
}

fn allowed(from: InstanceState, to: InstanceState) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}

/// Current state of one invocation plus every state it passed through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    trace: Vec<InstanceState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Start at `NoTarget`
    #[must_use]
    pub fn new() -> Self {
        Self {
            trace: vec![InstanceState::NoTarget],
        }
    }

    /// Latest state
    #[must_use]
    pub fn current(&self) -> InstanceState {
        self.trace
            .last()
            .copied()
            .unwrap_or(InstanceState::NoTarget)
    }

    /// Move to `to`, rejecting transitions outside the table
    pub fn advance(&mut self, to: InstanceState) -> Result<(), StateMachineError> {
        validate_transition(self.current(), to)?;
        self.trace.push(to);
        Ok(())
    }

    /// Every state so far, oldest first
    #[must_use]
    pub fn trace(&self) -> &[InstanceState] {
        &self.trace
    }

    /// Consume into the state trace
    #[must_use]
    pub fn into_trace(self) -> Vec<InstanceState> {
        self.trace
    }
}
