// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Checkpoint attempt state machine with typed state transitions.
//!
//! Implements one attempt: Idle → PreparingPause → ClassifyingFds →
//! InvokingEngine → WaitingForRestoreSignal → Resumed → Idle, with
//! ReportingFailure on every path that ends without a checkpoint.
//! Invalid transitions result in StateTransitionError.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::StateTransitionError;

/// Checkpoint attempt states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointState {
    /// No attempt in flight.
    Idle,

    /// Collecting garbage and bringing mutators to a safepoint.
    PreparingPause,

    /// Building the descriptor ledger and judging every descriptor.
    ClassifyingFds,

    /// Attempt ends without a checkpoint; failures go back to the caller.
    ReportingFailure,

    /// External CR engine is running.
    InvokingEngine,

    /// Engine succeeded; blocked until the resumed image is signalled.
    WaitingForRestoreSignal,

    /// Running again after restore.
    Resumed,

    /// Parameters from the restoring side have been installed.
    ParametersApplied,

    /// No parameters arrived; restore anchors set to the current time.
    TimestampsReset,
}

impl CheckpointState {
    /// Get the state name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::PreparingPause => "PreparingPause",
            Self::ClassifyingFds => "ClassifyingFds",
            Self::ReportingFailure => "ReportingFailure",
            Self::InvokingEngine => "InvokingEngine",
            Self::WaitingForRestoreSignal => "WaitingForRestoreSignal",
            Self::Resumed => "Resumed",
            Self::ParametersApplied => "ParametersApplied",
            Self::TimestampsReset => "TimestampsReset",
        }
    }

    /// Check if transition to the target state is valid.
    pub fn can_transition_to(&self, target: CheckpointState) -> bool {
        matches!(
            (self, target),
            (Self::Idle, Self::PreparingPause) |
            (Self::PreparingPause, Self::ClassifyingFds) |
            // From ClassifyingFds
            (Self::ClassifyingFds, Self::InvokingEngine) |
            (Self::ClassifyingFds, Self::ReportingFailure) |
            (Self::ReportingFailure, Self::Idle) |
            // From InvokingEngine; Resumed directly when the engine is skipped
            (Self::InvokingEngine, Self::WaitingForRestoreSignal) |
            (Self::InvokingEngine, Self::ReportingFailure) |
            (Self::InvokingEngine, Self::Resumed) |
            (Self::WaitingForRestoreSignal, Self::Resumed) |
            (Self::WaitingForRestoreSignal, Self::ReportingFailure) |
            // From Resumed
            (Self::Resumed, Self::ParametersApplied) |
            (Self::Resumed, Self::TimestampsReset) |
            (Self::ParametersApplied, Self::Idle) |
            (Self::TimestampsReset, Self::Idle)
        )
    }
}

impl std::fmt::Display for CheckpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// State machine for one checkpoint attempt.
/// Enforces valid state transitions and records the path taken.
#[derive(Debug)]
pub struct CheckpointStateMachine {
    current_state: CheckpointState,
    last_transition: Instant,
    history: Vec<CheckpointState>,
}

impl CheckpointStateMachine {
    pub fn new() -> Self {
        Self {
            current_state: CheckpointState::Idle,
            last_transition: Instant::now(),
            history: vec![CheckpointState::Idle],
        }
    }

    pub fn state(&self) -> CheckpointState {
        self.current_state
    }

    /// Get time since last transition.
    pub fn time_in_current_state(&self) -> std::time::Duration {
        self.last_transition.elapsed()
    }

    /// Every state visited, starting with the initial Idle.
    pub fn history(&self) -> &[CheckpointState] {
        &self.history
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&mut self, target: CheckpointState) -> Result<(), StateTransitionError> {
        if !self.current_state.can_transition_to(target) {
            return Err(StateTransitionError::InvalidTransition {
                from: self.current_state.name(),
                to: target.name(),
            });
        }

        tracing::debug!(
            from = self.current_state.name(),
            to = target.name(),
            elapsed_us = self.last_transition.elapsed().as_micros() as u64,
            "Checkpoint state transition"
        );

        self.current_state = target;
        self.last_transition = Instant::now();
        self.history.push(target);

        Ok(())
    }

    /// Check if an attempt is in flight.
    pub fn is_busy(&self) -> bool {
        self.current_state != CheckpointState::Idle
    }
}

impl Default for CheckpointStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
