// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for crest.
//!
//! This module defines explicit enum error types as per coding guidelines.
//! No `Box<dyn Error>`, no `anyhow::Result` - all errors are strongly typed.
//!
//! Unrestorable descriptors are not errors: they are accumulated as
//! [`CheckpointFailure`](crate::fd::CheckpointFailure) records so that one
//! checkpoint report lists every offending resource.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for crest.
#[derive(Debug, Error)]
pub enum CrestError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Checkpoint Protocol Errors
    // =========================================================================
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Parameter channel error: {0}")]
    ParameterChannel(#[from] ParameterChannelError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Hard validation errors for configuration.
/// The process must not arm checkpointing with an invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Checkpoint directory is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("Cannot create checkpoint directory {path}: {reason}")]
    DirectoryUnusable { path: PathBuf, reason: String },
}

/// Checkpoint state machine errors.
#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("Cannot transition checkpoint attempt from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
}

/// Errors of the shared-memory parameter hand-off.
///
/// On the reading side these never escalate: the resumed process falls back
/// to its pre-checkpoint configuration.
#[derive(Debug, Error)]
pub enum ParameterChannelError {
    #[error("Failed to open shared memory segment {name}: {reason}")]
    OpenFailed { name: String, reason: String },

    #[error("Shared memory write failed: {reason}")]
    WriteFailed { reason: String },

    #[error("Shared memory write truncated: wrote {written} of {expected} bytes")]
    TruncatedWrite { expected: usize, written: usize },

    #[error("Shared memory read failed: {reason}")]
    ReadFailed { reason: String },

    #[error("Restore parameters are corrupt: {reason}")]
    Corrupt { reason: String },
}

/// Failures driving the external CR engine.
/// Always fatal to the attempt, never retried automatically.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("CR engine binary not found at {path}")]
    BinaryNotFound { path: PathBuf },

    #[error("Invalid CR engine name: {reason}")]
    InvalidEngine { reason: String },

    #[error("Failed to spawn CR engine: {reason}")]
    SpawnFailed { reason: String },

    #[error("CR engine exited with status {code}")]
    ExitStatus { code: i32 },

    #[error("CR engine terminated abnormally: {reason}")]
    AbnormalTermination { reason: String },

    #[error("Cannot execute \"{path} restore\": {source}")]
    ExecFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Violations of the restore-signal rendezvous.
#[derive(Debug, Error)]
pub enum SignalProtocolViolation {
    #[error("Failed to install restore signal mask: {reason}")]
    MaskFailed { reason: String },

    #[error("Waiting for restore signal failed: {reason}")]
    WaitFailed { reason: String },

    #[error("Invalid info for restore provided: not queued (code {code})")]
    NotQueued { code: i32 },

    #[error("Invalid info for restore provided: queued code {payload}")]
    InvalidPayload { payload: i32 },

    #[error("Failed to queue restore signal to pid {pid}: {reason}")]
    NotifyFailed { pid: i32, reason: String },
}

/// Errors that abort a checkpoint attempt.
///
/// Unrestorable descriptors are reported through
/// [`CheckpointOutcome::Failed`](crate::orchestrator::CheckpointOutcome)
/// instead, so the caller always sees the complete list.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint is not configured (no checkpoint directory)")]
    NotConfigured,

    #[error("Checkpoint directory error: {0}")]
    Directory(#[from] ConfigError),

    #[error("Engine invocation failed: {0}")]
    EngineInvocationFailed(#[from] EngineError),

    #[error("Restore signal protocol violation: {0}")]
    SignalProtocol(#[from] SignalProtocolViolation),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(#[from] StateTransitionError),
}

/// Result type alias using CrestError.
pub type CrestResult<T> = Result<T, CrestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingRequiredField {
            field: "engine",
            context: "checkpoint section".to_string(),
        };
        assert!(err.to_string().contains("engine"));
        assert!(err.to_string().contains("checkpoint section"));
    }

    #[test]
    fn test_error_chain() {
        let engine_err = EngineError::ExitStatus { code: 1 };
        let checkpoint_err: CheckpointError = engine_err.into();
        assert!(matches!(
            checkpoint_err,
            CheckpointError::EngineInvocationFailed(EngineError::ExitStatus { code: 1 })
        ));

        let crest_err: CrestError = checkpoint_err.into();
        assert!(matches!(crest_err, CrestError::Checkpoint(_)));
    }

    #[test]
    fn test_truncated_write_display() {
        let err = ParameterChannelError::TruncatedWrite {
            expected: 24,
            written: 10,
        };
        assert_eq!(
            err.to_string(),
            "Shared memory write truncated: wrote 10 of 24 bytes"
        );
    }
}
