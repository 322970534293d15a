// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Crest Core Library
//!
//! Checkpoint/restore orchestration for a running process. Prepares the
//! process for an external CR engine: enumerates and judges every open
//! descriptor, drives the engine and the restore-signal rendezvous, and
//! carries arguments, properties and the environment across the restore
//! through shared memory.

pub mod clock;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod fd;
pub mod orchestrator;
pub mod persistent;
pub mod runtime;
pub mod shm;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use config::{CheckpointConfig, Config, ConfigLoader, RuntimeConfig};
pub use context::{deregister_persistent_fd, register_persistent_fd, CheckpointContext};
pub use engine::{CrEngine, EngineHandshake, RestoreSignal, ResumeNotifier, ResumeToken};
pub use error::{
    CheckpointError, ConfigError, CrestError, CrestResult, EngineError, ParameterChannelError,
    SignalProtocolViolation, StateTransitionError,
};
pub use fd::{CheckpointFailure, FailureKind, FdLedger, FdState};
pub use orchestrator::{CheckpointOrchestrator, CheckpointOutcome, RestoredState};
pub use persistent::{PersistentResource, PersistentResourceRegistry};
pub use runtime::{ManagedRuntime, StandaloneRuntime};
pub use shm::{RestoreParameters, ShmSegment};
pub use state::{CheckpointState, CheckpointStateMachine};
pub use types::{FileIdentity, FileKind, ShmId};
