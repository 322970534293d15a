// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CheckpointOrchestrator - sequences one checkpoint attempt.
//!
//! Collect garbage, pause mutators, snapshot and judge every descriptor,
//! then either report the failures or hand the process to the CR engine and
//! wait for it to come back. After resume, parameters from the restoring side
//! are applied or the restore anchors are reset to the current time.

use std::os::unix::io::RawFd;

use serde::Serialize;

use crate::clock::monotonic_nanos;
use crate::context::CheckpointContext;
use crate::engine::{EngineHandshake, RestoreSignal, ResumeNotifier, ResumeToken};
use crate::error::CheckpointError;
use crate::fd::{
    classify, CheckpointFailure, ClassificationPolicy, ClassificationReport, ControlSocketPredicate,
    FdLedger, SocketTables,
};
use crate::runtime::ManagedRuntime;
use crate::shm::{RestoreParameters, ShmSegment};
use crate::state::{CheckpointState, CheckpointStateMachine};
use crate::types::ShmId;

static RESTORE_SIGNAL: RestoreSignal = RestoreSignal;

/// What the resumed process should re-apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoredState {
    /// New command line, when parameters were handed over.
    pub new_args: Option<String>,
    /// New `key=value` system properties.
    pub new_properties: Vec<String>,
}

/// Result of an attempt that did not hit a hard error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckpointOutcome {
    /// The process was checkpointed and is running again.
    Restored(RestoredState),
    /// No checkpoint was taken. Always returned by a dry run.
    Failed { failures: Vec<CheckpointFailure> },
}

impl CheckpointOutcome {
    pub fn is_restored(&self) -> bool {
        matches!(self, Self::Restored(_))
    }

    pub fn failures(&self) -> &[CheckpointFailure] {
        match self {
            Self::Restored(_) => &[],
            Self::Failed { failures } => failures,
        }
    }
}

/// Drives checkpoint attempts of the process hosting `runtime`.
pub struct CheckpointOrchestrator<'a, R: ManagedRuntime> {
    context: &'a CheckpointContext,
    runtime: &'a R,
    notifier: &'a dyn ResumeNotifier,
    control_socket: Option<&'a ControlSocketPredicate<'a>>,
}

impl<'a, R: ManagedRuntime> CheckpointOrchestrator<'a, R> {
    /// Orchestrator waiting for the restore signal.
    pub fn new(context: &'a CheckpointContext, runtime: &'a R) -> Self {
        Self {
            context,
            runtime,
            notifier: &RESTORE_SIGNAL,
            control_socket: None,
        }
    }

    /// Wait for the resume through `notifier` instead of the restore signal.
    pub fn with_notifier(mut self, notifier: &'a dyn ResumeNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Exempt the control socket of the in-flight request.
    pub fn with_control_socket(mut self, predicate: &'a ControlSocketPredicate<'a>) -> Self {
        self.control_socket = Some(predicate);
        self
    }

    /// Run one checkpoint attempt.
    ///
    /// A dry run classifies and returns every failure without calling the
    /// engine. A real run with failures aborts unless failures are ignored.
    /// Engine and signal errors abort the attempt with an error.
    pub fn checkpoint(&self, dry_run: bool) -> Result<CheckpointOutcome, CheckpointError> {
        let config = self.context.config();
        let dir = self.context.ensure_checkpoint_dir()?;

        let mut sm = CheckpointStateMachine::new();
        sm.transition_to(CheckpointState::PreparingPause)?;

        tracing::info!(dir = %dir.display(), dry_run, "Checkpoint requested");

        self.runtime.collect_garbage(true);

        let report = self.runtime.at_safepoint(|| -> Result<ClassificationReport, CheckpointError> {
            sm.transition_to(CheckpointState::ClassifyingFds)?;
            Ok(self.classify())
        })?;

        if dry_run {
            return Self::report(&mut sm, report.failures);
        }

        if !report.is_clean() {
            if config.heap_dump_on_failure {
                self.runtime.dump_heap();
            }
            if !config.ignore_failures {
                return Self::report(&mut sm, report.failures);
            }
            tracing::warn!(
                failures = report.failures.len(),
                "Proceeding with checkpoint despite unrestorable resources"
            );
        }

        sm.transition_to(CheckpointState::InvokingEngine)?;

        let token = if config.skip_engine {
            tracing::info!("Skip checkpoint");
            sm.transition_to(CheckpointState::Resumed)?;
            ResumeToken { shm_id: None }
        } else {
            let token = self
                .run_engine(&mut sm, dir)
                .or_else(|e| Self::abort(&mut sm, e))?;
            if config.trace_startup_time {
                tracing::info!("STARTUPTIME {} restore-native", monotonic_nanos());
            }
            sm.transition_to(CheckpointState::Resumed)?;
            token
        };

        let restored = match token.shm_id.and_then(read_parameters) {
            Some(params) => {
                params.apply_environment();
                self.context
                    .clock()
                    .set(params.restore_time_ms, params.restore_counter_ns);
                sm.transition_to(CheckpointState::ParametersApplied)?;
                RestoredState {
                    new_args: Some(params.args),
                    new_properties: params.properties,
                }
            }
            None => {
                self.context.clock().reset_to_now();
                sm.transition_to(CheckpointState::TimestampsReset)?;
                RestoredState::default()
            }
        };
        sm.transition_to(CheckpointState::Idle)?;

        tracing::info!(
            parameters = restored.new_args.is_some(),
            properties = restored.new_properties.len(),
            "Resumed after checkpoint"
        );

        Ok(CheckpointOutcome::Restored(restored))
    }

    /// Build the ledger and judge it. Runs at the safepoint.
    fn classify(&self) -> ClassificationReport {
        let mut ledger = FdLedger::build();
        ledger.mark_classpath(&self.runtime.boot_classpath());
        ledger.mark_classpath(&self.runtime.app_classpath());
        ledger.mark_extension_dirs(&self.runtime.extension_dirs());
        ledger.mark_persistent(&self.context.persistent().take());

        let mut policy = ClassificationPolicy::new(self.context.inherited_fds())
            .with_sockets(SocketTables::load())
            .with_print_resources(self.context.config().print_resources);
        if let Some(predicate) = self.control_socket {
            policy = policy.with_control_socket(predicate);
        }

        classify(&ledger, &policy)
    }

    fn run_engine(
        &self,
        sm: &mut CheckpointStateMachine,
        dir: &std::path::Path,
    ) -> Result<ResumeToken, CheckpointError> {
        let engine = self.context.engine()?;
        let handshake = EngineHandshake::new(&engine, self.notifier);
        handshake.checkpoint(dir)?;
        sm.transition_to(CheckpointState::WaitingForRestoreSignal)?;
        handshake.wait_for_resume()
    }

    fn report(
        sm: &mut CheckpointStateMachine,
        failures: Vec<CheckpointFailure>,
    ) -> Result<CheckpointOutcome, CheckpointError> {
        for failure in &failures {
            tracing::warn!(fd = failure.fd, kind = %failure.kind, "Unrestorable resource: {}", failure.message);
        }
        sm.transition_to(CheckpointState::ReportingFailure)?;
        sm.transition_to(CheckpointState::Idle)?;
        Ok(CheckpointOutcome::Failed { failures })
    }

    fn abort<T>(sm: &mut CheckpointStateMachine, err: CheckpointError) -> Result<T, CheckpointError> {
        tracing::error!(error = %err, state = sm.state().name(), "Checkpoint aborted");
        if sm.state().can_transition_to(CheckpointState::ReportingFailure) {
            sm.transition_to(CheckpointState::ReportingFailure)?;
            sm.transition_to(CheckpointState::Idle)?;
        }
        Err(err)
    }
}

/// Read and parse the parameters of segment `id`. Failures fall back to the
/// pre-checkpoint configuration.
fn read_parameters(id: ShmId) -> Option<RestoreParameters> {
    let parsed = ShmSegment::open_and_unlink(id.value())
        .and_then(|mut segment| RestoreParameters::read_from(&mut segment));
    match parsed {
        Ok(params) => Some(params),
        Err(e) => {
            tracing::warn!(shm_id = id.value(), error = %e, "Ignoring restore parameters");
            None
        }
    }
}

/// Control-socket predicate matching one known descriptor.
pub fn is_descriptor(expected: RawFd) -> impl Fn(RawFd) -> bool {
    move |fd| fd == expected
}
