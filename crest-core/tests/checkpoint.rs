// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! End-to-end checkpoint attempts with a shell-script CR engine.
//!
//! The engine records its arguments into a marker file, so a missing marker
//! proves the engine never ran. The restore signal is replaced by a scripted
//! notifier. Tests hold CHECKPOINT_LOCK because classification reads the
//! process-wide descriptor table.

use std::cell::Cell;
use std::fs::File;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crest_core::engine::{ResumeNotifier, ResumeToken};
use crest_core::error::{CheckpointError, EngineError, SignalProtocolViolation};
use crest_core::fd::FailureKind;
use crest_core::shm::{RestoreParameters, ShmSegment};
use crest_core::{
    CheckpointConfig, CheckpointContext, CheckpointOrchestrator, CheckpointOutcome,
    ManagedRuntime, RestoredState, ShmId,
};
use tempfile::TempDir;

static CHECKPOINT_LOCK: Mutex<()> = Mutex::new(());

fn lock() -> MutexGuard<'static, ()> {
    CHECKPOINT_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runtime double recording what the orchestrator asked of it.
#[derive(Default)]
struct TestRuntime {
    classpath: String,
    collections: AtomicUsize,
    safepoints: AtomicUsize,
    heap_dumps: AtomicUsize,
}

impl ManagedRuntime for TestRuntime {
    fn collect_garbage(&self, discard_unused_caches: bool) {
        assert!(discard_unused_caches);
        self.collections.fetch_add(1, Ordering::SeqCst);
    }

    fn at_safepoint<T, F: FnOnce() -> T>(&self, op: F) -> T {
        self.safepoints.fetch_add(1, Ordering::SeqCst);
        op()
    }

    fn boot_classpath(&self) -> String {
        String::new()
    }

    fn app_classpath(&self) -> String {
        self.classpath.clone()
    }

    fn extension_dirs(&self) -> String {
        String::new()
    }

    fn system_properties(&self) -> Vec<String> {
        vec![]
    }

    fn command_line(&self) -> String {
        "test".to_string()
    }

    fn dump_heap(&self) {
        self.heap_dumps.fetch_add(1, Ordering::SeqCst);
    }
}

/// Notifier answering with a fixed result and counting waits.
struct ScriptedNotifier {
    result: fn() -> Result<ResumeToken, SignalProtocolViolation>,
    waits: Cell<usize>,
}

impl ScriptedNotifier {
    fn new(result: fn() -> Result<ResumeToken, SignalProtocolViolation>) -> Self {
        Self {
            result,
            waits: Cell::new(0),
        }
    }

    fn resumed_without_parameters() -> Self {
        Self::new(|| Ok(ResumeToken { shm_id: None }))
    }
}

impl ResumeNotifier for ScriptedNotifier {
    fn wait_for_resume(&self) -> Result<ResumeToken, SignalProtocolViolation> {
        self.waits.set(self.waits.get() + 1);
        (self.result)()
    }
}

struct Fixture {
    tmp: TempDir,
    marker: PathBuf,
}

impl Fixture {
    /// Fixture whose engine exits with `status`.
    fn new(status: i32) -> Self {
        let tmp = TempDir::new().unwrap();
        let marker = tmp.path().join("engine-called");
        let engine = tmp.path().join("criuengine");
        std::fs::write(
            &engine,
            format!(
                "#!/bin/sh\necho \"$@\" > {}\nexit {}\n",
                marker.display(),
                status
            ),
        )
        .unwrap();
        std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { tmp, marker }
    }

    fn config(&self) -> CheckpointConfig {
        let mut config = CheckpointConfig::new(self.tmp.path().join("cr"), "criuengine");
        config.engine_dir = Some(self.tmp.path().to_path_buf());
        config
    }

    /// Context treating every descriptor open right now as inherited.
    fn context(&self, config: CheckpointConfig) -> CheckpointContext {
        let context = CheckpointContext::new(config);
        context.record_inherited_fds();
        context
    }

    fn engine_called(&self) -> bool {
        self.marker.exists()
    }

    fn engine_args(&self) -> String {
        std::fs::read_to_string(&self.marker).unwrap().trim().to_string()
    }
}

fn unique_shm_id(salt: i32) -> i32 {
    (std::process::id() as i32 & 0x00ff_ffff) * 16 + salt
}

#[test]
fn test_not_configured() {
    let _guard = lock();
    let context = CheckpointContext::new(CheckpointConfig::disabled());
    let runtime = TestRuntime::default();

    let result = CheckpointOrchestrator::new(&context, &runtime).checkpoint(true);
    assert!(matches!(result, Err(CheckpointError::NotConfigured)));
    assert_eq!(runtime.collections.load(Ordering::SeqCst), 0);
}

#[test]
fn test_dry_run_never_invokes_engine() {
    let _guard = lock();
    let fixture = Fixture::new(0);
    let context = fixture.context(fixture.config());
    let runtime = TestRuntime::default();
    let notifier = ScriptedNotifier::resumed_without_parameters();

    let outcome = CheckpointOrchestrator::new(&context, &runtime)
        .with_notifier(&notifier)
        .checkpoint(true)
        .unwrap();

    assert_eq!(outcome, CheckpointOutcome::Failed { failures: vec![] });
    assert!(!fixture.engine_called());
    assert_eq!(notifier.waits.get(), 0);
    assert_eq!(runtime.collections.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.safepoints.load(Ordering::SeqCst), 1);
    assert!(fixture.tmp.path().join("cr").is_dir());
}

#[test]
fn test_dry_run_reports_every_failure() {
    let _guard = lock();
    let fixture = Fixture::new(0);
    let context = fixture.context(fixture.config());
    let runtime = TestRuntime::default();

    let first = tempfile::tempfile().unwrap();
    let second = tempfile::tempfile().unwrap();

    let outcome = CheckpointOrchestrator::new(&context, &runtime)
        .checkpoint(true)
        .unwrap();

    let fds: Vec<_> = outcome.failures().iter().map(|f| f.fd).collect();
    let mut expected = vec![first.as_raw_fd(), second.as_raw_fd()];
    expected.sort_unstable();
    assert_eq!(fds, expected);
    assert!(!fixture.engine_called());
}

#[test]
fn test_deleted_file_blocks_checkpoint() {
    let _guard = lock();
    let fixture = Fixture::new(0);
    let mut config = fixture.config();
    config.heap_dump_on_failure = true;
    let context = fixture.context(config);
    let runtime = TestRuntime::default();
    let notifier = ScriptedNotifier::resumed_without_parameters();

    let deleted = tempfile::tempfile().unwrap();

    let outcome = CheckpointOrchestrator::new(&context, &runtime)
        .with_notifier(&notifier)
        .checkpoint(false)
        .unwrap();

    let failures = outcome.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].fd, deleted.as_raw_fd());
    assert_eq!(failures[0].kind, FailureKind::FileLike);
    assert!(failures[0].message.contains("(deleted)"));

    assert!(!fixture.engine_called());
    assert_eq!(notifier.waits.get(), 0);
    assert_eq!(runtime.heap_dumps.load(Ordering::SeqCst), 1);
    assert_eq!(context.restore_start_time(), None);
}

#[test]
fn test_ignore_failures_proceeds() {
    let _guard = lock();
    let fixture = Fixture::new(0);
    let mut config = fixture.config();
    config.ignore_failures = true;
    let context = fixture.context(config);
    let runtime = TestRuntime::default();
    let notifier = ScriptedNotifier::resumed_without_parameters();

    let _deleted = tempfile::tempfile().unwrap();

    let outcome = CheckpointOrchestrator::new(&context, &runtime)
        .with_notifier(&notifier)
        .checkpoint(false)
        .unwrap();

    assert!(outcome.is_restored());
    assert!(fixture.engine_called());
    assert_eq!(notifier.waits.get(), 1);
}

#[test]
fn test_engine_failure_aborts_before_wait() {
    let _guard = lock();
    let fixture = Fixture::new(1);
    let context = fixture.context(fixture.config());
    let runtime = TestRuntime::default();
    let notifier = ScriptedNotifier::resumed_without_parameters();

    let result = CheckpointOrchestrator::new(&context, &runtime)
        .with_notifier(&notifier)
        .checkpoint(false);

    assert!(matches!(
        result,
        Err(CheckpointError::EngineInvocationFailed(EngineError::ExitStatus { code: 1 }))
    ));
    assert!(fixture.engine_called());
    assert_eq!(notifier.waits.get(), 0);
    assert_eq!(context.restore_start_time(), None);
}

#[test]
fn test_missing_engine_aborts() {
    let _guard = lock();
    let fixture = Fixture::new(0);
    let mut config = fixture.config();
    config.engine = "no-such-engine".to_string();
    let context = fixture.context(config);
    let runtime = TestRuntime::default();
    let notifier = ScriptedNotifier::resumed_without_parameters();

    let result = CheckpointOrchestrator::new(&context, &runtime)
        .with_notifier(&notifier)
        .checkpoint(false);

    assert!(matches!(
        result,
        Err(CheckpointError::EngineInvocationFailed(EngineError::BinaryNotFound { .. }))
    ));
    assert_eq!(notifier.waits.get(), 0);
}

#[test]
fn test_signal_violation_is_fatal() {
    let _guard = lock();
    let fixture = Fixture::new(0);
    let context = fixture.context(fixture.config());
    let runtime = TestRuntime::default();
    let notifier =
        ScriptedNotifier::new(|| Err(SignalProtocolViolation::NotQueued { code: 0 }));

    let result = CheckpointOrchestrator::new(&context, &runtime)
        .with_notifier(&notifier)
        .checkpoint(false);

    assert!(matches!(
        result,
        Err(CheckpointError::SignalProtocol(SignalProtocolViolation::NotQueued { code: 0 }))
    ));
    assert_eq!(context.restore_start_time(), None);
}

#[test]
fn test_resume_without_parameters_resets_clock() {
    let _guard = lock();
    let fixture = Fixture::new(0);
    let context = fixture.context(fixture.config());
    let runtime = TestRuntime::default();
    let notifier = ScriptedNotifier::resumed_without_parameters();

    let outcome = CheckpointOrchestrator::new(&context, &runtime)
        .with_notifier(&notifier)
        .checkpoint(false)
        .unwrap();

    assert_eq!(outcome, CheckpointOutcome::Restored(RestoredState::default()));
    assert_eq!(
        fixture.engine_args(),
        format!("checkpoint {}", fixture.tmp.path().join("cr").display())
    );
    assert_eq!(notifier.waits.get(), 1);
    assert!(context.restore_start_time().is_some());
    assert!(context.uptime_since_restore().unwrap() >= 0);
}

fn parameter_segment() -> i32 {
    unique_shm_id(5)
}

#[test]
fn test_resume_with_parameters_applies_them() {
    let _guard = lock();
    let fixture = Fixture::new(0);
    let context = fixture.context(fixture.config());
    let runtime = TestRuntime::default();

    let params = RestoreParameters {
        restore_time_ms: 1_700_000_000_000,
        restore_counter_ns: 42,
        properties: vec!["a=1".to_string(), "b=2".to_string()],
        environment: vec![b"CREST_CHECKPOINT_TEST_ENV=restored".to_vec()],
        args: "-Dfoo=bar".to_string(),
    };
    let mut segment = ShmSegment::create(parameter_segment()).unwrap();
    params.write_to(&mut segment).unwrap();
    drop(segment);

    let notifier = ScriptedNotifier::new(|| {
        Ok(ResumeToken {
            shm_id: ShmId::new(parameter_segment()),
        })
    });

    let outcome = CheckpointOrchestrator::new(&context, &runtime)
        .with_notifier(&notifier)
        .checkpoint(false)
        .unwrap();

    assert_eq!(
        outcome,
        CheckpointOutcome::Restored(RestoredState {
            new_args: Some("-Dfoo=bar".to_string()),
            new_properties: vec!["a=1".to_string(), "b=2".to_string()],
        })
    );
    assert_eq!(context.restore_start_time(), Some(1_700_000_000_000));
    assert_eq!(
        std::env::var("CREST_CHECKPOINT_TEST_ENV").as_deref(),
        Ok("restored")
    );
    // Reader unlinks the segment.
    assert!(ShmSegment::open_and_unlink(parameter_segment()).is_err());
}

fn corrupt_segment() -> i32 {
    unique_shm_id(6)
}

#[test]
fn test_corrupt_parameters_fall_back() {
    let _guard = lock();
    let fixture = Fixture::new(0);
    let context = fixture.context(fixture.config());
    let runtime = TestRuntime::default();

    let mut segment = ShmSegment::create(corrupt_segment()).unwrap();
    segment.write_exact(b"short").unwrap();
    drop(segment);

    let notifier = ScriptedNotifier::new(|| {
        Ok(ResumeToken {
            shm_id: ShmId::new(corrupt_segment()),
        })
    });

    let outcome = CheckpointOrchestrator::new(&context, &runtime)
        .with_notifier(&notifier)
        .checkpoint(false)
        .unwrap();

    assert_eq!(outcome, CheckpointOutcome::Restored(RestoredState::default()));
    assert!(context.restore_start_time().is_some());
}

#[test]
fn test_skip_engine() {
    let _guard = lock();
    let fixture = Fixture::new(0);
    let mut config = fixture.config();
    config.skip_engine = true;
    let context = fixture.context(config);
    let runtime = TestRuntime::default();
    let notifier = ScriptedNotifier::resumed_without_parameters();

    let outcome = CheckpointOrchestrator::new(&context, &runtime)
        .with_notifier(&notifier)
        .checkpoint(false)
        .unwrap();

    assert!(outcome.is_restored());
    assert!(!fixture.engine_called());
    assert_eq!(notifier.waits.get(), 0);
    assert!(context.restore_start_time().is_some());
}

#[test]
fn test_classpath_and_persistent_exemptions() {
    let _guard = lock();
    let fixture = Fixture::new(0);
    let context = fixture.context(fixture.config());

    let jar = fixture.tmp.path().join("app.jar");
    std::fs::write(&jar, b"PK").unwrap();
    let state = fixture.tmp.path().join("state");
    std::fs::write(&state, b"x").unwrap();

    let runtime = TestRuntime {
        classpath: jar.display().to_string(),
        ..TestRuntime::default()
    };

    let jar_file = File::open(&jar).unwrap();
    let _jar_dup = jar_file.try_clone().unwrap();
    let state_file = File::open(&state).unwrap();
    context
        .persistent()
        .register_fd(state_file.as_raw_fd())
        .unwrap();

    let orchestrator = CheckpointOrchestrator::new(&context, &runtime);
    let outcome = orchestrator.checkpoint(true).unwrap();
    assert!(outcome.failures().is_empty());

    // Registrations are consumed by the classification pass.
    let outcome = orchestrator.checkpoint(true).unwrap();
    assert_eq!(outcome.failures().len(), 1);
    assert_eq!(outcome.failures()[0].fd, state_file.as_raw_fd());
}
