// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CheckpointContext - process-wide checkpoint state.
//!
//! Owns everything that outlives a single attempt: validated settings, the
//! persistent resource registry, the descriptors inherited at startup, the
//! resolved engine and the restore clock. Each piece carries its own lock.
//!
//! A context is passed explicitly to the orchestrator. Resource owners that
//! cannot reach it may use the optional process-global install point.

use std::collections::BTreeSet;
use std::os::unix::fs::DirBuilderExt;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use lazy_static::lazy_static;

use crate::clock::RestoreClock;
use crate::config::CheckpointConfig;
use crate::engine::CrEngine;
use crate::error::{CheckpointError, ConfigError};
use crate::fd::FdLedger;
use crate::persistent::PersistentResourceRegistry;

lazy_static! {
    static ref GLOBAL_CONTEXT: RwLock<Option<Arc<CheckpointContext>>> = RwLock::new(None);
}

/// Shared checkpoint state for the lifetime of the process.
#[derive(Debug)]
pub struct CheckpointContext {
    config: CheckpointConfig,
    persistent: PersistentResourceRegistry,
    inherited: Mutex<Option<BTreeSet<RawFd>>>,
    engine: Mutex<Option<CrEngine>>,
    clock: RestoreClock,
}

impl CheckpointContext {
    pub fn new(config: CheckpointConfig) -> Self {
        let enabled = config.enabled();
        Self {
            config,
            persistent: PersistentResourceRegistry::new(enabled),
            inherited: Mutex::new(None),
            engine: Mutex::new(None),
            clock: RestoreClock::new(),
        }
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    pub fn persistent(&self) -> &PersistentResourceRegistry {
        &self.persistent
    }

    pub fn clock(&self) -> &RestoreClock {
        &self.clock
    }

    /// Wall-clock milliseconds at the last restore.
    pub fn restore_start_time(&self) -> Option<i64> {
        self.clock.restore_start_time()
    }

    /// Monotonic nanoseconds since the last restore.
    pub fn uptime_since_restore(&self) -> Option<i64> {
        self.clock.uptime_since_restore()
    }

    /// Snapshot the descriptors open right now as inherited from the
    /// environment. Only the first call records anything.
    pub fn record_inherited_fds(&self) {
        if !self.config.enabled() {
            return;
        }
        let mut inherited = self.inherited.lock().unwrap_or_else(PoisonError::into_inner);
        if inherited.is_none() {
            let fds = FdLedger::build().open_fds();
            tracing::debug!(count = fds.len(), "Recorded inherited descriptors");
            *inherited = Some(fds);
        }
    }

    /// Descriptors exempt as inherited; empty when never recorded.
    pub fn inherited_fds(&self) -> BTreeSet<RawFd> {
        self.inherited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_default()
    }

    /// Validate settings before the first checkpoint request.
    ///
    /// The checkpoint directory must be a directory or creatable; a probe
    /// directory is created and removed again. The engine path is resolved
    /// and cached.
    pub fn prepare(&self) -> Result<(), CheckpointError> {
        let Some(dir) = self.config.checkpoint_to.as_deref() else {
            return Ok(());
        };

        match std::fs::metadata(dir) {
            Ok(meta) if !meta.is_dir() => {
                return Err(ConfigError::NotADirectory {
                    path: dir.to_path_buf(),
                }
                .into());
            }
            Ok(_) => {}
            Err(_) => {
                create_private_dir(dir)?;
                if let Err(e) = std::fs::remove_dir(dir) {
                    tracing::warn!(dir = %dir.display(), error = %e, "Cannot clean up after directory check");
                }
            }
        }

        self.engine()?;
        tracing::info!(dir = %dir.display(), "Checkpoint prepared");
        Ok(())
    }

    /// Resolved CR engine, computed once.
    pub fn engine(&self) -> Result<CrEngine, CheckpointError> {
        let mut cached = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(engine) = cached.as_ref() {
            return Ok(engine.clone());
        }
        let engine = CrEngine::resolve(&self.config.engine, self.config.engine_dir.as_deref())?;
        *cached = Some(engine.clone());
        Ok(engine)
    }

    /// Create the checkpoint directory when missing.
    pub fn ensure_checkpoint_dir(&self) -> Result<&Path, CheckpointError> {
        let dir = self
            .config
            .checkpoint_to
            .as_deref()
            .ok_or(CheckpointError::NotConfigured)?;
        if !dir.is_dir() {
            create_private_dir(dir)?;
        }
        Ok(dir)
    }

    /// Make `context` reachable through [`global`].
    pub fn install_global(context: Arc<CheckpointContext>) {
        *GLOBAL_CONTEXT.write().unwrap_or_else(PoisonError::into_inner) = Some(context);
    }
}

fn create_private_dir(dir: &Path) -> Result<(), ConfigError> {
    match std::fs::DirBuilder::new().mode(0o700).create(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(ConfigError::DirectoryUnusable {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

/// The installed process-global context, if any.
pub fn global() -> Option<Arc<CheckpointContext>> {
    GLOBAL_CONTEXT
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Register a persistent descriptor with the global context.
/// No-op when no context is installed.
pub fn register_persistent_fd(fd: RawFd, device: u64, inode: u64) {
    if let Some(context) = global() {
        context.persistent().register(fd, device, inode);
    }
}

/// Deregister a persistent descriptor from the global context.
pub fn deregister_persistent_fd(fd: RawFd, device: u64, inode: u64) {
    if let Some(context) = global() {
        context.persistent().deregister(fd, device, inode);
    }
}
