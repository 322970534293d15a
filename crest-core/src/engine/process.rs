// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! External CR engine invocation.
//!
//! The engine is called as `<engine> checkpoint <dir>` from the process being
//! checkpointed, and as `<engine> restore <dir>` by the restore half, which
//! replaces its own image with the engine.

use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use crate::error::EngineError;

/// Resolved CR engine executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrEngine {
    path: PathBuf,
}

impl CrEngine {
    /// Use `path` without resolution.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolve the engine executable.
    ///
    /// An absolute `engine` is used verbatim. A bare name is looked up in
    /// `install_dir`, defaulting to the directory of the running executable,
    /// and must exist there.
    pub fn resolve(engine: &str, install_dir: Option<&Path>) -> Result<Self, EngineError> {
        if engine.is_empty() {
            return Err(EngineError::InvalidEngine {
                reason: "Engine name cannot be empty".to_string(),
            });
        }

        let candidate = Path::new(engine);
        if candidate.is_absolute() {
            return Ok(Self::at(candidate));
        }

        let dir = match install_dir {
            Some(dir) => dir.to_path_buf(),
            None => default_install_dir()?,
        };
        let path = dir.join(candidate);
        if !path.exists() {
            return Err(EngineError::BinaryNotFound { path });
        }

        tracing::debug!(engine = %path.display(), "Resolved CR engine");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `<engine> checkpoint <dir>` and wait for it to exit.
    pub fn checkpoint(&self, dir: &Path) -> Result<(), EngineError> {
        tracing::debug!(
            engine = %self.path.display(),
            dir = %dir.display(),
            "Invoking CR engine checkpoint"
        );

        let start = Instant::now();
        let status = Command::new(&self.path)
            .arg("checkpoint")
            .arg(dir)
            .status()
            .map_err(|e| EngineError::SpawnFailed {
                reason: format!("Failed to execute {}: {}", self.path.display(), e),
            })?;

        match status.code() {
            Some(0) => {
                tracing::info!(
                    engine = %self.path.display(),
                    elapsed_ms = start.elapsed().as_millis(),
                    "CR engine checkpoint completed"
                );
                Ok(())
            }
            Some(code) => Err(EngineError::ExitStatus { code }),
            None => Err(EngineError::AbnormalTermination {
                reason: match status.signal() {
                    Some(signal) => format!("killed by signal {}", signal),
                    None => status.to_string(),
                },
            }),
        }
    }

    /// Replace the current process image with `<engine> restore <dir>`.
    /// Only returns on failure.
    pub fn restore(&self, dir: &Path) -> EngineError {
        tracing::info!(
            engine = %self.path.display(),
            dir = %dir.display(),
            "Executing CR engine restore"
        );

        let source = Command::new(&self.path).arg("restore").arg(dir).exec();
        EngineError::ExecFailed {
            path: self.path.clone(),
            source,
        }
    }
}

/// Directory holding the running executable.
pub fn default_install_dir() -> Result<PathBuf, EngineError> {
    let exe = std::env::current_exe().map_err(|e| EngineError::InvalidEngine {
        reason: format!("Cannot locate current executable: {}", e),
    })?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| EngineError::InvalidEngine {
            reason: format!("Executable {} has no parent directory", exe.display()),
        })
}
