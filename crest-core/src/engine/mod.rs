// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Engine handshake.
//!
//! Checkpoint half: run the CR engine, then block until the resumed image is
//! told it has been restored. Restore half: hand parameters over through
//! shared memory and replace the current process with the engine's restore.

mod process;
mod signal;

use std::path::Path;

pub use process::{default_install_dir, CrEngine};
pub use signal::{
    decode_resume, notify_restored, restore_signal, RestoreSignal, ResumeNotifier, ResumeToken,
};

use crate::clock::{monotonic_nanos, wall_clock_millis};
use crate::error::{CheckpointError, EngineError, ParameterChannelError};
use crate::shm::{RestoreParameters, ShmSegment};

/// Environment variable naming the segment written by the restore half.
pub const NEW_ARGS_ID_ENV: &str = "CREST_NEW_ARGS_ID";

/// The CR engine paired with the channel announcing the resume.
pub struct EngineHandshake<'a> {
    engine: &'a CrEngine,
    notifier: &'a dyn ResumeNotifier,
}

impl<'a> EngineHandshake<'a> {
    pub fn new(engine: &'a CrEngine, notifier: &'a dyn ResumeNotifier) -> Self {
        Self { engine, notifier }
    }

    pub fn engine(&self) -> &CrEngine {
        self.engine
    }

    /// Run the engine's checkpoint into `dir`.
    ///
    /// A failing engine leaves the process as it was; the wait for the
    /// restore signal only starts after a successful exit.
    pub fn checkpoint(&self, dir: &Path) -> Result<(), CheckpointError> {
        self.engine.checkpoint(dir)?;
        Ok(())
    }

    /// Block until the process is resumed.
    pub fn wait_for_resume(&self) -> Result<ResumeToken, CheckpointError> {
        Ok(self.notifier.wait_for_resume()?)
    }
}

/// Restore half of the handshake.
///
/// Writes `properties` and `args` with the current time and environment into
/// the segment named after this process, exports its id through
/// [`NEW_ARGS_ID_ENV`], then execs `<engine> restore <dir>`. A failed
/// parameter hand-off is logged and the engine still runs. Only returns when
/// the exec fails.
pub fn restore(engine: &CrEngine, dir: &Path, properties: Vec<String>, args: &str) -> EngineError {
    let restore_time_ms = wall_clock_millis();
    let restore_counter_ns = monotonic_nanos();
    let id = std::process::id() as i32;

    let params = RestoreParameters::capture(properties, args, restore_time_ms, restore_counter_ns);
    match hand_over(id, &params) {
        Ok(()) => std::env::set_var(NEW_ARGS_ID_ENV, id.to_string()),
        Err(e) => {
            tracing::warn!(id = id, error = %e, "Restore parameters not handed over");
        }
    }

    let err = engine.restore(dir);
    tracing::warn!(error = %err, "Cannot execute CR engine restore");
    err
}

/// Write `params` into a fresh segment `id`. A segment left incomplete is
/// unlinked again.
fn hand_over(id: i32, params: &RestoreParameters) -> Result<(), ParameterChannelError> {
    let mut segment = ShmSegment::create(id)?;
    params.write_to(&mut segment).inspect_err(|_| {
        if let Err(e) = ShmSegment::unlink(id) {
            tracing::warn!(id = id, error = %e, "Cannot remove incomplete parameter segment");
        }
    })
}
