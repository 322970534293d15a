// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `crest action-script` command - CR engine phase hook.
//!
//! The engine runs the hook with the phase in `CRTOOLS_SCRIPT_ACTION`.
//! After a dump the canonical image directory is recorded in `cppath`.
//! After the resume the restored process is woken with the restore signal,
//! carrying the id of the segment holding its new parameters.

use std::path::{Path, PathBuf};

use crest_core::engine::{notify_restored, NEW_ARGS_ID_ENV};
use crest_core::SignalProtocolViolation;
use thiserror::Error;

const ACTION_ENV: &str = "CRTOOLS_SCRIPT_ACTION";
const IMAGE_DIR_ENV: &str = "CRTOOLS_IMAGE_DIR";
const INIT_PID_ENV: &str = "CRTOOLS_INIT_PID";

/// File in the image directory naming its canonical path.
pub const CPPATH_FILE: &str = "cppath";

#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Cannot find {name} env")]
    MissingEnv { name: &'static str },

    #[error("Invalid value '{value}' in {name}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Cannot record image dir {path}: {source}")]
    ImageDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Signal(#[from] SignalProtocolViolation),
}

/// Engine phases the hook acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    PostDump,
    PostResume,
    Other,
}

impl Action {
    pub fn parse(action: &str) -> Self {
        match action {
            "post-dump" => Self::PostDump,
            "post-resume" => Self::PostResume,
            _ => Self::Other,
        }
    }
}

fn env(name: &'static str) -> Result<String, ActionError> {
    std::env::var(name).map_err(|_| ActionError::MissingEnv { name })
}

/// Write the canonical form of `image_dir` into its `cppath` file.
pub fn post_dump(image_dir: &Path) -> Result<PathBuf, ActionError> {
    let image_error = |source| ActionError::ImageDir {
        path: image_dir.to_path_buf(),
        source,
    };
    let real = image_dir.canonicalize().map_err(image_error)?;
    std::fs::write(real.join(CPPATH_FILE), real.as_os_str().as_encoded_bytes())
        .map_err(image_error)?;
    Ok(real)
}

/// Signal payload: the segment id exported by the restore half, or 0.
pub fn resume_payload(new_args_id: Option<&str>) -> Result<i32, ActionError> {
    match new_args_id {
        None => Ok(0),
        Some(value) => value.trim().parse().map_err(|_| ActionError::InvalidValue {
            name: NEW_ARGS_ID_ENV,
            value: value.to_string(),
        }),
    }
}

fn post_resume() -> Result<(), ActionError> {
    let pid_value = env(INIT_PID_ENV)?;
    let pid: libc::pid_t = pid_value
        .trim()
        .parse()
        .map_err(|_| ActionError::InvalidValue {
            name: INIT_PID_ENV,
            value: pid_value.clone(),
        })?;
    let payload = resume_payload(std::env::var(NEW_ARGS_ID_ENV).ok().as_deref())?;

    notify_restored(pid, payload)?;
    tracing::debug!(pid = pid, payload = payload, "Restore signal queued");
    Ok(())
}

fn run() -> Result<(), ActionError> {
    match Action::parse(&env(ACTION_ENV)?) {
        Action::PostDump => {
            let dir = PathBuf::from(env(IMAGE_DIR_ENV)?);
            post_dump(&dir).map(|_| ())
        }
        Action::PostResume => post_resume(),
        Action::Other => Ok(()),
    }
}

pub async fn execute() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        eprintln!("action-script: {}", e);
        std::process::exit(1);
    }
    Ok(())
}
