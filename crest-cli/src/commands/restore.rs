// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `crest restore` command - Restore a checkpoint image.
//!
//! Replaces this process with the CR engine. Returns only when the engine
//! could not be started.

use crest_core::engine;
use crest_core::{
    ConfigError, ConfigLoader, CrEngine, ManagedRuntime, RuntimeConfig, StandaloneRuntime,
};

/// Properties and command line handed to the restored process.
fn hand_over(runtime: RuntimeConfig, args: &[String]) -> (Vec<String>, String) {
    let runtime = StandaloneRuntime::new(runtime).with_command_line(args.join(" "));
    (runtime.system_properties(), runtime.command_line())
}

pub async fn execute(config_path: &str, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_file(config_path)?;
    let cr = &config.checkpoint;

    let dir = cr
        .restore_from
        .as_deref()
        .ok_or_else(|| ConfigError::MissingRequiredField {
            field: "restore_from",
            context: "checkpoint section".to_string(),
        })?;
    let cr_engine = CrEngine::resolve(&cr.engine, cr.engine_dir.as_deref())?;

    let (properties, command_line) = hand_over(config.runtime.clone(), args);

    tracing::info!(dir = %dir.display(), engine = %cr_engine.path().display(), "Restoring");

    let err = engine::restore(&cr_engine, dir, properties, &command_line);
    Err(err.into())
}
