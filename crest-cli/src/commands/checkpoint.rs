// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `crest checkpoint` command - Checkpoint this process.
//!
//! The attempt runs on a blocking task so the async runtime keeps serving
//! while the engine dumps the image and until the restore signal arrives.

use std::sync::Arc;

use crest_core::{
    CheckpointContext, CheckpointOrchestrator, CheckpointOutcome, ConfigLoader, StandaloneRuntime,
};

pub async fn execute(
    config_path: &str,
    dry_run: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_file(config_path)?;

    let context = Arc::new(CheckpointContext::new(config.checkpoint));
    // Descriptors of the CLI and its async runtime count as inherited.
    context.record_inherited_fds();
    context.prepare()?;
    CheckpointContext::install_global(Arc::clone(&context));

    let runtime = StandaloneRuntime::new(config.runtime);

    let attempt = Arc::clone(&context);
    let outcome = tokio::task::spawn_blocking(move || {
        CheckpointOrchestrator::new(&attempt, &runtime).checkpoint(dry_run)
    })
    .await??;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome, dry_run);
    }

    if !dry_run && !outcome.is_restored() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_outcome(outcome: &CheckpointOutcome, dry_run: bool) {
    match outcome {
        CheckpointOutcome::Restored(state) => {
            println!("✓ Restored from checkpoint");
            if let Some(args) = &state.new_args {
                println!("  New Arguments:  {}", args);
            }
            for property in &state.new_properties {
                println!("  - {}", property);
            }
        }
        CheckpointOutcome::Failed { failures } if failures.is_empty() => {
            println!("✓ No unrestorable resources");
        }
        CheckpointOutcome::Failed { failures } => {
            if dry_run {
                println!("Unrestorable resources ({}):", failures.len());
            } else {
                eprintln!("✗ Checkpoint failed with {} unrestorable resources:", failures.len());
            }
            for failure in failures {
                println!("  - {}", failure);
            }
        }
    }
}
