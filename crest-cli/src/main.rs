// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Crest CLI
//!
//! Command-line interface for the crest checkpoint/restore orchestrator.

use clap::{Parser, Subcommand};
use crest_core::RestoreSignal;
use tracing_subscriber::EnvFilter;

mod commands;

/// Crest - checkpoint/restore orchestrator for running processes
#[derive(Parser)]
#[command(name = "crest")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: String,
    },

    /// Checkpoint this process through the CR engine
    Checkpoint {
        /// Configuration file path
        #[arg(short, long, default_value = "crest.yaml")]
        config: String,

        /// Only report resources that would block the checkpoint
        #[arg(long)]
        dry_run: bool,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Restore a checkpoint image, handing over new arguments
    Restore {
        /// Configuration file path
        #[arg(short, long, default_value = "crest.yaml")]
        config: String,

        /// New arguments for the restored process
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Hook run by the CR engine at each dump and restore phase
    ActionScript,

    /// Print a STARTUPTIME line
    StartupTime {
        /// Wall-clock milliseconds
        #[arg(short = 'm', long, conflicts_with = "nanos")]
        millis: bool,

        /// Monotonic nanoseconds (default)
        #[arg(short = 'n', long)]
        nanos: bool,

        /// Message printed after the time
        #[arg(default_value = "prestart")]
        message: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();

    // Every runtime thread must inherit the blocked restore signal.
    RestoreSignal::block_in_current_thread()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Validate { file } => commands::validate::execute(&file).await,
            Commands::Checkpoint {
                config,
                dry_run,
                json,
            } => commands::checkpoint::execute(&config, dry_run, json).await,
            Commands::Restore { config, args } => commands::restore::execute(&config, &args).await,
            Commands::ActionScript => commands::action_script::execute().await,
            Commands::StartupTime { millis, message, .. } => {
                commands::startup_time::execute(millis, &message).await
            }
        }
    })
}
