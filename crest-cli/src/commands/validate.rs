// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `crest validate` command - Validate configuration file.

use std::path::Path;

use crest_core::ConfigLoader;

fn show(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "(not set)".to_string())
}

pub async fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            let cr = &config.checkpoint;
            println!("✓ Configuration is valid");
            println!();
            println!("Checkpoint Settings:");
            println!("  Checkpoint To:      {}", show(cr.checkpoint_to.as_deref()));
            println!("  Restore From:       {}", show(cr.restore_from.as_deref()));
            println!("  Engine:             {}", cr.engine);
            println!("  Engine Directory:   {}", show(cr.engine_dir.as_deref()));
            println!("  Ignore Failures:    {}", cr.ignore_failures);
            println!("  Skip Engine:        {}", cr.skip_engine);
            println!();
            println!("Runtime:");
            println!("  Class Path:         {}", config.runtime.classpath);
            println!("  Properties ({}):", config.runtime.properties.len());
            for (key, value) in &config.runtime.properties {
                println!("  - {}={}", key, value);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
