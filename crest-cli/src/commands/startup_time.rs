// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `crest startup-time` command - Print a startup timing probe.

use crest_core::clock::{monotonic_nanos, wall_clock_millis};

fn startup_line(value: i64, message: &str) -> String {
    format!("STARTUPTIME {} {}", value, message)
}

pub async fn execute(millis: bool, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    let value = if millis {
        wall_clock_millis()
    } else {
        monotonic_nanos()
    };
    println!("{}", startup_line(value, message));
    Ok(())
}
