// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

pub mod action_script;
pub mod checkpoint;
pub mod restore;
pub mod startup_time;
pub mod validate;
