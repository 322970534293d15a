// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Restore parameter channel.
//!
//! A POSIX shared memory segment carries timestamps, system properties, the
//! environment and the new command line from the restoring process into the
//! resumed image.

mod params;
mod segment;

pub use params::{RestoreParameters, HEADER_SIZE};
pub use segment::{ShmSegment, SEGMENT_PREFIX};
