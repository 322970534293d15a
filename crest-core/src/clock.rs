// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Restore-time anchors.
//!
//! A resumed process answers "when was I restored" and "how long since
//! restore" from two anchors: a wall-clock reading in milliseconds and a
//! monotonic counter in nanoseconds. Both are zero until the first restore.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use nix::time::{clock_gettime, ClockId};

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn wall_clock_millis() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

/// Monotonic counter in nanoseconds.
pub fn monotonic_nanos() -> i64 {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => ts.tv_sec() as i64 * 1_000_000_000 + ts.tv_nsec() as i64,
        Err(errno) => {
            tracing::error!(error = %errno, "CLOCK_MONOTONIC unavailable");
            0
        }
    }
}

/// Process-wide restore anchors.
#[derive(Debug, Default)]
pub struct RestoreClock {
    start_time_ms: AtomicI64,
    start_counter_ns: AtomicI64,
}

impl RestoreClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Anchor to readings taken by whoever started the restore.
    pub fn set(&self, restore_time_ms: i64, restore_counter_ns: i64) {
        self.start_time_ms.store(restore_time_ms, Ordering::SeqCst);
        self.start_counter_ns
            .store(restore_counter_ns, Ordering::SeqCst);
    }

    /// Anchor to the current readings.
    pub fn reset_to_now(&self) {
        self.set(wall_clock_millis(), monotonic_nanos());
    }

    /// Wall-clock milliseconds at restore, if the process was ever restored.
    pub fn restore_start_time(&self) -> Option<i64> {
        match self.start_time_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(ms),
        }
    }

    /// Monotonic nanoseconds elapsed since restore.
    pub fn uptime_since_restore(&self) -> Option<i64> {
        match self.start_counter_ns.load(Ordering::SeqCst) {
            0 => None,
            counter => Some(monotonic_nanos() - counter),
        }
    }
}
