// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Runtime collaborator interface.
//!
//! The orchestrator needs two things from the runtime hosting it: a full
//! collection before the snapshot and a global pause of mutator threads. It
//! also reads the class path inputs used to exempt descriptors.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use crate::config::RuntimeConfig;

/// The runtime a checkpoint is taken of.
pub trait ManagedRuntime: Send + Sync {
    /// Run a full collection, hinting that unused caches may be discarded.
    fn collect_garbage(&self, discard_unused_caches: bool);

    /// Run `op` while every mutator thread is held at a safepoint.
    fn at_safepoint<T, F: FnOnce() -> T>(&self, op: F) -> T;

    /// Colon-separated boot class path.
    fn boot_classpath(&self) -> String;

    /// Colon-separated application class path.
    fn app_classpath(&self) -> String;

    /// Colon-separated extension directories.
    fn extension_dirs(&self) -> String;

    /// Current system properties as `key=value` strings.
    fn system_properties(&self) -> Vec<String>;

    /// Command line the runtime was started with.
    fn command_line(&self) -> String;

    /// Write a heap dump for diagnosing a failed checkpoint.
    fn dump_heap(&self) {
        tracing::warn!("Heap dump is not supported by this runtime");
    }
}

/// Runtime for a plain process without a managed heap.
///
/// Mutators bracket their critical sections with [`StandaloneRuntime::enter`];
/// the safepoint waits for all of them and holds new ones back.
#[derive(Debug)]
pub struct StandaloneRuntime {
    config: RuntimeConfig,
    command_line: String,
    safepoint: RwLock<()>,
    collections: AtomicU64,
}

impl StandaloneRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        let command_line = std::env::args().collect::<Vec<_>>().join(" ");
        Self {
            config,
            command_line,
            safepoint: RwLock::new(()),
            collections: AtomicU64::new(0),
        }
    }

    pub fn with_command_line(mut self, command_line: impl Into<String>) -> Self {
        self.command_line = command_line.into();
        self
    }

    /// Enter a mutator section. Blocks while a safepoint is in progress.
    pub fn enter(&self) -> RwLockReadGuard<'_, ()> {
        self.safepoint.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of collections requested so far.
    pub fn collections(&self) -> u64 {
        self.collections.load(Ordering::Relaxed)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.config.properties
    }
}

impl ManagedRuntime for StandaloneRuntime {
    fn collect_garbage(&self, discard_unused_caches: bool) {
        self.collections.fetch_add(1, Ordering::Relaxed);
        if discard_unused_caches {
            #[cfg(target_env = "gnu")]
            // SAFETY: malloc_trim only returns free heap pages to the system
            unsafe {
                libc::malloc_trim(0);
            }
        }
        tracing::debug!(discard_unused_caches, "Collected garbage");
    }

    fn at_safepoint<T, F: FnOnce() -> T>(&self, op: F) -> T {
        let _guard = self
            .safepoint
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        tracing::debug!("Reached safepoint");
        op()
    }

    fn boot_classpath(&self) -> String {
        self.config.boot_classpath.clone()
    }

    fn app_classpath(&self) -> String {
        self.config.classpath.clone()
    }

    fn extension_dirs(&self) -> String {
        self.config.extension_dirs.clone()
    }

    fn system_properties(&self) -> Vec<String> {
        self.config
            .properties
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect()
    }

    fn command_line(&self) -> String {
        self.command_line.clone()
    }

    fn dump_heap(&self) {
        match std::fs::read_to_string("/proc/self/status") {
            Ok(status) => {
                for line in status.lines().filter(|l| l.starts_with("Vm")) {
                    tracing::info!(target: "crest::heap", "{}", line);
                }
            }
            Err(e) => tracing::warn!(error = %e, "Cannot read process memory status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn runtime() -> StandaloneRuntime {
        let mut properties = BTreeMap::new();
        properties.insert("b".to_string(), "2".to_string());
        properties.insert("a".to_string(), "1".to_string());
        StandaloneRuntime::new(RuntimeConfig {
            classpath: "/app/a.jar:/app/b.jar".to_string(),
            boot_classpath: String::new(),
            extension_dirs: "/app/ext".to_string(),
            properties,
        })
    }

    #[test]
    fn test_properties_sorted() {
        assert_eq!(runtime().system_properties(), vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_collect_counts() {
        let rt = runtime();
        rt.collect_garbage(true);
        rt.collect_garbage(false);
        assert_eq!(rt.collections(), 2);
    }

    #[test]
    fn test_safepoint_waits_for_mutators() {
        let rt = Arc::new(runtime().with_command_line("app --serve"));
        assert_eq!(rt.command_line(), "app --serve");

        let guard = rt.enter();
        let rt2 = Arc::clone(&rt);
        let handle = std::thread::spawn(move || rt2.at_safepoint(|| 42));

        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        drop(guard);
        assert_eq!(handle.join().unwrap(), 42);
    }
}
