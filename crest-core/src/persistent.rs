// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Thread-safe registry of persistent resources.
//!
//! Resource owners register descriptors that survive a checkpoint by their own
//! means (for example, reopened in an after-restore callback). A registered
//! `(fd, device, inode)` tuple exempts the matching descriptor from the
//! restorability check of the next checkpoint attempt.
//!
//! The registry is mutated by arbitrary application threads outside the
//! checkpoint pause, so it carries its own lock.

use std::os::unix::io::RawFd;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::types::FileIdentity;

/// One registered persistent descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PersistentResource {
    pub fd: RawFd,
    pub identity: FileIdentity,
}

impl PersistentResource {
    pub fn new(fd: RawFd, device: u64, inode: u64) -> Self {
        Self {
            fd,
            identity: FileIdentity::new(device, inode),
        }
    }

    /// Describe an open descriptor by its current identity.
    pub fn of_fd(fd: RawFd) -> nix::Result<Self> {
        let stat = nix::sys::stat::fstat(fd)?;
        Ok(Self {
            fd,
            identity: FileIdentity::of(&stat),
        })
    }
}

/// Registry of persistent resources, ordered by descriptor number.
#[derive(Debug)]
pub struct PersistentResourceRegistry {
    /// Disabled when the checkpoint feature is not configured.
    enabled: bool,
    /// At most one entry per descriptor, sorted by `fd`.
    entries: Mutex<Vec<PersistentResource>>,
}

impl PersistentResourceRegistry {
    /// Create a new empty registry.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Check if registrations are recorded at all.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PersistentResource>> {
        // Every mutation leaves the vector sorted, so a poisoned guard is still usable.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `fd` as persistent, replacing any entry for the same descriptor.
    pub fn register(&self, fd: RawFd, device: u64, inode: u64) {
        if !self.enabled {
            return;
        }
        if fd < 0 {
            tracing::warn!(fd = fd, "Ignoring persistent registration of an invalid descriptor");
            return;
        }

        let resource = PersistentResource::new(fd, device, inode);
        let mut entries = self.lock();
        match entries.binary_search_by_key(&fd, |r| r.fd) {
            Ok(index) => entries[index] = resource,
            Err(index) => entries.insert(index, resource),
        }

        tracing::debug!(fd = fd, identity = %resource.identity, "Registered persistent resource");
    }

    /// Register an open descriptor under its current `(device, inode)`.
    pub fn register_fd(&self, fd: RawFd) -> nix::Result<()> {
        let resource = PersistentResource::of_fd(fd)?;
        self.register(fd, resource.identity.device, resource.identity.inode);
        Ok(())
    }

    /// Remove the entry exactly matching `(fd, device, inode)`, if any.
    pub fn deregister(&self, fd: RawFd, device: u64, inode: u64) {
        if !self.enabled {
            return;
        }

        let wanted = PersistentResource::new(fd, device, inode);
        let mut entries = self.lock();
        if let Some(index) = entries.iter().position(|r| *r == wanted) {
            entries.remove(index);
            tracing::debug!(fd = fd, identity = %wanted.identity, "Deregistered persistent resource");
        }
    }

    /// Most recent entry registered for `fd`.
    pub fn get(&self, fd: RawFd) -> Option<PersistentResource> {
        let entries = self.lock();
        entries
            .binary_search_by_key(&fd, |r| r.fd)
            .ok()
            .map(|index| entries[index])
    }

    /// Copy of the current entries, ordered by descriptor.
    pub fn entries(&self) -> Vec<PersistentResource> {
        self.lock().clone()
    }

    /// Remove and return all entries. Consumed once per classification pass.
    pub fn take(&self) -> Vec<PersistentResource> {
        std::mem::take(&mut *self.lock())
    }

    /// Get the number of registered resources.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for PersistentResourceRegistry {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_register_keeps_order() {
        let registry = PersistentResourceRegistry::new(true);
        registry.register(7, 1, 70);
        registry.register(3, 1, 30);
        registry.register(5, 1, 50);

        let fds: Vec<RawFd> = registry.entries().iter().map(|r| r.fd).collect();
        assert_eq!(fds, vec![3, 5, 7]);
    }

    #[test]
    fn test_register_twice_is_idempotent() {
        let registry = PersistentResourceRegistry::new(true);
        registry.register(4, 8, 99);
        registry.register(4, 8, 99);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(4), Some(PersistentResource::new(4, 8, 99)));
    }

    #[test]
    fn test_register_overwrites_same_fd() {
        let registry = PersistentResourceRegistry::new(true);
        registry.register(4, 8, 99);
        registry.register(4, 8, 100);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(4).map(|r| r.identity.inode), Some(100));
    }

    #[test]
    fn test_deregister_exact_match_only() {
        let registry = PersistentResourceRegistry::new(true);
        registry.register(4, 8, 99);

        registry.deregister(4, 8, 100);
        assert_eq!(registry.len(), 1);

        registry.deregister(4, 8, 99);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_deregister_unknown_is_noop() {
        let registry = PersistentResourceRegistry::new(true);
        registry.register(2, 1, 1);
        registry.deregister(9, 9, 9);
        assert_eq!(registry.len(), 1);

        let empty = PersistentResourceRegistry::new(true);
        empty.deregister(1, 1, 1);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_negative_descriptor_rejected() {
        let registry = PersistentResourceRegistry::new(true);
        registry.register(-1, 0, 0);
        registry.register(3, 1, 30);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(-1), None);
    }

    #[test]
    fn test_disabled_registry_ignores_calls() {
        let registry = PersistentResourceRegistry::new(false);
        registry.register(4, 8, 99);
        assert!(!registry.is_enabled());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_take_drains() {
        let registry = PersistentResourceRegistry::new(true);
        registry.register(1, 1, 1);
        registry.register(2, 1, 2);

        assert_eq!(registry.take().len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let registry = Arc::new(PersistentResourceRegistry::new(true));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let reg = Arc::clone(&registry);
                thread::spawn(move || {
                    reg.register(100 - i, 1, i as u64);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let fds: Vec<RawFd> = registry.entries().iter().map(|r| r.fd).collect();
        assert_eq!(fds, (91..=100).collect::<Vec<_>>());
    }
}
