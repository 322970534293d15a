// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! Following the "Newtype" pattern in Rust to ensure valid state by construction.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of an open file object: the (device, inode) pair from `fstat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileIdentity {
    pub device: u64,
    pub inode: u64,
}

impl FileIdentity {
    pub const fn new(device: u64, inode: u64) -> Self {
        Self { device, inode }
    }

    /// Identity of a stat result.
    pub fn of(stat: &libc::stat) -> Self {
        Self {
            device: stat.st_dev as u64,
            inode: stat.st_ino as u64,
        }
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device, self.inode)
    }
}

/// Identifier of a restore-parameter shared memory segment.
/// Always positive: a zero payload on the restore signal means "no segment".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShmId(i32);

impl ShmId {
    /// Create a segment id, rejecting zero and negative values.
    pub fn new(id: i32) -> Option<Self> {
        if id > 0 {
            Some(Self(id))
        } else {
            None
        }
    }

    /// Get the inner id value.
    pub fn value(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for ShmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ShmId> for i32 {
    fn from(id: ShmId) -> Self {
        id.0
    }
}

/// Kind of file object behind a descriptor, from the `st_mode` type bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    Socket,
    Symlink,
    Regular,
    Block,
    Directory,
    Character,
    Fifo,
    Unknown,
}

impl FileKind {
    /// Decode the file type bits of a mode.
    pub fn from_mode(mode: libc::mode_t) -> Self {
        match mode & libc::S_IFMT {
            libc::S_IFSOCK => Self::Socket,
            libc::S_IFLNK => Self::Symlink,
            libc::S_IFREG => Self::Regular,
            libc::S_IFBLK => Self::Block,
            libc::S_IFDIR => Self::Directory,
            libc::S_IFCHR => Self::Character,
            libc::S_IFIFO => Self::Fifo,
            _ => Self::Unknown,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Socket => "socket",
            Self::Symlink => "symlink",
            Self::Regular => "regular",
            Self::Block => "block",
            Self::Directory => "directory",
            Self::Character => "character",
            Self::Fifo => "fifo",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
