// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! FdLedger - snapshot of every open descriptor of the process.
//!
//! Built fresh for each checkpoint attempt while the process is paused:
//! stat every descriptor, fold aliases of one open file description onto the
//! first descriptor referring to it, and flag targets the engine cannot
//! re-create from a path.

use std::collections::BTreeSet;
use std::os::unix::fs::DirEntryExt;
use std::os::unix::io::RawFd;
use std::path::Path;

use bitflags::bitflags;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::resource::{getrlimit, Resource};
use nix::sys::stat::{fstat, stat};

use crate::persistent::PersistentResource;
use crate::types::{FileIdentity, FileKind};

/// Fallback descriptor limit when the resource limit is unavailable.
const DEFAULT_MAX_FD: RawFd = 1024;

/// Directory listing the process's open descriptors.
const PROC_SELF_FD: &str = "/proc/self/fd";

/// Marker the kernel appends to link targets of unlinked files.
const DELETED_MARKER: &str = "(deleted)";

/// NFS "silly rename": `.nfs` followed by a 64-bit file id and a 32-bit counter in hex.
const NFS_PREFIX: &str = ".nfs";
const NFS_HEX_LEN: usize = 16 + 8;

bitflags! {
    /// Classification marks on a descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FdMarks: u8 {
        /// Held by the runtime's archive cache.
        const ZIP_CACHE = 1 << 0;
        /// Target cannot be re-created from its path after restore.
        const CANNOT_RESTORE = 1 << 1;
        /// Target is a class path entry or lives in an extension directory.
        const CLASSPATH = 1 << 2;
        /// Exempted by a persistent resource registration.
        const PERSISTENT = 1 << 3;
    }
}

/// Aliasing state of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdState {
    Closed,
    /// First descriptor referring to its open file description.
    Root,
    /// Shares the open file description of an earlier root descriptor.
    AliasOf(RawFd),
}

/// `fstat` results kept for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdStat {
    pub identity: FileIdentity,
    pub kind: FileKind,
    pub nlink: u64,
    pub rdev: u64,
}

impl FdStat {
    fn from_stat(st: &libc::stat) -> Self {
        Self {
            identity: FileIdentity::of(st),
            kind: FileKind::from_mode(st.st_mode),
            nlink: st.st_nlink as u64,
            rdev: st.st_rdev as u64,
        }
    }
}

/// One descriptor slot of the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdRecord {
    pub fd: RawFd,
    pub state: FdState,
    pub marks: FdMarks,
    /// `None` for closed slots.
    pub stat: Option<FdStat>,
    /// Link target from `/proc/self/fd`, when readable.
    pub target: Option<String>,
}

impl FdRecord {
    fn closed(fd: RawFd) -> Self {
        Self {
            fd,
            state: FdState::Closed,
            marks: FdMarks::empty(),
            stat: None,
            target: None,
        }
    }

    /// Record for an open descriptor, before alias detection.
    pub fn open(fd: RawFd, stat: FdStat, target: Option<String>) -> Self {
        Self {
            fd,
            state: FdState::Root,
            marks: FdMarks::empty(),
            stat: Some(stat),
            target,
        }
    }

    pub fn is_root(&self) -> bool {
        self.state == FdState::Root
    }

    pub fn is_closed(&self) -> bool {
        self.state == FdState::Closed
    }

    pub fn has(&self, mark: FdMarks) -> bool {
        self.marks.contains(mark)
    }

    pub fn identity(&self) -> Option<FileIdentity> {
        self.stat.map(|st| st.identity)
    }
}

/// Snapshot of the descriptor table, indexed by descriptor number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdLedger {
    /// Slots `0..=last open fd`; trailing closed slots are not kept.
    records: Vec<FdRecord>,
}

impl FdLedger {
    /// Enumerate descriptors below the open-files resource limit.
    pub fn build() -> Self {
        Self::build_with_limit(max_open_files())
    }

    /// Enumerate descriptors `0..max_fd`.
    pub fn build_with_limit(max_fd: RawFd) -> Self {
        let mut records = Vec::new();

        for fd in descriptor_candidates(max_fd) {
            let st = match fstat(fd) {
                Ok(st) => st,
                Err(_) => continue,
            };
            while records.len() < fd as usize {
                records.push(FdRecord::closed(records.len() as RawFd));
            }
            records.push(FdRecord::open(fd, FdStat::from_stat(&st), read_fd_link(fd)));
        }

        let mut ledger = Self { records };
        ledger.detect_aliases();
        ledger.mark_unrestorable();

        tracing::debug!(
            max_fd = max_fd,
            slots = ledger.len(),
            open = ledger.open_fds().len(),
            "Built descriptor ledger"
        );

        ledger
    }

    /// Assemble a ledger from prepared records, running the same pre-checks as
    /// [`FdLedger::build`] except alias detection, which needs live descriptors.
    /// Later records with a repeated descriptor number are dropped.
    pub fn from_records(mut records: Vec<FdRecord>) -> Self {
        records.sort_by_key(|r| r.fd);
        records.dedup_by_key(|r| r.fd);
        let mut slots: Vec<FdRecord> = Vec::new();
        for record in records {
            while slots.len() < record.fd as usize {
                slots.push(FdRecord::closed(slots.len() as RawFd));
            }
            slots.push(record);
        }
        let mut ledger = Self { records: slots };
        ledger.mark_unrestorable();
        ledger
    }

    /// Number of slots, one past the highest open descriptor.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, fd: RawFd) -> Option<&FdRecord> {
        usize::try_from(fd).ok().and_then(|i| self.records.get(i))
    }

    /// State of `fd`; descriptors past the end of the ledger are closed.
    pub fn state(&self, fd: RawFd) -> FdState {
        self.get(fd).map_or(FdState::Closed, |r| r.state)
    }

    pub fn records(&self) -> &[FdRecord] {
        &self.records
    }

    /// Non-closed descriptors.
    pub fn open_records(&self) -> impl Iterator<Item = &FdRecord> {
        self.records.iter().filter(|r| !r.is_closed())
    }

    pub fn open_fds(&self) -> BTreeSet<RawFd> {
        self.open_records().map(|r| r.fd).collect()
    }

    /// Add `mark` to a non-closed descriptor.
    pub fn mark(&mut self, fd: RawFd, mark: FdMarks) {
        if let Some(record) = usize::try_from(fd)
            .ok()
            .and_then(|i| self.records.get_mut(i))
        {
            if !record.is_closed() {
                record.marks |= mark;
            }
        }
    }

    /// Mark root descriptors whose identity equals that of `entry`.
    /// Entries that cannot be stat'ed are ignored.
    pub fn mark_classpath_entry(&mut self, entry: &Path) {
        let Ok(st) = stat(entry) else {
            return;
        };
        let identity = FileIdentity::of(&st);
        for record in self.records.iter_mut() {
            if record.is_root() && record.identity() == Some(identity) {
                record.marks |= FdMarks::CLASSPATH;
            }
        }
    }

    /// Mark every entry of a colon-separated class path.
    pub fn mark_classpath(&mut self, classpath: &str) {
        for entry in classpath.split(':').filter(|e| !e.is_empty()) {
            self.mark_classpath_entry(Path::new(entry));
        }
    }

    /// Mark root descriptors whose inode appears in directory `dir`.
    pub fn mark_all_in(&mut self, dir: &Path) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        let inodes: BTreeSet<u64> = entries.flatten().map(|entry| entry.ino()).collect();
        for record in self.records.iter_mut() {
            if !record.is_root() {
                continue;
            }
            if record.identity().is_some_and(|id| inodes.contains(&id.inode)) {
                record.marks |= FdMarks::CLASSPATH;
            }
        }
    }

    /// Mark every directory of a colon-separated extension directory list.
    pub fn mark_extension_dirs(&mut self, dirs: &str) {
        for dir in dirs.split(':').filter(|d| !d.is_empty()) {
            self.mark_all_in(Path::new(dir));
        }
    }

    /// Mark root descriptors that match a registered `(fd, device, inode)`.
    /// `resources` must be sorted by descriptor.
    pub fn mark_persistent(&mut self, resources: &[PersistentResource]) {
        for resource in resources {
            let Ok(index) = usize::try_from(resource.fd) else {
                continue;
            };
            let Some(record) = self.records.get_mut(index) else {
                break;
            };
            if record.is_root() && record.identity() == Some(resource.identity) {
                record.marks |= FdMarks::PERSISTENT;
            }
        }
    }

    fn detect_aliases(&mut self) {
        for i in 0..self.records.len() {
            if !self.records[i].is_root() {
                continue;
            }
            for j in 0..i {
                if self.records[j].is_root()
                    && self.records[i].identity() == self.records[j].identity()
                    && same_open_file(i as RawFd, j as RawFd)
                {
                    self.records[i].state = FdState::AliasOf(j as RawFd);
                    break;
                }
            }
        }
    }

    fn mark_unrestorable(&mut self) {
        for record in self.records.iter_mut().filter(|r| r.is_root()) {
            let unlinked = record.stat.is_some_and(|st| st.nlink == 0);
            let bad_target = record
                .target
                .as_deref()
                .is_some_and(|t| t.contains(DELETED_MARKER) || is_nfs_silly_rename(t));
            if unlinked || bad_target {
                record.marks |= FdMarks::CANNOT_RESTORE;
            }
        }
    }
}

/// Soft limit on open files, the upper bound of the descriptor scan.
pub fn max_open_files() -> RawFd {
    match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok((soft, _)) if soft == libc::RLIM_INFINITY => RawFd::MAX,
        Ok((soft, _)) => RawFd::try_from(soft).unwrap_or(RawFd::MAX),
        Err(errno) => {
            tracing::warn!(error = %errno, "getrlimit(RLIMIT_NOFILE) failed, assuming {}", DEFAULT_MAX_FD);
            DEFAULT_MAX_FD
        }
    }
}

/// Descriptors worth stat'ing, in ascending order.
///
/// The listing of `/proc/self/fd` keeps the scan proportional to the number of
/// open descriptors; without procfs every number below `max_fd` is probed.
fn descriptor_candidates(max_fd: RawFd) -> Vec<RawFd> {
    match std::fs::read_dir(PROC_SELF_FD) {
        Ok(entries) => {
            let mut fds: Vec<RawFd> = entries
                .flatten()
                .filter_map(|entry| entry.file_name().to_str()?.parse::<RawFd>().ok())
                .filter(|fd| *fd < max_fd)
                .collect();
            // The listing's own descriptor shows up here; fstat drops it once closed.
            fds.sort_unstable();
            fds
        }
        Err(_) => (0..max_fd.min(DEFAULT_MAX_FD * 1024)).collect(),
    }
}

/// Link target of a descriptor, e.g. a path, `pipe:[123]` or `socket:[456]`.
pub fn read_fd_link(fd: RawFd) -> Option<String> {
    std::fs::read_link(format!("{}/{}", PROC_SELF_FD, fd))
        .ok()
        .map(|target| target.to_string_lossy().into_owned())
}

/// Whether the basename of `path` follows the NFS silly-rename convention.
pub fn is_nfs_silly_rename(path: &str) -> bool {
    let base = path.rsplit('/').next().unwrap_or(path);
    let Some(rest) = base.strip_prefix(NFS_PREFIX) else {
        return false;
    };
    rest.len() >= NFS_HEX_LEN
        && rest.as_bytes()[..NFS_HEX_LEN]
            .iter()
            .all(u8::is_ascii_hexdigit)
}

/// Whether two descriptors share one open file description.
///
/// Asks the kernel through `kcmp(KCMP_FILE)` and falls back to toggling
/// `O_NONBLOCK` on `fd` and observing it through `other`.
pub fn same_open_file(fd: RawFd, other: RawFd) -> bool {
    match kcmp_file(fd, other) {
        Some(same) => same,
        None => same_by_flag_toggle(fd, other),
    }
}

const KCMP_FILE: libc::c_int = 0;

fn kcmp_file(fd: RawFd, other: RawFd) -> Option<bool> {
    let pid = std::process::id() as libc::pid_t;
    // SAFETY: kcmp only compares kernel objects; arguments are plain integers.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_kcmp,
            pid,
            pid,
            KCMP_FILE,
            fd as libc::c_ulong,
            other as libc::c_ulong,
        )
    };
    match ret {
        0 => Some(true),
        1..=3 => Some(false),
        _ => None,
    }
}

fn same_by_flag_toggle(fd: RawFd, other: RawFd) -> bool {
    let (Ok(flags), Ok(other_flags)) = (
        fcntl(fd, FcntlArg::F_GETFL),
        fcntl(other, FcntlArg::F_GETFL),
    ) else {
        return false;
    };
    if flags != other_flags {
        return false;
    }

    let original = OFlag::from_bits_retain(flags);
    let toggled = original ^ OFlag::O_NONBLOCK;
    if fcntl(fd, FcntlArg::F_SETFL(toggled)).is_err() {
        return false;
    }

    let same = match fcntl(fd, FcntlArg::F_GETFL) {
        // Flag write ignored or handled differently: treat as distinct.
        Ok(now) if now != toggled.bits() => false,
        Ok(_) => fcntl(other, FcntlArg::F_GETFL).is_ok_and(|seen| seen == toggled.bits()),
        Err(_) => false,
    };

    if let Err(errno) = fcntl(fd, FcntlArg::F_SETFL(original)) {
        tracing::warn!(fd = fd, error = %errno, "Failed to restore descriptor flags");
    }

    same
}
