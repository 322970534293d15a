// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Restorability verdicts for the descriptors of a ledger.
//!
//! Every open root descriptor is either acceptable for one of a fixed set of
//! reasons or a checkpoint-blocking failure. Failures are accumulated so one
//! report lists every offending resource.

use std::collections::BTreeSet;
use std::fmt;
use std::os::unix::io::RawFd;

use nix::sys::stat::{major, minor};
use serde::Serialize;

use super::ledger::{FdLedger, FdMarks, FdRecord, FdState};
use super::sockets::SocketTables;
use crate::types::FileKind;

/// Character device major number of the memory devices.
const MEM_DEVICE_MAJOR: u64 = 1;
/// Minor numbers of `/dev/random` and `/dev/urandom`.
const RANDOM_DEVICE_MINORS: [u64; 2] = [8, 9];

/// Kind of an unrestorable resource, derived from the descriptor's file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    Socket,
    /// Regular files, symlinks, directories and device nodes.
    FileLike,
    Pipe,
    Generic,
}

impl FailureKind {
    pub fn of(kind: FileKind) -> Self {
        match kind {
            FileKind::Socket => Self::Socket,
            FileKind::Symlink
            | FileKind::Regular
            | FileKind::Block
            | FileKind::Directory
            | FileKind::Character => Self::FileLike,
            FileKind::Fifo => Self::Pipe,
            FileKind::Unknown => Self::Generic,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Socket => "socket",
            Self::FileLike => "file",
            Self::Pipe => "pipe",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One checkpoint-blocking descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointFailure {
    pub fd: RawFd,
    pub kind: FailureKind,
    /// Link target, or the resolved addresses for sockets.
    pub message: String,
}

impl fmt::Display for CheckpointFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd {} ({}): {}", self.fd, self.kind, self.message)
    }
}

/// Why a descriptor was accepted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Open before the process armed checkpointing.
    Inherited,
    RandomDevice,
    Classpath,
    Persistent,
    /// The control connection of the in-flight checkpoint request.
    ControlSocket,
    /// Shares its open file description with an earlier descriptor.
    Duplicate(RawFd),
    Blocked(FailureKind),
}

impl Verdict {
    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Blocked(_))
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::Inherited => "OK: inherited from process env",
            Self::RandomDevice => "OK: always available, random or urandom",
            Self::Classpath => "OK: in classpath",
            Self::Persistent => "OK: assured persistent",
            Self::ControlSocket => "OK: control socket",
            Self::Duplicate(_) => "OK: duplicate",
            Self::Blocked(_) => "BAD: opened by application",
        }
    }
}

/// Decision for one open descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub fd: RawFd,
    pub kind: FileKind,
    pub verdict: Verdict,
    pub details: String,
}

/// Result of one classification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationReport {
    pub decisions: Vec<Decision>,
    /// In descriptor order.
    pub failures: Vec<CheckpointFailure>,
}

impl ClassificationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Recognizes the control connection of the in-flight checkpoint request.
pub type ControlSocketPredicate<'a> = dyn Fn(RawFd) -> bool + 'a;

/// External inputs of classification besides the ledger itself.
pub struct ClassificationPolicy<'a> {
    inherited: BTreeSet<RawFd>,
    control_socket: Option<&'a ControlSocketPredicate<'a>>,
    sockets: SocketTables,
    print_resources: bool,
}

impl<'a> ClassificationPolicy<'a> {
    pub fn new(inherited: BTreeSet<RawFd>) -> Self {
        Self {
            inherited,
            control_socket: None,
            sockets: SocketTables::default(),
            print_resources: false,
        }
    }

    /// Exempt the socket for which `predicate` returns true.
    pub fn with_control_socket(mut self, predicate: &'a ControlSocketPredicate<'a>) -> Self {
        self.control_socket = Some(predicate);
        self
    }

    /// Connection tables used to describe offending sockets.
    pub fn with_sockets(mut self, sockets: SocketTables) -> Self {
        self.sockets = sockets;
        self
    }

    pub fn with_print_resources(mut self, print: bool) -> Self {
        self.print_resources = print;
        self
    }

    fn is_control_socket(&self, fd: RawFd) -> bool {
        self.control_socket.is_some_and(|predicate| predicate(fd))
    }

    fn judge(&self, record: &FdRecord, kind: FileKind, rdev: u64) -> Verdict {
        if let FdState::AliasOf(root) = record.state {
            return Verdict::Duplicate(root);
        }
        if self.inherited.contains(&record.fd) {
            return Verdict::Inherited;
        }
        if kind == FileKind::Character
            && major(rdev) == MEM_DEVICE_MAJOR
            && RANDOM_DEVICE_MINORS.contains(&minor(rdev))
        {
            return Verdict::RandomDevice;
        }
        if record.has(FdMarks::CLASSPATH) && !record.has(FdMarks::CANNOT_RESTORE) {
            return Verdict::Classpath;
        }
        if record.has(FdMarks::PERSISTENT) {
            return Verdict::Persistent;
        }
        if kind == FileKind::Socket && self.is_control_socket(record.fd) {
            return Verdict::ControlSocket;
        }
        Verdict::Blocked(FailureKind::of(kind))
    }
}

/// Judge every open descriptor of `ledger`.
///
/// Deterministic for a given ledger and policy.
pub fn classify(ledger: &FdLedger, policy: &ClassificationPolicy<'_>) -> ClassificationReport {
    let mut report = ClassificationReport::default();

    for record in ledger.open_records() {
        let Some(stat) = record.stat else {
            continue;
        };
        let verdict = policy.judge(record, stat.kind, stat.rdev);
        let target = record.target.clone().unwrap_or_default();
        let details = match verdict {
            Verdict::Blocked(FailureKind::Socket) => policy.sockets.details(&target),
            _ => target,
        };

        log_decision(policy.print_resources, record.fd, stat.kind, &details, verdict);

        if let Verdict::Blocked(kind) = verdict {
            report.failures.push(CheckpointFailure {
                fd: record.fd,
                kind,
                message: details.clone(),
            });
        }
        report.decisions.push(Decision {
            fd: record.fd,
            kind: stat.kind,
            verdict,
            details,
        });
    }

    tracing::debug!(
        open = report.decisions.len(),
        failures = report.failures.len(),
        "Classified descriptors"
    );

    report
}

fn log_decision(print: bool, fd: RawFd, kind: FileKind, details: &str, verdict: Verdict) {
    if print {
        tracing::info!(fd = fd, r#type = %kind, details = details, "{}", verdict.reason());
    } else {
        tracing::debug!(fd = fd, r#type = %kind, details = details, "{}", verdict.reason());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fd::ledger::{FdRecord, FdStat};
    use crate::persistent::PersistentResource;
    use crate::types::FileIdentity;

    fn record(fd: RawFd, kind: FileKind, inode: u64, rdev: u64, target: &str) -> FdRecord {
        FdRecord::open(
            fd,
            FdStat {
                identity: FileIdentity::new(1, inode),
                kind,
                nlink: 1,
                rdev,
            },
            Some(target.to_string()),
        )
    }

    fn urandom_rdev() -> u64 {
        libc::makedev(1, 9) as u64
    }

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(FailureKind::of(FileKind::Socket), FailureKind::Socket);
        assert_eq!(FailureKind::of(FileKind::Regular), FailureKind::FileLike);
        assert_eq!(FailureKind::of(FileKind::Directory), FailureKind::FileLike);
        assert_eq!(FailureKind::of(FileKind::Block), FailureKind::FileLike);
        assert_eq!(FailureKind::of(FileKind::Fifo), FailureKind::Pipe);
        assert_eq!(FailureKind::of(FileKind::Unknown), FailureKind::Generic);
    }

    #[test]
    fn test_exemptions() {
        let mut ledger = FdLedger::from_records(vec![
            record(0, FileKind::Character, 1, 0, "/dev/pts/0"),
            record(3, FileKind::Character, 2, urandom_rdev(), "/dev/urandom"),
            record(4, FileKind::Regular, 3, 0, "/app/app.jar"),
            record(5, FileKind::Regular, 4, 0, "/var/lib/app/state"),
            record(6, FileKind::Socket, 5, 0, "socket:[5]"),
            record(7, FileKind::Fifo, 6, 0, "pipe:[6]"),
        ]);
        ledger.mark(4, FdMarks::CLASSPATH);
        ledger.mark_persistent(&[PersistentResource::new(5, 1, 4)]);

        let is_control = |fd: RawFd| fd == 6;
        let policy = ClassificationPolicy::new(BTreeSet::from([0])).with_control_socket(&is_control);
        let report = classify(&ledger, &policy);

        let verdicts: Vec<Verdict> = report.decisions.iter().map(|d| d.verdict).collect();
        assert_eq!(
            verdicts,
            vec![
                Verdict::Inherited,
                Verdict::RandomDevice,
                Verdict::Classpath,
                Verdict::Persistent,
                Verdict::ControlSocket,
                Verdict::Blocked(FailureKind::Pipe),
            ]
        );
        assert_eq!(
            report.failures,
            vec![CheckpointFailure {
                fd: 7,
                kind: FailureKind::Pipe,
                message: "pipe:[6]".to_string(),
            }]
        );
    }

    #[test]
    fn test_other_char_device_blocked() {
        let ledger = FdLedger::from_records(vec![record(
            3,
            FileKind::Character,
            1,
            libc::makedev(1, 3) as u64,
            "/dev/null",
        )]);
        let report = classify(&ledger, &ClassificationPolicy::new(BTreeSet::new()));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, FailureKind::FileLike);
    }

    #[test]
    fn test_deleted_classpath_entry_blocked() {
        let mut ledger = FdLedger::from_records(vec![record(
            3,
            FileKind::Regular,
            1,
            0,
            "/app/old.jar (deleted)",
        )]);
        ledger.mark(3, FdMarks::CLASSPATH);
        let report = classify(&ledger, &ClassificationPolicy::new(BTreeSet::new()));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].message, "/app/old.jar (deleted)");
    }

    #[test]
    fn test_socket_without_predicate_blocked() {
        let ledger = FdLedger::from_records(vec![record(9, FileKind::Socket, 7, 0, "socket:[7]")]);
        let report = classify(&ledger, &ClassificationPolicy::new(BTreeSet::new()));
        assert_eq!(report.failures[0].kind, FailureKind::Socket);
        assert_eq!(report.failures[0].message, "socket:[7]");
    }

    #[test]
    fn test_classification_is_repeatable() {
        let ledger = FdLedger::from_records(vec![
            record(3, FileKind::Regular, 1, 0, "/tmp/a"),
            record(4, FileKind::Fifo, 2, 0, "pipe:[2]"),
        ]);
        let policy = ClassificationPolicy::new(BTreeSet::new());
        assert_eq!(classify(&ledger, &policy), classify(&ledger, &policy));
    }
}
