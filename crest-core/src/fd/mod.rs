// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Open descriptor inspection.
//!
//! The ledger snapshots the descriptor table, the classifier decides which
//! descriptors block a checkpoint, and the socket tables describe offending
//! sockets.

pub mod classify;
pub mod ledger;
pub mod sockets;

pub use classify::{
    classify, CheckpointFailure, ClassificationPolicy, ClassificationReport, ControlSocketPredicate,
    Decision, FailureKind, Verdict,
};
pub use ledger::{
    is_nfs_silly_rename, max_open_files, read_fd_link, same_open_file, FdLedger, FdMarks, FdRecord,
    FdStat, FdState,
};
pub use sockets::{SocketEntry, SocketTables};
