// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Resume notification over a dedicated real-time signal.
//!
//! After the engine resurrects the process, the restoring side queues
//! `SIGRTMIN + 2` with an integer payload: a positive shared memory segment
//! id, or 0 when no parameters were handed over. The checkpointing thread
//! blocks in `sigwaitinfo` until exactly that signal arrives.
//!
//! The signal must be blocked in every thread, otherwise its default action
//! terminates the process. Block it in the main thread before spawning others.

use std::mem::MaybeUninit;

use crate::error::SignalProtocolViolation;
use crate::types::ShmId;

/// `si_code` of signals sent with `sigqueue`.
const SI_QUEUE: libc::c_int = -1;

extern "C" {
    fn sigqueue(pid: libc::pid_t, sig: libc::c_int, value: libc::sigval) -> libc::c_int;
}

/// Offset of the restore signal above `SIGRTMIN`.
const RESTORE_SIGNAL_OFFSET: libc::c_int = 2;

/// Signal number announcing a completed restore.
pub fn restore_signal() -> libc::c_int {
    libc::SIGRTMIN() + RESTORE_SIGNAL_OFFSET
}

/// What the restoring side handed over with the wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeToken {
    /// Segment holding restore parameters, if any.
    pub shm_id: Option<ShmId>,
}

/// Single-shot, cross-process "resumed" notification with an integer payload.
pub trait ResumeNotifier {
    /// Block until the resume notification arrives.
    fn wait_for_resume(&self) -> Result<ResumeToken, SignalProtocolViolation>;
}

/// Validate the delivery code and payload of a restore signal.
pub fn decode_resume(code: i32, payload: i32) -> Result<ResumeToken, SignalProtocolViolation> {
    if code != SI_QUEUE {
        return Err(SignalProtocolViolation::NotQueued { code });
    }
    if payload < 0 {
        return Err(SignalProtocolViolation::InvalidPayload { payload });
    }
    Ok(ResumeToken {
        shm_id: ShmId::new(payload),
    })
}

/// The restore signal as a [`ResumeNotifier`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RestoreSignal;

impl RestoreSignal {
    pub fn new() -> Self {
        Self
    }

    fn signal_set() -> Result<libc::sigset_t, SignalProtocolViolation> {
        let mut set = MaybeUninit::<libc::sigset_t>::uninit();
        // SAFETY: set points to writable storage; sigemptyset initializes it
        // before sigaddset reads it.
        let ret = unsafe {
            if libc::sigemptyset(set.as_mut_ptr()) != 0 {
                -1
            } else {
                libc::sigaddset(set.as_mut_ptr(), restore_signal())
            }
        };
        if ret != 0 {
            return Err(SignalProtocolViolation::MaskFailed {
                reason: std::io::Error::last_os_error().to_string(),
            });
        }
        // SAFETY: initialized by sigemptyset above
        Ok(unsafe { set.assume_init() })
    }

    /// Block the restore signal in the calling thread. Threads spawned
    /// afterwards inherit the mask.
    pub fn block_in_current_thread() -> Result<(), SignalProtocolViolation> {
        let set = Self::signal_set()?;
        // SAFETY: set is a valid initialized signal set; the old mask is not requested
        let ret = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
        if ret != 0 {
            return Err(SignalProtocolViolation::MaskFailed {
                reason: std::io::Error::from_raw_os_error(ret).to_string(),
            });
        }
        Ok(())
    }
}

impl ResumeNotifier for RestoreSignal {
    fn wait_for_resume(&self) -> Result<ResumeToken, SignalProtocolViolation> {
        Self::block_in_current_thread()?;
        let set = Self::signal_set()?;

        tracing::info!(signal = restore_signal(), "Waiting for restore signal");

        let info = loop {
            let mut info = MaybeUninit::<libc::siginfo_t>::zeroed();
            // SAFETY: set is initialized and info points to writable storage
            let sig = unsafe { libc::sigwaitinfo(&set, info.as_mut_ptr()) };
            if sig == restore_signal() {
                // SAFETY: sigwaitinfo filled info for the returned signal
                break unsafe { info.assume_init() };
            }
            let err = std::io::Error::last_os_error();
            if sig < 0 && err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            if sig < 0 {
                return Err(SignalProtocolViolation::WaitFailed {
                    reason: err.to_string(),
                });
            }
        };

        // SAFETY: for queued signals the value field is valid
        let payload = sigval_int(unsafe { info.si_value() });
        let token = decode_resume(info.si_code, payload)?;

        tracing::info!(shm_id = ?token.shm_id.map(|id| id.value()), "Restore signal received");
        Ok(token)
    }
}

/// `sival_int` member of a `union sigval`, which shares its first bytes
/// with `sival_ptr` on every byte order.
fn sigval_int(value: libc::sigval) -> libc::c_int {
    // SAFETY: the union is at least as large and as aligned as a c_int
    unsafe { std::ptr::addr_of!(value).cast::<libc::c_int>().read() }
}

/// `union sigval` with `sival_int` set to `payload`.
fn int_sigval(payload: libc::c_int) -> libc::sigval {
    let mut value = libc::sigval {
        sival_ptr: std::ptr::null_mut(),
    };
    // SAFETY: as in sigval_int; the remaining bytes stay zeroed
    unsafe { std::ptr::addr_of_mut!(value).cast::<libc::c_int>().write(payload) };
    value
}

/// Queue the restore signal to `pid` with `payload`.
pub fn notify_restored(pid: libc::pid_t, payload: i32) -> Result<(), SignalProtocolViolation> {
    let value = int_sigval(payload);
    // SAFETY: plain syscall wrapper taking integers and a by-value union
    let ret = unsafe { sigqueue(pid, restore_signal(), value) };
    if ret != 0 {
        return Err(SignalProtocolViolation::NotifyFailed {
            pid,
            reason: std::io::Error::last_os_error().to_string(),
        });
    }

    tracing::debug!(pid = pid, payload = payload, "Queued restore signal");
    Ok(())
}
