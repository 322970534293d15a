// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! ShmSegment - named POSIX shared memory object.
//!
//! Segments are named `/crest_<id>`. The writer creates the object fresh, the
//! reader unlinks the name right after opening so the backing store lives
//! only as long as the reader's descriptor.

use std::ffi::CString;
use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::io::{FromRawFd, OwnedFd};

use crate::error::ParameterChannelError;

/// Name prefix of parameter segments.
pub const SEGMENT_PREFIX: &str = "crest_";

/// An open shared memory object, read and written like a file.
#[derive(Debug)]
pub struct ShmSegment {
    name: String,
    file: File,
}

impl ShmSegment {
    /// Object name for segment `id`.
    pub fn name_for(id: i32) -> String {
        format!("/{}{}", SEGMENT_PREFIX, id)
    }

    /// Create segment `id` empty, replacing any stale object of that name.
    pub fn create(id: i32) -> Result<Self, ParameterChannelError> {
        let name = Self::name_for(id);
        let fd = shm_open(&name, libc::O_CREAT | libc::O_RDWR | libc::O_TRUNC, 0o600)?;

        tracing::debug!(name = %name, "Created shared memory segment");

        Ok(Self {
            name,
            file: File::from(fd),
        })
    }

    /// Open segment `id` for reading and unlink its name.
    pub fn open_and_unlink(id: i32) -> Result<Self, ParameterChannelError> {
        let name = Self::name_for(id);
        let fd = shm_open(&name, libc::O_RDONLY, 0)?;

        if let Err(e) = shm_unlink(&name) {
            tracing::warn!(name = %name, error = %e, "Failed to unlink shared memory segment");
        }

        tracing::debug!(name = %name, "Opened shared memory segment");

        Ok(Self {
            name,
            file: File::from(fd),
        })
    }

    /// Remove segment `id` by name.
    pub fn unlink(id: i32) -> Result<(), ParameterChannelError> {
        let name = Self::name_for(id);
        shm_unlink(&name).map_err(|e| ParameterChannelError::OpenFailed {
            name,
            reason: format!("shm_unlink failed: {}", e),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write all of `buf` with a single call, failing on a short write.
    pub fn write_exact(&mut self, buf: &[u8]) -> Result<(), ParameterChannelError> {
        if buf.is_empty() {
            return Ok(());
        }
        let written = self
            .file
            .write(buf)
            .map_err(|e| ParameterChannelError::WriteFailed {
                reason: e.to_string(),
            })?;
        if written != buf.len() {
            return Err(ParameterChannelError::TruncatedWrite {
                expected: buf.len(),
                written,
            });
        }
        Ok(())
    }

    /// Read the whole segment from the current position.
    pub fn read_all(&mut self) -> Result<Vec<u8>, ParameterChannelError> {
        let mut content = Vec::new();
        self.file
            .read_to_end(&mut content)
            .map_err(|e| ParameterChannelError::ReadFailed {
                reason: e.to_string(),
            })?;
        Ok(content)
    }
}

fn shm_open(name: &str, flags: libc::c_int, mode: libc::mode_t) -> Result<OwnedFd, ParameterChannelError> {
    let c_name = CString::new(name).map_err(|e| ParameterChannelError::OpenFailed {
        name: name.to_string(),
        reason: format!("Invalid name: {}", e),
    })?;

    // SAFETY: c_name is a valid NUL-terminated string, flags are valid POSIX flags
    let fd = unsafe { libc::shm_open(c_name.as_ptr(), flags, mode) };
    if fd < 0 {
        return Err(ParameterChannelError::OpenFailed {
            name: name.to_string(),
            reason: format!("shm_open failed: {}", std::io::Error::last_os_error()),
        });
    }

    // SAFETY: fd was just returned by shm_open and is owned by nobody else
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn shm_unlink(name: &str) -> std::io::Result<()> {
    let c_name = CString::new(name)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    // SAFETY: c_name is a valid NUL-terminated string
    if unsafe { libc::shm_unlink(c_name.as_ptr()) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
