// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Restore parameter blob carried through a shared memory segment.
//!
//! Layout, native byte order:
//!
//! ```text
//! i64 restore time (wall ms) | i64 restore counter (monotonic ns)
//! i32 property count         | i32 environment block size
//! property "key=value\0" * count
//! environment block: "KEY=VALUE\0" entries, exactly `size` bytes
//! argument string "\0"
//! ```

use std::ffi::OsStr;
use std::os::unix::ffi::{OsStrExt, OsStringExt};

use crate::error::ParameterChannelError;
use crate::shm::ShmSegment;

/// Size of the fixed header.
pub const HEADER_SIZE: usize = 8 + 8 + 4 + 4;

/// Parameters handed from the restoring process to the resumed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreParameters {
    pub restore_time_ms: i64,
    pub restore_counter_ns: i64,
    /// `key=value` strings.
    pub properties: Vec<String>,
    /// `KEY=VALUE` entries without their terminators.
    pub environment: Vec<Vec<u8>>,
    pub args: String,
}

impl RestoreParameters {
    /// Parameters carrying the current process environment.
    pub fn capture(
        properties: Vec<String>,
        args: impl Into<String>,
        restore_time_ms: i64,
        restore_counter_ns: i64,
    ) -> Self {
        let environment = std::env::vars_os()
            .map(|(key, value)| {
                let mut entry = key.into_vec();
                entry.push(b'=');
                entry.extend_from_slice(value.as_bytes());
                entry
            })
            .collect();

        Self {
            restore_time_ms,
            restore_counter_ns,
            properties,
            environment,
            args: args.into(),
        }
    }

    /// Byte length of the environment block.
    pub fn environment_size(&self) -> usize {
        self.environment.iter().map(|entry| entry.len() + 1).sum()
    }

    fn header(&self) -> Result<[u8; HEADER_SIZE], ParameterChannelError> {
        let nprops = i32::try_from(self.properties.len()).map_err(|_| {
            ParameterChannelError::WriteFailed {
                reason: format!("{} properties do not fit the header", self.properties.len()),
            }
        })?;
        let env_size = i32::try_from(self.environment_size()).map_err(|_| {
            ParameterChannelError::WriteFailed {
                reason: format!("environment of {} bytes does not fit the header", self.environment_size()),
            }
        })?;

        let mut header = [0u8; HEADER_SIZE];
        header[0..8].copy_from_slice(&self.restore_time_ms.to_ne_bytes());
        header[8..16].copy_from_slice(&self.restore_counter_ns.to_ne_bytes());
        header[16..20].copy_from_slice(&nprops.to_ne_bytes());
        header[20..24].copy_from_slice(&env_size.to_ne_bytes());
        Ok(header)
    }

    fn check_strings(&self) -> Result<(), ParameterChannelError> {
        let has_nul = self.properties.iter().any(|p| p.contains('\0'))
            || self.environment.iter().any(|e| e.contains(&0))
            || self.args.contains('\0');
        if has_nul {
            return Err(ParameterChannelError::WriteFailed {
                reason: "parameter strings cannot contain NUL".to_string(),
            });
        }
        Ok(())
    }

    /// Encoded blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ParameterChannelError> {
        self.check_strings()?;
        let mut bytes = self.header()?.to_vec();
        for property in &self.properties {
            bytes.extend_from_slice(property.as_bytes());
            bytes.push(0);
        }
        for entry in &self.environment {
            bytes.extend_from_slice(entry);
            bytes.push(0);
        }
        bytes.extend_from_slice(self.args.as_bytes());
        bytes.push(0);
        Ok(bytes)
    }

    /// Write the blob piece by piece; any short write fails the whole hand-off.
    pub fn write_to(&self, segment: &mut ShmSegment) -> Result<(), ParameterChannelError> {
        self.check_strings()?;
        segment.write_exact(&self.header()?)?;

        let mut buf = Vec::new();
        for piece in self
            .properties
            .iter()
            .map(|p| p.as_bytes())
            .chain(self.environment.iter().map(Vec::as_slice))
            .chain(std::iter::once(self.args.as_bytes()))
        {
            buf.clear();
            buf.extend_from_slice(piece);
            buf.push(0);
            segment.write_exact(&buf)?;
        }

        tracing::debug!(
            segment = %segment.name(),
            properties = self.properties.len(),
            env_size = self.environment_size(),
            "Wrote restore parameters"
        );
        Ok(())
    }

    /// Read and parse the whole segment.
    pub fn read_from(segment: &mut ShmSegment) -> Result<Self, ParameterChannelError> {
        let content = segment.read_all()?;
        Self::parse(&content)
    }

    /// Parse a blob. Nothing is applied, so a corrupt blob has no effect.
    pub fn parse(content: &[u8]) -> Result<Self, ParameterChannelError> {
        if content.len() < HEADER_SIZE {
            return Err(corrupt(format!(
                "{} bytes is shorter than the {} byte header",
                content.len(),
                HEADER_SIZE
            )));
        }

        let restore_time_ms = i64::from_ne_bytes(field(content, 0));
        let restore_counter_ns = i64::from_ne_bytes(field(content, 8));
        let nprops = i32::from_ne_bytes(field(content, 16));
        let env_size = i32::from_ne_bytes(field(content, 20));

        let nprops = usize::try_from(nprops)
            .map_err(|_| corrupt(format!("negative property count {}", nprops)))?;
        let env_size = usize::try_from(env_size)
            .map_err(|_| corrupt(format!("negative environment size {}", env_size)))?;

        let mut rest = &content[HEADER_SIZE..];

        let mut properties = Vec::with_capacity(nprops.min(rest.len()));
        for index in 0..nprops {
            let (property, tail) = split_terminated(rest)
                .ok_or_else(|| corrupt(format!("property {} overruns the segment", index)))?;
            let property = std::str::from_utf8(property)
                .map_err(|e| corrupt(format!("property {} is not UTF-8: {}", index, e)))?;
            properties.push(property.to_string());
            rest = tail;
        }

        if env_size > rest.len() {
            return Err(corrupt(format!(
                "environment block of {} bytes exceeds the {} bytes left",
                env_size,
                rest.len()
            )));
        }
        let (mut block, tail) = rest.split_at(env_size);
        let mut environment = Vec::new();
        while !block.is_empty() {
            let (entry, next) = split_terminated(block)
                .ok_or_else(|| corrupt("environment entry exceeds the declared block".to_string()))?;
            environment.push(entry.to_vec());
            block = next;
        }

        let (args, _) = split_terminated(tail)
            .ok_or_else(|| corrupt("argument string is not terminated".to_string()))?;
        let args = std::str::from_utf8(args)
            .map_err(|e| corrupt(format!("arguments are not UTF-8: {}", e)))?
            .to_string();

        Ok(Self {
            restore_time_ms,
            restore_counter_ns,
            properties,
            environment,
            args,
        })
    }

    /// Install every environment entry into the process environment.
    /// An entry without `=` removes the variable.
    pub fn apply_environment(&self) {
        for entry in &self.environment {
            match entry.iter().position(|b| *b == b'=') {
                Some(0) => continue,
                Some(eq) => std::env::set_var(
                    OsStr::from_bytes(&entry[..eq]),
                    OsStr::from_bytes(&entry[eq + 1..]),
                ),
                None if entry.is_empty() => continue,
                None => std::env::remove_var(OsStr::from_bytes(entry)),
            }
        }
    }
}

fn corrupt(reason: String) -> ParameterChannelError {
    ParameterChannelError::Corrupt { reason }
}

fn field<const N: usize>(content: &[u8], offset: usize) -> [u8; N] {
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(&content[offset..offset + N]);
    bytes
}

/// Split off a NUL-terminated string, dropping the terminator.
fn split_terminated(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let nul = bytes.iter().position(|b| *b == 0)?;
    Some((&bytes[..nul], &bytes[nul + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RestoreParameters {
        RestoreParameters {
            restore_time_ms: 1_700_000_000_123,
            restore_counter_ns: 987_654_321,
            properties: vec!["a=1".to_string(), "b=2".to_string()],
            environment: vec![b"PATH=/bin".to_vec(), b"X=1".to_vec()],
            args: "-Dfoo=bar".to_string(),
        }
    }

    #[test]
    fn test_layout() {
        let bytes = sample().to_bytes().unwrap();

        assert_eq!(&bytes[16..20], &2i32.to_ne_bytes());
        assert_eq!(&bytes[20..24], &14i32.to_ne_bytes());
        assert_eq!(&bytes[HEADER_SIZE..], b"a=1\0b=2\0PATH=/bin\0X=1\0-Dfoo=bar\0");
    }

    #[test]
    fn test_parse_sample_blob() {
        let bytes = sample().to_bytes().unwrap();
        let parsed = RestoreParameters::parse(&bytes).unwrap();

        assert_eq!(parsed.properties, vec!["a=1", "b=2"]);
        assert_eq!(parsed.environment, vec![b"PATH=/bin".to_vec(), b"X=1".to_vec()]);
        assert_eq!(parsed.environment_size(), b"PATH=/bin\0X=1\0".len());
        assert_eq!(parsed.args, "-Dfoo=bar");
        assert_eq!(parsed.restore_time_ms, 1_700_000_000_123);
        assert_eq!(parsed.restore_counter_ns, 987_654_321);
    }

    #[test]
    fn test_empty_sections() {
        let params = RestoreParameters {
            restore_time_ms: 1,
            restore_counter_ns: 2,
            properties: vec![],
            environment: vec![],
            args: String::new(),
        };
        let bytes = params.to_bytes().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 1);
        assert_eq!(RestoreParameters::parse(&bytes).unwrap(), params);
    }

    #[test]
    fn test_short_header_is_corrupt() {
        assert!(matches!(
            RestoreParameters::parse(&[0u8; 10]),
            Err(ParameterChannelError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_property_overrun_is_corrupt() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[16..20].copy_from_slice(&50i32.to_ne_bytes());
        assert!(matches!(
            RestoreParameters::parse(&bytes),
            Err(ParameterChannelError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_environment_overrun_is_corrupt() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[20..24].copy_from_slice(&4096i32.to_ne_bytes());
        assert!(RestoreParameters::parse(&bytes).is_err());
    }

    #[test]
    fn test_environment_size_mid_entry_is_corrupt() {
        let mut bytes = sample().to_bytes().unwrap();
        // Cuts "X=1\0" after "X=".
        bytes[20..24].copy_from_slice(&12i32.to_ne_bytes());
        assert!(RestoreParameters::parse(&bytes).is_err());
    }

    #[test]
    fn test_negative_counts_are_corrupt() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[16..20].copy_from_slice(&(-1i32).to_ne_bytes());
        assert!(RestoreParameters::parse(&bytes).is_err());
    }

    #[test]
    fn test_missing_args_terminator_is_corrupt() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes.pop();
        assert!(RestoreParameters::parse(&bytes).is_err());
    }

    #[test]
    fn test_nul_in_property_rejected() {
        let mut params = sample();
        params.properties.push("bad=\0".to_string());
        assert!(matches!(
            params.to_bytes(),
            Err(ParameterChannelError::WriteFailed { .. })
        ));
    }

    #[test]
    fn test_capture_includes_environment() {
        std::env::set_var("CREST_PARAMS_CAPTURE_TEST", "yes");
        let params = RestoreParameters::capture(vec![], "", 0, 0);
        assert!(params
            .environment
            .iter()
            .any(|e| e.as_slice() == b"CREST_PARAMS_CAPTURE_TEST=yes"));
    }

    #[test]
    fn test_apply_environment() {
        std::env::set_var("CREST_PARAMS_REMOVED", "old");
        let params = RestoreParameters {
            restore_time_ms: 0,
            restore_counter_ns: 0,
            properties: vec![],
            environment: vec![
                b"CREST_PARAMS_APPLIED=new=value".to_vec(),
                b"CREST_PARAMS_REMOVED".to_vec(),
                b"=ignored".to_vec(),
            ],
            args: String::new(),
        };
        params.apply_environment();

        assert_eq!(
            std::env::var("CREST_PARAMS_APPLIED").as_deref(),
            Ok("new=value")
        );
        assert!(std::env::var_os("CREST_PARAMS_REMOVED").is_none());
    }
}
