// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Socket diagnostics from the kernel's per-protocol connection tables.
//!
//! A socket descriptor only links to `socket:[<inode>]`; the addresses are
//! recovered by finding that inode in `/proc/net/{tcp,udp,tcp6,udp6}`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Tables consulted, in lookup order, with their address family.
const TABLES: [(&str, bool); 4] = [("tcp", false), ("udp", false), ("tcp6", true), ("udp6", true)];

/// One connection-table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEntry {
    pub protocol: &'static str,
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
    pub inode: u64,
}

impl SocketEntry {
    /// Human-readable one-line description.
    pub fn describe(&self) -> String {
        format!(
            "{} localAddr {} localPort {} remoteAddr {} remotePort {}",
            self.protocol, self.local_addr, self.local_port, self.remote_addr, self.remote_port
        )
    }
}

/// Rows of all connection tables, loaded once per classification pass.
#[derive(Debug, Clone, Default)]
pub struct SocketTables {
    entries: Vec<SocketEntry>,
}

impl SocketTables {
    /// Read the tables from procfs. Missing tables are skipped.
    pub fn load() -> Self {
        let mut entries = Vec::new();
        for (protocol, v6) in TABLES {
            if let Ok(content) = std::fs::read_to_string(format!("/proc/net/{}", protocol)) {
                entries.extend(parse_table(protocol, v6, &content));
            }
        }
        Self { entries }
    }

    pub fn from_entries(entries: Vec<SocketEntry>) -> Self {
        Self { entries }
    }

    pub fn find(&self, inode: u64) -> Option<&SocketEntry> {
        self.entries.iter().find(|e| e.inode == inode)
    }

    /// Describe a `socket:[<inode>]` link target, falling back to the target itself.
    pub fn details(&self, target: &str) -> String {
        socket_inode(target)
            .and_then(|inode| self.find(inode))
            .map(SocketEntry::describe)
            .unwrap_or_else(|| target.to_string())
    }
}

/// Inode of a `socket:[<inode>]` link target.
pub fn socket_inode(target: &str) -> Option<u64> {
    target
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Parse a connection table, skipping the header and malformed rows.
pub fn parse_table(protocol: &'static str, v6: bool, content: &str) -> Vec<SocketEntry> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| parse_row(protocol, v6, line))
        .collect()
}

// "  0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000  0 12345 ..."
fn parse_row(protocol: &'static str, v6: bool, line: &str) -> Option<SocketEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 10 {
        return None;
    }
    let (local_addr, local_port) = parse_endpoint(fields[1], v6)?;
    let (remote_addr, remote_port) = parse_endpoint(fields[2], v6)?;
    let inode = fields[9].parse().ok()?;

    Some(SocketEntry {
        protocol,
        local_addr,
        local_port,
        remote_addr,
        remote_port,
        inode,
    })
}

fn parse_endpoint(field: &str, v6: bool) -> Option<(IpAddr, u16)> {
    let (addr, port) = field.split_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;
    let addr = if v6 { parse_v6(addr)? } else { parse_v4(addr)? };
    Some((addr, port))
}

// The kernel prints each 32-bit word of the address as a host-order integer.
fn parse_v4(hex: &str) -> Option<IpAddr> {
    if hex.len() != 8 {
        return None;
    }
    let word = u32::from_str_radix(hex, 16).ok()?;
    Some(IpAddr::V4(Ipv4Addr::from(word.to_ne_bytes())))
}

fn parse_v6(hex: &str) -> Option<IpAddr> {
    if hex.len() != 32 || !hex.is_ascii() {
        return None;
    }
    let mut octets = [0u8; 16];
    for (i, chunk) in octets.chunks_exact_mut(4).enumerate() {
        let word = u32::from_str_radix(&hex[i * 8..i * 8 + 8], 16).ok()?;
        chunk.copy_from_slice(&word.to_ne_bytes());
    }
    Some(IpAddr::V6(Ipv6Addr::from(octets)))
}
