//! TCP port and handle counting
//!
//! Reads the kernel socket tables under procfs and maps sockets to processes
//! through the `socket:[inode]` links in `/proc/<pid>/fd`. Where procfs has
//! no socket table, falls back to parsing `netstat -tnap`.
//!
//! # Counting rules
//!
//! ```text
//! active_ports     sockets in ESTABLISHED or LISTEN
//! ephemeral_ports  ESTABLISHED sockets whose local port is in the
//!                  ip_local_port_range window
//! handles          entries in /proc/<pid>/fd, or the allocated count in
//!                  /proc/sys/fs/file-nr for the whole node
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Linux default for `net.ipv4.ip_local_port_range`.
pub const DEFAULT_EPHEMERAL_RANGE: PortRange = PortRange {
    start: 32768,
    end: 60999,
};

/// TCP connection state, reduced to what the counters need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Established,
    Listen,
    Other,
}

impl TcpState {
    /// State from the hex code used in `/proc/net/tcp`.
    fn from_hex(code: &str) -> Self {
        match code {
            "01" => TcpState::Established,
            "0A" | "0a" => TcpState::Listen,
            _ => TcpState::Other,
        }
    }

    /// State from the name printed by netstat.
    fn from_name(name: &str) -> Self {
        match name {
            "ESTABLISHED" => TcpState::Established,
            "LISTEN" => TcpState::Listen,
            _ => TcpState::Other,
        }
    }

    fn is_active(&self) -> bool {
        matches!(self, TcpState::Established | TcpState::Listen)
    }
}

/// One row of a socket table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSocket {
    pub local_port: u16,
    pub state: TcpState,
    /// Socket inode; 0 when the source does not report one
    pub inode: u64,
    /// Owning pid when the source reports it directly
    pub pid: Option<u32>,
}

/// Inclusive local port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }
}

// =============================================================================
// Parsers
// =============================================================================

/// Parse `/proc/net/tcp` or `/proc/net/tcp6`. Malformed rows are skipped.
pub fn parse_proc_net_tcp(content: &str) -> Vec<TcpSocket> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                return None;
            }
            let (_, port_hex) = fields[1].rsplit_once(':')?;
            let local_port = u16::from_str_radix(port_hex, 16).ok()?;
            let inode = fields[9].parse().ok()?;
            Some(TcpSocket {
                local_port,
                state: TcpState::from_hex(fields[3]),
                inode,
                pid: None,
            })
        })
        .collect()
}

/// Parse `netstat -tnap` output. Header and malformed rows are skipped.
///
/// ```text
/// tcp   0   0 127.0.0.1:5432   0.0.0.0:*   LISTEN   1234/postgres
/// ```
pub fn parse_netstat(content: &str) -> Vec<TcpSocket> {
    content
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 7 || !fields[0].starts_with("tcp") {
                return None;
            }
            let (_, port) = fields[3].rsplit_once(':')?;
            let local_port = port.parse().ok()?;
            let pid = fields[6]
                .split_once('/')
                .and_then(|(pid, _)| pid.parse().ok());
            Some(TcpSocket {
                local_port,
                state: TcpState::from_name(fields[5]),
                inode: 0,
                pid,
            })
        })
        .collect()
}

/// Parse `ip_local_port_range` ("32768\t60999").
pub fn parse_port_range(content: &str) -> Option<PortRange> {
    let mut parts = content.split_whitespace();
    let start = parts.next()?.parse().ok()?;
    let end = parts.next()?.parse().ok()?;
    (start <= end).then_some(PortRange { start, end })
}

/// Allocated handle count, the first field of `file-nr`.
pub fn parse_file_nr(content: &str) -> Option<u64> {
    content.split_whitespace().next()?.parse().ok()
}

/// Inode from a `socket:[12345]` fd link target.
fn socket_inode(link: &Path) -> Option<u64> {
    link.to_str()?
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

// =============================================================================
// Port Table
// =============================================================================

/// Which port count to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortCount {
    Active,
    Ephemeral,
}

/// Socket table reader rooted at a procfs mount.
#[derive(Debug, Clone)]
pub struct PortTable {
    proc_root: PathBuf,
    netstat: String,
}

impl Default for PortTable {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl PortTable {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            netstat: "netstat".to_string(),
        }
    }

    /// Use a different netstat binary for the fallback path.
    pub fn with_netstat(mut self, program: impl Into<String>) -> Self {
        self.netstat = program.into();
        self
    }

    /// Ephemeral port window, or the Linux default if unreadable.
    pub fn ephemeral_range(&self) -> PortRange {
        std::fs::read_to_string(self.proc_root.join("sys/net/ipv4/ip_local_port_range"))
            .ok()
            .and_then(|c| parse_port_range(&c))
            .unwrap_or(DEFAULT_EPHEMERAL_RANGE)
    }

    /// Every TCP socket on the node.
    pub fn sockets(&self) -> Result<Vec<TcpSocket>> {
        let mut found = false;
        let mut sockets = Vec::new();
        for table in ["net/tcp", "net/tcp6"] {
            if let Ok(content) = std::fs::read_to_string(self.proc_root.join(table)) {
                found = true;
                sockets.extend(parse_proc_net_tcp(&content));
            }
        }

        if found {
            return Ok(sockets);
        }

        debug!(program = %self.netstat, "No procfs socket table, using netstat");
        let output = Command::new(&self.netstat)
            .arg("-tnap")
            .output()
            .map_err(|e| Error::Counter {
                counter: "ports".to_string(),
                reason: format!("{} failed to start: {}", self.netstat, e),
            })?;
        Ok(parse_netstat(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Socket inodes held open by `pid`. `None` if the fd table is unreadable.
    pub fn socket_inodes(&self, pid: u32) -> Option<HashSet<u64>> {
        let dir = self.proc_root.join(pid.to_string()).join("fd");
        let entries = std::fs::read_dir(&dir).ok()?;
        Some(
            entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| std::fs::read_link(entry.path()).ok())
                .filter_map(|link| socket_inode(&link))
                .collect(),
        )
    }

    /// Count ports for the node (`pid = None`) or one process.
    ///
    /// `Ok(None)` when the process's sockets cannot be attributed.
    pub fn count(&self, which: PortCount, pid: Option<u32>) -> Result<Option<f64>> {
        let sockets = self.sockets()?;
        let range = self.ephemeral_range();

        let owned: Box<dyn Fn(&TcpSocket) -> bool> = match pid {
            None => Box::new(|_: &TcpSocket| true),
            Some(pid) => {
                if sockets.iter().any(|s| s.pid.is_some()) {
                    Box::new(move |s: &TcpSocket| s.pid == Some(pid))
                } else {
                    let Some(inodes) = self.socket_inodes(pid) else {
                        trace!(pid, "fd table unreadable");
                        return Ok(None);
                    };
                    Box::new(move |s: &TcpSocket| inodes.contains(&s.inode))
                }
            }
        };

        let count = sockets
            .iter()
            .filter(|s| owned(s))
            .filter(|s| match which {
                PortCount::Active => s.state.is_active(),
                PortCount::Ephemeral => {
                    s.state == TcpState::Established && range.contains(s.local_port)
                }
            })
            .count();

        Ok(Some(count as f64))
    }

    /// Open handles for the node (`pid = None`) or one process.
    pub fn handles(&self, pid: Option<u32>) -> Option<f64> {
        match pid {
            Some(pid) => {
                let dir = self.proc_root.join(pid.to_string()).join("fd");
                std::fs::read_dir(dir).ok().map(|e| e.count() as f64)
            }
            None => std::fs::read_to_string(self.proc_root.join("sys/fs/file-nr"))
                .ok()
                .and_then(|c| parse_file_nr(&c))
                .map(|n| n as f64),
        }
    }
}
