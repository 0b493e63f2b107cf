//! Text-tool process enumeration
//!
//! Shells out to `ps` and parses its columnar output. Used on platforms or
//! containers where the native process table is not readable.

use std::process::Command;

use tracing::{debug, trace};

use crate::domain::{ProcessDescriptor, ProcessEnumerator};
use crate::error::{Error, Result};

use super::denylist::ProcessDenylist;

const DEFAULT_PS_PROGRAM: &str = "ps";

/// Process enumerator that parses `ps -o pid=,comm=` output.
#[derive(Debug, Clone)]
pub struct TextToolEnumerator {
    program: String,
    denylist: ProcessDenylist,
}

impl TextToolEnumerator {
    pub fn new(denylist: ProcessDenylist) -> Self {
        Self::with_program(DEFAULT_PS_PROGRAM, denylist)
    }

    /// Use a specific `ps` binary.
    pub fn with_program(program: impl Into<String>, denylist: ProcessDenylist) -> Self {
        Self {
            program: program.into(),
            denylist,
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.program).args(args).output()?;

        // ps exits 1 when the selection matched nothing.
        if !output.status.success() {
            if output.stdout.is_empty() && output.status.code() == Some(1) {
                return Ok(String::new());
            }
            return Err(Error::Counter {
                counter: format!("{} {}", self.program, args.join(" ")),
                reason: format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ProcessEnumerator for TextToolEnumerator {
    fn name(&self) -> &'static str {
        "text-tool"
    }

    fn enumerate_direct_children(&self, pid: u32) -> Result<Vec<ProcessDescriptor>> {
        let pid_arg = pid.to_string();
        let stdout = self.run(&["-o", "pid=,comm=", "--ppid", &pid_arg])?;
        let children = parse_ps_output(&stdout);
        trace!(pid, count = children.len(), "text-tool children");
        Ok(self.denylist.retain(children))
    }

    fn find_by_name(&self, name: &str) -> Result<Vec<ProcessDescriptor>> {
        let stdout = self.run(&["-e", "-o", "pid=,comm="])?;
        let wanted = name.to_ascii_lowercase();
        let mut matches: Vec<ProcessDescriptor> = parse_ps_output(&stdout)
            .into_iter()
            .filter(|p| {
                let actual = p.name.to_ascii_lowercase();
                actual == wanted || actual.strip_suffix(".exe") == Some(wanted.as_str())
            })
            .collect();
        matches.sort_by_key(|p| p.pid);
        Ok(matches)
    }
}

/// Parse `pid comm` lines. Lines that do not start with a pid are skipped.
pub fn parse_ps_output(output: &str) -> Vec<ProcessDescriptor> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }

            let (pid, name) = match line.split_once(char::is_whitespace) {
                Some((pid, name)) => (pid, name.trim()),
                None => (line, ""),
            };

            match pid.parse::<u32>() {
                Ok(pid) if pid > 0 && !name.is_empty() => Some(ProcessDescriptor::new(pid, name)),
                _ => {
                    debug!(line, "Skipping malformed ps line");
                    None
                }
            }
        })
        .collect()
}
