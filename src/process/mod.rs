//! Process Family Discovery
//!
//! Bounded discovery of a service's descendant processes, used to aggregate
//! resource usage across a service and the children it spawns.
//!
//! # Components
//!
//! - [`ProcessFamilyResolver`] - breadth-first walk with depth and count caps
//! - [`NativeEnumerator`] - native process snapshot (no subprocess)
//! - [`TextToolEnumerator`] - parses `ps` output
//! - [`ProcessDenylist`] - noise process names filtered by both enumerators

mod denylist;
mod native;
mod resolver;
mod text_tool;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::ProcessEnumerator;

pub use denylist::{ProcessDenylist, DEFAULT_DENYLIST};
pub use native::NativeEnumerator;
pub use resolver::{ProcessFamilyResolver, ResolverLimits, MAX_DEPTH, MAX_DESCENDANTS};
pub use text_tool::{parse_ps_output, TextToolEnumerator};

/// Which enumerator implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EnumeratorKind {
    /// Native snapshot where the platform has one, text tool otherwise
    #[default]
    Auto,
    Native,
    TextTool,
}

impl std::str::FromStr for EnumeratorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(EnumeratorKind::Auto),
            "native" => Ok(EnumeratorKind::Native),
            "text-tool" | "text_tool" => Ok(EnumeratorKind::TextTool),
            other => Err(format!("unknown enumerator '{}'", other)),
        }
    }
}

/// Build the enumerator selected at startup.
pub fn build_enumerator(kind: EnumeratorKind, denylist: ProcessDenylist) -> Arc<dyn ProcessEnumerator> {
    match kind {
        EnumeratorKind::Native => Arc::new(NativeEnumerator::new(denylist)),
        EnumeratorKind::TextTool => Arc::new(TextToolEnumerator::new(denylist)),
        EnumeratorKind::Auto => {
            if sysinfo::IS_SUPPORTED_SYSTEM {
                Arc::new(NativeEnumerator::new(denylist))
            } else {
                Arc::new(TextToolEnumerator::new(denylist))
            }
        }
    }
}
