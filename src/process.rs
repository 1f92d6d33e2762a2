//! The fixed table of crashing process types and crash kinds.
//!
//! Labels are stable wire strings: they appear in store snapshots, record
//! type tags and ping payloads. `ipdlunittest` crashes are recorded like any
//! other but are never allowed to produce a ping.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A recognized crashing process type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessType {
    /// The default (parent) process.
    Main,
    Content,
    IpdlUnitTest,
    Gmplugin,
    Gpu,
    Vr,
    Rdd,
    Socket,
    SandboxBroker,
    ForkServer,
    Utility,
}

impl ProcessType {
    /// Every recognized process type, in label order.
    pub const ALL: [ProcessType; 11] = [
        ProcessType::Main,
        ProcessType::Content,
        ProcessType::IpdlUnitTest,
        ProcessType::Gmplugin,
        ProcessType::Gpu,
        ProcessType::Vr,
        ProcessType::Rdd,
        ProcessType::Socket,
        ProcessType::SandboxBroker,
        ProcessType::ForkServer,
        ProcessType::Utility,
    ];

    /// Stable string label for this process type.
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessType::Main => "main",
            ProcessType::Content => "content",
            ProcessType::IpdlUnitTest => "ipdlunittest",
            ProcessType::Gmplugin => "gmplugin",
            ProcessType::Gpu => "gpu",
            ProcessType::Vr => "vr",
            ProcessType::Rdd => "rdd",
            ProcessType::Socket => "socket",
            ProcessType::SandboxBroker => "sandboxbroker",
            ProcessType::ForkServer => "forkserver",
            ProcessType::Utility => "utility",
        }
    }

    /// Look up a process type by its label. Unknown labels (including the
    /// legacy "tab" and "default" spellings) are not process types.
    pub fn from_label(label: &str) -> Option<ProcessType> {
        ProcessType::ALL.iter().copied().find(|p| p.as_str() == label)
    }

    /// Whether crashes of this process type may produce a crash ping.
    pub fn ping_allowed(self) -> bool {
        !matches!(self, ProcessType::IpdlUnitTest)
    }
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a label names a recognized process type.
pub fn is_valid_process_type(label: &str) -> bool {
    ProcessType::from_label(label).is_some()
}

/// Whether a label names a process type that may produce a crash ping.
pub fn is_ping_allowed(label: &str) -> bool {
    ProcessType::from_label(label).map_or(false, ProcessType::ping_allowed)
}

/// Whether a record describes a crash or a hang.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrashKind {
    Crash,
    Hang,
}

impl CrashKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CrashKind::Crash => "crash",
            CrashKind::Hang => "hang",
        }
    }
}

impl fmt::Display for CrashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process type plus crash kind, rendered as `<process>-<kind>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashType {
    pub process: ProcessType,
    pub kind: CrashKind,
}

impl CrashType {
    pub fn new(process: ProcessType, kind: CrashKind) -> Self {
        Self { process, kind }
    }

    /// The combined record type tag, e.g. `main-crash` or `content-hang`.
    pub fn label(&self) -> String {
        format!("{}-{}", self.process, self.kind)
    }
}

impl fmt::Display for CrashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.process, self.kind)
    }
}
