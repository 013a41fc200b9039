use std::collections::HashMap;
use std::fmt;
use std::io;
use thiserror::Error;

/// Sentinel tag assigned to flow records whose key has no lookup entry.
pub const NO_LOOKUP_EXIST: &str = "NO_LOOKUP_EXIST";

/// Default tag for lookup rows that carry no tag column.
pub const UNTAGGED: &str = "untagged";

/// Composite key identifying a (destination port, protocol) combination.
///
/// The port is kept as the raw trimmed token so arbitrary tokens and leading
/// zeros survive ingestion unchanged; the protocol is the normalized
/// upper-case name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub port: String,
    pub protocol: String,
}

impl FlowKey {
    pub fn new(port: &str, protocol: &str) -> Self {
        Self {
            port: port.to_string(),
            protocol: protocol.to_string(),
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.port, self.protocol)
    }
}

/// One lookup-table association: a classification tag plus the running count
/// of flow records that resolved to this key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupEntry {
    pub tag: String,
    pub matches: u64,
}

impl LookupEntry {
    pub fn new(tag: String) -> Self {
        Self { tag, matches: 0 }
    }
}

/// Running per-tag tallies, created lazily on first hit.
#[derive(Debug, Default)]
pub struct TagCounter(HashMap<String, u64>);

impl TagCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the tally for `tag`, creating it on first encounter.
    pub fn bump(&mut self, tag: &str) {
        match self.0.get_mut(tag) {
            Some(count) => *count += 1,
            None => {
                self.0.insert(tag.to_string(), 1);
            }
        }
    }

    pub fn get(&self, tag: &str) -> u64 {
        self.0.get(tag).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of every tally. Equals the number of classified records.
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }
}

// Row-level problems we warn about and keep going.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticCode {
    LookupRowMalformed,
    LookupProtocolInvalid,
    FlowRowMalformed,
    FlowVersionUnsupported,
    FlowProtocolUnparseable,
}

impl DiagnosticCode {
    /// Stable identifier carried into logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LookupRowMalformed => "LOOKUP_ROW_MALFORMED",
            Self::LookupProtocolInvalid => "LOOKUP_PROTOCOL_INVALID",
            Self::FlowRowMalformed => "FLOW_ROW_MALFORMED",
            Self::FlowVersionUnsupported => "FLOW_VERSION_UNSUPPORTED",
            Self::FlowProtocolUnparseable => "FLOW_PROTOCOL_UNPARSEABLE",
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A skipped row: the code, the 1-based line number, and enough context to
/// find the offending line in the source file.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub line: usize,
    pub detail: String,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, line: usize, detail: impl Into<String>) -> Self {
        Self {
            code,
            line,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] line {}: {}", self.code, self.line, self.detail)
    }
}

/// Run-aborting failures. Row-level problems are [Diagnostic]s instead.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("lookup file {path}: {source}")]
    LookupRead { path: String, source: io::Error },

    #[error("flow log file {path}: {source}")]
    FlowRead { path: String, source: io::Error },

    #[error("report output {path}: {source}")]
    ReportWrite { path: String, source: io::Error },
}

impl FlowError {
    /// Process exit code for this failure, one per fatal class.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::LookupRead { .. } => 101,
            Self::FlowRead { .. } => 105,
            Self::ReportWrite { .. } => 107,
        }
    }
}
