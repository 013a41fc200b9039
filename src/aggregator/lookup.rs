//! Ingestion of the (port, protocol) to tag lookup table.
use super::containers::{Diagnostic, DiagnosticCode, FlowError, FlowKey, LookupEntry, UNTAGGED};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

/// Protocols a lookup row may name. Rows outside this set never enter the
/// table, regardless of what the flow-record side resolves numerically.
const VALID_PROTOCOLS: [&str; 2] = ["TCP", "UDP"];

/// The ingested lookup associations plus their running match counters.
#[derive(Debug, Default)]
pub struct LookupTable {
    entries: HashMap<FlowKey, LookupEntry>,
}

impl LookupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the table from a comma-separated lookup file.
    ///
    /// Malformed rows are skipped with a warning and returned as
    /// [Diagnostic]s; a missing or unreadable file aborts the run.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<(Self, Vec<Diagnostic>), FlowError> {
        let path = path.as_ref();
        log::info!("Reading lookup table from {}", path.display());
        let started = Instant::now();

        let file = File::open(path).map_err(|source| FlowError::LookupRead {
            path: path.display().to_string(),
            source,
        })?;
        let reader = BufReader::new(file);

        let mut table = Self::new();
        let mut diagnostics = Vec::new();
        let mut total = 0usize;

        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| FlowError::LookupRead {
                path: path.display().to_string(),
                source,
            })?;
            total += 1;
            if let Some(diagnostic) = table.load_line(&line, index + 1) {
                log::warn!("{diagnostic}");
                diagnostics.push(diagnostic);
            }
        }

        log::info!(
            "Lookup table loaded in {:?}. Rows [{total}], unique keys [{}]",
            started.elapsed(),
            table.len()
        );
        Ok((table, diagnostics))
    }

    /// Applies the row rules to one line: split on commas, at least two
    /// fields, protocol in [VALID_PROTOCOLS], tag lower-cased and defaulting
    /// to `untagged` when the third field is missing or empty.
    ///
    /// A later row for an existing key replaces the entry wholesale, match
    /// counter included.
    pub fn load_line(&mut self, line: &str, lineno: usize) -> Option<Diagnostic> {
        let fields: Vec<&str> = line.trim().split(',').collect();
        if fields.len() < 2 {
            return Some(Diagnostic::new(
                DiagnosticCode::LookupRowMalformed,
                lineno,
                format!("expected at least 2 fields, got {}", fields.len()),
            ));
        }

        let port = fields[0].trim();
        let protocol = fields[1].trim().to_uppercase();
        if !VALID_PROTOCOLS.contains(&protocol.as_str()) {
            return Some(Diagnostic::new(
                DiagnosticCode::LookupProtocolInvalid,
                lineno,
                format!("protocol [{protocol}] is not one of TCP/UDP"),
            ));
        }

        let tag = fields
            .get(2)
            .map(|tag| tag.trim())
            .filter(|tag| !tag.is_empty())
            .map(|tag| tag.to_lowercase())
            .unwrap_or_else(|| UNTAGGED.to_string());

        self.entries
            .insert(FlowKey::new(port, &protocol), LookupEntry::new(tag));
        None
    }

    pub fn get(&self, key: &FlowKey) -> Option<&LookupEntry> {
        self.entries.get(key)
    }

    /// Entry at `key`, inserting a fresh one tagged `tag` if absent.
    pub fn entry_or_insert(&mut self, key: FlowKey, tag: &str) -> &mut LookupEntry {
        self.entries
            .entry(key)
            .or_insert_with(|| LookupEntry::new(tag.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlowKey, &LookupEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of every entry's match counter.
    pub fn total_matches(&self) -> u64 {
        self.entries.values().map(|entry| entry.matches).sum()
    }
}
