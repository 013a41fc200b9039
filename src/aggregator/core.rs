//! Classification of flow records against the lookup table.
use super::containers::{Diagnostic, DiagnosticCode, FlowError, FlowKey, TagCounter, NO_LOOKUP_EXIST};
use super::lookup::LookupTable;
use super::protocols;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

/// Field count of a well-formed flow record.
const FLOW_RECORD_FIELDS: usize = 14;
/// The only version token this tool accepts. Strict equality; newer
/// versions are rejected, not parsed best-effort.
const SUPPORTED_VERSION: &str = "2";

const VERSION_FIELD: usize = 0;
const DSTPORT_FIELD: usize = 6;
const PROTOCOL_FIELD: usize = 7;

/// Owns both counting tables for the duration of a run and mutates them in
/// lockstep, one increment each per classified record.
pub struct FlowAggregator {
    table: LookupTable,
    tally: TagCounter,
}

impl FlowAggregator {
    pub fn new(table: LookupTable) -> Self {
        Self {
            table,
            tally: TagCounter::new(),
        }
    }

    /// Scans the flow-record file, classifying line by line.
    ///
    /// Malformed rows are skipped with a warning and returned as
    /// [Diagnostic]s; a missing or unreadable file aborts the run.
    pub fn process_file<P: AsRef<Path>>(&mut self, path: P) -> Result<Vec<Diagnostic>, FlowError> {
        let path = path.as_ref();
        log::info!("Processing flow log {}", path.display());
        let started = Instant::now();

        let file = File::open(path).map_err(|source| FlowError::FlowRead {
            path: path.display().to_string(),
            source,
        })?;
        let reader = BufReader::new(file);

        let mut diagnostics = Vec::new();
        let mut total = 0usize;

        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| FlowError::FlowRead {
                path: path.display().to_string(),
                source,
            })?;
            total += 1;
            if let Some(diagnostic) = self.classify_line(&line, index + 1) {
                log::warn!("{diagnostic}");
                diagnostics.push(diagnostic);
            }
        }

        log::info!(
            "Flow log processed in {:?}. Rows [{total}], classified [{}]",
            started.elapsed(),
            total - diagnostics.len()
        );
        Ok(diagnostics)
    }

    /// Classifies one record: 14 space-separated fields, version `2`,
    /// destination port from field 6, protocol number from field 7.
    ///
    /// A key without a lookup entry gets its own synthetic entry tagged
    /// `NO_LOOKUP_EXIST`. An unparseable protocol number skips the line,
    /// same as the other row-level errors.
    pub fn classify_line(&mut self, line: &str, lineno: usize) -> Option<Diagnostic> {
        let fields: Vec<&str> = line.trim().split(' ').collect();
        if fields.len() != FLOW_RECORD_FIELDS {
            return Some(Diagnostic::new(
                DiagnosticCode::FlowRowMalformed,
                lineno,
                format!("expected {FLOW_RECORD_FIELDS} fields, got {}", fields.len()),
            ));
        }
        if fields[VERSION_FIELD].trim() != SUPPORTED_VERSION {
            return Some(Diagnostic::new(
                DiagnosticCode::FlowVersionUnsupported,
                lineno,
                format!("version [{}]", fields[VERSION_FIELD]),
            ));
        }

        let number = match fields[PROTOCOL_FIELD].trim().parse::<u8>() {
            Ok(number) => number,
            Err(_) => {
                return Some(Diagnostic::new(
                    DiagnosticCode::FlowProtocolUnparseable,
                    lineno,
                    format!("protocol number [{}]", fields[PROTOCOL_FIELD]),
                ));
            }
        };

        let key = FlowKey::new(fields[DSTPORT_FIELD].trim(), protocols::resolve(number));
        let entry = self.table.entry_or_insert(key, NO_LOOKUP_EXIST);
        entry.matches += 1;
        self.tally.bump(&entry.tag);
        None
    }

    pub fn table(&self) -> &LookupTable {
        &self.table
    }

    pub fn tally(&self) -> &TagCounter {
        &self.tally
    }

    pub fn into_parts(self) -> (LookupTable, TagCounter) {
        (self.table, self.tally)
    }
}

/// Runs the two-phase aggregation: lookup file fully ingested first, then
/// the flow log scanned against it.
pub fn run(lookup_path: &Path, flow_path: &Path) -> Result<(LookupTable, TagCounter), FlowError> {
    let (table, lookup_diagnostics) = LookupTable::from_file(lookup_path)?;
    let mut aggregator = FlowAggregator::new(table);
    let flow_diagnostics = aggregator.process_file(flow_path)?;

    log::info!(
        "Aggregation finished. Skipped rows: lookup [{}], flow log [{}]",
        lookup_diagnostics.len(),
        flow_diagnostics.len()
    );
    Ok(aggregator.into_parts())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // Well-formed version-2 record with the given destination port and
    // protocol number in fields 6 and 7.
    fn record(dstport: &str, protocol: &str) -> String {
        format!(
            "2 123456789012 eni-0a1b2c3d 10.0.1.201 198.51.100.2 49153 {dstport} {protocol} \
             25 20000 1620140761 1620140821 ACCEPT OK"
        )
    }

    fn seeded_aggregator() -> FlowAggregator {
        let mut table = LookupTable::new();
        table.load_line("443,tcp,web", 1);
        table.load_line("25,udp", 2);
        assert!(table.load_line("80,ftp,bad", 3).is_some());
        FlowAggregator::new(table)
    }

    #[test]
    fn matched_record_increments_entry_and_tag() {
        let mut aggregator = seeded_aggregator();
        assert!(aggregator.classify_line(&record("443", "6"), 1).is_none());

        let entry = aggregator.table().get(&FlowKey::new("443", "TCP")).unwrap();
        assert_eq!(entry.tag, "web");
        assert_eq!(entry.matches, 1);
        assert_eq!(aggregator.tally().get("web"), 1);
        assert!(aggregator.table().get(&FlowKey::new("80", "FTP")).is_none());
    }

    #[test]
    fn unmatched_record_creates_synthetic_entry() {
        let mut aggregator = seeded_aggregator();
        assert!(aggregator.classify_line(&record("9999", "17"), 1).is_none());

        let entry = aggregator
            .table()
            .get(&FlowKey::new("9999", "UDP"))
            .unwrap();
        assert_eq!(entry.tag, NO_LOOKUP_EXIST);
        assert_eq!(entry.matches, 1);
        assert_eq!(aggregator.tally().get(NO_LOOKUP_EXIST), 1);
    }

    #[test]
    fn distinct_unmatched_keys_get_their_own_entries() {
        let mut aggregator = FlowAggregator::new(LookupTable::new());
        aggregator.classify_line(&record("9999", "17"), 1);
        aggregator.classify_line(&record("8888", "6"), 2);
        aggregator.classify_line(&record("9999", "17"), 3);

        assert_eq!(aggregator.table().len(), 2);
        let udp = aggregator
            .table()
            .get(&FlowKey::new("9999", "UDP"))
            .unwrap();
        let tcp = aggregator
            .table()
            .get(&FlowKey::new("8888", "TCP"))
            .unwrap();
        assert_eq!(udp.matches, 2);
        assert_eq!(tcp.matches, 1);
        assert_eq!(aggregator.tally().get(NO_LOOKUP_EXIST), 3);
    }

    #[test]
    fn unsupported_version_contributes_to_no_counter() {
        let mut aggregator = seeded_aggregator();
        let line = record("443", "6").replacen('2', "3", 1);
        let diagnostic = aggregator.classify_line(&line, 1).unwrap();
        assert_eq!(diagnostic.code, DiagnosticCode::FlowVersionUnsupported);
        assert_eq!(aggregator.table().total_matches(), 0);
        assert!(aggregator.tally().is_empty());
    }

    #[test]
    fn wrong_field_count_is_skipped() {
        let mut aggregator = seeded_aggregator();
        let diagnostic = aggregator.classify_line("2 only three fields", 1).unwrap();
        assert_eq!(diagnostic.code, DiagnosticCode::FlowRowMalformed);
        assert_eq!(aggregator.table().total_matches(), 0);
    }

    #[test]
    fn unparseable_protocol_number_skips_line() {
        let mut aggregator = seeded_aggregator();
        let diagnostic = aggregator.classify_line(&record("443", "x"), 1).unwrap();
        assert_eq!(diagnostic.code, DiagnosticCode::FlowProtocolUnparseable);

        // Out-of-range numbers are unparseable too; the u8 domain is the
        // whole protocol-number space.
        let diagnostic = aggregator.classify_line(&record("443", "300"), 2).unwrap();
        assert_eq!(diagnostic.code, DiagnosticCode::FlowProtocolUnparseable);

        // The scan keeps going afterwards.
        assert!(aggregator.classify_line(&record("443", "6"), 3).is_none());
        assert_eq!(aggregator.table().total_matches(), 1);
    }

    #[test]
    fn counter_sums_agree_with_classified_records() {
        let mut aggregator = seeded_aggregator();
        let lines = [
            record("443", "6"),
            record("443", "6"),
            record("25", "17"),
            record("9999", "17"),
            record("443", "x"),
            "3 bad version".to_string(),
        ];
        let mut skipped = 0;
        for (index, line) in lines.iter().enumerate() {
            if aggregator.classify_line(line, index + 1).is_some() {
                skipped += 1;
            }
        }

        assert_eq!(skipped, 2);
        assert_eq!(aggregator.table().total_matches(), 4);
        assert_eq!(aggregator.tally().total(), 4);
        assert_eq!(aggregator.tally().get("web"), 2);
        assert_eq!(aggregator.tally().get("untagged"), 1);
        assert_eq!(aggregator.tally().get(NO_LOOKUP_EXIST), 1);
    }

    #[test]
    fn run_ties_both_phases_together() {
        let mut lookup = NamedTempFile::new().unwrap();
        writeln!(lookup, "443,tcp,web").unwrap();
        writeln!(lookup, "25,udp").unwrap();
        writeln!(lookup, "80,ftp,bad").unwrap();
        lookup.flush().unwrap();

        let mut flows = NamedTempFile::new().unwrap();
        writeln!(flows, "{}", record("443", "6")).unwrap();
        writeln!(flows, "{}", record("9999", "17")).unwrap();
        flows.flush().unwrap();

        let (table, tally) = run(lookup.path(), flows.path()).unwrap();
        assert_eq!(table.get(&FlowKey::new("443", "TCP")).unwrap().matches, 1);
        assert_eq!(
            table.get(&FlowKey::new("9999", "UDP")).unwrap().tag,
            NO_LOOKUP_EXIST
        );
        assert_eq!(tally.total(), 2);
        assert_eq!(table.total_matches(), tally.total());
    }

    #[test]
    fn missing_flow_log_is_fatal() {
        let mut aggregator = FlowAggregator::new(LookupTable::new());
        let err = aggregator.process_file("definitely/not/here.log").unwrap_err();
        assert!(matches!(err, FlowError::FlowRead { .. }));
        assert_eq!(err.exit_code(), 105);
    }
}
