use crate::aggregator::containers::{FlowError, TagCounter};
use crate::aggregator::lookup::LookupTable;
use ansi_term::Colour;
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

// Report headers, byte-for-byte what downstream consumers expect.
const PORT_REPORT_HEADER: &str = "dstport, protocol, Count";
const TAG_REPORT_HEADER: &str = "Tag, Tag Counts";

#[derive(Serialize)]
struct PortRow<'a> {
    dstport: &'a str,
    protocol: &'a str,
    count: u64,
}

#[derive(Serialize)]
struct TagRow<'a> {
    tag: &'a str,
    count: u64,
}

#[derive(Serialize)]
struct ReportData<'a> {
    port_counts: Vec<PortRow<'a>>,
    tag_counts: Vec<TagRow<'a>>,
}

/// Paths for the two reports inside `dir`, prefixed with the current UTC
/// time in milliseconds so successive runs never clobber each other.
pub fn report_paths(dir: &Path) -> (PathBuf, PathBuf) {
    let millis = Utc::now().timestamp_millis();
    (
        dir.join(format!("{millis}_port.csv")),
        dir.join(format!("{millis}_tag.csv")),
    )
}

/// Writes the port/protocol report: one row per entry that matched at least
/// one record. Row order follows map iteration and is not stable between
/// runs.
pub fn write_port_report(table: &LookupTable, path: &Path) -> Result<(), FlowError> {
    let mut lines = vec![PORT_REPORT_HEADER.to_string()];
    for (key, entry) in table.iter() {
        if entry.matches > 0 {
            lines.push(format!("{},{},{}", key.port, key.protocol, entry.matches));
        }
    }

    fs::write(path, lines.join("\n") + "\n").map_err(|source| FlowError::ReportWrite {
        path: path.display().to_string(),
        source,
    })?;
    log::info!("Port/protocol report written to {}", path.display());
    Ok(())
}

/// Writes the tag report: one row per tally.
pub fn write_tag_report(tally: &TagCounter, path: &Path) -> Result<(), FlowError> {
    let mut lines = vec![TAG_REPORT_HEADER.to_string()];
    for (tag, count) in tally.iter() {
        lines.push(format!("{tag},{count}"));
    }

    fs::write(path, lines.join("\n") + "\n").map_err(|source| FlowError::ReportWrite {
        path: path.display().to_string(),
        source,
    })?;
    log::info!("Tag report written to {}", path.display());
    Ok(())
}

/// Both aggregate tables as formatted JSON.
pub fn data_as_json(table: &LookupTable, tally: &TagCounter) -> serde_json::Result<String> {
    let data = ReportData {
        port_counts: table
            .iter()
            .filter(|(_, entry)| entry.matches > 0)
            .map(|(key, entry)| PortRow {
                dstport: &key.port,
                protocol: &key.protocol,
                count: entry.matches,
            })
            .collect(),
        tag_counts: tally
            .iter()
            .map(|(tag, count)| TagRow {
                tag: tag.as_str(),
                count: *count,
            })
            .collect(),
    };
    serde_json::to_string_pretty(&data)
}

pub fn print_results(table: &LookupTable, tally: &TagCounter) {
    println!("\n\u{250F}\u{2501}\u{2501}\u{2501}\u{2501} Results");
    println!("\u{2503}");
    println!(
        "\u{2503} Classified records : {}",
        Colour::Red.paint(tally.total().to_string())
    );
    println!("\u{2503}");
    println!("\u{2503} Tag tallies");
    for (tag, count) in tally.iter() {
        println!("\u{2503}   {} : {}", Colour::Fixed(226).paint(tag), count);
    }
    println!("\u{2503}");
    println!("\u{2503} Port/protocol matches");
    for (key, entry) in table.iter() {
        if entry.matches > 0 {
            println!(
                "\u{2503}   {} : {}",
                Colour::Fixed(226).paint(key.to_string()),
                entry.matches
            );
        }
    }
    println!("\u{2503}");
}
