mod aggregator;
mod ui;

use aggregator::containers::FlowError;
use clap::{ArgAction, Parser};
use std::fs;
use std::path::Path;
use ui::output;

/// FlowSift is a batch classifier for network flow logs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Lookup table file (dstport,protocol[,tag] per line)
    #[arg(short = 'l', long, value_parser)]
    lookup: String,

    /// Flow log file to classify
    #[arg(short = 'f', long, value_parser)]
    file: String,

    /// Directory to write the two reports
    #[arg(short = 'o', long, default_value_t = String::from("."), value_parser)]
    output_dir: String,

    /// Display aggregates as formatted JSON
    #[arg(short = 'j', long, action = ArgAction::SetTrue)]
    json: bool,
}

fn main() {
    simple_logger::init_with_env().unwrap();

    let args = Args::parse();
    if let Err(err) = run(&args) {
        log::error!("{err}");
        std::process::exit(err.exit_code());
    }
}

fn run(args: &Args) -> Result<(), FlowError> {
    let out_dir = Path::new(&args.output_dir);
    fs::create_dir_all(out_dir).map_err(|source| FlowError::ReportWrite {
        path: args.output_dir.clone(),
        source,
    })?;

    let (table, tally) = aggregator::core::run(Path::new(&args.lookup), Path::new(&args.file))?;

    // ---- Output ----
    let (port_path, tag_path) = output::report_paths(out_dir);
    output::write_port_report(&table, &port_path)?;
    output::write_tag_report(&tally, &tag_path)?;

    if args.json {
        match output::data_as_json(&table, &tally) {
            Ok(json) => println!("{json}"),
            Err(err) => log::error!("Failed to serialize aggregates: {err}"),
        }
    } else {
        output::print_results(&table, &tally);
    }

    Ok(())
}
