//! escan command-line tool.
//!
//! Inspect Epics Scan files: summary, channel names and channel data.
#![allow(clippy::uninlined_format_args, clippy::redundant_closure_for_method_calls)]

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use escan_core::ScanRecord;
use escan_io::{LoadConfig, ScanLoader};
use log::LevelFilter;
use serde_json::json;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    EscanIo(#[from] escan_io::Error),

    #[error("{0}")]
    Core(#[from] escan_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reader for Epics Scan (escan) instrument files.
#[derive(Parser)]
#[command(name = "escan")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Load configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Neither read nor write the cache file
    #[arg(long, global = true)]
    no_cache: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a summary of a scan file
    Info {
        /// Input scan file
        input: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// List positioner, sum and detector channel names
    Channels {
        /// Input scan file
        input: PathBuf,
    },

    /// Print the data of one channel
    Data {
        /// Input scan file
        input: PathBuf,

        /// Channel name (sum name or detector label)
        channel: String,

        /// Divide by this channel
        #[arg(long)]
        norm: Option<String>,

        /// Skip the ICR/OCR deadtime correction
        #[arg(long)]
        raw: bool,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn load_config(path: Option<&Path>, no_cache: bool) -> Result<LoadConfig> {
    let mut config = match path {
        Some(path) => LoadConfig::from_file(path)?,
        None => LoadConfig::default(),
    };
    if no_cache {
        config.use_cache = false;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref(), cli.no_cache)?;
    let loader = ScanLoader::new(config);

    match cli.command {
        Commands::Info { input, json } => {
            let record = loader.load(&input)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary_json(&record))?);
            } else {
                print_summary(&input, &record);
            }
        }

        Commands::Channels { input } => {
            let record = loader.load(&input)?;
            println!("Positioners:");
            for name in record.position_channel_names() {
                println!("  {name}");
            }
            println!("Sums:");
            for name in record.sum_names() {
                println!("  {name}");
            }
            println!("Detectors:");
            for (label, source) in record
                .detector_names
                .iter()
                .map(|n| (&n.label, &n.source))
            {
                println!("  {label:<24} {source}");
            }
        }

        Commands::Data {
            input,
            channel,
            norm,
            raw,
        } => {
            let record = loader.load(&input)?;
            let data = record.get_data(&channel, norm.as_deref(), !raw)?;
            if record.is_2d() {
                for row in data.outer_iter() {
                    let values: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                    println!("{}", values.join("\t"));
                }
            } else {
                for (x, v) in record.x.iter().zip(data.iter()) {
                    println!("{x}\t{v}");
                }
            }
        }
    }

    Ok(())
}

fn print_summary(input: &Path, record: &ScanRecord) {
    println!("File: {}", input.display());
    println!("Dimension: {}", record.dimension);
    println!("Positions: {:?}", record.positions.shape());
    println!("Detectors: {:?}", record.detectors.shape());
    println!("Sums: {:?}", record.sums.shape());
    println!("X: {} ({} points)", record.x_name, record.x.len());
    if record.is_2d() {
        println!("Y: {} ({} rows)", record.y_name, record.y.len());
    }
    println!("Started: {}", record.start_time);
    println!("Ended: {}", record.stop_time);
    println!(
        "Deadtime correction: {}",
        if record.intensity_ratio.is_some() {
            "ICR/OCR"
        } else {
            "none"
        }
    );
    match &record.full_xrf {
        Some(cube) => println!("Full XRF: {:?}", cube.data.shape()),
        None => println!("Full XRF: none"),
    }
    for group in &record.sum_groups {
        println!("Sum {}: detectors {:?}", group.name, group.members);
    }
    for notice in &record.warnings {
        println!("Warning: {notice}");
    }
    if !record.info.is_empty() {
        println!("Info:");
        for (key, value) in &record.info {
            println!("  {key} = {value}");
        }
    }
}

fn summary_json(record: &ScanRecord) -> serde_json::Value {
    json!({
        "dimension": record.dimension,
        "positions": record.positions.shape(),
        "detectors": record.detectors.shape(),
        "sums": record.sums.shape(),
        "x_name": record.x_name,
        "y_name": record.y_name,
        "x_points": record.x.len(),
        "y_points": record.y.len(),
        "start_time": record.start_time,
        "stop_time": record.stop_time,
        "sum_names": record.sum_names().collect::<Vec<_>>(),
        "detector_names": record.detector_channel_names(),
        "position_names": record.position_channel_names(),
        "icr_ocr": record.intensity_ratio.is_some(),
        "full_xrf": record.full_xrf.as_ref().map(|c| c.data.shape().to_vec()),
        "warnings": record.warnings.iter().map(|w| w.to_string()).collect::<Vec<_>>(),
        "info": record.info,
    })
}
