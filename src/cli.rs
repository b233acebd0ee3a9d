//! Command line front end
//!
//! ```text
//! etl2pcapng <infile> <outfile> [--summary-json <path>] [--max-frame-size <bytes>]
//! etl2pcapng -v | --version
//! ```
//!
//! Exit codes follow the Windows convention of the tool this replaces: 87
//! (`ERROR_INVALID_PARAMETER`) for bad usage, otherwise the OS error code of
//! the failure when there is one.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::{ArgAction, Parser};

use crate::convert::{convert, ConversionSummary, ConvertConfig};
use crate::pcapng::PcapNgWriter;
use crate::trace::{is_sharing_violation, TraceFile};

/// Printed for `-v`/`--version`
pub const VERSION_STRING: &str = concat!("etl2pcapng version ", env!("CARGO_PKG_VERSION"));

const USAGE: &str = "etl2pcapng <infile> <outfile>\nConverts a packet capture from etl to pcapng format.";

/// Command line arguments
#[derive(Parser, Debug)]
#[command(
    name = "etl2pcapng",
    about = "Converts a packet capture from etl to pcapng format.",
    disable_version_flag = true
)]
pub struct Args {
    /// Decoded packet-capture trace to read
    #[arg(required_unless_present = "version")]
    pub input: Option<PathBuf>,

    /// pcapng file to create (overwritten if it exists)
    #[arg(required_unless_present = "version")]
    pub output: Option<PathBuf>,

    /// Print the version and exit
    #[arg(short = 'v', long, action = ArgAction::SetTrue, conflicts_with_all = ["input", "output"])]
    pub version: bool,

    /// Write a JSON conversion summary to this path
    #[arg(long, value_name = "PATH")]
    pub summary_json: Option<PathBuf>,

    /// Largest frame to reassemble, also written as the snapshot length
    #[arg(long, value_name = "BYTES", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_frame_size: Option<u32>,
}

/// Process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus(pub i32);

impl ExitStatus {
    /// Success
    pub const SUCCESS: ExitStatus = ExitStatus(0);
    /// Generic failure with no OS error behind it
    pub const FAILURE: ExitStatus = ExitStatus(1);
    /// `ERROR_INVALID_PARAMETER`, used for bad usage
    pub const INVALID_PARAMETER: ExitStatus = ExitStatus(87);

    /// Status for a failed run: the first OS error code in the chain, if any
    pub fn from_error(err: &anyhow::Error) -> Self {
        err.chain()
            .filter_map(|cause| cause.downcast_ref::<io::Error>())
            .find_map(io::Error::raw_os_error)
            .filter(|code| *code != 0)
            .map_or(Self::FAILURE, ExitStatus)
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        // Codes that do not fit a portable exit status collapse to failure
        u8::try_from(status.0).map_or(ExitCode::FAILURE, ExitCode::from)
    }
}

fn sharing_violation_in_chain(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<io::Error>())
        .any(is_sharing_violation)
}

/// Parse `args` (including the program name) and run the conversion.
pub fn run_with_args<I, T>(args: I) -> ExitStatus
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = match Args::try_parse_from(args) {
        Ok(args) => args,
        // Help is still a usage error, as with any other argument count
        Err(err) if err.kind() == ErrorKind::DisplayHelp => {
            let _ = err.print();
            return ExitStatus::INVALID_PARAMETER;
        }
        Err(err) => {
            let _ = err.print();
            println!("{USAGE}");
            return ExitStatus::INVALID_PARAMETER;
        }
    };

    if args.version {
        println!("{VERSION_STRING}");
        return ExitStatus::SUCCESS;
    }

    match execute(&args) {
        Ok(summary) => {
            print_summary(&summary);
            ExitStatus::SUCCESS
        }
        Err(err) => {
            println!("{err:#}");
            if sharing_violation_in_chain(&err) {
                println!("The file appears to be open already.");
            }
            log::error!("Conversion failed: {:#}", err);
            ExitStatus::from_error(&err)
        }
    }
}

fn print_summary(summary: &ConversionSummary) {
    for iface in &summary.interfaces {
        println!("{}", iface.interface);
    }
    println!("Converted {} frames", summary.frames_converted);
}

/// Run a conversion described by parsed arguments.
///
/// # Errors
///
/// Returns any fatal input, output or conversion error, with context.
pub fn execute(args: &Args) -> anyhow::Result<ConversionSummary> {
    let (Some(input), Some(output)) = (args.input.as_deref(), args.output.as_deref()) else {
        anyhow::bail!("both <infile> and <outfile> are required");
    };

    let mut config = ConvertConfig::from_env();
    if let Some(max) = args.max_frame_size {
        config = config.with_max_frame_size(max as usize);
    }

    let summary = convert_file(input, output, &config)?;

    if let Some(path) = &args.summary_json {
        write_summary(path, &summary)?;
    }
    Ok(summary)
}

/// Convert the trace at `input` into a pcapng file at `output`.
///
/// # Errors
///
/// Returns an error if either file cannot be opened or the conversion fails.
pub fn convert_file(
    input: &Path,
    output: &Path,
    config: &ConvertConfig,
) -> anyhow::Result<ConversionSummary> {
    let file = File::create(output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    let mut writer = PcapNgWriter::new(BufWriter::new(file))
        .with_user_application(VERSION_STRING);

    let mut source = TraceFile::open(input)?;
    log::info!("Converting {} -> {}", input.display(), output.display());

    let summary = convert(&mut source, &mut writer, config)
        .with_context(|| format!("failed to convert {}", input.display()))?;

    writer
        .finish()
        .with_context(|| format!("failed to flush {}", output.display()))?;
    Ok(summary)
}

fn write_summary(path: &Path, summary: &ConversionSummary) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(summary).context("failed to serialize summary")?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    log::debug!("Wrote summary to {}", path.display());
    Ok(())
}
