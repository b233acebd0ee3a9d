//! `etl2pcapng` - convert NDIS packet-capture traces to pcapng
//!
//! The converter reads decoded packet-capture trace records twice: once to
//! discover the network interfaces, once to reassemble and write the packets.

pub mod cli;
pub mod convert;
pub mod emitter;
pub mod frame_assembler;
pub mod interfaces;
pub mod metadata;
pub mod pcapng;
pub mod test_utils;
pub mod timestamp;
pub mod trace;

use std::process::ExitCode;

/// Run the `etl2pcapng` command line tool
///
/// Initializes logging, then parses the process arguments and converts the
/// trace they name.
pub fn run() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::debug!("etl2pcapng {} starting up", env!("CARGO_PKG_VERSION"));

    cli::run_with_args(std::env::args_os()).into()
}
