//! Test utilities for etl2pcapng
//!
//! Provides synthetic trace record generation and a recording capture sink
//! for exercising the conversion pipeline without real capture files.

pub mod record_generator;
pub mod recording_sink;

pub use record_generator::*;
pub use recording_sink::*;
