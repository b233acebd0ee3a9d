//! Two-pass trace conversion
//!
//! The first pass over the trace only discovers interfaces, so that their
//! descriptions can be written, in a stable order, before any packet block
//! references them. The second pass reassembles and writes the packets.
//!
//! # Usage
//!
//! ```rust,ignore
//! use etl2pcapng_lib::convert::{convert, ConvertConfig};
//! use etl2pcapng_lib::pcapng::PcapNgWriter;
//! use etl2pcapng_lib::trace::TraceFile;
//!
//! let mut source = TraceFile::open(input)?;
//! let mut writer = PcapNgWriter::new(BufWriter::new(File::create(output)?));
//!
//! let summary = convert(&mut source, &mut writer, &ConvertConfig::from_env())?;
//! println!("Converted {} frames", summary.frames_converted);
//! ```

use std::collections::HashMap;
use std::io;

use serde::Serialize;
use thiserror::Error;

use crate::emitter::{build_comment, ConvertedFrame, FrameEmitter};
use crate::frame_assembler::{clear_protected_flag, FrameAssembler, ProcessResult, MAX_FRAME_SIZE};
use crate::interfaces::{Interface, InterfaceRegistry, MediaType, RecordOutcome};
use crate::metadata::{MetadataCache, RadioMetadata, RADIO_METADATA_SIZE};
use crate::pcapng::{CaptureSink, PacketDirection};
use crate::timestamp::PacketTimestamp;
use crate::trace::{property, EventKind, Keywords, PropertyError, TraceError, TraceRecord, TraceSource};

/// Environment variable overriding the maximum frame size
pub const MAX_FRAME_SIZE_ENV: &str = "ETL2PCAPNG_MAX_FRAME_SIZE";

/// Errors that abort a conversion
#[derive(Error, Debug)]
pub enum ConvertError {
    /// Reading the trace failed.
    #[error(transparent)]
    Trace(#[from] TraceError),

    /// Writing the capture failed.
    #[error("failed to write capture output: {0}")]
    Write(#[source] io::Error),

    /// A packet referenced an interface the discovery pass never saw.
    #[error("packet with unrecognized IfIndex {lower_id}")]
    UnknownInterface {
        /// `LowerIfIndex` of the packet
        lower_id: u32,
    },

    /// A record arrived after the session finished.
    #[error("record delivered to a {0:?} session")]
    InvalidState(SessionState),
}

impl ConvertError {
    /// OS error code behind the failure, if any
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            ConvertError::Trace(TraceError::Open { source, .. }) => source.raw_os_error(),
            ConvertError::Trace(TraceError::Io(err)) | ConvertError::Write(err) => {
                err.raw_os_error()
            }
            _ => None,
        }
    }
}

/// Result type alias for conversion.
pub type Result<T> = std::result::Result<T, ConvertError>;

/// Conversion settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertConfig {
    /// Largest frame that can be reassembled; also the snapshot length
    pub max_frame_size: usize,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl ConvertConfig {
    /// Defaults, overridden by `ETL2PCAPNG_MAX_FRAME_SIZE` when set
    pub fn from_env() -> Self {
        match std::env::var(MAX_FRAME_SIZE_ENV) {
            Ok(value) => Self::default().with_max_frame_size(parse_frame_size(&value)),
            Err(_) => Self::default(),
        }
    }

    /// Override the maximum frame size
    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Snapshot length for interface descriptions
    pub fn snap_len(&self) -> u32 {
        u32::try_from(self.max_frame_size).unwrap_or(u32::MAX)
    }
}

/// Parse a frame size setting, falling back to the default on bad input.
pub fn parse_frame_size(s: &str) -> usize {
    match s.trim().parse::<usize>() {
        Ok(size) if size > 0 && u32::try_from(size).is_ok() => size,
        _ => {
            log::warn!(
                "Invalid maximum frame size '{}', defaulting to {}",
                s,
                MAX_FRAME_SIZE
            );
            MAX_FRAME_SIZE
        }
    }
}

/// Phase of a conversion session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// First pass: collecting interfaces
    Discover,
    /// Second pass: writing packets
    Convert,
    /// Both passes complete
    Done,
}

/// Problems that were logged and skipped over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IssueCounts {
    /// Records abandoned because a property could not be read
    pub property_failures: u64,
    /// Metadata records with an unexpected size
    pub unsupported_metadata: u64,
    /// Frames dropped for exceeding the maximum frame size
    pub oversized_frames: u64,
    /// Interfaces seen with more than one media type
    pub media_type_conflicts: u64,
}

/// Per-interface result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceSummary {
    /// The interface
    #[serde(flatten)]
    pub interface: Interface,
    /// Frames written for it
    pub frames: u64,
}

/// Outcome of a conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionSummary {
    /// Frames written
    pub frames_converted: u64,
    /// Records in the trace, packet-capture or not
    pub records_read: u64,
    /// Interfaces in output order
    pub interfaces: Vec<InterfaceSummary>,
    /// Recoverable problems
    pub issues: IssueCounts,
}

/// State carried across both passes of one conversion.
#[derive(Debug)]
pub struct ConversionSession {
    config: ConvertConfig,
    state: SessionState,
    registry: InterfaceRegistry,
    assembler: FrameAssembler,
    metadata: MetadataCache,
    emitter: FrameEmitter,
    frames_per_interface: HashMap<u32, u64>,
    issues: IssueCounts,
}

impl ConversionSession {
    /// Start a session in the discovery phase
    pub fn new(config: ConvertConfig) -> Self {
        let assembler = FrameAssembler::new(config.max_frame_size);
        Self {
            config,
            state: SessionState::Discover,
            registry: InterfaceRegistry::new(),
            assembler,
            metadata: MetadataCache::new(),
            emitter: FrameEmitter::new(),
            frames_per_interface: HashMap::new(),
            issues: IssueCounts::default(),
        }
    }

    /// Current phase
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Interfaces discovered so far
    pub fn registry(&self) -> &InterfaceRegistry {
        &self.registry
    }

    /// Frames written so far
    pub fn frames_converted(&self) -> u64 {
        self.emitter.frames_written()
    }

    /// Recoverable problems so far
    pub fn issues(&self) -> IssueCounts {
        self.issues
    }

    /// Consume one record according to the current phase.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown interfaces during conversion, output
    /// failures, and records delivered after [`finish`](Self::finish).
    pub fn handle_record<S: CaptureSink + ?Sized>(
        &mut self,
        record: &TraceRecord,
        sink: &mut S,
    ) -> Result<()> {
        if !record.is_packet_capture_event() {
            return Ok(());
        }

        match self.state {
            SessionState::Discover => {
                self.discover(record);
                Ok(())
            }
            SessionState::Convert => self.convert_record(record, sink),
            SessionState::Done => Err(ConvertError::InvalidState(self.state)),
        }
    }

    /// Order the interfaces, write their descriptions and switch to the
    /// conversion phase.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::Write`] if the sink fails.
    pub fn finish_discovery<S: CaptureSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        if self.state != SessionState::Discover {
            return Err(ConvertError::InvalidState(self.state));
        }

        self.registry.finalize();
        self.registry
            .emit(sink, self.config.snap_len())
            .map_err(ConvertError::Write)?;

        log::info!("Discovered {} interfaces", self.registry.len());
        self.state = SessionState::Convert;
        Ok(())
    }

    /// End the session and summarize it.
    pub fn finish(mut self, records_read: u64) -> ConversionSummary {
        if self.assembler.buffer_len() > 0 {
            log::warn!(
                "Trace ended inside a packet, {} buffered bytes discarded",
                self.assembler.buffer_len()
            );
        }
        self.state = SessionState::Done;

        let interfaces = self
            .registry
            .ordered()
            .map(|iface| InterfaceSummary {
                interface: *iface,
                frames: self
                    .frames_per_interface
                    .get(&iface.lower_id)
                    .copied()
                    .unwrap_or(0),
            })
            .collect();

        ConversionSummary {
            frames_converted: self.emitter.frames_written(),
            records_read,
            interfaces,
            issues: self.issues,
        }
    }

    fn property_failure(&mut self, record: &TraceRecord, err: &PropertyError) {
        log::warn!(
            "Skipping event {} at {}: {}",
            record.event_id,
            record.timestamp,
            err
        );
        self.issues.property_failures += 1;
    }

    fn discover(&mut self, record: &TraceRecord) {
        let lower_id = match record.property_u32(property::LOWER_IF_INDEX) {
            Ok(id) => id,
            Err(err) => return self.property_failure(record, &err),
        };

        let miniport_id = match self.registry.lookup(lower_id) {
            Some(iface) => iface.miniport_id,
            None => match record.property_u32(property::MINIPORT_IF_INDEX) {
                Ok(id) => id,
                Err(err) => return self.property_failure(record, &err),
            },
        };

        let media_type = MediaType::from_keywords(record.keywords);
        if self.registry.record(lower_id, miniport_id, media_type) == RecordOutcome::MediaConflict {
            self.issues.media_type_conflicts += 1;
        }
    }

    fn convert_record<S: CaptureSink + ?Sized>(&mut self, record: &TraceRecord, sink: &mut S) -> Result<()> {
        let lower_id = match record.property_u32(property::LOWER_IF_INDEX) {
            Ok(id) => id,
            Err(err) => {
                self.property_failure(record, &err);
                return Ok(());
            }
        };

        let iface = *self
            .registry
            .lookup(lower_id)
            .ok_or(ConvertError::UnknownInterface { lower_id })?;

        match record.kind() {
            Some(EventKind::PacketMetadata) => {
                self.cache_metadata(record);
                Ok(())
            }
            Some(EventKind::PacketFragment | EventKind::VmSwitchPacketFragment) => {
                self.process_fragment(record, &iface, sink)
            }
            None => Ok(()),
        }
    }

    fn cache_metadata(&mut self, record: &TraceRecord) {
        let size = match record.property_u32(property::METADATA_SIZE) {
            Ok(size) => size,
            Err(err) => return self.property_failure(record, &err),
        };

        if usize::try_from(size).ok() != Some(RADIO_METADATA_SIZE) {
            log::warn!(
                "Unknown metadata length. Expected {}, got {}",
                RADIO_METADATA_SIZE,
                size
            );
            self.issues.unsupported_metadata += 1;
            return;
        }

        let parsed = record
            .property(property::METADATA, RADIO_METADATA_SIZE)
            .map(RadioMetadata::from_bytes);
        match parsed {
            Ok(Some(meta)) => {
                self.metadata.store(meta);
            }
            Ok(None) => self.issues.unsupported_metadata += 1,
            Err(err) => self.property_failure(record, &err),
        }
    }

    fn process_fragment<S: CaptureSink + ?Sized>(
        &mut self,
        record: &TraceRecord,
        iface: &Interface,
        sink: &mut S,
    ) -> Result<()> {
        let size = match record.property_u32(property::FRAGMENT_SIZE) {
            Ok(size) => size as usize,
            Err(err) => {
                self.property_failure(record, &err);
                return Ok(());
            }
        };

        let fragment = match record.property(property::FRAGMENT, size) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.property_failure(record, &err);
                return Ok(());
            }
        };

        let end_of_frame = record.keywords.contains(Keywords::PACKET_END);
        match self.assembler.process_fragment(fragment, end_of_frame) {
            ProcessResult::Accumulating => Ok(()),
            ProcessResult::Frame(payload) => self.write_frame(payload, record, iface, sink),
            ProcessResult::Dropped { .. } => {
                self.issues.oversized_frames += 1;
                if end_of_frame {
                    self.metadata.clear();
                }
                Ok(())
            }
            ProcessResult::Skipped => {
                if end_of_frame {
                    self.metadata.clear();
                }
                Ok(())
            }
        }
    }

    fn write_frame<S: CaptureSink + ?Sized>(
        &mut self,
        mut payload: Vec<u8>,
        record: &TraceRecord,
        iface: &Interface,
        sink: &mut S,
    ) -> Result<()> {
        let interface_id = iface.output_id.ok_or(ConvertError::UnknownInterface {
            lower_id: iface.lower_id,
        })?;

        if iface.media_type == MediaType::Wireless80211 {
            clear_protected_flag(&mut payload);
        }

        let metadata = self.metadata.take();
        let direction = if record.keywords.contains(Keywords::SEND) {
            PacketDirection::Outbound
        } else {
            PacketDirection::Inbound
        };

        let frame = ConvertedFrame {
            comment: build_comment(metadata.as_ref(), record.process_id),
            payload,
            interface_id,
            direction,
            timestamp: PacketTimestamp::from_ticks(record.timestamp),
        };

        self.emitter.emit(sink, &frame).map_err(ConvertError::Write)?;
        *self.frames_per_interface.entry(iface.lower_id).or_insert(0) += 1;
        Ok(())
    }
}

/// Convert a whole trace: section header, discovery pass, interface
/// descriptions, conversion pass.
///
/// # Errors
///
/// Returns the first fatal error; the sink may hold partial output.
pub fn convert<T, S>(source: &mut T, sink: &mut S, config: &ConvertConfig) -> Result<ConversionSummary>
where
    T: TraceSource,
    S: CaptureSink + ?Sized,
{
    sink.write_section_header().map_err(ConvertError::Write)?;

    let mut session = ConversionSession::new(config.clone());

    let records = source.replay(|record| session.handle_record(record, &mut *sink))?;
    log::debug!("Discovery pass read {} records", records);
    session.finish_discovery(sink)?;

    let records = source.replay(|record| session.handle_record(record, &mut *sink))?;
    log::info!(
        "Conversion pass read {} records, wrote {} frames",
        records,
        session.frames_converted()
    );

    Ok(session.finish(records))
}
