//! Decoded trace records and replayable trace sources.
//!
//! The conversion core never decodes raw ETW data itself. It consumes
//! [`TraceRecord`]s, which carry the event header fields plus a bag of named
//! properties, from a [`TraceSource`] that can be replayed from the start.
//!
//! # File Format
//!
//! [`TraceFile`] reads a portable dump of already-decoded records:
//! ```text
//! [8 bytes: magic "ETWDUMP1"]
//! per record:
//!   [u64 LE: timestamp][u64 LE: keywords][u32 LE: process_id][u16 LE: event_id]
//!   [16 bytes: provider GUID][u16 LE: property_count]
//!   per property: [u16 LE: name_len][name UTF-8][u32 LE: value_len][value bytes]
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use etl2pcapng_lib::trace::{TraceFile, TraceSource};
//!
//! let mut trace = TraceFile::open(Path::new("capture.etwdump"))?;
//! let count = trace.replay(|record| {
//!     println!("event {} from pid {}", record.event_id, record.process_id);
//!     Ok::<(), TraceError>(())
//! })?;
//! ```

use bitflags::bitflags;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Magic bytes at the start of every trace dump file.
pub const TRACE_FILE_MAGIC: &[u8; 8] = b"ETWDUMP1";

/// Upper bound for a single property value in a dump file.
const MAX_PROPERTY_LEN: usize = 1024 * 1024;

/// Windows `ERROR_SHARING_VIOLATION`
#[cfg(windows)]
const ERROR_SHARING_VIOLATION: i32 = 32;

/// Errors that can occur while reading or writing trace dumps.
#[derive(Error, Debug)]
pub enum TraceError {
    /// The trace file could not be opened.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// I/O error while streaming records.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not start with [`TRACE_FILE_MAGIC`].
    #[error("not a trace dump file (bad magic)")]
    BadMagic,

    /// Invalid or corrupted record data.
    #[error("invalid record at offset {offset}: {message}")]
    InvalidRecord {
        /// Byte offset of the record in the file.
        offset: u64,
        /// Description of the error.
        message: String,
    },
}

impl TraceError {
    /// Whether the failure means the file is already open elsewhere.
    pub fn is_sharing_violation(&self) -> bool {
        match self {
            TraceError::Open { source, .. } | TraceError::Io(source) => {
                is_sharing_violation(source)
            }
            _ => false,
        }
    }
}

/// Whether an I/O error is a sharing violation (file locked by another process).
pub fn is_sharing_violation(err: &std::io::Error) -> bool {
    #[cfg(windows)]
    {
        err.raw_os_error() == Some(ERROR_SHARING_VIOLATION)
    }
    #[cfg(not(windows))]
    {
        let _ = err;
        false
    }
}

/// Result type alias for trace operations.
pub type Result<T> = std::result::Result<T, TraceError>;

bitflags! {
    /// Keyword bits set by the NDIS packet-capture provider.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Keywords: u64 {
        /// Packet from a mobile broadband (raw IP) adapter
        const MEDIA_WIRELESS_WAN = 0x200;
        /// Packet from a native 802.11 adapter
        const MEDIA_NATIVE_802_11 = 0x10000;
        /// First fragment of a packet
        const PACKET_START = 0x4000_0000;
        /// Last fragment of a packet
        const PACKET_END = 0x8000_0000;
        /// Outbound packet
        const SEND = 0x1_0000_0000;
        /// Inbound packet
        const RECEIVE = 0x2_0000_0000;
    }
}

/// A provider GUID in its in-memory (mixed-endian) byte layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    /// Build a GUID from its textual fields.
    pub const fn from_fields(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        let a = data1.to_le_bytes();
        let b = data2.to_le_bytes();
        let c = data3.to_le_bytes();
        Self([
            a[0], a[1], a[2], a[3], b[0], b[1], c[0], c[1], data4[0], data4[1], data4[2],
            data4[3], data4[4], data4[5], data4[6], data4[7],
        ])
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            u16::from_le_bytes([b[4], b[5]]),
            u16::from_le_bytes([b[6], b[7]]),
            b[8],
            b[9],
            b[10],
            b[11],
            b[12],
            b[13],
            b[14],
            b[15]
        )
    }
}

/// Microsoft-Windows-NDIS-PacketCapture
pub const NDIS_PACKET_CAPTURE: Guid = Guid::from_fields(
    0x2ed6_006e,
    0x4729,
    0x4609,
    [0xb4, 0x23, 0x3e, 0xe7, 0xbc, 0xd6, 0x78, 0xef],
);

/// Packet-capture event kinds the converter understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Packet fragment from a miniport or filter
    PacketFragment,
    /// Radio receive context for the next packet
    PacketMetadata,
    /// Packet fragment from a Hyper-V switch port
    VmSwitchPacketFragment,
}

impl EventKind {
    /// Map an event id to a kind
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            1001 => Some(Self::PacketFragment),
            1002 => Some(Self::PacketMetadata),
            1003 => Some(Self::VmSwitchPacketFragment),
            _ => None,
        }
    }

    /// Event id as written by the provider
    pub fn id(self) -> u16 {
        match self {
            Self::PacketFragment => 1001,
            Self::PacketMetadata => 1002,
            Self::VmSwitchPacketFragment => 1003,
        }
    }
}

/// Property names used by the packet-capture provider
pub mod property {
    /// Interface the event was logged on
    pub const LOWER_IF_INDEX: &str = "LowerIfIndex";
    /// Miniport the interface is layered over
    pub const MINIPORT_IF_INDEX: &str = "MiniportIfIndex";
    /// Length of `Fragment`
    pub const FRAGMENT_SIZE: &str = "FragmentSize";
    /// Packet bytes
    pub const FRAGMENT: &str = "Fragment";
    /// Length of `Metadata`
    pub const METADATA_SIZE: &str = "MetadataSize";
    /// Radio receive context bytes
    pub const METADATA: &str = "Metadata";
}

/// Failure reading a named property from a record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PropertyError {
    /// The record has no property with this name.
    #[error("property {0} not present")]
    Missing(String),

    /// The property holds fewer bytes than requested.
    #[error("property {name} holds {actual} bytes, expected {expected}")]
    TooShort {
        /// Property name.
        name: String,
        /// Bytes requested.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },
}

/// One decoded trace event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    /// Provider that logged the event.
    pub provider: Guid,
    /// Event id within the provider's manifest.
    pub event_id: u16,
    /// Keyword bitmask from the event descriptor.
    pub keywords: Keywords,
    /// Process that was current when the event was logged.
    pub process_id: u32,
    /// Capture time in 100 ns ticks since 1601-01-01 UTC.
    pub timestamp: u64,
    properties: Vec<(String, Vec<u8>)>,
}

impl TraceRecord {
    /// Create a record with no properties.
    pub fn new(
        provider: Guid,
        event_id: u16,
        keywords: Keywords,
        process_id: u32,
        timestamp: u64,
    ) -> Self {
        Self {
            provider,
            event_id,
            keywords,
            process_id,
            timestamp,
            properties: Vec::new(),
        }
    }

    /// Attach a property (builder style).
    #[must_use]
    pub fn with_property(mut self, name: &str, value: impl Into<Vec<u8>>) -> Self {
        self.set_property(name, value);
        self
    }

    /// Attach a `u32` property in little-endian form (builder style).
    #[must_use]
    pub fn with_u32(self, name: &str, value: u32) -> Self {
        self.with_property(name, value.to_le_bytes())
    }

    /// Set or replace a property.
    pub fn set_property(&mut self, name: &str, value: impl Into<Vec<u8>>) {
        let value = value.into();
        if let Some(slot) = self.properties.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.properties.push((name.to_string(), value));
        }
    }

    /// All properties in insertion order.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.properties
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_slice()))
    }

    /// Kind of the event, if it is one the converter handles.
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_id(self.event_id)
    }

    /// Whether this is a packet-capture event the converter should look at.
    pub fn is_packet_capture_event(&self) -> bool {
        self.provider == NDIS_PACKET_CAPTURE && self.kind().is_some()
    }

    /// Read `expected_len` bytes of a named property.
    ///
    /// # Errors
    ///
    /// Returns `PropertyError` if the property is missing or shorter than
    /// `expected_len`.
    pub fn property(&self, name: &str, expected_len: usize) -> std::result::Result<&[u8], PropertyError> {
        let (_, value) = self
            .properties
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| PropertyError::Missing(name.to_string()))?;

        if value.len() < expected_len {
            return Err(PropertyError::TooShort {
                name: name.to_string(),
                expected: expected_len,
                actual: value.len(),
            });
        }
        Ok(&value[..expected_len])
    }

    /// Read a little-endian `u32` property.
    ///
    /// # Errors
    ///
    /// Returns `PropertyError` if the property is missing or too short.
    pub fn property_u32(&self, name: &str) -> std::result::Result<u32, PropertyError> {
        let bytes = self.property(name, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// An ordered record stream that can be replayed from the beginning.
pub trait TraceSource {
    /// Feed every record, in order, to `handler`.
    ///
    /// Returns the number of records delivered. Stops at the first error the
    /// handler returns.
    ///
    /// # Errors
    ///
    /// Returns the handler's error, or a [`TraceError`] converted into `E` if
    /// the source itself fails.
    fn replay<E, F>(&mut self, handler: F) -> std::result::Result<u64, E>
    where
        E: From<TraceError>,
        F: FnMut(&TraceRecord) -> std::result::Result<(), E>;
}

/// In-memory trace, mostly for tests and tooling.
#[derive(Debug, Clone, Default)]
pub struct MemoryTrace {
    records: Vec<TraceRecord>,
}

impl MemoryTrace {
    /// Wrap a list of records.
    pub fn new(records: Vec<TraceRecord>) -> Self {
        Self { records }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether there are no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Borrow the records.
    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }
}

impl TraceSource for MemoryTrace {
    fn replay<E, F>(&mut self, mut handler: F) -> std::result::Result<u64, E>
    where
        E: From<TraceError>,
        F: FnMut(&TraceRecord) -> std::result::Result<(), E>,
    {
        let mut count = 0u64;
        for record in &self.records {
            handler(record)?;
            count += 1;
        }
        Ok(count)
    }
}

/// A trace dump on disk, streamed from the start on every replay.
#[derive(Debug, Clone)]
pub struct TraceFile {
    path: PathBuf,
}

impl TraceFile {
    /// Open a dump file and check its magic.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::Open` if the file cannot be opened and
    /// `TraceError::BadMagic` if it is not a dump file.
    pub fn open(path: &Path) -> Result<Self> {
        let trace = Self {
            path: path.to_path_buf(),
        };
        trace.reader()?;
        log::debug!("Opened trace dump {}", path.display());
        Ok(trace)
    }

    /// Path of the dump file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the file positioned just after the magic.
    fn reader(&self) -> Result<BufReader<File>> {
        let file = File::open(&self.path).map_err(|source| TraceError::Open {
            path: self.path.clone(),
            source,
        })?;
        let mut reader = BufReader::new(file);
        let mut magic = [0u8; 8];
        match reader.read_exact(&mut magic) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(TraceError::BadMagic)
            }
            Err(e) => return Err(TraceError::Io(e)),
        }
        if &magic != TRACE_FILE_MAGIC {
            return Err(TraceError::BadMagic);
        }
        Ok(reader)
    }
}

impl TraceSource for TraceFile {
    fn replay<E, F>(&mut self, mut handler: F) -> std::result::Result<u64, E>
    where
        E: From<TraceError>,
        F: FnMut(&TraceRecord) -> std::result::Result<(), E>,
    {
        let mut reader = self.reader()?;
        let mut offset = TRACE_FILE_MAGIC.len() as u64;
        let mut count = 0u64;

        while let Some((record, len)) = read_record(&mut reader, offset)? {
            handler(&record)?;
            offset += len;
            count += 1;
        }

        log::debug!("Replayed {} records from {}", count, self.path.display());
        Ok(count)
    }
}

/// Tracks how many bytes a record read consumed, for error offsets.
struct CountingReader<'a, R: Read> {
    inner: &'a mut R,
    consumed: u64,
    record_offset: u64,
}

impl<R: Read> CountingReader<'_, R> {
    fn read_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.fill(&mut buf, what)?;
        Ok(buf)
    }

    fn read_vec(&mut self, len: usize, what: &str) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.fill(&mut buf, what)?;
        Ok(buf)
    }

    fn fill(&mut self, buf: &mut [u8], what: &str) -> Result<()> {
        self.inner.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TraceError::InvalidRecord {
                    offset: self.record_offset,
                    message: format!("unexpected EOF reading {}", what),
                }
            } else {
                TraceError::Io(e)
            }
        })?;
        self.consumed += buf.len() as u64;
        Ok(())
    }
}

/// Read one record. Returns `None` on a clean end of file.
fn read_record<R: Read>(reader: &mut R, offset: u64) -> Result<Option<(TraceRecord, u64)>> {
    // A clean EOF is only allowed on a record boundary
    let mut timestamp_bytes = [0u8; 8];
    match reader.read_exact(&mut timestamp_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(TraceError::Io(e)),
    }

    let mut r = CountingReader {
        inner: reader,
        consumed: 8,
        record_offset: offset,
    };

    let timestamp = u64::from_le_bytes(timestamp_bytes);
    let keywords = Keywords::from_bits_retain(u64::from_le_bytes(r.read_array("keywords")?));
    let process_id = u32::from_le_bytes(r.read_array("process id")?);
    let event_id = u16::from_le_bytes(r.read_array("event id")?);
    let provider = Guid(r.read_array("provider")?);
    let property_count = u16::from_le_bytes(r.read_array("property count")?);

    let mut record = TraceRecord::new(provider, event_id, keywords, process_id, timestamp);

    for _ in 0..property_count {
        let name_len = u16::from_le_bytes(r.read_array("property name length")?) as usize;
        let name_bytes = r.read_vec(name_len, "property name")?;
        let name = String::from_utf8(name_bytes).map_err(|_| TraceError::InvalidRecord {
            offset,
            message: "property name is not UTF-8".to_string(),
        })?;

        let value_len = u32::from_le_bytes(r.read_array("property length")?) as usize;
        if value_len > MAX_PROPERTY_LEN {
            return Err(TraceError::InvalidRecord {
                offset,
                message: format!("property {} length {} exceeds 1MB limit", name, value_len),
            });
        }
        let value = r.read_vec(value_len, "property value")?;
        record.properties.push((name, value));
    }

    Ok(Some((record, r.consumed)))
}

/// Serialize one record in dump format.
///
/// # Errors
///
/// Returns `TraceError::Io` if writing fails, or `InvalidRecord` if a field
/// does not fit the format.
pub fn write_record<W: Write>(out: &mut W, record: &TraceRecord) -> Result<()> {
    let property_count =
        u16::try_from(record.properties.len()).map_err(|_| TraceError::InvalidRecord {
            offset: 0,
            message: "too many properties".to_string(),
        })?;

    out.write_all(&record.timestamp.to_le_bytes())?;
    out.write_all(&record.keywords.bits().to_le_bytes())?;
    out.write_all(&record.process_id.to_le_bytes())?;
    out.write_all(&record.event_id.to_le_bytes())?;
    out.write_all(&record.provider.0)?;
    out.write_all(&property_count.to_le_bytes())?;

    for (name, value) in &record.properties {
        let name_len = u16::try_from(name.len()).map_err(|_| TraceError::InvalidRecord {
            offset: 0,
            message: format!("property name too long: {} bytes", name.len()),
        })?;
        if value.len() > MAX_PROPERTY_LEN {
            return Err(TraceError::InvalidRecord {
                offset: 0,
                message: format!("property {} length {} exceeds 1MB limit", name, value.len()),
            });
        }
        out.write_all(&name_len.to_le_bytes())?;
        out.write_all(name.as_bytes())?;
        out.write_all(&(value.len() as u32).to_le_bytes())?;
        out.write_all(value)?;
    }
    Ok(())
}

/// Write a complete dump file.
///
/// # Errors
///
/// Returns `TraceError::Io` if the file cannot be created or written.
pub fn write_trace_file(path: &Path, records: &[TraceRecord]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(TRACE_FILE_MAGIC)?;
    for record in records {
        write_record(&mut out, record)?;
    }
    out.flush()?;

    log::info!("Trace dump saved: {} records to {}", records.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fragment_record(pid: u32, payload: &[u8]) -> TraceRecord {
        TraceRecord::new(
            NDIS_PACKET_CAPTURE,
            EventKind::PacketFragment.id(),
            Keywords::PACKET_START | Keywords::PACKET_END | Keywords::RECEIVE,
            pid,
            133_000_000_000_000_000,
        )
        .with_u32(property::LOWER_IF_INDEX, 7)
        .with_u32(property::FRAGMENT_SIZE, payload.len() as u32)
        .with_property(property::FRAGMENT, payload)
    }

    #[test]
    fn test_guid_display() {
        assert_eq!(
            NDIS_PACKET_CAPTURE.to_string(),
            "{2ED6006E-4729-4609-B423-3EE7BCD678EF}"
        );
    }

    #[test]
    fn test_guid_byte_layout() {
        // data1..data3 are stored little-endian
        assert_eq!(&NDIS_PACKET_CAPTURE.0[..4], &[0x6e, 0x00, 0xd6, 0x2e]);
        assert_eq!(&NDIS_PACKET_CAPTURE.0[8..], &[0xb4, 0x23, 0x3e, 0xe7, 0xbc, 0xd6, 0x78, 0xef]);
    }

    #[test]
    fn test_event_kind_ids() {
        assert_eq!(EventKind::from_id(1001), Some(EventKind::PacketFragment));
        assert_eq!(EventKind::from_id(1002), Some(EventKind::PacketMetadata));
        assert_eq!(EventKind::from_id(1003), Some(EventKind::VmSwitchPacketFragment));
        assert_eq!(EventKind::from_id(1000), None);
        assert_eq!(EventKind::VmSwitchPacketFragment.id(), 1003);
    }

    #[test]
    fn test_keywords_keep_unknown_bits() {
        let kw = Keywords::from_bits_retain(0x8000_0000 | 0x1);
        assert!(kw.contains(Keywords::PACKET_END));
        assert_eq!(kw.bits(), 0x8000_0001);
    }

    #[test]
    fn test_property_lookup() {
        let record = fragment_record(100, &[1, 2, 3, 4, 5]);
        assert_eq!(record.property_u32(property::LOWER_IF_INDEX), Ok(7));
        assert_eq!(record.property(property::FRAGMENT, 3), Ok(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_property_missing() {
        let record = fragment_record(100, &[1, 2]);
        assert_eq!(
            record.property_u32(property::MINIPORT_IF_INDEX),
            Err(PropertyError::Missing("MiniportIfIndex".to_string()))
        );
    }

    #[test]
    fn test_property_too_short() {
        let record = fragment_record(100, &[1, 2]);
        assert!(matches!(
            record.property(property::FRAGMENT, 10),
            Err(PropertyError::TooShort { expected: 10, actual: 2, .. })
        ));
    }

    #[test]
    fn test_set_property_replaces() {
        let mut record = fragment_record(1, &[0xAA]);
        record.set_property(property::FRAGMENT, vec![0xBB, 0xCC]);
        assert_eq!(record.property(property::FRAGMENT, 2), Ok(&[0xBBu8, 0xCC][..]));
        assert_eq!(record.properties().count(), 3);
    }

    #[test]
    fn test_packet_capture_filter() {
        let record = fragment_record(1, &[0]);
        assert!(record.is_packet_capture_event());

        let mut other = record.clone();
        other.provider = Guid::default();
        assert!(!other.is_packet_capture_event());

        let mut unknown = record;
        unknown.event_id = 1004;
        assert!(!unknown.is_packet_capture_event());
    }

    #[test]
    fn test_memory_trace_replays_twice() {
        let mut trace = MemoryTrace::new(vec![fragment_record(1, &[1]), fragment_record(2, &[2])]);

        let mut pids = Vec::new();
        let n1 = trace
            .replay(|r| {
                pids.push(r.process_id);
                Ok::<(), TraceError>(())
            })
            .unwrap();
        let n2 = trace
            .replay(|r| {
                pids.push(r.process_id);
                Ok::<(), TraceError>(())
            })
            .unwrap();

        assert_eq!((n1, n2), (2, 2));
        assert_eq!(pids, vec![1, 2, 1, 2]);
    }

    #[test]
    fn test_file_write_and_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace.etwdump");
        let records = vec![fragment_record(10, &[0xDE, 0xAD]), fragment_record(11, &[0xBE, 0xEF, 0x00])];

        write_trace_file(&path, &records).unwrap();

        let mut trace = TraceFile::open(&path).unwrap();
        for _ in 0..2 {
            let mut replayed = Vec::new();
            trace
                .replay(|r| {
                    replayed.push(r.clone());
                    Ok::<(), TraceError>(())
                })
                .unwrap();
            assert_eq!(replayed, records);
        }
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempdir().unwrap();
        let result = TraceFile::open(&dir.path().join("nope.etwdump"));
        assert!(matches!(result, Err(TraceError::Open { .. })));
    }

    #[test]
    fn test_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.etwdump");
        std::fs::write(&path, b"NOTADUMP").unwrap();
        assert!(matches!(TraceFile::open(&path), Err(TraceError::BadMagic)));

        let empty = dir.path().join("empty.etwdump");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(TraceFile::open(&empty), Err(TraceError::BadMagic)));
    }

    #[test]
    fn test_truncated_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("truncated.etwdump");

        let mut bytes = TRACE_FILE_MAGIC.to_vec();
        write_record(&mut bytes, &fragment_record(1, &[1, 2, 3, 4])).unwrap();
        bytes.truncate(bytes.len() - 2);
        std::fs::write(&path, &bytes).unwrap();

        let mut trace = TraceFile::open(&path).unwrap();
        let result = trace.replay(|_| Ok::<(), TraceError>(()));
        assert!(matches!(
            result,
            Err(TraceError::InvalidRecord { offset: 8, ref message }) if message.contains("property value")
        ));
    }

    #[test]
    fn test_oversized_property_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("huge.etwdump");

        let mut bytes = TRACE_FILE_MAGIC.to_vec();
        bytes.extend_from_slice(&0u64.to_le_bytes()); // timestamp
        bytes.extend_from_slice(&0u64.to_le_bytes()); // keywords
        bytes.extend_from_slice(&0u32.to_le_bytes()); // pid
        bytes.extend_from_slice(&1001u16.to_le_bytes()); // event id
        bytes.extend_from_slice(&[0u8; 16]); // provider
        bytes.extend_from_slice(&1u16.to_le_bytes()); // property count
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.push(b'X');
        bytes.extend_from_slice(&(2 * 1024 * 1024u32).to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let mut trace = TraceFile::open(&path).unwrap();
        let result = trace.replay(|_| Ok::<(), TraceError>(()));
        assert!(matches!(
            result,
            Err(TraceError::InvalidRecord { ref message, .. }) if message.contains("exceeds")
        ));
    }

    #[test]
    fn test_handler_error_stops_replay() {
        let mut trace = MemoryTrace::new(vec![fragment_record(1, &[1]), fragment_record(2, &[2])]);
        let mut seen = 0;
        let result = trace.replay(|_| {
            seen += 1;
            Err::<(), TraceError>(TraceError::BadMagic)
        });
        assert!(result.is_err());
        assert_eq!(seen, 1);
    }
}
