//! Synthetic trace record generation for testing
//!
//! Builds packet-capture records the way the NDIS capture provider logs them,
//! so conversion can be tested without a real trace.
//!
//! # Example
//!
//! ```rust,ignore
//! use etl2pcapng_lib::test_utils::{RecordGenerator, TestInterface};
//!
//! let mut gen = RecordGenerator::default();
//! let eth = TestInterface::ethernet(5);
//!
//! // One record per 1400-byte fragment, PACKET_END on the last
//! let records = gen.frame(&eth, &RecordGenerator::pattern_payload(3000));
//! ```

use crate::interfaces::MediaType;
use crate::metadata::RadioMetadata;
use crate::pcapng::PacketDirection;
use crate::trace::{property, EventKind, Guid, Keywords, TraceRecord, NDIS_PACKET_CAPTURE};

/// 2022-06-18T04:26:40Z in 100 ns ticks since 1601
pub const BASE_TIMESTAMP: u64 = 133_000_000_000_000_000;

/// Interface the generated records claim to come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestInterface {
    /// `LowerIfIndex` property
    pub lower_id: u32,
    /// `MiniportIfIndex` property
    pub miniport_id: u32,
    /// Drives the media keyword bits
    pub media: MediaType,
}

impl TestInterface {
    /// Ethernet miniport
    pub fn ethernet(if_index: u32) -> Self {
        Self {
            lower_id: if_index,
            miniport_id: if_index,
            media: MediaType::Ethernet,
        }
    }

    /// Native 802.11 miniport
    pub fn wifi(if_index: u32) -> Self {
        Self {
            lower_id: if_index,
            miniport_id: if_index,
            media: MediaType::Wireless80211,
        }
    }

    /// Mobile broadband miniport
    pub fn mbb(if_index: u32) -> Self {
        Self {
            lower_id: if_index,
            miniport_id: if_index,
            media: MediaType::RawWwan,
        }
    }

    /// Filter layered over another interface
    pub fn filter_over(lower_id: u32, miniport: &TestInterface) -> Self {
        Self {
            lower_id,
            miniport_id: miniport.miniport_id,
            media: miniport.media,
        }
    }
}

/// Generates packet-capture trace records
#[derive(Debug, Clone)]
pub struct RecordGenerator {
    /// Maximum bytes per fragment record
    pub max_fragment_size: usize,
    /// Process id stamped on every record
    pub process_id: u32,
    /// Direction of generated frames
    pub direction: PacketDirection,
    timestamp: u64,
}

impl Default for RecordGenerator {
    fn default() -> Self {
        Self::new(1400)
    }
}

impl RecordGenerator {
    /// Create a generator splitting frames into `max_fragment_size` chunks
    pub fn new(max_fragment_size: usize) -> Self {
        Self {
            max_fragment_size,
            process_id: 100,
            direction: PacketDirection::Inbound,
            timestamp: BASE_TIMESTAMP,
        }
    }

    /// Set the process id for subsequent records
    #[must_use]
    pub fn with_process_id(mut self, process_id: u32) -> Self {
        self.process_id = process_id;
        self
    }

    /// Timestamp the next record will carry
    pub fn next_timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Deterministic non-trivial payload
    pub fn pattern_payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Split `payload` into chunks. An empty payload yields one empty chunk.
    pub fn split(payload: &[u8], chunk_size: usize) -> Vec<&[u8]> {
        if payload.is_empty() || chunk_size == 0 {
            return vec![payload];
        }
        payload.chunks(chunk_size).collect()
    }

    fn base_record(&mut self, iface: &TestInterface, kind: EventKind, extra: Keywords) -> TraceRecord {
        let direction = match self.direction {
            PacketDirection::Inbound => Keywords::RECEIVE,
            PacketDirection::Outbound => Keywords::SEND,
        };
        let record = TraceRecord::new(
            NDIS_PACKET_CAPTURE,
            kind.id(),
            iface.media.keywords() | direction | extra,
            self.process_id,
            self.timestamp,
        )
        .with_u32(property::LOWER_IF_INDEX, iface.lower_id)
        .with_u32(property::MINIPORT_IF_INDEX, iface.miniport_id);

        // 1 us per record
        self.timestamp += 10;
        record
    }

    /// One fragment record
    pub fn fragment(&mut self, iface: &TestInterface, bytes: &[u8], start: bool, end: bool) -> TraceRecord {
        let mut flags = Keywords::empty();
        if start {
            flags |= Keywords::PACKET_START;
        }
        if end {
            flags |= Keywords::PACKET_END;
        }

        let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        self.base_record(iface, EventKind::PacketFragment, flags)
            .with_u32(property::FRAGMENT_SIZE, len)
            .with_property(property::FRAGMENT, bytes)
    }

    /// Records for one frame, PACKET_START on the first and PACKET_END on
    /// the last
    pub fn frame(&mut self, iface: &TestInterface, payload: &[u8]) -> Vec<TraceRecord> {
        let fragments = Self::split(payload, self.max_fragment_size);
        let last = fragments.len() - 1;
        fragments
            .iter()
            .enumerate()
            .map(|(i, bytes)| self.fragment(iface, bytes, i == 0, i == last))
            .collect()
    }

    /// Packet-metadata record carrying a radio receive context
    pub fn metadata(&mut self, iface: &TestInterface, meta: &RadioMetadata) -> TraceRecord {
        let bytes = meta.to_bytes();
        self.raw_metadata(iface, &bytes)
    }

    /// Packet-metadata record with arbitrary bytes and a matching size
    pub fn raw_metadata(&mut self, iface: &TestInterface, bytes: &[u8]) -> TraceRecord {
        let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        self.base_record(iface, EventKind::PacketMetadata, Keywords::empty())
            .with_u32(property::METADATA_SIZE, len)
            .with_property(property::METADATA, bytes)
    }

    /// Event from some other provider
    pub fn foreign_event(&mut self) -> TraceRecord {
        let record = TraceRecord::new(
            Guid::from_fields(0x1234_5678, 0x9abc, 0xdef0, [1, 2, 3, 4, 5, 6, 7, 8]),
            EventKind::PacketFragment.id(),
            Keywords::PACKET_END,
            self.process_id,
            self.timestamp,
        )
        .with_u32(property::LOWER_IF_INDEX, 999);
        self.timestamp += 10;
        record
    }
}
