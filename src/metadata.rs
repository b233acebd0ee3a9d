//! Radio receive metadata
//!
//! Native 802.11 adapters log a packet-metadata event carrying the radio
//! receive context of the packet that follows it. The context is cached in a
//! single slot until the next frame completes.
//!
//! # Layout
//!
//! The receive context is a fixed 48-byte little-endian structure:
//!
//! | offset | size | field                 |
//! |--------|------|-----------------------|
//! | 0      | 4    | object header         |
//! | 4      | 4    | receive flags         |
//! | 8      | 4    | phy type index        |
//! | 12     | 4    | center frequency      |
//! | 16     | 2    | MPDUs received        |
//! | 20     | 4    | RSSI (signed)         |
//! | 24     | 1    | data rate             |
//! | 28     | 4    | media-specific size   |
//! | 32     | 8    | media-specific ptr    |
//! | 40     | 8    | timestamp             |

/// Size of the radio receive context in bytes
pub const RADIO_METADATA_SIZE: usize = 48;

const PHY_TYPE_NAMES: [&str; 11] = [
    "Unknown",
    "Fhss",
    "Dsss",
    "IrBaseband",
    "802.11a",
    "802.11b",
    "802.11g",
    "802.11n",
    "802.11ac",
    "802.11ad",
    "802.11ax",
];

/// Display name for a phy type index.
///
/// Indices outside the table map to `"Unknown"`.
pub fn phy_type_name(index: u32) -> &'static str {
    usize::try_from(index)
        .ok()
        .and_then(|i| PHY_TYPE_NAMES.get(i))
        .copied()
        .unwrap_or(PHY_TYPE_NAMES[0])
}

/// Radio receive context for one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RadioMetadata {
    /// Receive flags bitmask
    pub receive_flags: u32,
    /// Index into the phy type table
    pub phy_type_index: u32,
    /// Channel center frequency
    pub center_frequency: u32,
    /// Number of MPDUs the packet was received in
    pub mpdu_count: u16,
    /// Received signal strength
    pub rssi: i32,
    /// Data rate
    pub data_rate: u8,
}

impl RadioMetadata {
    /// Parse the fixed-size receive context.
    ///
    /// Returns `None` unless `bytes` is exactly [`RADIO_METADATA_SIZE`] long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != RADIO_METADATA_SIZE {
            return None;
        }

        let u32_at = |off: usize| {
            u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
        };

        Some(Self {
            receive_flags: u32_at(4),
            phy_type_index: u32_at(8),
            center_frequency: u32_at(12),
            mpdu_count: u16::from_le_bytes([bytes[16], bytes[17]]),
            rssi: i32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]),
            data_rate: bytes[24],
        })
    }

    /// Serialize into the receive-context layout. Fields not modelled here
    /// are written as zero.
    pub fn to_bytes(&self) -> [u8; RADIO_METADATA_SIZE] {
        let mut out = [0u8; RADIO_METADATA_SIZE];
        out[4..8].copy_from_slice(&self.receive_flags.to_le_bytes());
        out[8..12].copy_from_slice(&self.phy_type_index.to_le_bytes());
        out[12..16].copy_from_slice(&self.center_frequency.to_le_bytes());
        out[16..18].copy_from_slice(&self.mpdu_count.to_le_bytes());
        out[20..24].copy_from_slice(&self.rssi.to_le_bytes());
        out[24] = self.data_rate;
        out
    }

    /// Name of the phy type
    pub fn phy_type_name(&self) -> &'static str {
        phy_type_name(self.phy_type_index)
    }
}

/// Single-slot holder for metadata awaiting the next frame.
#[derive(Debug, Default)]
pub struct MetadataCache {
    pending: Option<RadioMetadata>,
}

impl MetadataCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Store metadata for the next frame. Returns true if an unconsumed value
    /// was overwritten.
    pub fn store(&mut self, metadata: RadioMetadata) -> bool {
        let replaced = self.pending.replace(metadata).is_some();
        if replaced {
            log::debug!("Replacing unconsumed packet metadata");
        }
        replaced
    }

    /// Take the pending metadata, leaving the slot empty.
    pub fn take(&mut self) -> Option<RadioMetadata> {
        self.pending.take()
    }

    /// Drop any pending metadata
    pub fn clear(&mut self) {
        self.pending = None;
    }

    /// Whether metadata is waiting
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
