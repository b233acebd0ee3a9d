//! Interface discovery and ordering
//!
//! Every packet event names the interface it was logged on (`LowerIfIndex`)
//! and the miniport underneath it (`MiniportIfIndex`). Filter drivers stacked
//! over one adapter share its miniport index. The registry collects them
//! during the discovery pass, then sorts them so each miniport is immediately
//! followed by the filters layered over it and assigns dense output ids.
//!
//! # Usage
//!
//! ```rust,ignore
//! use etl2pcapng_lib::interfaces::{InterfaceRegistry, MediaType};
//!
//! let mut registry = InterfaceRegistry::new();
//! registry.record(7, 5, MediaType::Ethernet);
//! registry.record(5, 5, MediaType::Ethernet);
//!
//! registry.finalize();
//! registry.emit(&mut writer, 65535)?;
//! ```

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::io;

use serde::Serialize;

use crate::pcapng::{CaptureSink, LinkType};
use crate::trace::Keywords;

/// Link-layer media of an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Ethernet (and anything not flagged otherwise)
    Ethernet,
    /// Native 802.11
    Wireless80211,
    /// Mobile broadband, raw IP
    RawWwan,
}

impl MediaType {
    /// Classify from the keyword mask of the first event seen on an interface.
    pub fn from_keywords(keywords: Keywords) -> Self {
        if keywords.contains(Keywords::MEDIA_NATIVE_802_11) {
            MediaType::Wireless80211
        } else if keywords.contains(Keywords::MEDIA_WIRELESS_WAN) {
            MediaType::RawWwan
        } else {
            MediaType::Ethernet
        }
    }

    /// Keyword bits the provider sets for this media
    pub fn keywords(self) -> Keywords {
        match self {
            MediaType::Ethernet => Keywords::empty(),
            MediaType::Wireless80211 => Keywords::MEDIA_NATIVE_802_11,
            MediaType::RawWwan => Keywords::MEDIA_WIRELESS_WAN,
        }
    }

    /// Output link type
    pub fn link_type(self) -> LinkType {
        match self {
            MediaType::Ethernet => LinkType::Ethernet,
            MediaType::Wireless80211 => LinkType::Ieee802_11,
            MediaType::RawWwan => LinkType::Raw,
        }
    }

    /// Short name used in operator output
    pub fn short_name(self) -> &'static str {
        match self {
            MediaType::Ethernet => "eth",
            MediaType::Wireless80211 => "wifi",
            MediaType::RawWwan => "mbb",
        }
    }
}

/// A network interface seen in the trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Interface {
    /// Interface index the events were logged on
    pub lower_id: u32,
    /// Miniport the interface sits over
    pub miniport_id: u32,
    /// Media classification at first sighting
    pub media_type: MediaType,
    /// Position in the output, set by [`InterfaceRegistry::finalize`]
    pub output_id: Option<u32>,
}

impl Interface {
    /// Whether this is the miniport itself rather than a filter over it
    pub fn is_miniport(&self) -> bool {
        self.lower_id == self.miniport_id
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // eth/mbb are padded to the width of "wifi"
        write!(f, "IF: medium={:<4} ID=", self.media_type.short_name())?;
        match self.output_id {
            Some(id) => write!(f, "{id}")?,
            None => f.write_str("?")?,
        }
        write!(f, "\tIfIndex={}", self.lower_id)?;
        if !self.is_miniport() {
            write!(f, "\t(LWF over IfIndex {})", self.miniport_id)?;
        }
        Ok(())
    }
}

/// What [`InterfaceRegistry::record`] did with a sighting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First sighting, interface added
    Added,
    /// Already known with the same media type
    Known,
    /// Already known with a different media type; the original is kept
    MediaConflict,
}

/// Canonical output order: by miniport, the miniport itself before its
/// filters, then by interface index.
fn canonical_order(a: &Interface, b: &Interface) -> Ordering {
    a.miniport_id
        .cmp(&b.miniport_id)
        .then_with(|| b.is_miniport().cmp(&a.is_miniport()))
        .then_with(|| a.lower_id.cmp(&b.lower_id))
}

/// Table of discovered interfaces keyed by `lower_id`.
#[derive(Debug, Default)]
pub struct InterfaceRegistry {
    by_lower_id: HashMap<u32, Interface>,
    /// `lower_id`s in output order, filled by `finalize`
    order: Vec<u32>,
}

impl InterfaceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of interfaces
    pub fn len(&self) -> usize {
        self.by_lower_id.len()
    }

    /// Whether no interfaces were seen
    pub fn is_empty(&self) -> bool {
        self.by_lower_id.is_empty()
    }

    /// Look up an interface by the index events were logged on
    pub fn lookup(&self, lower_id: u32) -> Option<&Interface> {
        self.by_lower_id.get(&lower_id)
    }

    /// Note a sighting of an interface.
    ///
    /// The first sighting fixes the miniport and media type.
    pub fn record(&mut self, lower_id: u32, miniport_id: u32, media_type: MediaType) -> RecordOutcome {
        if let Some(existing) = self.by_lower_id.get(&lower_id) {
            if existing.media_type != media_type {
                log::warn!(
                    "Inconsistent media type for IfIndex {}: first seen as {}, now {}",
                    lower_id,
                    existing.media_type.short_name(),
                    media_type.short_name()
                );
                return RecordOutcome::MediaConflict;
            }
            return RecordOutcome::Known;
        }

        log::debug!(
            "Discovered IfIndex {} (miniport {}, {})",
            lower_id,
            miniport_id,
            media_type.short_name()
        );
        self.by_lower_id.insert(
            lower_id,
            Interface {
                lower_id,
                miniport_id,
                media_type,
                output_id: None,
            },
        );
        RecordOutcome::Added
    }

    /// Sort the interfaces and assign output ids `0..n`.
    pub fn finalize(&mut self) {
        let mut sorted: Vec<Interface> = self.by_lower_id.values().copied().collect();
        sorted.sort_by(canonical_order);

        self.order.clear();
        for (position, iface) in sorted.iter().enumerate() {
            // Block indices are u32 in pcapng; a trace cannot hold more
            // distinct interface indices than that.
            let output_id = position as u32;
            if let Some(entry) = self.by_lower_id.get_mut(&iface.lower_id) {
                entry.output_id = Some(output_id);
            }
            self.order.push(iface.lower_id);
        }
    }

    /// Interfaces in output order. Empty until [`finalize`](Self::finalize).
    pub fn ordered(&self) -> impl Iterator<Item = &Interface> + '_ {
        self.order
            .iter()
            .filter_map(move |lower_id| self.by_lower_id.get(lower_id))
    }

    /// Write one interface description per interface, in output order.
    ///
    /// # Errors
    ///
    /// Returns the sink's I/O error.
    pub fn emit<S: CaptureSink + ?Sized>(&self, sink: &mut S, snap_len: u32) -> io::Result<()> {
        for iface in self.ordered() {
            sink.write_interface_description(iface.media_type.link_type(), snap_len)?;
            log::info!("{}", iface);
        }
        Ok(())
    }
}
