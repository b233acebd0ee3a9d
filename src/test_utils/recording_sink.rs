//! In-memory [`CaptureSink`] that records every call.

use std::io;

use crate::emitter::ConvertedFrame;
use crate::pcapng::{CaptureSink, EnhancedPacket, LinkType};

/// One call made on the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// `write_section_header`
    SectionHeader,
    /// `write_interface_description`
    Interface {
        /// Link type
        link_type: LinkType,
        /// Snapshot length
        snap_len: u32,
    },
    /// `write_enhanced_packet`
    Packet(ConvertedFrame),
}

/// Records sink calls for later inspection
#[derive(Debug, Default)]
pub struct RecordingSink {
    /// Calls in order
    pub events: Vec<SinkEvent>,
    /// Fail every packet write after this many packets
    pub fail_after_packets: Option<usize>,
}

impl RecordingSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Interface descriptions in order
    pub fn interfaces(&self) -> Vec<(LinkType, u32)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Interface { link_type, snap_len } => Some((*link_type, *snap_len)),
                _ => None,
            })
            .collect()
    }

    /// Packets in order
    pub fn packets(&self) -> Vec<ConvertedFrame> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Packet(frame) => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }
}

impl CaptureSink for RecordingSink {
    fn write_section_header(&mut self) -> io::Result<()> {
        self.events.push(SinkEvent::SectionHeader);
        Ok(())
    }

    fn write_interface_description(&mut self, link_type: LinkType, snap_len: u32) -> io::Result<()> {
        self.events.push(SinkEvent::Interface { link_type, snap_len });
        Ok(())
    }

    fn write_enhanced_packet(&mut self, packet: &EnhancedPacket<'_>) -> io::Result<()> {
        if let Some(limit) = self.fail_after_packets {
            if self.packets().len() >= limit {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "disk full"));
            }
        }
        self.events.push(SinkEvent::Packet(ConvertedFrame {
            payload: packet.payload.to_vec(),
            interface_id: packet.interface_id,
            direction: packet.direction,
            timestamp: packet.timestamp,
            comment: packet.comment.map(str::to_string),
        }));
        Ok(())
    }
}
