//! Frame annotation and output
//!
//! Completed frames are tagged with the logging process and, for 802.11
//! frames preceded by a metadata event, with the radio receive context. The
//! tag goes into the packet block's comment option.

use std::io;

use crate::metadata::RadioMetadata;
use crate::pcapng::{CaptureSink, EnhancedPacket, PacketDirection};
use crate::timestamp::PacketTimestamp;

/// Upper bound for a metadata comment, including a terminator byte
pub const METADATA_COMMENT_LIMIT: usize = 65535;

/// Upper bound for a process-only comment, including a terminator byte
pub const PID_COMMENT_LIMIT: usize = 16;

/// A reassembled frame ready for output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedFrame {
    /// Packet bytes
    pub payload: Vec<u8>,
    /// Output id of the interface
    pub interface_id: u32,
    /// Send or receive
    pub direction: PacketDirection,
    /// Capture time
    pub timestamp: PacketTimestamp,
    /// Annotation, if one could be built
    pub comment: Option<String>,
}

impl ConvertedFrame {
    /// Borrow as a packet block
    pub fn as_packet(&self) -> EnhancedPacket<'_> {
        EnhancedPacket {
            interface_id: self.interface_id,
            timestamp: self.timestamp,
            payload: &self.payload,
            direction: self.direction,
            comment: self.comment.as_deref(),
        }
    }
}

/// Keep `text` only if it fits in `limit` bytes with a terminator.
fn bounded(text: String, limit: usize) -> Option<String> {
    if text.len() < limit {
        Some(text)
    } else {
        log::warn!(
            "Packet comment of {} bytes exceeds {} byte limit, omitting it",
            text.len(),
            limit - 1
        );
        None
    }
}

/// Build the comment for a frame.
///
/// With metadata the comment describes the radio context and the process;
/// without it only the process id is recorded. A comment that does not fit
/// its bound is omitted rather than truncated.
pub fn build_comment(metadata: Option<&RadioMetadata>, process_id: u32) -> Option<String> {
    // The provider logs "no process" as 0xFFFFFFFF, shown as -1
    let pid = process_id as i32;

    match metadata {
        Some(meta) => bounded(
            format!(
                "Packet Metadata: ReceiveFlags:0x{:x}, PhyType:{}, CenterCh:{}, NumMPDUsReceived:{}, RSSI:{}, DataRate:{}, PID={}",
                meta.receive_flags,
                meta.phy_type_name(),
                meta.center_frequency,
                meta.mpdu_count,
                meta.rssi,
                meta.data_rate,
                pid
            ),
            METADATA_COMMENT_LIMIT,
        ),
        None => bounded(format!("PID={pid}"), PID_COMMENT_LIMIT),
    }
}

/// Writes converted frames to a sink and counts them.
#[derive(Debug, Default)]
pub struct FrameEmitter {
    frames_written: u64,
}

impl FrameEmitter {
    /// Create an emitter with a zero count
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames written so far
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Write one frame.
    ///
    /// # Errors
    ///
    /// Returns the sink's I/O error.
    pub fn emit<S: CaptureSink + ?Sized>(&mut self, sink: &mut S, frame: &ConvertedFrame) -> io::Result<()> {
        sink.write_enhanced_packet(&frame.as_packet())?;
        self.frames_written += 1;
        Ok(())
    }
}
