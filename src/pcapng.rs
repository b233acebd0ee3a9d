//! Minimal pcapng writer.
//!
//! Block builders are pure functions returning fully formed blocks as
//! `Vec<u8>`; [`PcapNgWriter`] streams them into any [`Write`]. The converter
//! talks to the output through the [`CaptureSink`] trait so tests can record
//! calls instead of bytes.

use std::io::{self, Write};

use crate::timestamp::PacketTimestamp;

const BLOCK_TYPE_SECTION_HEADER: u32 = 0x0A0D_0D0A;
const BLOCK_TYPE_INTERFACE_DESC: u32 = 0x0000_0001;
const BLOCK_TYPE_ENHANCED_PACKET: u32 = 0x0000_0006;

const SECTION_HEADER_MAGIC: u32 = 0x1A2B_3C4D;

const OPT_END: u16 = 0;
const OPT_COMMENT: u16 = 1;
const OPT_SHB_USERAPPL: u16 = 4;
const OPT_EPB_FLAGS: u16 = 2;

/// Link layer of an interface description block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    /// IEEE 802.3 Ethernet
    Ethernet,
    /// Raw IP, no link header
    Raw,
    /// IEEE 802.11 without radio header
    Ieee802_11,
}

impl LinkType {
    /// Numeric link type
    pub fn to_pcapng(self) -> u16 {
        match self {
            LinkType::Ethernet => 1,
            // https://www.tcpdump.org/linktypes.html
            LinkType::Raw => 101,
            LinkType::Ieee802_11 => 105,
        }
    }
}

/// Packet direction, stored in the `epb_flags` option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    /// Received by the interface
    Inbound,
    /// Sent by the interface
    Outbound,
}

/// Borrowed view of one enhanced packet block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnhancedPacket<'a> {
    /// Index of the interface description block
    pub interface_id: u32,
    /// Microseconds since the Unix epoch
    pub timestamp: PacketTimestamp,
    /// Packet bytes (captured length == original length)
    pub payload: &'a [u8],
    /// Send/receive flag
    pub direction: PacketDirection,
    /// Optional `opt_comment`
    pub comment: Option<&'a str>,
}

/// Destination for converted capture data.
pub trait CaptureSink {
    /// Write the section header. Called once, before anything else.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn write_section_header(&mut self) -> io::Result<()>;

    /// Append one interface description.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn write_interface_description(&mut self, link_type: LinkType, snap_len: u32)
        -> io::Result<()>;

    /// Append one packet.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn write_enhanced_packet(&mut self, packet: &EnhancedPacket<'_>) -> io::Result<()>;
}

/// Streams pcapng blocks into a writer.
#[derive(Debug)]
pub struct PcapNgWriter<W: Write> {
    out: W,
    user_application: Option<String>,
    interfaces: u32,
    packets: u64,
}

impl<W: Write> PcapNgWriter<W> {
    /// Wrap an output stream.
    pub fn new(out: W) -> Self {
        Self {
            out,
            user_application: None,
            interfaces: 0,
            packets: 0,
        }
    }

    /// Record the writing application in the section header.
    #[must_use]
    pub fn with_user_application(mut self, name: impl Into<String>) -> Self {
        self.user_application = Some(name.into());
        self
    }

    /// Number of interface description blocks written
    pub fn interface_count(&self) -> u32 {
        self.interfaces
    }

    /// Number of packet blocks written
    pub fn packet_count(&self) -> u64 {
        self.packets
    }

    /// Flush and return the inner writer.
    ///
    /// # Errors
    ///
    /// Returns the error from the final flush.
    pub fn finish(mut self) -> io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> CaptureSink for PcapNgWriter<W> {
    fn write_section_header(&mut self) -> io::Result<()> {
        let block = section_header_block(self.user_application.as_deref());
        self.out.write_all(&block)
    }

    fn write_interface_description(
        &mut self,
        link_type: LinkType,
        snap_len: u32,
    ) -> io::Result<()> {
        self.out
            .write_all(&interface_description_block(link_type, snap_len))?;
        self.interfaces += 1;
        Ok(())
    }

    fn write_enhanced_packet(&mut self, packet: &EnhancedPacket<'_>) -> io::Result<()> {
        let block = enhanced_packet_block(packet).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("packet of {} bytes does not fit a pcapng block", packet.payload.len()),
            )
        })?;
        self.out.write_all(&block)?;
        self.packets += 1;
        Ok(())
    }
}

/// Build a Section Header Block (SHB).
pub fn section_header_block(user_appl: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&SECTION_HEADER_MAGIC.to_le_bytes()); // byte-order magic
    body.extend_from_slice(&1u16.to_le_bytes()); // major
    body.extend_from_slice(&0u16.to_le_bytes()); // minor
    body.extend_from_slice(&(-1i64).to_le_bytes()); // section length: unspecified

    let mut opts = Vec::new();
    if let Some(name) = user_appl {
        write_opt(&mut opts, OPT_SHB_USERAPPL, name.as_bytes());
        write_opt_end(&mut opts);
    }

    build_block(BLOCK_TYPE_SECTION_HEADER, &body, &opts)
}

/// Build an Interface Description Block (IDB). Timestamps use the default
/// microsecond resolution, so no options are written.
pub fn interface_description_block(link_type: LinkType, snap_len: u32) -> Vec<u8> {
    let mut body = Vec::with_capacity(8);
    body.extend_from_slice(&link_type.to_pcapng().to_le_bytes());
    body.extend_from_slice(&0u16.to_le_bytes()); // reserved
    body.extend_from_slice(&snap_len.to_le_bytes());

    build_block(BLOCK_TYPE_INTERFACE_DESC, &body, &[])
}

/// Build an Enhanced Packet Block (EPB).
///
/// Returns `None` if the payload or comment is too large for the format.
pub fn enhanced_packet_block(packet: &EnhancedPacket<'_>) -> Option<Vec<u8>> {
    let cap_len = u32::try_from(packet.payload.len()).ok()?;

    let mut body = Vec::with_capacity(20 + packet.payload.len() + 3);
    body.extend_from_slice(&packet.interface_id.to_le_bytes());
    body.extend_from_slice(&packet.timestamp.high.to_le_bytes());
    body.extend_from_slice(&packet.timestamp.low.to_le_bytes());
    body.extend_from_slice(&cap_len.to_le_bytes());
    body.extend_from_slice(&cap_len.to_le_bytes());
    body.extend_from_slice(packet.payload);
    pad_to_32(&mut body);

    let mut opts = Vec::new();
    let dir_bits = match packet.direction {
        PacketDirection::Inbound => 1u32,
        PacketDirection::Outbound => 2u32,
    };
    write_opt(&mut opts, OPT_EPB_FLAGS, &dir_bits.to_le_bytes());
    if let Some(comment) = packet.comment.filter(|c| !c.is_empty()) {
        if comment.len() > usize::from(u16::MAX) {
            return None;
        }
        write_opt(&mut opts, OPT_COMMENT, comment.as_bytes());
    }
    write_opt_end(&mut opts);

    build_block_checked(BLOCK_TYPE_ENHANCED_PACKET, &body, &opts)
}

fn pad_to_32(buf: &mut Vec<u8>) {
    let pad_len = (4 - (buf.len() % 4)) % 4;
    buf.resize(buf.len() + pad_len, 0);
}

fn build_block(block_type: u32, body: &[u8], opts: &[u8]) -> Vec<u8> {
    // SHB and IDB bodies are tiny and fixed-size
    build_block_checked(block_type, body, opts).unwrap_or_default()
}

fn build_block_checked(block_type: u32, body: &[u8], opts: &[u8]) -> Option<Vec<u8>> {
    let total_len = 12 + body.len() + opts.len();
    let total_len_u32 = u32::try_from(total_len).ok()?;

    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(&block_type.to_le_bytes());
    out.extend_from_slice(&total_len_u32.to_le_bytes());
    out.extend_from_slice(body);
    out.extend_from_slice(opts);
    out.extend_from_slice(&total_len_u32.to_le_bytes());
    Some(out)
}

fn write_opt_end(out: &mut Vec<u8>) {
    out.extend_from_slice(&OPT_END.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
}

/// Callers guarantee `val.len() <= u16::MAX`.
fn write_opt(out: &mut Vec<u8>, code: u16, val: &[u8]) {
    out.extend_from_slice(&code.to_le_bytes());
    out.extend_from_slice(&(val.len() as u16).to_le_bytes());
    out.extend_from_slice(val);
    pad_to_32(out);
}
