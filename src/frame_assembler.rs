//! Frame assembly from packet fragments
//!
//! A packet larger than one trace event is logged as a run of fragment
//! records; the last one carries the end-of-frame keyword. This module
//! reassembles them into whole frames without any knowledge of trace records,
//! so it can be tested with plain byte slices.
//!
//! # Usage
//!
//! ```rust,ignore
//! use etl2pcapng_lib::frame_assembler::{FrameAssembler, ProcessResult};
//!
//! let mut assembler = FrameAssembler::new(65535);
//!
//! for (fragment, end_of_frame) in fragments {
//!     if let ProcessResult::Frame(frame) = assembler.process_fragment(fragment, end_of_frame) {
//!         // Complete frame received
//!         write_frame(frame);
//!     }
//! }
//! ```

use thiserror::Error;

/// Default capacity, the largest frame the packet-capture provider logs
pub const MAX_FRAME_SIZE: usize = 65535;

/// 802.11 frame control "protected frame" bit, in byte 1
const DOT11_PROTECTED_FRAME: u8 = 0x40;

/// Errors from the fragment buffer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Appending would exceed the buffer capacity.
    #[error("frame needs {required} bytes, buffer holds at most {capacity}")]
    CapacityExceeded {
        /// Bytes the frame would occupy after the append.
        required: usize,
        /// Buffer capacity.
        capacity: usize,
    },
}

/// Result type alias for frame assembly.
pub type Result<T> = std::result::Result<T, FrameError>;

/// Bounded buffer holding the fragments of one frame.
#[derive(Debug)]
pub struct FragmentBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl FragmentBuffer {
    /// Create an empty buffer. Memory is reserved up front.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a fragment.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::CapacityExceeded`] and leaves the buffer unchanged
    /// if the fragment does not fit. Fragments are never truncated.
    pub fn append(&mut self, fragment: &[u8]) -> Result<()> {
        let required = self.data.len().saturating_add(fragment.len());
        if required > self.capacity {
            return Err(FrameError::CapacityExceeded {
                required,
                capacity: self.capacity,
            });
        }
        self.data.extend_from_slice(fragment);
        Ok(())
    }

    /// Bytes written since the last reset
    pub fn offset(&self) -> usize {
        self.data.len()
    }

    /// Maximum frame size
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether nothing has been appended since the last reset
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Accumulated bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Rewind to offset zero, keeping the allocation
    pub fn reset(&mut self) {
        self.data.clear();
    }
}

/// Result of processing a single fragment
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessResult {
    /// No complete frame yet, continue accumulating
    Accumulating,
    /// Complete frame ready
    Frame(Vec<u8>),
    /// The frame outgrew the buffer and is being discarded
    Dropped {
        /// Size the frame would have reached
        required: usize,
    },
    /// Fragment belongs to a frame that was already dropped
    Skipped,
}

/// Assembles complete frames from fragments.
///
/// Fragments are appended until one arrives with the end-of-frame flag. A
/// frame that would exceed the buffer capacity is dropped whole: the buffer is
/// rewound and later fragments are skipped up to and including the next
/// end-of-frame fragment.
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: FragmentBuffer,
    /// Set while skipping the tail of an oversized frame
    discarding: bool,
}

impl FrameAssembler {
    /// Create an assembler for frames of at most `max_frame_size` bytes
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: FragmentBuffer::new(max_frame_size),
            discarding: false,
        }
    }

    /// Reset the assembler state
    pub fn reset(&mut self) {
        self.buffer.reset();
        self.discarding = false;
    }

    /// Get current buffer size (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.offset()
    }

    /// Maximum frame size
    pub fn max_frame_size(&self) -> usize {
        self.buffer.capacity()
    }

    /// Check if the tail of an oversized frame is being skipped
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    /// Process a single fragment
    ///
    /// Returns `ProcessResult::Frame(data)` when `end_of_frame` completes a
    /// frame.
    pub fn process_fragment(&mut self, fragment: &[u8], end_of_frame: bool) -> ProcessResult {
        if self.discarding {
            if end_of_frame {
                log::debug!("End of dropped frame");
                self.discarding = false;
            }
            return ProcessResult::Skipped;
        }

        if let Err(FrameError::CapacityExceeded { required, capacity }) =
            self.buffer.append(fragment)
        {
            log::warn!(
                "Packet too large ({} bytes, limit {}), dropping it",
                required,
                capacity
            );
            self.buffer.reset();
            self.discarding = !end_of_frame;
            return ProcessResult::Dropped { required };
        }

        if !end_of_frame {
            return ProcessResult::Accumulating;
        }

        let frame = self.buffer.as_slice().to_vec();
        self.buffer.reset();
        log::trace!("Complete frame: {} bytes", frame.len());
        ProcessResult::Frame(frame)
    }
}

/// Clear the 802.11 "protected frame" bit.
///
/// Captured 802.11 payloads are stored decrypted. Frames shorter than two
/// bytes are left alone.
#[inline]
pub fn clear_protected_flag(frame: &mut [u8]) {
    if let Some(fc_flags) = frame.get_mut(1) {
        *fc_flags &= !DOT11_PROTECTED_FRAME;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Fragment buffer
    // =========================================================================

    #[test]
    fn test_buffer_append_tracks_offset() {
        let mut buf = FragmentBuffer::new(16);
        assert!(buf.is_empty());
        buf.append(&[1, 2, 3]).unwrap();
        buf.append(&[4, 5]).unwrap();
        assert_eq!(buf.offset(), 5);
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_buffer_exact_fit() {
        let mut buf = FragmentBuffer::new(4);
        buf.append(&[0; 4]).unwrap();
        assert_eq!(buf.offset(), 4);
    }

    #[test]
    fn test_buffer_rejects_overflow_without_truncating() {
        let mut buf = FragmentBuffer::new(4);
        buf.append(&[1, 2, 3]).unwrap();
        let err = buf.append(&[4, 5]).unwrap_err();
        assert_eq!(
            err,
            FrameError::CapacityExceeded {
                required: 5,
                capacity: 4
            }
        );
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_buffer_reset() {
        let mut buf = FragmentBuffer::new(4);
        buf.append(&[1, 2]).unwrap();
        buf.reset();
        assert_eq!(buf.offset(), 0);
        assert_eq!(buf.capacity(), 4);
    }

    // =========================================================================
    // Assembler
    // =========================================================================

    #[test]
    fn test_assembler_creation() {
        let assembler = FrameAssembler::new(MAX_FRAME_SIZE);
        assert_eq!(assembler.buffer_len(), 0);
        assert_eq!(assembler.max_frame_size(), 65535);
        assert!(!assembler.is_discarding());
    }

    #[test]
    fn test_single_fragment_frame() {
        let mut assembler = FrameAssembler::new(MAX_FRAME_SIZE);
        let result = assembler.process_fragment(&[0xAB; 60], true);
        assert_eq!(result, ProcessResult::Frame(vec![0xAB; 60]));
        assert_eq!(assembler.buffer_len(), 0);
    }

    #[test]
    fn test_three_fragment_frame() {
        // 1400 + 1400 + 200 bytes, END on the last one
        let mut assembler = FrameAssembler::new(MAX_FRAME_SIZE);
        let payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();

        assert_eq!(
            assembler.process_fragment(&payload[..1400], false),
            ProcessResult::Accumulating
        );
        assert_eq!(
            assembler.process_fragment(&payload[1400..2800], false),
            ProcessResult::Accumulating
        );
        assert_eq!(assembler.buffer_len(), 2800);

        match assembler.process_fragment(&payload[2800..], true) {
            ProcessResult::Frame(frame) => assert_eq!(frame, payload),
            other => panic!("expected frame, got {other:?}"),
        }
        assert_eq!(assembler.buffer_len(), 0);
    }

    #[test]
    fn test_empty_end_fragment_completes_frame() {
        let mut assembler = FrameAssembler::new(16);
        assembler.process_fragment(&[1, 2], false);
        assert_eq!(
            assembler.process_fragment(&[], true),
            ProcessResult::Frame(vec![1, 2])
        );
    }

    #[test]
    fn test_oversized_single_fragment_drops_immediately() {
        let mut assembler = FrameAssembler::new(8);
        assert_eq!(
            assembler.process_fragment(&[0; 9], true),
            ProcessResult::Dropped { required: 9 }
        );
        assert!(!assembler.is_discarding());

        // Next frame is unaffected
        assert_eq!(
            assembler.process_fragment(&[7; 3], true),
            ProcessResult::Frame(vec![7; 3])
        );
    }

    #[test]
    fn test_oversized_frame_skips_until_end() {
        let mut assembler = FrameAssembler::new(8);
        assert_eq!(
            assembler.process_fragment(&[0; 6], false),
            ProcessResult::Accumulating
        );
        assert_eq!(
            assembler.process_fragment(&[0; 6], false),
            ProcessResult::Dropped { required: 12 }
        );
        assert!(assembler.is_discarding());
        assert_eq!(assembler.buffer_len(), 0);

        assert_eq!(assembler.process_fragment(&[1], false), ProcessResult::Skipped);
        assert_eq!(assembler.process_fragment(&[1], true), ProcessResult::Skipped);
        assert!(!assembler.is_discarding());

        assert_eq!(
            assembler.process_fragment(&[5, 6], true),
            ProcessResult::Frame(vec![5, 6])
        );
    }

    #[test]
    fn test_reset_clears_state() {
        let mut assembler = FrameAssembler::new(4);
        assembler.process_fragment(&[0; 3], false);
        assembler.process_fragment(&[0; 3], false);
        assert!(assembler.is_discarding());

        assembler.reset();
        assert!(!assembler.is_discarding());
        assert_eq!(assembler.buffer_len(), 0);
    }

    // =========================================================================
    // 802.11 normalization
    // =========================================================================

    #[test]
    fn test_clear_protected_flag() {
        let mut frame = [0x08, 0x41, 0x00, 0x00];
        clear_protected_flag(&mut frame);
        assert_eq!(frame, [0x08, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_clear_protected_flag_leaves_other_bits() {
        let mut frame = [0xFF, 0xFF];
        clear_protected_flag(&mut frame);
        assert_eq!(frame, [0xFF, 0xBF]);
    }

    #[test]
    fn test_clear_protected_flag_short_frame() {
        let mut one = [0x40];
        clear_protected_flag(&mut one);
        assert_eq!(one, [0x40]);

        let mut empty: [u8; 0] = [];
        clear_protected_flag(&mut empty);
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::test_utils::RecordGenerator;

    #[test]
    fn test_reassembly_length_matches_fragment_sum() {
        let payload = RecordGenerator::pattern_payload(4000);

        for chunk in [1usize, 7, 512, 1400, 4000] {
            let mut assembler = FrameAssembler::new(MAX_FRAME_SIZE);
            let fragments = RecordGenerator::split(&payload, chunk);
            let last = fragments.len() - 1;

            let mut frames = Vec::new();
            for (i, fragment) in fragments.iter().enumerate() {
                if let ProcessResult::Frame(frame) = assembler.process_fragment(fragment, i == last) {
                    frames.push(frame);
                }
            }

            assert_eq!(frames.len(), 1, "chunk size {chunk}");
            assert_eq!(frames[0], payload, "chunk size {chunk}");
        }
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut assembler = FrameAssembler::new(MAX_FRAME_SIZE);
        let a = RecordGenerator::pattern_payload(100);
        let b = RecordGenerator::pattern_payload(3000);

        let mut frames = Vec::new();
        for payload in [&a, &b] {
            let fragments = RecordGenerator::split(payload, 1400);
            let last = fragments.len() - 1;
            for (i, fragment) in fragments.iter().enumerate() {
                if let ProcessResult::Frame(frame) = assembler.process_fragment(fragment, i == last) {
                    frames.push(frame);
                }
            }
        }

        assert_eq!(frames, vec![a, b]);
    }

    #[test]
    fn test_max_size_frame_fits() {
        let mut assembler = FrameAssembler::new(MAX_FRAME_SIZE);
        let payload = RecordGenerator::pattern_payload(MAX_FRAME_SIZE);
        let fragments = RecordGenerator::split(&payload, 1500);
        let last = fragments.len() - 1;

        let results: Vec<ProcessResult> = fragments
            .iter()
            .enumerate()
            .map(|(i, fragment)| assembler.process_fragment(fragment, i == last))
            .collect();
        assert_eq!(results.last(), Some(&ProcessResult::Frame(payload)));
    }
}
