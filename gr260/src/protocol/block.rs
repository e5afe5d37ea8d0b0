//! Payload block reassembly.
//!
//! A block is announced by `$PHLX902,<offset>,<length>,<checksum>` and its
//! bytes follow immediately. The block is complete when exactly `length`
//! bytes have arrived, or when the line goes idle with bytes buffered. A
//! completed block is only accepted if its length matches the announcement
//! and is a whole number of records for the current phase.

use log::{debug, trace};

use crate::record::{TRACK_INFO_SIZE, WAYPOINT_SIZE};

/// Which kind of records a bulk transfer carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Track headers, 64 bytes each.
    TrackList,
    /// Waypoints, 32 bytes each.
    Waypoints,
}

impl Phase {
    /// Size of one record in this phase.
    pub fn record_size(self) -> usize {
        match self {
            Self::TrackList => TRACK_INFO_SIZE,
            Self::Waypoints => WAYPOINT_SIZE,
        }
    }

    /// Short name used in logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            Self::TrackList => "track list",
            Self::Waypoints => "waypoints",
        }
    }
}

/// Result of closing a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Nothing was buffered.
    Empty,
    /// A valid block, ready for the decoder.
    Complete(Vec<u8>),
    /// Wrong length; the bytes were discarded.
    Mismatch {
        /// Announced length, if any.
        expected: Option<usize>,
        /// Bytes actually received.
        received: usize,
    },
}

/// Accumulates payload bytes against an expected-length watermark.
#[derive(Debug)]
pub struct BlockReassembler {
    phase: Phase,
    expected: Option<usize>,
    buf: Vec<u8>,
}

impl BlockReassembler {
    /// Create an idle reassembler for `phase`.
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            expected: None,
            buf: Vec::new(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Switch phase. Buffered bytes and the watermark are dropped.
    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.reset();
    }

    /// Arm for a block of `length` bytes.
    pub fn announce(&mut self, length: usize) {
        trace!("Expecting {length} payload bytes");
        self.expected = Some(length);
        self.buf.clear();
    }

    /// Announced length of the current block.
    pub fn expected(&self) -> Option<usize> {
        self.expected
    }

    /// Bytes buffered so far.
    pub fn received(&self) -> usize {
        self.buf.len()
    }

    /// Whether no payload is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append payload bytes. Returns `true` once the announced length is
    /// reached exactly.
    pub fn extend(&mut self, bytes: &[u8]) -> bool {
        self.buf.extend_from_slice(bytes);
        self.is_full()
    }

    /// Append one payload byte. Returns `true` once the announced length is
    /// reached exactly.
    pub fn push(&mut self, byte: u8) -> bool {
        self.buf.push(byte);
        self.is_full()
    }

    fn is_full(&self) -> bool {
        self.expected == Some(self.buf.len())
    }

    /// Close the current block and clear the watermark.
    pub fn finish(&mut self) -> BlockOutcome {
        let expected = self.expected.take();
        let data = std::mem::take(&mut self.buf);

        if data.is_empty() {
            return BlockOutcome::Empty;
        }

        let length_ok = expected.is_none_or(|n| n == data.len());
        if length_ok && data.len() % self.phase.record_size() == 0 {
            debug!("{} block complete: {} bytes", self.phase.name(), data.len());
            BlockOutcome::Complete(data)
        } else {
            debug!(
                "{} block mismatch: expected {expected:?}, received {}",
                self.phase.name(),
                data.len()
            );
            BlockOutcome::Mismatch {
                expected,
                received: data.len(),
            }
        }
    }

    /// Drop buffered bytes and the watermark.
    pub fn reset(&mut self) {
        self.expected = None;
        self.buf.clear();
    }
}
