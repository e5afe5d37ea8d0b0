//! Separates response lines from binary payload in the inbound byte stream.
//!
//! The logger sends payload blocks on the same channel as its ASCII
//! responses, with no framing of its own. The demultiplexer works one byte
//! at a time:
//!
//! - in hex mode every byte is payload;
//! - otherwise printable bytes and `\r` build up a candidate line, and `\n`
//!   ends it at the most recent `$` (a line without `$` is dropped);
//! - any other byte switches to hex mode. It and the pending partial line
//!   become payload.

use log::trace;

use crate::protocol::response::ResponseLine;

/// Candidate lines longer than this without a `\n` are discarded.
pub const MAX_LINE_LEN: usize = 256;

/// Outcome of feeding one byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scan {
    /// Byte absorbed into the current candidate line.
    Pending,
    /// A line ended without any `$` in it.
    Discarded,
    /// A complete response line.
    Line(ResponseLine),
    /// Unannounced binary data began; the bytes belong to the payload.
    BinaryStart(Vec<u8>),
    /// Payload byte (hex mode).
    Payload(u8),
}

/// Byte-level line/payload demultiplexer.
#[derive(Debug, Default)]
pub struct LineDemux {
    line: Vec<u8>,
    hex_mode: bool,
}

impl LineDemux {
    /// Create a demultiplexer in text mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether incoming bytes are currently treated as payload.
    pub fn hex_mode(&self) -> bool {
        self.hex_mode
    }

    /// Switch hex mode on or off. Any partial line is dropped.
    pub fn set_hex_mode(&mut self, on: bool) {
        self.hex_mode = on;
        self.line.clear();
    }

    /// Feed a single byte.
    pub fn push(&mut self, byte: u8) -> Scan {
        if self.hex_mode {
            return Scan::Payload(byte);
        }

        match byte {
            b'\n' => self.finish_line(),
            b'\r' | 0x20..=0x7E => {
                if self.line.len() >= MAX_LINE_LEN {
                    trace!("Dropping overlong line fragment ({} bytes)", self.line.len());
                    self.line.clear();
                }
                self.line.push(byte);
                Scan::Pending
            },
            _ => {
                self.hex_mode = true;
                let mut carried = std::mem::take(&mut self.line);
                carried.push(byte);
                trace!("Unannounced binary data, {} bytes carried over", carried.len());
                Scan::BinaryStart(carried)
            },
        }
    }

    fn finish_line(&mut self) -> Scan {
        let line = std::mem::take(&mut self.line);
        match line.iter().rposition(|&b| b == b'$') {
            Some(start) => {
                // Only printable ASCII reaches the buffer
                let text = String::from_utf8_lossy(&line[start..]);
                Scan::Line(ResponseLine::new(text))
            },
            None => Scan::Discarded,
        }
    }
}
