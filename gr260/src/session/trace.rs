//! Human-readable wire trace.
//!
//! ```text
//! > $PHLX810*35
//! < $PHLX852,GR260*3B
//! > $PHLX900,901,3*3E
//! < $PHLX902,0,1152,FBFF1991*28
//! # block @0 1152 bytes ok
//! # block @1152 FAILED! 900!=1152
//! ```

use std::io::Write;

use log::warn;

use crate::protocol::command::Frame;
use crate::protocol::response::ResponseLine;

/// Writes a line per frame, response and block outcome.
///
/// The first write error disables the trace; the session carries on.
pub struct Trace {
    out: Option<Box<dyn Write + Send>>,
}

impl Trace {
    /// Trace into `out`.
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Some(Box::new(out)),
        }
    }

    /// Outbound frame.
    pub fn outbound(&mut self, frame: &Frame) {
        self.line(format_args!("> {frame}"));
    }

    /// Inbound response line.
    pub fn inbound(&mut self, line: &ResponseLine) {
        self.line(format_args!("< {line}"));
    }

    /// Accepted block.
    pub fn block_ok(&mut self, offset: usize, len: usize) {
        self.line(format_args!("# block @{offset} {len} bytes ok"));
    }

    /// Rejected block.
    pub fn block_failed(&mut self, offset: usize, expected: Option<usize>, received: usize) {
        match expected {
            Some(expected) => {
                self.line(format_args!("# block @{offset} FAILED! {received}!={expected}"));
            },
            None => self.line(format_args!("# block @{offset} FAILED! {received} unannounced")),
        }
    }

    /// Free-form note.
    pub fn note(&mut self, text: &str) {
        self.line(format_args!("# {text}"));
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) {
        let Some(out) = self.out.as_mut() else {
            return;
        };
        if let Err(e) = out.flush() {
            warn!("Trace flush failed: {e}");
            self.out = None;
        }
    }

    fn line(&mut self, args: std::fmt::Arguments<'_>) {
        let Some(out) = self.out.as_mut() else {
            return;
        };
        if let Err(e) = writeln!(out, "{args}") {
            warn!("Trace disabled after write error: {e}");
            self.out = None;
        }
    }
}
