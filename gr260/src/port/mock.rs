//! Scripted in-memory logger used by the session tests.
//!
//! Each expectation pairs a command body with the replies the device sends
//! back once that frame has been written. A frame that matches no pending
//! expectation is recorded but answered with silence.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::{INITIAL_BAUD, Port};
use crate::protocol::command::checksum;

/// One chunk of device output.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// Bytes delivered by a single `read` (split if the caller's buffer is smaller).
    Bytes(Vec<u8>),
    /// A read that times out with nothing received.
    Idle,
}

/// Checksummed response line as the logger sends it.
pub(crate) fn line(body: &str) -> Reply {
    Reply::Bytes(format!("${body}*{:02X}\r\n", checksum(body.as_bytes())).into_bytes())
}

/// Raw payload bytes.
pub(crate) fn bytes(data: &[u8]) -> Reply {
    Reply::Bytes(data.to_vec())
}

pub(crate) struct MockPort {
    script: VecDeque<(String, Vec<Reply>)>,
    pending: VecDeque<Reply>,
    outbound: Vec<u8>,
    sent: Vec<String>,
    baud_history: Vec<u32>,
    baud_rate: u32,
    timeout: Duration,
    idle_reads: Vec<Duration>,
    closed: bool,
}

impl MockPort {
    pub(crate) fn new() -> Self {
        Self {
            script: VecDeque::new(),
            pending: VecDeque::new(),
            outbound: Vec::new(),
            sent: Vec::new(),
            baud_history: Vec::new(),
            baud_rate: INITIAL_BAUD,
            timeout: Duration::from_secs(2),
            idle_reads: Vec::new(),
            closed: false,
        }
    }

    /// Queue `replies` for the next frame whose body equals `body`.
    pub(crate) fn expect(mut self, body: &str, replies: Vec<Reply>) -> Self {
        self.script.push_back((body.to_string(), replies));
        self
    }

    /// Bodies of every frame written so far, in order.
    pub(crate) fn sent(&self) -> &[String] {
        &self.sent
    }

    /// Number of frames written with the given body.
    pub(crate) fn sent_count(&self, body: &str) -> usize {
        self.sent.iter().filter(|b| *b == body).count()
    }

    /// Every baud rate set through [`Port::set_baud_rate`].
    pub(crate) fn baud_history(&self) -> &[u32] {
        &self.baud_history
    }

    /// Timeout in force for every read that came back empty.
    pub(crate) fn idle_reads(&self) -> &[Duration] {
        &self.idle_reads
    }

    /// Replies queued but not read yet.
    pub(crate) fn unread(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    fn on_frame(&mut self, frame: &str) {
        let body = frame
            .trim_start_matches('$')
            .split('*')
            .next()
            .unwrap_or_default()
            .to_string();

        if self
            .script
            .front()
            .is_some_and(|(expected, _)| *expected == body)
        {
            if let Some((_, replies)) = self.script.pop_front() {
                self.pending.extend(replies);
            }
        }
        self.sent.push(body);
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.pending.pop_front() {
            Some(Reply::Bytes(data)) => {
                let n = buf.len().min(data.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.pending.push_front(Reply::Bytes(data[n..].to_vec()));
                }
                Ok(n)
            },
            Some(Reply::Idle) | None => {
                self.idle_reads.push(self.timeout);
                Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
            },
        }
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &b in buf {
            self.outbound.push(b);
            if b == b'\n' {
                let frame = String::from_utf8_lossy(&self.outbound).trim_end().to_string();
                self.outbound.clear();
                self.on_frame(&frame);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud_rate = baud_rate;
        self.baud_history.push(baud_rate);
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
