//! Download session driver.
//!
//! A [`Session`] owns a [`Port`] and walks the logger through the
//! command/response handshake, the track-list transfer and the waypoint
//! transfer, one [`State`] at a time. Each state sends at most one command
//! on entry and then waits, with the state's timeout, for either a response
//! line or payload bytes.
//!
//! ```rust,no_run
//! use gr260::session::{CollectingSink, Session, SessionConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = Session::open("/dev/ttyUSB0", SessionConfig::default())?;
//!     let mut sink = CollectingSink::default();
//!     let summary = session.run(&mut sink)?;
//!     println!("{} tracks, {} waypoints", summary.track_count, summary.waypoint_count);
//!     Ok(())
//! }
//! ```

mod sink;
mod state;
mod trace;

pub use sink::{CollectingSink, NullSink, RecordSink};
pub use state::{Params, ResponseKind, State, StateRow, Wait};
pub use trace::Trace;

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::dump::DumpWriter;
use crate::error::{Error, Result};
use crate::port::{HIGH_SPEED_BAUD, Port};
use crate::protocol::block::{BlockOutcome, BlockReassembler, Phase};
use crate::protocol::command::Command;
use crate::protocol::demux::{LineDemux, Scan};
use crate::protocol::response::{
    BlockAnnouncement, FirmwareVersion, Response, ResponseLine, TransferAnnouncement,
};
use crate::record::Decoder;

/// Model name reported by supported loggers.
pub const EXPECTED_MODEL: &str = "GR260";

const READ_BUF_SIZE: usize = 4096;

/// Returns `true` when the session should wind down.
pub type InterruptChecker = Arc<dyn Fn() -> bool + Send + Sync>;

/// Timing and retry settings for a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Baud rate used after the session-start acknowledgment.
    pub high_speed_baud: u32,
    /// Wait for a response to a command.
    pub handshake_timeout: Duration,
    /// Wait between and within payload blocks.
    pub transfer_timeout: Duration,
    /// Total silence tolerated after a block announcement before the block
    /// counts as failed.
    pub stall_timeout: Duration,
    /// Retransmit requests allowed for a single block.
    pub max_block_retries: u32,
    /// Consecutive idle waits tolerated in a handshake state.
    pub max_command_attempts: u32,
    /// Skip the track list and download waypoints `[0, end_addr)`.
    pub end_addr: Option<u32>,
    /// Stop after the track list.
    pub list_only: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            high_speed_baud: HIGH_SPEED_BAUD,
            handshake_timeout: Duration::from_secs(2),
            transfer_timeout: Duration::from_millis(50),
            stall_timeout: Duration::from_secs(2),
            max_block_retries: 5,
            max_command_attempts: 5,
            end_addr: None,
            list_only: false,
        }
    }
}

impl SessionConfig {
    /// Set the handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the transfer timeout.
    #[must_use]
    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Set the stall timeout.
    #[must_use]
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Set the per-block retransmit budget.
    #[must_use]
    pub fn with_max_block_retries(mut self, retries: u32) -> Self {
        self.max_block_retries = retries;
        self
    }

    /// Set the idle-wait budget for handshake states.
    #[must_use]
    pub fn with_max_command_attempts(mut self, attempts: u32) -> Self {
        self.max_command_attempts = attempts;
        self
    }

    /// Download waypoints up to `end_addr` without reading the track list.
    #[must_use]
    pub fn with_end_addr(mut self, end_addr: Option<u32>) -> Self {
        self.end_addr = end_addr;
        self
    }

    /// Stop after the track list.
    #[must_use]
    pub fn with_list_only(mut self, list_only: bool) -> Self {
        self.list_only = list_only;
        self
    }

    /// Reject settings the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.handshake_timeout.is_zero() || self.transfer_timeout.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".into()));
        }
        if self.max_command_attempts == 0 {
            return Err(Error::Config("max_command_attempts must be at least 1".into()));
        }
        if self.end_addr == Some(0) {
            return Err(Error::Config("end address must be greater than 0".into()));
        }
        if self.list_only && self.end_addr.is_some() {
            return Err(Error::Config(
                "list-only and an end address cannot be combined".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of a finished session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    /// Model name reported by the logger.
    pub model: Option<String>,
    /// Firmware version reported by the logger.
    pub firmware: Option<FirmwareVersion>,
    /// Track headers received.
    pub track_count: usize,
    /// Waypoints received.
    pub waypoint_count: usize,
    /// Payload bytes accepted across both phases.
    pub bytes_received: usize,
    /// Retransmit requests sent.
    pub retransmits: u32,
    /// Whether the session was cut short by the interrupt checker.
    pub interrupted: bool,
}

/// A download session over a port.
pub struct Session<P: Port> {
    port: P,
    config: SessionConfig,
    interrupt: InterruptChecker,
    dump: Option<DumpWriter<Box<dyn Write + Send>>>,
    trace: Option<Trace>,

    state: State,
    params: Params,
    pending_send: bool,
    idle_waits: u32,
    acknowledged: bool,
    demux: LineDemux,
    block: BlockReassembler,
    decoder: Decoder,
    phase_active: bool,
    phase_total: Option<usize>,
    offset: usize,
    block_retries: u32,
    stalled: Duration,
    extended_wait: bool,
    interrupt_raised: bool,
    high_speed: bool,
    initial_baud: u32,
    summary: Summary,
}

impl<P: Port> Session<P> {
    /// Create a session over an opened port.
    ///
    /// The port's current baud rate is the one restored when the session ends.
    pub fn new(port: P, config: SessionConfig) -> Self {
        let initial_baud = port.baud_rate();
        Self {
            port,
            config,
            interrupt: Arc::new(crate::is_interrupted_requested),
            dump: None,
            trace: None,
            state: State::IdentifyModel,
            params: Params::default(),
            pending_send: false,
            idle_waits: 0,
            acknowledged: false,
            demux: LineDemux::new(),
            block: BlockReassembler::new(Phase::TrackList),
            decoder: Decoder::new(),
            phase_active: false,
            phase_total: None,
            offset: 0,
            block_retries: 0,
            stalled: Duration::ZERO,
            extended_wait: false,
            interrupt_raised: false,
            high_speed: false,
            initial_baud,
            summary: Summary::default(),
        }
    }

    /// Mirror accepted payload into a raw dump.
    #[must_use]
    pub fn with_dump(mut self, out: impl Write + Send + 'static) -> Self {
        self.dump = Some(DumpWriter::new(Box::new(out)));
        self
    }

    /// Write a wire trace.
    #[must_use]
    pub fn with_trace(mut self, out: impl Write + Send + 'static) -> Self {
        self.trace = Some(Trace::new(out));
        self
    }

    /// Replace the interrupt checker (defaults to the crate-wide one).
    ///
    /// The session acts when the checker turns `true`. The first request
    /// ends the session; a later one while waiting for the goodbye stops
    /// waiting.
    #[must_use]
    pub fn with_interrupt_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.interrupt = Arc::new(checker);
        self
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the session and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Session settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current protocol state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Records decoded so far.
    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Run the session to completion.
    ///
    /// Decoded records are handed to `sink` as each phase completes. On
    /// return the port is back at its initial baud rate and closed, and on
    /// failure the logger has been sent a best-effort session end.
    pub fn run(&mut self, sink: &mut dyn RecordSink) -> Result<Summary> {
        self.config.validate()?;
        self.reset();

        info!("Connecting to logger on {}", self.port.name());
        self.port.clear_buffers()?;
        self.enter(State::IdentifyModel);

        let result = self.drive(sink);
        if let Err(e) = &result {
            warn!("Session failed in {:?}: {e}", self.state);
            self.abort();
        }

        let restored = self.restore_baud();
        let flushed = self.flush_outputs();
        let closed = self.port.close();
        result?;
        restored?;
        flushed?;
        closed?;

        info!(
            "Session complete: {} tracks, {} waypoints, {} retransmits",
            self.summary.track_count, self.summary.waypoint_count, self.summary.retransmits
        );
        Ok(self.summary.clone())
    }

    fn reset(&mut self) {
        self.initial_baud = self.port.baud_rate();
        self.high_speed = self.initial_baud == self.config.high_speed_baud;
        self.params = Params::default();
        self.demux = LineDemux::new();
        self.block = BlockReassembler::new(Phase::TrackList);
        self.decoder = Decoder::new();
        self.phase_active = false;
        self.phase_total = None;
        self.offset = 0;
        self.block_retries = 0;
        self.stalled = Duration::ZERO;
        self.extended_wait = false;
        self.interrupt_raised = false;
        self.summary = Summary::default();
    }

    fn drive(&mut self, sink: &mut dyn RecordSink) -> Result<()> {
        let mut buf = [0u8; READ_BUF_SIZE];

        while self.state != State::Done {
            let requested = (self.interrupt)();
            if requested && !self.interrupt_raised {
                self.on_interrupt(sink)?;
            }
            self.interrupt_raised = requested;

            if self.pending_send {
                self.send_current()?;
            }

            let timeout = self.wait_timeout();
            if self.port.timeout() != timeout {
                self.port.set_timeout(timeout)?;
            }

            match self.port.read(&mut buf) {
                Ok(0) => self.on_idle(sink)?,
                Ok(n) => {
                    self.stalled = Duration::ZERO;
                    self.process(&buf[..n], sink)?;
                },
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) =>
                {
                    self.on_idle(sink)?;
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Ok(())
    }

    fn wait_timeout(&self) -> Duration {
        if self.extended_wait {
            return self.config.handshake_timeout;
        }
        match self.state.row().wait {
            Wait::Handshake => self.config.handshake_timeout,
            Wait::Transfer => self.config.transfer_timeout,
        }
    }

    fn enter(&mut self, state: State) {
        trace!("{:?} -> {state:?}", self.state);
        self.state = state;
        self.pending_send = state.row().command.is_some();
        self.idle_waits = 0;
        self.acknowledged = false;
    }

    fn send_current(&mut self) -> Result<()> {
        self.pending_send = false;
        if self.state == State::End {
            self.switch_to_high_speed()?;
        }
        if let Some(command) = self.state.command(&self.params) {
            self.send(command)?;
        }
        if self.state == State::BlockTransfer {
            // The block follows the release request
            self.demux.set_hex_mode(true);
        }
        Ok(())
    }

    fn send(&mut self, command: Command) -> Result<()> {
        let frame = command.encode();
        debug!("-> {frame}");
        if let Some(trace) = self.trace.as_mut() {
            trace.outbound(&frame);
        }

        self.demux.set_hex_mode(false);
        self.port.write_all_bytes(&frame.to_bytes())?;

        if command == Command::RetransmitLast {
            self.summary.retransmits += 1;
            self.block_retries += 1;
        }
        Ok(())
    }

    fn switch_to_high_speed(&mut self) -> Result<()> {
        if self.high_speed {
            return Ok(());
        }
        info!("Switching to {} baud", self.config.high_speed_baud);
        self.port.set_baud_rate(self.config.high_speed_baud)?;
        self.high_speed = true;
        Ok(())
    }

    fn restore_baud(&mut self) -> Result<()> {
        if self.port.baud_rate() != self.initial_baud {
            debug!("Restoring {} baud", self.initial_baud);
            self.port.set_baud_rate(self.initial_baud)?;
        }
        Ok(())
    }

    fn flush_outputs(&mut self) -> Result<()> {
        if let Some(trace) = self.trace.as_mut() {
            trace.flush();
        }
        match self.dump.as_mut() {
            Some(dump) => dump.flush(),
            None => Ok(()),
        }
    }

    /// Best-effort session end after a failure.
    fn abort(&mut self) {
        if matches!(self.state, State::End | State::Done) {
            return;
        }
        if let Err(e) = self.switch_to_high_speed() {
            debug!("Could not switch baud rate for session end: {e}");
        }
        if let Err(e) = self.send(Command::SessionEnd) {
            debug!("Could not send session end: {e}");
        }
    }

    fn on_interrupt(&mut self, sink: &mut dyn RecordSink) -> Result<()> {
        if self.summary.interrupted {
            if self.state == State::End {
                warn!("Interrupted again, not waiting for the logger");
                if let Some(trace) = self.trace.as_mut() {
                    trace.note("interrupted again");
                }
                if self.pending_send {
                    self.send_current()?;
                }
                self.enter(State::Done);
            }
            return Ok(());
        }

        warn!("Interrupted, ending session");
        self.summary.interrupted = true;
        if let Some(trace) = self.trace.as_mut() {
            trace.note("interrupted");
        }

        if self.phase_active {
            self.phase_active = false;
            self.phase_total = None;
            self.deliver(self.block.phase(), sink);
        }
        self.block.reset();
        self.demux.set_hex_mode(false);
        self.extended_wait = false;

        if self.state != State::End {
            self.enter(State::End);
        }
        Ok(())
    }

    fn process(&mut self, bytes: &[u8], sink: &mut dyn RecordSink) -> Result<()> {
        for &byte in bytes {
            match self.demux.push(byte) {
                Scan::Payload(byte) => {
                    if self.block.push(byte) {
                        self.complete_block(sink)?;
                    }
                },
                Scan::BinaryStart(carried) => {
                    self.extended_wait = true;
                    if self.block.extend(&carried) {
                        self.complete_block(sink)?;
                    }
                },
                Scan::Line(line) => self.on_line(&line, sink)?,
                Scan::Pending | Scan::Discarded => {},
            }
        }
        Ok(())
    }

    fn on_line(&mut self, line: &ResponseLine, sink: &mut dyn RecordSink) -> Result<()> {
        debug!("<- {line}");
        if let Some(trace) = self.trace.as_mut() {
            trace.inbound(line);
        }
        if line.checksum_ok() == Some(false) {
            debug!("Checksum mismatch on {line}");
        }

        let Some(response) = line.parse() else {
            trace!("Ignoring unrecognised line {line}");
            return Ok(());
        };
        if !self.state.expects(&response) {
            debug!("Ignoring {:?} in {:?}", response.kind(), self.state);
            return Ok(());
        }
        self.idle_waits = 0;

        match response {
            Response::Model(model) => {
                if model == EXPECTED_MODEL {
                    info!("Found {model}");
                } else {
                    warn!("Unexpected model {model}, continuing anyway");
                }
                self.summary.model = Some(model);
                self.enter(State::IdentifyFirmware);
            },
            Response::Firmware(version) => {
                info!("Firmware version {version}");
                self.summary.firmware = Some(version);
                self.enter(State::Start);
            },
            Response::UsbIcon => {
                self.switch_to_high_speed()?;
                match self.config.end_addr {
                    Some(end) => {
                        self.params.end_addr = end;
                        self.enter(State::RequestData);
                    },
                    None => self.enter(State::EnumTrackCount),
                }
            },
            Response::TrackCount(count) => {
                info!("{count} tracks stored");
                self.params.track_count = count;
                if count == 0 {
                    self.enter(State::End);
                } else {
                    self.enter(State::EnumTracks);
                }
            },
            Response::TrackListAck | Response::DataAck => self.acknowledged = true,
            Response::TransferSize(announcement) => self.begin_phase(announcement, sink)?,
            Response::BlockSize(announcement) => self.begin_block(announcement, sink),
            Response::Goodbye(product) => {
                debug!("Session closed by {product}");
                self.enter(State::Done);
            },
        }
        Ok(())
    }

    fn begin_phase(
        &mut self,
        announcement: TransferAnnouncement,
        sink: &mut dyn RecordSink,
    ) -> Result<()> {
        let phase = if self.state == State::EnumTracks {
            Phase::TrackList
        } else {
            Phase::Waypoints
        };
        let total = announcement.size as usize;
        info!("Receiving {} ({total} bytes)", phase.name());

        self.block.set_phase(phase);
        match phase {
            Phase::TrackList => self.decoder.begin_track_list(),
            Phase::Waypoints => self.decoder.begin_waypoints(),
        }

        if let Some(dump) = self.dump.as_mut() {
            if phase == Phase::Waypoints && dump.sections() == 0 {
                dump.begin_section(0, 0)?;
            }
            dump.begin_section(announcement.size, announcement.checksum)?;
        }

        self.phase_active = true;
        self.phase_total = Some(total);
        self.offset = 0;
        self.block_retries = 0;
        sink.progress(phase, 0, Some(total));

        if total == 0 {
            self.finish_phase(sink);
        } else {
            self.enter(State::FirstBlockSize);
        }
        Ok(())
    }

    fn begin_block(&mut self, announcement: BlockAnnouncement, sink: &mut dyn RecordSink) {
        if announcement.length == 0 {
            debug!("Empty block announced, ending {}", self.block.phase().name());
            self.finish_phase(sink);
            return;
        }
        if announcement.offset as usize != self.offset {
            debug!(
                "Block announced at {} while {} bytes are accepted",
                announcement.offset, self.offset
            );
        }

        self.block.announce(announcement.length as usize);
        self.demux.set_hex_mode(true);
        self.extended_wait = false;
        self.stalled = Duration::ZERO;
        self.enter(State::BlockTransfer);
    }

    fn on_idle(&mut self, sink: &mut dyn RecordSink) -> Result<()> {
        if !self.block.is_empty() {
            if self.state.carries_payload() {
                return self.complete_block(sink);
            }
            debug!(
                "Discarding {} stray payload bytes in {:?}",
                self.block.received(),
                self.state
            );
            self.block.reset();
            self.demux.set_hex_mode(false);
            self.extended_wait = false;
        }

        match self.state {
            State::BlockTransfer => self.on_stall(),
            State::BlockSizeAnnounce => {
                self.finish_phase(sink);
                Ok(())
            },
            State::End => {
                debug!("No goodbye from logger");
                self.enter(State::Done);
                Ok(())
            },
            State::Done => Ok(()),
            _ => self.on_silence(),
        }
    }

    fn on_stall(&mut self) -> Result<()> {
        self.stalled += self.config.transfer_timeout;
        if self.stalled < self.config.stall_timeout {
            return Ok(());
        }

        self.stalled = Duration::ZERO;
        let expected = self.block.expected();
        self.block.reset();
        self.demux.set_hex_mode(false);
        self.block_failed(expected, 0)
    }

    fn on_silence(&mut self) -> Result<()> {
        if self.state == State::Retransmit && self.block_retries >= self.config.max_block_retries {
            return Err(self.retries_exhausted());
        }

        self.idle_waits += 1;
        if self.idle_waits >= self.config.max_command_attempts {
            return Err(match self.state {
                State::IdentifyModel => Error::DeviceNotFound,
                state => Error::Timeout(format!(
                    "no response in {state:?} after {} waits",
                    self.idle_waits
                )),
            });
        }

        if self.acknowledged {
            debug!("Request acknowledged, still waiting in {:?}", self.state);
        } else {
            debug!(
                "No response in {:?}, resending ({}/{})",
                self.state, self.idle_waits, self.config.max_command_attempts
            );
            self.pending_send = true;
        }
        Ok(())
    }

    fn complete_block(&mut self, sink: &mut dyn RecordSink) -> Result<()> {
        self.demux.set_hex_mode(false);
        self.extended_wait = false;
        self.stalled = Duration::ZERO;

        match self.block.finish() {
            BlockOutcome::Empty => Ok(()),
            BlockOutcome::Complete(data) => self.accept_block(&data, sink),
            BlockOutcome::Mismatch { expected, received } => self.block_failed(expected, received),
        }
    }

    fn accept_block(&mut self, data: &[u8], sink: &mut dyn RecordSink) -> Result<()> {
        let phase = self.block.phase();
        if let Some(trace) = self.trace.as_mut() {
            trace.block_ok(self.offset, data.len());
        }

        match phase {
            Phase::TrackList => {
                self.decoder.decode_tracks(data)?;
            },
            Phase::Waypoints => {
                self.decoder.decode_waypoints(data)?;
            },
        }
        if let Some(dump) = self.dump.as_mut() {
            dump.write_block(data)?;
        }

        self.block_retries = 0;
        self.offset += data.len();
        self.summary.bytes_received += data.len();
        sink.progress(phase, self.offset, self.phase_total);

        if self.phase_total.is_some_and(|total| self.offset >= total) {
            // Acknowledge the final block before moving on
            self.send(Command::NextBlockSizeRequest)?;
            self.finish_phase(sink);
        } else {
            self.enter(State::BlockSizeAnnounce);
        }
        Ok(())
    }

    fn block_failed(&mut self, expected: Option<usize>, received: usize) -> Result<()> {
        if let Some(trace) = self.trace.as_mut() {
            trace.block_failed(self.offset, expected, received);
        }
        if self.block_retries >= self.config.max_block_retries {
            return Err(self.retries_exhausted());
        }

        warn!(
            "Block at offset {} incomplete ({received} of {} bytes), requesting retransmit {}/{}",
            self.offset,
            expected.map_or_else(|| "?".to_string(), |n| n.to_string()),
            self.block_retries + 1,
            self.config.max_block_retries
        );
        self.enter(State::Retransmit);
        Ok(())
    }

    fn retries_exhausted(&self) -> Error {
        Error::RetryExhausted {
            offset: self.offset,
            attempts: self.block_retries,
        }
    }

    fn finish_phase(&mut self, sink: &mut dyn RecordSink) {
        let phase = self.block.phase();
        self.block.reset();
        self.demux.set_hex_mode(false);
        self.phase_active = false;
        if let Some(total) = self.phase_total.take() {
            if self.offset < total {
                warn!(
                    "{} ended after {} of {total} bytes",
                    phase.name(),
                    self.offset
                );
            }
        }

        self.deliver(phase, sink);

        match phase {
            Phase::TrackList => {
                let end = self
                    .decoder
                    .tracks()
                    .last()
                    .map_or(0, crate::record::TrackInfo::end_addr);
                if self.config.list_only || end == 0 {
                    self.enter(State::End);
                } else {
                    self.params.end_addr = end;
                    self.enter(State::RequestData);
                }
            },
            Phase::Waypoints => self.enter(State::End),
        }
    }

    fn deliver(&mut self, phase: Phase, sink: &mut dyn RecordSink) {
        match phase {
            Phase::TrackList => {
                info!("Received {} track headers", self.decoder.tracks().len());
                self.summary.track_count = self.decoder.tracks().len();
                sink.tracks(self.decoder.tracks());
            },
            Phase::Waypoints => {
                info!("Received {} waypoints", self.decoder.waypoints().len());
                self.summary.waypoint_count = self.decoder.waypoints().len();
                sink.waypoints(self.decoder.waypoints(), self.decoder.tracks());
            },
        }
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::{Session, SessionConfig};
    use crate::error::Result;
    use crate::port::{INITIAL_BAUD, NativePort, SerialConfig};

    impl Session<NativePort> {
        /// Open `port_name` at the logger's initial baud rate and create a
        /// session over it.
        pub fn open(port_name: &str, config: SessionConfig) -> Result<Self> {
            let serial =
                SerialConfig::new(port_name, INITIAL_BAUD).with_timeout(config.handshake_timeout);
            let port = NativePort::open_with_retry(&serial)?;
            Ok(Self::new(port, config))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::RawDump;
    use crate::port::INITIAL_BAUD;
    use crate::port::mock::{MockPort, Reply, bytes, line};
    use crate::record::fixtures::{track_bytes, waypoint_bytes};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tracks(count: u32, size: u32) -> Vec<u8> {
        (0..count)
            .flat_map(|i| track_bytes(Some(&format!("T{i}")), 1000 + i, i * size, size))
            .collect()
    }

    fn waypoints(count: u32) -> Vec<u8> {
        (0..count)
            .flat_map(|i| waypoint_bytes(2000 + i, 50.0, 20.0, 120, i == 2))
            .collect()
    }

    fn handshake(port: MockPort, track_count: Option<u32>) -> MockPort {
        let port = port
            .expect("PHLX810", vec![line("PHLX852,GR260")])
            .expect("PHLX829", vec![line("PHLX861,201")])
            .expect("PHLX826", vec![line("PHLX859")]);
        match track_count {
            Some(n) => port.expect("PHLX701", vec![line(&format!("PHLX601,{n}"))]),
            None => port,
        }
    }

    fn goodbye(port: MockPort) -> MockPort {
        port.expect("PHLX827", vec![line("PHLX863,GR260")])
    }

    fn session(port: MockPort, config: SessionConfig) -> Session<MockPort> {
        Session::new(port, config).with_interrupt_checker(|| false)
    }

    fn full_download() -> MockPort {
        let list = tracks(2, 3);
        let points = waypoints(6);
        let port = handshake(MockPort::new(), Some(2))
            .expect(
                "PHLX702,0,2",
                vec![line("PHLX900,702,3"), line("PHLX901,128,FBFF1991")],
            )
            .expect("PHLX900,901,3", vec![line("PHLX902,0,128,FBFF1991")])
            .expect("PHLX900,902,3", vec![bytes(&list)])
            .expect(
                "PHLX703,0,6",
                vec![line("PHLX900,703,3"), line("PHLX901,192,AB690FC3")],
            )
            .expect("PHLX900,901,3", vec![line("PHLX902,0,128,11")])
            .expect("PHLX900,902,3", vec![bytes(&points[..128])])
            .expect("PHLX900,902,3", vec![line("PHLX902,128,64,22")])
            .expect("PHLX900,902,3", vec![bytes(&points[128..])]);
        goodbye(port)
    }

    #[test]
    fn test_full_download() {
        let mut session = session(full_download(), SessionConfig::default());
        let mut sink = CollectingSink::default();
        let summary = session.run(&mut sink).unwrap();

        assert_eq!(summary.model.as_deref(), Some("GR260"));
        assert_eq!(summary.firmware, Some(FirmwareVersion(201)));
        assert_eq!(summary.track_count, 2);
        assert_eq!(summary.waypoint_count, 6);
        assert_eq!(summary.bytes_received, 128 + 192);
        assert_eq!(summary.retransmits, 0);
        assert!(!summary.interrupted);

        assert_eq!(sink.tracks.len(), 2);
        assert_eq!(sink.tracks[1].start_addr, 3);
        let owners: Vec<Option<u32>> = sink.waypoints.iter().map(|w| w.track).collect();
        assert_eq!(owners, vec![Some(1), Some(1), Some(1), Some(2), Some(2), Some(2)]);
        assert!(sink.waypoints[2].is_poi);

        assert_eq!(
            sink.progress.last(),
            Some(&(Phase::Waypoints, 192, Some(192)))
        );
        assert_eq!(session.state(), State::Done);
        assert!(session.port().is_closed());
    }

    #[test]
    fn test_baud_switches_once_and_is_restored() {
        let mut session = session(full_download(), SessionConfig::default());
        session.run(&mut NullSink).unwrap();

        assert_eq!(
            session.port().baud_history(),
            &[HIGH_SPEED_BAUD, INITIAL_BAUD]
        );
        assert_eq!(session.port().baud_rate(), INITIAL_BAUD);
    }

    #[test]
    fn test_command_order() {
        let mut session = session(full_download(), SessionConfig::default());
        session.run(&mut NullSink).unwrap();

        assert_eq!(
            session.port().sent(),
            &[
                "PHLX810",
                "PHLX829",
                "PHLX826",
                "PHLX701",
                "PHLX702,0,2",
                "PHLX900,901,3",
                "PHLX900,902,3",
                "PHLX900,902,3",
                "PHLX703,0,6",
                "PHLX900,901,3",
                "PHLX900,902,3",
                "PHLX900,902,3",
                "PHLX900,902,3",
                "PHLX900,902,3",
                "PHLX827",
            ]
        );
    }

    fn eighteen_tracks_with_short_block(max_retries: u32, recover: bool) -> Session<MockPort> {
        let list = tracks(18, 10);
        let resent = if recover {
            vec![bytes(&list)]
        } else {
            vec![bytes(&list[..900]), Reply::Idle]
        };
        let port = handshake(MockPort::new(), Some(18))
            .expect(
                "PHLX702,0,18",
                vec![line("PHLX900,702,3"), line("PHLX901,1152,FBFF1991")],
            )
            .expect("PHLX900,901,3", vec![line("PHLX902,0,1152,FBFF1991")])
            .expect("PHLX900,902,3", vec![bytes(&list[..900]), Reply::Idle])
            .expect("PHLX900,902,2", vec![line("PHLX902,0,1152,FBFF1991")])
            .expect("PHLX900,902,3", resent);
        let port = goodbye(port);

        let config = SessionConfig::default()
            .with_list_only(true)
            .with_max_block_retries(max_retries);
        session(port, config)
    }

    #[test]
    fn test_short_block_is_retransmitted_once() {
        let mut session = eighteen_tracks_with_short_block(5, true);
        let mut sink = CollectingSink::default();
        let summary = session.run(&mut sink).unwrap();

        assert_eq!(session.port().sent_count("PHLX900,902,2"), 1);
        assert_eq!(summary.retransmits, 1);
        assert_eq!(summary.track_count, 18);
        assert_eq!(sink.tracks[17].number, 18);
        assert!(sink.waypoints.is_empty());
    }

    #[test]
    fn test_retry_budget_exhausted() {
        let mut session = eighteen_tracks_with_short_block(1, false);
        let err = session.run(&mut NullSink).unwrap_err();

        assert!(matches!(
            err,
            Error::RetryExhausted {
                offset: 0,
                attempts: 1
            }
        ));
        assert_eq!(session.port().sent_count("PHLX900,902,2"), 1);
        assert_eq!(session.port().sent().last().map(String::as_str), Some("PHLX827"));
        assert_eq!(session.port().baud_rate(), INITIAL_BAUD);
    }

    #[test]
    fn test_block_data_waits_for_release_request() {
        let list = tracks(2, 3);
        let port = handshake(MockPort::new(), Some(2))
            .expect(
                "PHLX702,0,2",
                vec![line("PHLX900,702,3"), line("PHLX901,128,1")],
            )
            .expect("PHLX900,901,3", vec![line("PHLX902,0,128,1")])
            .expect("PHLX900,902,3", vec![bytes(&list)]);
        let mut session = session(goodbye(port), SessionConfig::default().with_list_only(true));
        let summary = session.run(&mut NullSink).unwrap();

        assert_eq!(summary.track_count, 2);
        assert_eq!(summary.retransmits, 0);
        let sent = session.port().sent();
        let announce = sent.iter().position(|b| b == "PHLX900,901,3").unwrap();
        assert_eq!(sent[announce + 1], "PHLX900,902,3");
        assert_eq!(session.port().sent_count("PHLX900,902,2"), 0);
    }

    #[test]
    fn test_silent_retransmit_counts_against_budget() {
        let list = tracks(1, 4);
        let port = handshake(MockPort::new(), Some(1))
            .expect(
                "PHLX702,0,1",
                vec![line("PHLX900,702,3"), line("PHLX901,64,1")],
            )
            .expect("PHLX900,901,3", vec![line("PHLX902,0,64,1")])
            .expect("PHLX900,902,3", vec![bytes(&list[..40]), Reply::Idle]);

        let config = SessionConfig::default()
            .with_list_only(true)
            .with_max_block_retries(2);
        let mut session = session(port, config);
        let err = session.run(&mut NullSink).unwrap_err();

        assert!(matches!(
            err,
            Error::RetryExhausted {
                offset: 0,
                attempts: 2
            }
        ));
        assert_eq!(session.port().sent_count("PHLX900,902,2"), 2);
    }

    fn unannounced_second_block(tail: Vec<Reply>, resent: Option<Vec<Reply>>) -> MockPort {
        let points = waypoints(4);
        let mut port = handshake(MockPort::new(), None)
            .expect(
                "PHLX703,0,4",
                vec![line("PHLX900,703,3"), line("PHLX901,128,5")],
            )
            .expect("PHLX900,901,3", vec![line("PHLX902,0,64,5")])
            .expect("PHLX900,902,3", vec![bytes(&points[..64])])
            .expect("PHLX900,902,3", tail);
        if let Some(resent) = resent {
            port = port
                .expect("PHLX900,902,2", vec![line("PHLX902,64,64,5")])
                .expect("PHLX900,902,3", resent);
        }
        goodbye(port)
    }

    #[test]
    fn test_unannounced_block_completes_on_idle() {
        let points = waypoints(4);
        let port = unannounced_second_block(vec![bytes(&points[64..]), Reply::Idle], None);
        let config = SessionConfig::default().with_end_addr(Some(4));
        let handshake_timeout = config.handshake_timeout;

        let mut session = session(port, config);
        let mut sink = CollectingSink::default();
        let summary = session.run(&mut sink).unwrap();

        assert_eq!(summary.waypoint_count, 4);
        assert_eq!(summary.retransmits, 0);
        assert_eq!(sink.waypoints[3].timestamp, 2003);
        // Unannounced data is given the longer wait before it is closed
        assert_eq!(session.port().idle_reads().first(), Some(&handshake_timeout));
    }

    #[test]
    fn test_unannounced_partial_record_is_retransmitted() {
        let points = waypoints(4);
        let port = unannounced_second_block(
            vec![bytes(&points[64..104]), Reply::Idle],
            Some(vec![bytes(&points[64..])]),
        );
        let mut session = session(port, SessionConfig::default().with_end_addr(Some(4)));
        let mut sink = CollectingSink::default();
        let summary = session.run(&mut sink).unwrap();

        assert_eq!(summary.retransmits, 1);
        assert_eq!(summary.waypoint_count, 4);
        assert_eq!(summary.bytes_received, 128);
        assert_eq!(sink.waypoints[2].timestamp, 2002);
    }

    #[test]
    fn test_stalled_block_requests_retransmit() {
        let list = tracks(1, 4);
        let port = handshake(MockPort::new(), Some(1))
            .expect(
                "PHLX702,0,1",
                vec![line("PHLX900,702,3"), line("PHLX901,64,1")],
            )
            .expect("PHLX900,901,3", vec![line("PHLX902,0,64,1")])
            .expect("PHLX900,902,3", vec![])
            .expect("PHLX900,902,2", vec![line("PHLX902,0,64,1")])
            .expect("PHLX900,902,3", vec![bytes(&list)]);
        let port = goodbye(port);

        let config = SessionConfig::default()
            .with_list_only(true)
            .with_stall_timeout(Duration::from_millis(150));
        let mut session = session(port, config);
        let summary = session.run(&mut NullSink).unwrap();

        assert_eq!(summary.retransmits, 1);
        assert_eq!(summary.track_count, 1);
    }

    #[test]
    fn test_list_only_skips_waypoints() {
        let port = handshake(MockPort::new(), Some(2)).expect(
            "PHLX702,0,2",
            vec![line("PHLX900,702,3"), line("PHLX901,128,1")],
        );
        let port = port
            .expect("PHLX900,901,3", vec![line("PHLX902,0,128,1")])
            .expect("PHLX900,902,3", vec![bytes(&tracks(2, 3))]);
        let mut session = session(goodbye(port), SessionConfig::default().with_list_only(true));
        let summary = session.run(&mut NullSink).unwrap();

        assert_eq!(summary.track_count, 2);
        assert_eq!(summary.waypoint_count, 0);
        assert!(!session.port().sent().iter().any(|b| b.starts_with("PHLX703")));
    }

    #[test]
    fn test_no_tracks_ends_session() {
        let port = goodbye(handshake(MockPort::new(), Some(0)));
        let mut session = session(port, SessionConfig::default());
        let summary = session.run(&mut NullSink).unwrap();

        assert_eq!(summary.track_count, 0);
        assert_eq!(
            session.port().sent(),
            &["PHLX810", "PHLX829", "PHLX826", "PHLX701", "PHLX827"]
        );
    }

    #[test]
    fn test_end_address_skips_track_list() {
        let points = waypoints(3);
        let port = handshake(MockPort::new(), None)
            .expect(
                "PHLX703,0,3",
                vec![line("PHLX900,703,3"), line("PHLX901,96,5")],
            )
            .expect("PHLX900,901,3", vec![line("PHLX902,0,96,5")])
            .expect("PHLX900,902,3", vec![bytes(&points)]);
        let port = goodbye(port);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gr260.bin");
        let file = std::fs::File::create(&path).unwrap();

        let mut session =
            session(port, SessionConfig::default().with_end_addr(Some(3))).with_dump(file);
        let mut sink = CollectingSink::default();
        let summary = session.run(&mut sink).unwrap();

        assert_eq!(summary.waypoint_count, 3);
        assert!(sink.waypoints.iter().all(|w| w.track.is_none()));
        assert_eq!(session.port().sent_count("PHLX701"), 0);

        let dump = RawDump::from_file(&path).unwrap();
        assert_eq!(dump.track_list.total_size, 0);
        assert!(dump.track_list.data.is_empty());
        let section = dump.waypoints.unwrap();
        assert_eq!(section.total_size, 96);
        assert_eq!(section.data, points);
    }

    #[test]
    fn test_dump_replays_to_same_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gr260.bin");
        let file = std::fs::File::create(&path).unwrap();

        let mut session = session(full_download(), SessionConfig::default()).with_dump(file);
        let mut sink = CollectingSink::default();
        session.run(&mut sink).unwrap();

        let replayed = Decoder::replay(&RawDump::from_file(&path).unwrap()).unwrap();
        assert_eq!(replayed.tracks(), sink.tracks.as_slice());
        assert_eq!(replayed.waypoints(), sink.waypoints.as_slice());
    }

    #[test]
    fn test_silent_port_is_device_not_found() {
        let mut session = session(MockPort::new(), SessionConfig::default());
        let err = session.run(&mut NullSink).unwrap_err();

        assert!(matches!(err, Error::DeviceNotFound));
        assert_eq!(session.port().sent_count("PHLX810"), 5);
        assert_eq!(session.port().sent_count("PHLX827"), 1);
        assert_eq!(session.port().baud_rate(), INITIAL_BAUD);
    }

    #[test]
    fn test_unanswered_command_times_out() {
        let port = MockPort::new().expect("PHLX810", vec![line("PHLX852,GR260")]);
        let mut session = session(port, SessionConfig::default().with_max_command_attempts(2));
        let err = session.run(&mut NullSink).unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(session.port().sent_count("PHLX829"), 2);
    }

    #[test]
    fn test_unrelated_lines_are_ignored() {
        let port = MockPort::new()
            .expect(
                "PHLX810",
                vec![
                    bytes(b"boot noise\r\n"),
                    line("PHLX601,7"),
                    line("PHLX852,GR260"),
                ],
            )
            .expect("PHLX829", vec![line("PHLX861,201")])
            .expect("PHLX826", vec![line("PHLX859")])
            .expect("PHLX701", vec![line("PHLX601,0")]);
        let mut session = session(goodbye(port), SessionConfig::default());
        let summary = session.run(&mut NullSink).unwrap();

        assert_eq!(summary.track_count, 0);
        assert_eq!(session.port().sent_count("PHLX810"), 1);
    }

    #[test]
    fn test_interrupt_ends_session_and_restores_baud() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let port = goodbye(handshake(MockPort::new(), Some(4)));

        let mut session = Session::new(port, SessionConfig::default())
            .with_interrupt_checker(move || counter.fetch_add(1, Ordering::Relaxed) >= 3);
        let summary = session.run(&mut NullSink).unwrap();

        assert!(summary.interrupted);
        assert_eq!(
            session.port().sent(),
            &["PHLX810", "PHLX829", "PHLX826", "PHLX827"]
        );
        assert_eq!(
            session.port().baud_history(),
            &[HIGH_SPEED_BAUD, INITIAL_BAUD]
        );
    }

    #[test]
    fn test_second_interrupt_stops_waiting_for_goodbye() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let port = handshake(MockPort::new(), None).expect(
            "PHLX827",
            vec![
                line("PHLX601,7"),
                line("PHLX601,7"),
                line("PHLX601,7"),
                line("PHLX863,GR260"),
            ],
        );

        let mut session = Session::new(port, SessionConfig::default()).with_interrupt_checker(
            move || matches!(counter.fetch_add(1, Ordering::Relaxed), 3 | 5),
        );
        let summary = session.run(&mut NullSink).unwrap();

        assert!(summary.interrupted);
        assert_eq!(session.state(), State::Done);
        assert_eq!(
            session.port().sent(),
            &["PHLX810", "PHLX829", "PHLX826", "PHLX827"]
        );
        assert_eq!(session.port().unread(), 2);
    }

    #[test]
    fn test_held_interrupt_still_waits_for_goodbye() {
        let port = MockPort::new().expect(
            "PHLX827",
            vec![line("PHLX601,7"), line("PHLX863,GR260")],
        );
        let mut session =
            Session::new(port, SessionConfig::default()).with_interrupt_checker(|| true);
        let summary = session.run(&mut NullSink).unwrap();

        assert!(summary.interrupted);
        assert_eq!(session.port().sent(), &["PHLX827"]);
        assert_eq!(session.port().unread(), 0);
    }

    #[test]
    fn test_trace_records_exchange() {
        use std::sync::Mutex;

        #[derive(Clone, Default)]
        struct Shared(Arc<Mutex<Vec<u8>>>);

        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let shared = Shared::default();
        let mut session = session(full_download(), SessionConfig::default()).with_trace(shared.clone());
        session.run(&mut NullSink).unwrap();

        let text = String::from_utf8(shared.0.lock().unwrap().clone()).unwrap();
        assert!(text.starts_with("> $PHLX810*35\n"));
        assert!(text.contains("# block @0 128 bytes ok"));
        assert!(text.contains("< $PHLX863,GR260"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = SessionConfig::default()
            .with_list_only(true)
            .with_end_addr(Some(10));
        let mut session = session(MockPort::new(), config);
        assert!(matches!(session.run(&mut NullSink), Err(Error::Config(_))));
        assert!(session.port().sent().is_empty());

        assert!(SessionConfig::default().with_end_addr(Some(0)).validate().is_err());
        assert!(SessionConfig::default().validate().is_ok());
    }
}
