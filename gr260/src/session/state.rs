//! Download session states and the table that drives them.
//!
//! ```text
//! IdentifyModel -> IdentifyFirmware -> Start --(end address given)--> RequestData
//!                                        |
//!                                        v
//!                        EnumTrackCount -> EnumTracks
//!                                             |
//!             +-------------------------------+
//!             v
//!       FirstBlockSize -> BlockTransfer <-> BlockSizeAnnounce
//!             ^                 |
//!             |                 v
//!             |             Retransmit
//!             |
//!       RequestData (after the track list) ... -> End -> Done
//! ```

use crate::protocol::command::Command;
use crate::protocol::response::Response;

/// Protocol state of a download session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for the model name.
    IdentifyModel,
    /// Waiting for the firmware version.
    IdentifyFirmware,
    /// Waiting for the session-start acknowledgment.
    Start,
    /// Waiting for the number of stored tracks.
    EnumTrackCount,
    /// Waiting for the track list transfer to begin.
    EnumTracks,
    /// Waiting for the waypoint transfer to begin.
    RequestData,
    /// Waiting for the first block announcement of a phase.
    FirstBlockSize,
    /// Waiting for the next block announcement; silence ends the phase.
    BlockSizeAnnounce,
    /// Releasing and receiving an announced block.
    BlockTransfer,
    /// Waiting for a resent block announcement.
    Retransmit,
    /// Waiting for the goodbye line.
    End,
    /// Session finished.
    Done,
}

/// How long a state waits for input before counting an idle timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Command/response exchange.
    Handshake,
    /// Inter-block and intra-block gaps.
    Transfer,
}

/// Response classes, for the per-state filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// `$PHLX852`
    Model,
    /// `$PHLX861`
    Firmware,
    /// `$PHLX859`
    UsbIcon,
    /// `$PHLX601`
    TrackCount,
    /// `$PHLX900,702`
    TrackListAck,
    /// `$PHLX900,703`
    DataAck,
    /// `$PHLX901`
    TransferSize,
    /// `$PHLX902`
    BlockSize,
    /// `$PHLX863`
    Goodbye,
}

impl Response {
    /// Class of this response.
    pub fn kind(&self) -> ResponseKind {
        match self {
            Self::Model(_) => ResponseKind::Model,
            Self::Firmware(_) => ResponseKind::Firmware,
            Self::UsbIcon => ResponseKind::UsbIcon,
            Self::TrackCount(_) => ResponseKind::TrackCount,
            Self::TrackListAck => ResponseKind::TrackListAck,
            Self::DataAck => ResponseKind::DataAck,
            Self::TransferSize(_) => ResponseKind::TransferSize,
            Self::BlockSize(_) => ResponseKind::BlockSize,
            Self::Goodbye(_) => ResponseKind::Goodbye,
        }
    }
}

/// Values that parameterise outbound commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Params {
    /// Number of tracks reported by the logger.
    pub track_count: u32,
    /// One past the last waypoint index to download.
    pub end_addr: u32,
}

/// One row of the state table.
#[derive(Debug, Clone, Copy)]
pub struct StateRow {
    /// Command sent on entry, if any.
    pub command: Option<fn(&Params) -> Command>,
    /// Responses acted on in this state; anything else is ignored.
    pub expects: &'static [ResponseKind],
    /// Timeout class.
    pub wait: Wait,
}

impl State {
    /// Table row for this state.
    pub fn row(self) -> StateRow {
        use ResponseKind as R;

        let (command, expects, wait): (Option<fn(&Params) -> Command>, &'static [R], Wait) =
            match self {
                Self::IdentifyModel => (Some(|_| Command::ModelQuery), &[R::Model], Wait::Handshake),
                Self::IdentifyFirmware => {
                    (Some(|_| Command::FirmwareQuery), &[R::Firmware], Wait::Handshake)
                },
                Self::Start => (Some(|_| Command::UsbIcon), &[R::UsbIcon], Wait::Handshake),
                Self::EnumTrackCount => {
                    (Some(|_| Command::TrackCountQuery), &[R::TrackCount], Wait::Handshake)
                },
                Self::EnumTracks => (
                    Some(|p| Command::TrackListRequest(p.track_count)),
                    &[R::TrackListAck, R::TransferSize],
                    Wait::Handshake,
                ),
                Self::RequestData => (
                    Some(|p| Command::DataRequest {
                        start: 0,
                        end: p.end_addr,
                    }),
                    &[R::DataAck, R::TransferSize],
                    Wait::Handshake,
                ),
                Self::FirstBlockSize => (
                    Some(|_| Command::FirstBlockSizeRequest),
                    &[R::BlockSize],
                    Wait::Handshake,
                ),
                Self::BlockSizeAnnounce => (
                    Some(|_| Command::NextBlockSizeRequest),
                    &[R::BlockSize],
                    Wait::Transfer,
                ),
                Self::BlockTransfer => {
                    (Some(|_| Command::NextBlockSizeRequest), &[], Wait::Transfer)
                },
                Self::Retransmit => {
                    (Some(|_| Command::RetransmitLast), &[R::BlockSize], Wait::Handshake)
                },
                Self::End => (Some(|_| Command::SessionEnd), &[R::Goodbye], Wait::Handshake),
                Self::Done => (None, &[], Wait::Handshake),
            };

        StateRow {
            command,
            expects,
            wait,
        }
    }

    /// States in which buffered payload bytes are a block to be closed.
    pub fn carries_payload(self) -> bool {
        matches!(
            self,
            Self::FirstBlockSize | Self::BlockSizeAnnounce | Self::BlockTransfer | Self::Retransmit
        )
    }

    /// Command sent on entry to this state.
    pub fn command(self, params: &Params) -> Option<Command> {
        self.row().command.map(|build| build(params))
    }

    /// Whether `response` is acted on in this state.
    pub fn expects(self, response: &Response) -> bool {
        self.row().expects.contains(&response.kind())
    }
}
