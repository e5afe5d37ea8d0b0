//! Inbound response lines and the prefix table that classifies them.
//!
//! The logger answers every command with a `$PHLX...*XX` line. Lines are
//! matched by prefix, longest prefix first, so `$PHLX900,702,` wins over any
//! shorter entry that shares its start.

use std::fmt;

use crate::protocol::command::{checksum, split_checksum};

/// A complete ASCII line extracted from the byte stream, starting at `$`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    text: String,
}

impl ResponseLine {
    /// Wrap a line. Trailing `\r` is stripped.
    pub fn new(text: impl Into<String>) -> Self {
        let mut text = text.into();
        while text.ends_with('\r') {
            text.pop();
        }
        Self { text }
    }

    /// The line as received, without line terminator.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the transmitted `*XX` checksum matches the body.
    ///
    /// `None` when the line carries no checksum.
    pub fn checksum_ok(&self) -> Option<bool> {
        split_checksum(&self.text).map(|(body, sum)| checksum(body.as_bytes()) == sum)
    }

    /// Classify the line through the prefix table.
    pub fn parse(&self) -> Option<Response> {
        Response::parse(&self.text)
    }
}

impl fmt::Display for ResponseLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Firmware version as reported by `$PHLX861`, encoded `major * 100 + minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion(pub u32);

impl FirmwareVersion {
    /// Major version number.
    pub fn major(self) -> u32 {
        self.0 / 100
    }

    /// Minor version number.
    pub fn minor(self) -> u32 {
        self.0 % 100
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.major(), self.minor())
    }
}

/// Start of a bulk transfer phase (`$PHLX901`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferAnnouncement {
    /// Start offset, when the logger sends one.
    pub offset: Option<u32>,
    /// Total number of payload bytes in this phase.
    pub size: u32,
    /// Payload checksum as sent by the logger. Carried, never verified.
    pub checksum: u32,
}

/// Announcement of the next payload block (`$PHLX902`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockAnnouncement {
    /// Offset of the block within the phase.
    pub offset: u32,
    /// Number of payload bytes that follow the line.
    pub length: u32,
    /// Block checksum as sent by the logger. Carried, never verified.
    pub checksum: u32,
}

/// A recognised response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `$PHLX852,<model>`: answer to the model query.
    Model(String),
    /// `$PHLX861,<version>`: answer to the firmware query.
    Firmware(FirmwareVersion),
    /// `$PHLX859`: session start acknowledged.
    UsbIcon,
    /// `$PHLX601,<count>`: number of stored tracks.
    TrackCount(u32),
    /// `$PHLX900,702,...`: track list request accepted.
    TrackListAck,
    /// `$PHLX900,703,...`: data request accepted.
    DataAck,
    /// `$PHLX901,...`: a bulk transfer phase begins.
    TransferSize(TransferAnnouncement),
    /// `$PHLX902,...`: a payload block follows.
    BlockSize(BlockAnnouncement),
    /// `$PHLX863,<product>`: session end acknowledged.
    Goodbye(String),
}

type Parser = fn(&[&str]) -> Option<Response>;

/// Known prefixes, longest first.
const PREFIXES: &[(&str, Parser)] = &[
    ("$PHLX900,702,", |_| Some(Response::TrackListAck)),
    ("$PHLX900,703,", |_| Some(Response::DataAck)),
    ("$PHLX852,", parse_model),
    ("$PHLX861,", parse_firmware),
    ("$PHLX601,", parse_track_count),
    ("$PHLX901,", parse_transfer),
    ("$PHLX902,", parse_block),
    ("$PHLX863,", parse_goodbye),
    ("$PHLX859", |_| Some(Response::UsbIcon)),
];

impl Response {
    /// Classify a line. Returns `None` for unknown prefixes and for known
    /// prefixes whose fields do not parse.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end();
        let (prefix, parser) = PREFIXES
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix))?;

        let payload = &line[prefix.len()..];
        let payload = payload
            .rsplit_once('*')
            .map_or(payload, |(fields, _)| fields);
        let fields: Vec<&str> = payload
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .collect();

        parser(&fields)
    }
}

fn decimal(field: &str) -> Option<u32> {
    field.parse().ok()
}

fn hex(field: &str) -> Option<u32> {
    u32::from_str_radix(field, 16).ok()
}

fn parse_model(fields: &[&str]) -> Option<Response> {
    fields.first().map(|m| Response::Model((*m).to_string()))
}

fn parse_firmware(fields: &[&str]) -> Option<Response> {
    let version = decimal(fields.first()?)?;
    Some(Response::Firmware(FirmwareVersion(version)))
}

fn parse_track_count(fields: &[&str]) -> Option<Response> {
    Some(Response::TrackCount(decimal(fields.first()?)?))
}

fn parse_transfer(fields: &[&str]) -> Option<Response> {
    let announcement = match fields {
        [size, sum] => TransferAnnouncement {
            offset: None,
            size: decimal(size)?,
            checksum: hex(sum)?,
        },
        [offset, size, sum] => TransferAnnouncement {
            offset: Some(decimal(offset)?),
            size: decimal(size)?,
            checksum: hex(sum)?,
        },
        _ => return None,
    };
    Some(Response::TransferSize(announcement))
}

fn parse_block(fields: &[&str]) -> Option<Response> {
    let [offset, length, sum] = fields else {
        return None;
    };
    Some(Response::BlockSize(BlockAnnouncement {
        offset: decimal(offset)?,
        length: decimal(length)?,
        checksum: hex(sum)?,
    }))
}

fn parse_goodbye(fields: &[&str]) -> Option<Response> {
    Some(Response::Goodbye(
        fields.first().copied().unwrap_or_default().to_string(),
    ))
}
