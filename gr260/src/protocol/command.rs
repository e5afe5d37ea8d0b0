//! Outbound command frames.
//!
//! Every command is a short ASCII body wrapped as
//!
//! ```text
//! $<body>*<XOR checksum, 2 uppercase hex digits>\r\n
//! ```
//!
//! where the checksum is the XOR of every body byte (the `$` and the
//! `*XX` suffix are excluded).

use std::fmt;

/// Commands understood by the logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Ask for the model name (`PHLX810`).
    ModelQuery,
    /// Ask for the firmware version (`PHLX829`).
    FirmwareQuery,
    /// Show the USB icon and start a download session (`PHLX826`).
    UsbIcon,
    /// Ask how many tracks are stored (`PHLX701`).
    TrackCountQuery,
    /// Request the first `count` track headers (`PHLX702,0,<count>`).
    TrackListRequest(u32),
    /// Ask for the first block of a bulk transfer (`PHLX900,901,3`).
    FirstBlockSizeRequest,
    /// Acknowledge a block and ask for the next one (`PHLX900,902,3`).
    NextBlockSizeRequest,
    /// Request waypoints in `[start, end)` (`PHLX703,<start>,<end>`).
    DataRequest {
        /// First waypoint index.
        start: u32,
        /// One past the last waypoint index.
        end: u32,
    },
    /// End the session (`PHLX827`).
    SessionEnd,
    /// Ask the logger to resend the last block (`PHLX900,902,2`).
    RetransmitLast,
}

impl Command {
    /// The frame body without `$`, checksum or line terminator.
    pub fn body(&self) -> String {
        match self {
            Self::ModelQuery => "PHLX810".to_string(),
            Self::FirmwareQuery => "PHLX829".to_string(),
            Self::UsbIcon => "PHLX826".to_string(),
            Self::TrackCountQuery => "PHLX701".to_string(),
            Self::TrackListRequest(count) => format!("PHLX702,0,{count}"),
            Self::FirstBlockSizeRequest => "PHLX900,901,3".to_string(),
            Self::NextBlockSizeRequest => "PHLX900,902,3".to_string(),
            Self::DataRequest { start, end } => format!("PHLX703,{start},{end}"),
            Self::SessionEnd => "PHLX827".to_string(),
            Self::RetransmitLast => "PHLX900,902,2".to_string(),
        }
    }

    /// Build the framed command.
    pub fn encode(&self) -> Frame {
        Frame::new(self.body())
    }
}

/// XOR-fold of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// A checksum-framed command line, ready to be written to the port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    body: String,
    checksum: u8,
}

impl Frame {
    /// Frame an arbitrary body.
    pub fn new(body: impl Into<String>) -> Self {
        let body = body.into();
        let checksum = checksum(body.as_bytes());
        Self { body, checksum }
    }

    /// Frame body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// XOR checksum of the body.
    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Wire bytes including the `\r\n` terminator.
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{self}\r\n").into_bytes()
    }
}

/// Displays the frame without its line terminator, as it appears in traces.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}*{:02X}", self.body, self.checksum)
    }
}

/// Split a `$body*XX` line into its body and the transmitted checksum.
///
/// Returns `None` if the line has no `$`, no `*`, or a suffix that is not
/// two hex digits. Trailing whitespace is ignored.
pub fn split_checksum(line: &str) -> Option<(&str, u8)> {
    let line = line.trim_end();
    let rest = line.strip_prefix('$')?;
    let (body, hex) = rest.rsplit_once('*')?;
    if hex.len() != 2 {
        return None;
    }
    let sum = u8::from_str_radix(hex, 16).ok()?;
    Some((body, sum))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_query_frame() {
        assert_eq!(Command::ModelQuery.encode().to_bytes(), b"$PHLX810*35\r\n");
    }

    #[test]
    fn test_fixed_command_frames() {
        let cases = [
            (Command::FirmwareQuery, "$PHLX829*3F"),
            (Command::UsbIcon, "$PHLX826*30"),
            (Command::TrackCountQuery, "$PHLX701*3A"),
            (Command::FirstBlockSizeRequest, "$PHLX900,901,3*3E"),
            (Command::NextBlockSizeRequest, "$PHLX900,902,3*3D"),
            (Command::SessionEnd, "$PHLX827*31"),
            (Command::RetransmitLast, "$PHLX900,902,2*3C"),
        ];
        for (command, expected) in cases {
            assert_eq!(command.encode().to_string(), expected, "{command:?}");
        }
    }

    #[test]
    fn test_parameterised_bodies() {
        assert_eq!(Command::TrackListRequest(18).body(), "PHLX702,0,18");
        assert_eq!(
            Command::DataRequest {
                start: 0,
                end: 1500
            }
            .body(),
            "PHLX703,0,1500"
        );
    }

    #[test]
    fn test_checksum_is_xor_of_body() {
        let frame = Command::TrackListRequest(18).encode();
        let expected = frame.body().bytes().fold(0u8, |a, b| a ^ b);
        assert_eq!(frame.checksum(), expected);
    }

    #[test]
    fn test_split_checksum_recovers_encoded_checksum() {
        for command in [
            Command::ModelQuery,
            Command::TrackListRequest(7),
            Command::DataRequest { start: 3, end: 4096 },
        ] {
            let frame = command.encode();
            let wire = String::from_utf8(frame.to_bytes()).unwrap();
            let (body, sum) = split_checksum(&wire).unwrap();
            assert_eq!(body, command.body());
            assert_eq!(sum, checksum(body.as_bytes()));
        }
    }

    #[test]
    fn test_split_checksum_rejects_malformed() {
        assert_eq!(split_checksum("PHLX810*35"), None);
        assert_eq!(split_checksum("$PHLX810"), None);
        assert_eq!(split_checksum("$PHLX810*3"), None);
        assert_eq!(split_checksum("$PHLX810*ZZ"), None);
    }
}
