//! Track header records.
//!
//! ```text
//! off  size  field
//!   0     4  unk0
//!   4    12  name (NUL padded, 0xFF in the first byte when unnamed)
//!  16     4  timestamp (seconds since 2000-01-01)
//!  20     4  duration (s)
//!  24     4  length (m)
//!  28     4  start_addr (first waypoint index)
//!  32     4  size (waypoint count)
//!  36   2*4  unk1..unk4
//!  44   4*5  unk5..unk9
//! ```

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::record::{TRACK_INFO_SIZE, device_time};

/// Device fields whose meaning is unknown, kept for listings and dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TrackOpaque {
    /// Leading word.
    pub unk0: u32,
    /// The four 16-bit fields at offset 36.
    pub halves: [u16; 4],
    /// The five 32-bit fields at offset 44.
    pub words: [u32; 5],
}

/// One track header from the logger's track list.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TrackInfo {
    /// Sequence number, from 1, in arrival order.
    pub number: u32,
    /// Track name, if one was set on the device.
    pub name: Option<String>,
    /// Start time, seconds since 2000-01-01.
    pub timestamp: u32,
    /// Duration in seconds.
    pub duration: u32,
    /// Distance in metres.
    pub length: u32,
    /// Index of the track's first waypoint.
    pub start_addr: u32,
    /// Number of waypoints in the track.
    pub size: u32,
    /// Undecoded fields.
    pub opaque: TrackOpaque,
}

impl TrackInfo {
    /// Decode a 64-byte record.
    pub fn parse(number: u32, raw: &[u8]) -> Result<Self> {
        if raw.len() != TRACK_INFO_SIZE {
            return Err(Error::InvalidRecord {
                kind: "track",
                len: raw.len(),
            });
        }

        let mut halves = [0u16; 4];
        LittleEndian::read_u16_into(&raw[36..44], &mut halves);
        let mut words = [0u32; 5];
        LittleEndian::read_u32_into(&raw[44..64], &mut words);

        Ok(Self {
            number,
            name: parse_name(&raw[4..16]),
            timestamp: LittleEndian::read_u32(&raw[16..20]),
            duration: LittleEndian::read_u32(&raw[20..24]),
            length: LittleEndian::read_u32(&raw[24..28]),
            start_addr: LittleEndian::read_u32(&raw[28..32]),
            size: LittleEndian::read_u32(&raw[32..36]),
            opaque: TrackOpaque {
                unk0: LittleEndian::read_u32(&raw[0..4]),
                halves,
                words,
            },
        })
    }

    /// Start time in UTC.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        device_time(self.timestamp)
    }

    /// One past the index of the track's last waypoint.
    pub fn end_addr(&self) -> u32 {
        self.start_addr.saturating_add(self.size)
    }

    /// Whether waypoint `index` belongs to this track.
    pub fn contains(&self, index: u32) -> bool {
        (self.start_addr..self.end_addr()).contains(&index)
    }

    /// Name for display, `(none)` when unnamed.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("(none)")
    }
}

fn parse_name(raw: &[u8]) -> Option<String> {
    if matches!(raw.first(), None | Some(0xFF | 0x00)) {
        return None;
    }
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Some(String::from_utf8_lossy(&raw[..end]).trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::track_bytes;

    #[test]
    fn test_parse_named_track() {
        let raw = track_bytes(Some("MORNING"), 360_000_000, 120, 30);
        let track = TrackInfo::parse(3, &raw).unwrap();

        assert_eq!(track.number, 3);
        assert_eq!(track.name.as_deref(), Some("MORNING"));
        assert_eq!(track.timestamp, 360_000_000);
        assert_eq!(track.duration, 3600);
        assert_eq!(track.length, 12_500);
        assert_eq!(track.start_addr, 120);
        assert_eq!(track.size, 30);
        assert_eq!(track.opaque.unk0, 0x0102_0304);
        assert_eq!(track.opaque.halves, [1, 2, 3, 4]);
        assert_eq!(track.opaque.words, [5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_unnamed_track() {
        let track = TrackInfo::parse(1, &track_bytes(None, 0, 0, 1)).unwrap();
        assert_eq!(track.name, None);
        assert_eq!(track.display_name(), "(none)");
    }

    #[test]
    fn test_wrong_length_is_rejected() {
        let err = TrackInfo::parse(1, &[0u8; 63]).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord { kind: "track", len: 63 }));
    }

    #[test]
    fn test_address_range() {
        let track = TrackInfo::parse(1, &track_bytes(None, 0, 100, 50)).unwrap();
        assert_eq!(track.end_addr(), 150);
        assert!(!track.contains(99));
        assert!(track.contains(100));
        assert!(track.contains(149));
        assert!(!track.contains(150));
    }
}
