//! Waypoint records.
//!
//! ```text
//! off  size  field
//!   0     4  timestamp (seconds since 2000-01-01)
//!   4     4  latitude  (f32, degrees)
//!   8     4  longitude (f32, degrees)
//!  12     2  GPS altitude (m)
//!  14     2  speed (0.1 km/h)
//!  16     1  unk1
//!  17     1  low nibble unk2, high nibble POI flag
//!  18     2  heart rate (bpm, 0 = none)
//!  20     2  barometric altitude (m)
//!  22     2  heading (degrees)
//!  24     4  distance travelled (m)
//!  28     4  unk7
//! ```

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::record::{WAYPOINT_SIZE, device_time};

/// Device fields whose meaning is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct WaypointOpaque {
    /// Byte at offset 16.
    pub unk1: u8,
    /// Low nibble of the flags byte.
    pub unk2: u8,
    /// Trailing word.
    pub unk7: u32,
}

/// One logged position.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Waypoint {
    /// Cumulative index within the waypoint transfer, from 0.
    pub index: u32,
    /// Number of the track this waypoint belongs to, if any.
    pub track: Option<u32>,
    /// Fix time, seconds since 2000-01-01.
    pub timestamp: u32,
    /// Latitude in degrees.
    pub lat: f32,
    /// Longitude in degrees.
    pub lon: f32,
    /// GPS altitude in metres.
    pub altitude: u16,
    /// Barometric altitude in metres.
    pub baro_altitude: u16,
    /// Speed in tenths of km/h.
    pub speed: u16,
    /// Heading in degrees.
    pub heading: u16,
    /// Heart rate in bpm.
    pub heart_rate: Option<u16>,
    /// Distance travelled in metres.
    pub distance: u32,
    /// Set for points of interest marked on the device.
    pub is_poi: bool,
    /// Undecoded fields.
    pub opaque: WaypointOpaque,
}

impl Waypoint {
    /// Decode a 32-byte record. `index` and `track` come from the decoder.
    pub fn parse(index: u32, track: Option<u32>, raw: &[u8]) -> Result<Self> {
        if raw.len() != WAYPOINT_SIZE {
            return Err(Error::InvalidRecord {
                kind: "waypoint",
                len: raw.len(),
            });
        }

        let flags = raw[17];
        let heart_rate = LittleEndian::read_u16(&raw[18..20]);

        Ok(Self {
            index,
            track,
            timestamp: LittleEndian::read_u32(&raw[0..4]),
            lat: LittleEndian::read_f32(&raw[4..8]),
            lon: LittleEndian::read_f32(&raw[8..12]),
            altitude: LittleEndian::read_u16(&raw[12..14]),
            speed: LittleEndian::read_u16(&raw[14..16]),
            heart_rate: (heart_rate != 0).then_some(heart_rate),
            baro_altitude: LittleEndian::read_u16(&raw[20..22]),
            heading: LittleEndian::read_u16(&raw[22..24]),
            distance: LittleEndian::read_u32(&raw[24..28]),
            is_poi: flags >> 4 != 0,
            opaque: WaypointOpaque {
                unk1: raw[16],
                unk2: flags & 0x0F,
                unk7: LittleEndian::read_u32(&raw[28..32]),
            },
        })
    }

    /// Fix time in UTC.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        device_time(self.timestamp)
    }

    /// Speed in km/h.
    pub fn speed_kmh(&self) -> f64 {
        f64::from(self.speed) / 10.0
    }

    /// Speed in m/s.
    pub fn speed_mps(&self) -> f64 {
        f64::from(self.speed) / 36.0
    }

    /// Altitude, barometric or GPS.
    pub fn elevation(&self, barometric: bool) -> u16 {
        if barometric {
            self.baro_altitude
        } else {
            self.altitude
        }
    }
}
