//! Binary records stored in the logger's memory.
//!
//! Both record kinds are fixed-size little-endian structures. They are
//! decoded field by field at explicit offsets, never by reinterpreting the
//! buffer.

pub mod decoder;
pub mod track;
pub mod waypoint;

use chrono::{DateTime, Utc};

pub use decoder::Decoder;
pub use track::TrackInfo;
pub use waypoint::Waypoint;

/// Size of one track header.
pub const TRACK_INFO_SIZE: usize = 64;

/// Size of one waypoint.
pub const WAYPOINT_SIZE: usize = 32;

/// Unix time of the logger's epoch, 2000-01-01T00:00:00Z.
pub const DEVICE_EPOCH: i64 = 946_684_800;

/// Convert a logger timestamp to UTC.
pub fn device_time(timestamp: u32) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(DEVICE_EPOCH + i64::from(timestamp), 0)
}

/// Builders for raw records, shared by tests across the crate.
#[cfg(test)]
pub(crate) mod fixtures {
    use byteorder::{LittleEndian, WriteBytesExt};

    /// Raw 64-byte track header.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub(crate) fn track_bytes(name: Option<&str>, timestamp: u32, start_addr: u32, size: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(super::TRACK_INFO_SIZE);
        buf.write_u32::<LittleEndian>(0x0102_0304).unwrap();
        let mut raw_name = [0u8; 12];
        match name {
            Some(n) => raw_name[..n.len()].copy_from_slice(n.as_bytes()),
            None => raw_name.fill(0xFF),
        }
        buf.extend_from_slice(&raw_name);
        buf.write_u32::<LittleEndian>(timestamp).unwrap();
        buf.write_u32::<LittleEndian>(3600).unwrap(); // duration
        buf.write_u32::<LittleEndian>(12_500).unwrap(); // length
        buf.write_u32::<LittleEndian>(start_addr).unwrap();
        buf.write_u32::<LittleEndian>(size).unwrap();
        for v in 1..=4u16 {
            buf.write_u16::<LittleEndian>(v).unwrap();
        }
        for v in 5..=9u32 {
            buf.write_u32::<LittleEndian>(v).unwrap();
        }
        buf
    }

    /// Raw 32-byte waypoint.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub(crate) fn waypoint_bytes(timestamp: u32, lat: f32, lon: f32, heart_rate: u16, poi: bool) -> Vec<u8> {
        let mut buf = Vec::with_capacity(super::WAYPOINT_SIZE);
        buf.write_u32::<LittleEndian>(timestamp).unwrap();
        buf.write_f32::<LittleEndian>(lat).unwrap();
        buf.write_f32::<LittleEndian>(lon).unwrap();
        buf.write_u16::<LittleEndian>(112).unwrap(); // GPS altitude
        buf.write_u16::<LittleEndian>(254).unwrap(); // 25.4 km/h
        buf.push(7); // unk1
        buf.push(if poi { 0x13 } else { 0x03 });
        buf.write_u16::<LittleEndian>(heart_rate).unwrap();
        buf.write_u16::<LittleEndian>(118).unwrap(); // barometric altitude
        buf.write_u16::<LittleEndian>(270).unwrap(); // heading
        buf.write_u32::<LittleEndian>(4200).unwrap(); // distance
        buf.write_u32::<LittleEndian>(0xDEAD_BEEF).unwrap();
        buf
    }
}
