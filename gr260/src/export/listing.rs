//! Fixed-width text listings of tracks and waypoints.
//!
//! Track line:
//!
//! ```text
//!  1: 01020304    MORNING 2011-05-29 16:00:00  3600s  12500m   1E@000078 00001 00002 00003 00004 00000005 00000006 007 008 9
//! ```
//!
//! Waypoint line:
//!
//! ```text
//!  1: 2011-05-29_16:00:00 52.229698 21.012199 112 25   7  3 0   142   118   270  4200 3735928559
//! ```

use std::io::Write;

use crate::error::Result;
use crate::record::{TrackInfo, Waypoint};

const NO_TIME: &str = "????-??-?? ??:??:??";

/// Format one track header.
pub fn track_line(track: &TrackInfo) -> String {
    let time = track
        .time()
        .map_or_else(|| NO_TIME.to_string(), |t| t.format("%F %T").to_string());
    let o = &track.opaque;
    format!(
        "{:2}: {:08X} {:>10} {} {:5}s {:6}m {:4X}@{:06X} {:05} {:05} {:05} {:05} {:08X} {:08X} {:03X} {:03X} {}",
        track.number,
        o.unk0,
        track.display_name(),
        time,
        track.duration,
        track.length,
        track.size,
        track.start_addr,
        o.halves[0],
        o.halves[1],
        o.halves[2],
        o.halves[3],
        o.words[0],
        o.words[1],
        o.words[2],
        o.words[3],
        o.words[4],
    )
}

/// Format one waypoint. Speed is shown rounded to whole km/h.
pub fn waypoint_line(waypoint: &Waypoint) -> String {
    let time = waypoint
        .time()
        .map_or_else(|| NO_TIME.replace(' ', "_"), |t| t.format("%F_%T").to_string());
    format!(
        "{:2}: {} {:8.6} {:8.6} {:3} {:2} {:3} {:2} {:1} {:5} {:5} {:5} {:5} {}",
        waypoint.index + 1,
        time,
        waypoint.lat,
        waypoint.lon,
        waypoint.altitude,
        (u32::from(waypoint.speed) + 5) / 10,
        waypoint.opaque.unk1,
        waypoint.opaque.unk2,
        u8::from(waypoint.is_poi),
        waypoint.heart_rate.unwrap_or(0),
        waypoint.baro_altitude,
        waypoint.heading,
        waypoint.distance,
        waypoint.opaque.unk7,
    )
}

/// Write a track table.
pub fn write_tracks<W: Write>(out: &mut W, tracks: &[TrackInfo]) -> Result<()> {
    for track in tracks {
        writeln!(out, "{}", track_line(track))?;
    }
    Ok(())
}

/// Write a waypoint table.
pub fn write_waypoints<W: Write>(out: &mut W, waypoints: &[Waypoint]) -> Result<()> {
    for waypoint in waypoints {
        writeln!(out, "{}", waypoint_line(waypoint))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::{track_bytes, waypoint_bytes};

    #[test]
    fn test_track_line() {
        let track = TrackInfo::parse(1, &track_bytes(Some("MORNING"), 360_000_000, 120, 30)).unwrap();
        assert_eq!(
            track_line(&track),
            " 1: 01020304    MORNING 2011-05-29 16:00:00  3600s  12500m   1E@000078 00001 00002 00003 00004 00000005 00000006 007 008 9"
        );
    }

    #[test]
    fn test_unnamed_track_line() {
        let track = TrackInfo::parse(12, &track_bytes(None, 0, 0, 1)).unwrap();
        let line = track_line(&track);
        assert!(line.starts_with("12: 01020304     (none) 2000-01-01 00:00:00"));
    }

    #[test]
    fn test_waypoint_line() {
        let raw = waypoint_bytes(360_000_000, 52.2297, 21.0122, 142, false);
        let waypoint = Waypoint::parse(0, Some(1), &raw).unwrap();
        assert_eq!(
            waypoint_line(&waypoint),
            " 1: 2011-05-29_16:00:00 52.229698 21.012199 112 25   7  3 0   142   118   270  4200 3735928559"
        );
    }

    #[test]
    fn test_write_tables() {
        let raw = waypoint_bytes(0, 1.0, 2.0, 0, true);
        let points = vec![
            Waypoint::parse(0, None, &raw).unwrap(),
            Waypoint::parse(1, None, &raw).unwrap(),
        ];
        let mut out = Vec::new();
        write_waypoints(&mut out, &points).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().nth(1).unwrap().starts_with(" 2: 2000-01-01_00:00:00"));

        let mut out = Vec::new();
        write_tracks(&mut out, &[]).unwrap();
        assert!(out.is_empty());
    }
}
