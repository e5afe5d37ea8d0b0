//! Turns completed payload blocks into track and waypoint records.
//!
//! The decoder owns the numbering context that spans blocks:
//!
//! - the next track number, reset to 1 when a track-list phase begins;
//! - the cumulative waypoint index, reset to 0 when a waypoint phase begins.
//!
//! Waypoints are attributed to the track whose `[start_addr, start_addr + size)`
//! range contains their cumulative index.

use log::debug;

use crate::dump::RawDump;
use crate::error::{Error, Result};
use crate::record::{TRACK_INFO_SIZE, TrackInfo, WAYPOINT_SIZE, Waypoint};

/// Record decoder with explicit numbering context.
#[derive(Debug, Clone)]
pub struct Decoder {
    next_track_number: u32,
    waypoint_cursor: u32,
    tracks: Vec<TrackInfo>,
    waypoints: Vec<Waypoint>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self {
            next_track_number: 1,
            waypoint_cursor: 0,
            tracks: Vec::new(),
            waypoints: Vec::new(),
        }
    }

    /// Start a track-list phase: numbering restarts at 1.
    pub fn begin_track_list(&mut self) {
        self.next_track_number = 1;
        self.tracks.clear();
    }

    /// Start a waypoint phase: the cumulative index restarts at 0.
    pub fn begin_waypoints(&mut self) {
        self.waypoint_cursor = 0;
        self.waypoints.clear();
    }

    /// Decode a block of track headers and append them.
    ///
    /// Returns the records added by this block.
    pub fn decode_tracks(&mut self, block: &[u8]) -> Result<&[TrackInfo]> {
        check_len(block, TRACK_INFO_SIZE, "track")?;

        let first = self.tracks.len();
        for raw in block.chunks_exact(TRACK_INFO_SIZE) {
            let track = TrackInfo::parse(self.next_track_number, raw)?;
            debug!(
                "Track {}: {} start {} size {}",
                track.number,
                track.display_name(),
                track.start_addr,
                track.size
            );
            self.tracks.push(track);
            self.next_track_number += 1;
        }
        Ok(&self.tracks[first..])
    }

    /// Decode a block of waypoints and append them.
    ///
    /// Returns the records added by this block.
    pub fn decode_waypoints(&mut self, block: &[u8]) -> Result<&[Waypoint]> {
        check_len(block, WAYPOINT_SIZE, "waypoint")?;

        let first = self.waypoints.len();
        for raw in block.chunks_exact(WAYPOINT_SIZE) {
            let index = self.waypoint_cursor;
            let waypoint = Waypoint::parse(index, self.attribute(index), raw)?;
            self.waypoints.push(waypoint);
            self.waypoint_cursor += 1;
        }
        Ok(&self.waypoints[first..])
    }

    /// Number of the track containing waypoint `index`.
    pub fn attribute(&self, index: u32) -> Option<u32> {
        self.tracks
            .iter()
            .find(|t| t.contains(index))
            .map(|t| t.number)
    }

    /// Tracks decoded so far, in arrival order.
    pub fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    /// Waypoints decoded so far, in arrival order.
    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    /// Take the decoded records.
    pub fn into_parts(self) -> (Vec<TrackInfo>, Vec<Waypoint>) {
        (self.tracks, self.waypoints)
    }

    /// Decode a whole raw dump offline.
    pub fn replay(dump: &RawDump) -> Result<Self> {
        let mut decoder = Self::new();
        decoder.begin_track_list();
        decoder.decode_tracks(&dump.track_list.data)?;
        if let Some(section) = &dump.waypoints {
            decoder.begin_waypoints();
            decoder.decode_waypoints(&section.data)?;
        }
        Ok(decoder)
    }
}

fn check_len(block: &[u8], record_size: usize, kind: &'static str) -> Result<()> {
    if block.len() % record_size == 0 {
        Ok(())
    } else {
        Err(Error::InvalidRecord {
            kind,
            len: block.len(),
        })
    }
}
