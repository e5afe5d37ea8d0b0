//! Receivers for the records a session produces.

use crate::protocol::block::Phase;
use crate::record::{TrackInfo, Waypoint};

/// Receives decoded records and transfer progress from a [`Session`].
///
/// Every method has an empty default, so implementors only override what
/// they need.
///
/// [`Session`]: crate::session::Session
pub trait RecordSink {
    /// Called once the track list has been received.
    fn tracks(&mut self, tracks: &[TrackInfo]) {
        let _ = tracks;
    }

    /// Called once the waypoint transfer ends, or with the records received
    /// so far when the session is interrupted.
    fn waypoints(&mut self, waypoints: &[Waypoint], tracks: &[TrackInfo]) {
        let _ = (waypoints, tracks);
    }

    /// Called when a phase starts and after every accepted block.
    fn progress(&mut self, phase: Phase, received: usize, total: Option<usize>) {
        let _ = (phase, received, total);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl RecordSink for NullSink {}

/// Keeps copies of everything it receives.
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    /// Track list, as last delivered.
    pub tracks: Vec<TrackInfo>,
    /// Waypoints, as last delivered.
    pub waypoints: Vec<Waypoint>,
    /// Progress reports in order.
    pub progress: Vec<(Phase, usize, Option<usize>)>,
}

impl RecordSink for CollectingSink {
    fn tracks(&mut self, tracks: &[TrackInfo]) {
        self.tracks = tracks.to_vec();
    }

    fn waypoints(&mut self, waypoints: &[Waypoint], _tracks: &[TrackInfo]) {
        self.waypoints = waypoints.to_vec();
    }

    fn progress(&mut self, phase: Phase, received: usize, total: Option<usize>) {
        self.progress.push((phase, received, total));
    }
}
