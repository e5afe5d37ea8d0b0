//! Renderers for decoded records.

pub mod gpx;
pub mod listing;

pub use gpx::{GpxOptions, GpxWriter};
pub use listing::{track_line, waypoint_line, write_tracks, write_waypoints};
