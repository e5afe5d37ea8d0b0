//! GPX 1.0 writer.
//!
//! Waypoints become `<trkpt>`s, grouped into one `<trk>` per run of
//! consecutive points with the same track attribution. Points of interest
//! are also repeated as `<wpt>` elements after the tracks.

use std::io::Write;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::record::Waypoint;

const HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx
  version="1.0"
  creator="{creator}"
  xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
  xmlns="http://www.topografix.com/GPX/1/0"
  xmlns:gpxtpx="http://www.garmin.com/xmlschemas/TrackPointExtension/v1"
  xsi:schemaLocation="http://www.topografix.com/GPX/1/0 http://www.topografix.com/GPX/1/0/gpx.xsd">
"#;

/// Rendering options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpxOptions {
    /// Use barometric instead of GPS altitude for `<ele>`.
    pub barometric_altitude: bool,
    /// Value of the `creator` attribute.
    pub creator: String,
}

impl Default for GpxOptions {
    fn default() -> Self {
        Self {
            barometric_altitude: false,
            creator: concat!("gr260 ", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Streams waypoints into a GPX document.
///
/// Call [`push`](Self::push) for each waypoint in arrival order, then
/// [`finish`](Self::finish) to close the open track and write the POIs.
pub struct GpxWriter<W: Write> {
    out: W,
    options: GpxOptions,
    header_written: bool,
    /// Attribution of the open `<trk>`, `None` when no track is open.
    open_track: Option<Option<u32>>,
    track_count: u32,
    pois: Vec<Waypoint>,
}

impl<W: Write> GpxWriter<W> {
    /// Create a writer.
    pub fn new(out: W, options: GpxOptions) -> Self {
        Self {
            out,
            options,
            header_written: false,
            open_track: None,
            track_count: 0,
            pois: Vec::new(),
        }
    }

    /// Write a whole set of waypoints and finish the document.
    pub fn write_all(mut self, waypoints: &[Waypoint]) -> Result<W> {
        for waypoint in waypoints {
            self.push(waypoint)?;
        }
        self.finish()
    }

    /// Append one track point.
    pub fn push(&mut self, waypoint: &Waypoint) -> Result<()> {
        self.ensure_header()?;

        if self.open_track != Some(waypoint.track) {
            if self.open_track.is_some() {
                self.end_track()?;
            }
            self.track_count += 1;
            writeln!(
                self.out,
                "<trk>\n  <name>track-{}</name>\n<trkseg>",
                self.track_count
            )?;
            self.open_track = Some(waypoint.track);
        }

        writeln!(
            self.out,
            "<trkpt lat=\"{:.7}\" lon=\"{:.7}\">",
            waypoint.lat, waypoint.lon
        )?;
        writeln!(
            self.out,
            "  <ele>{}</ele>",
            waypoint.elevation(self.options.barometric_altitude)
        )?;
        if let Some(time) = waypoint.time() {
            writeln!(self.out, "  <time>{}</time>", gpx_time(&time))?;
        }
        writeln!(self.out, "  <course>{}</course>", waypoint.heading)?;
        writeln!(self.out, "  <speed>{:.6}</speed>", waypoint.speed_mps())?;
        if let Some(hr) = waypoint.heart_rate {
            writeln!(
                self.out,
                "  <extensions>\n    <gpxtpx:TrackPointExtension>\n    <gpxtpx:hr>{hr}</gpxtpx:hr>\n    </gpxtpx:TrackPointExtension>\n  </extensions>"
            )?;
        }
        writeln!(self.out, "</trkpt>")?;

        if waypoint.is_poi {
            self.pois.push(waypoint.clone());
        }
        Ok(())
    }

    /// Number of `<trk>` elements opened so far.
    pub fn track_count(&self) -> u32 {
        self.track_count
    }

    /// Close the document and return the writer.
    pub fn finish(mut self) -> Result<W> {
        self.ensure_header()?;
        if self.open_track.is_some() {
            self.end_track()?;
        }

        for (i, poi) in self.pois.iter().enumerate() {
            writeln!(
                self.out,
                "<wpt lat=\"{:.7}\" lon=\"{:.7}\">",
                poi.lat, poi.lon
            )?;
            writeln!(self.out, "  <ele>{}</ele>", poi.altitude)?;
            if let Some(time) = poi.time() {
                writeln!(self.out, "  <time>{}</time>", gpx_time(&time))?;
            }
            writeln!(self.out, "  <name>WP{:06}</name>\n</wpt>", i + 1)?;
        }

        writeln!(self.out, "</gpx>")?;
        self.out.flush()?;
        Ok(self.out)
    }

    fn ensure_header(&mut self) -> Result<()> {
        if !self.header_written {
            let header = HEADER.replace("{creator}", &xml_escape(&self.options.creator));
            self.out.write_all(header.as_bytes())?;
            self.header_written = true;
        }
        Ok(())
    }

    fn end_track(&mut self) -> Result<()> {
        writeln!(self.out, "</trkseg>\n</trk>")?;
        self.open_track = None;
        Ok(())
    }
}

fn gpx_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Escape the five XML special characters.
pub fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
