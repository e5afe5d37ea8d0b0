//! Rendering of decoded records to stdout and files.

use anyhow::{Context, Result};
use console::style;
use gr260::export::{GpxOptions, GpxWriter, write_tracks, write_waypoints};
use gr260::{TrackInfo, Waypoint};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::OutputArgs;
use crate::config::Config;

/// Emit tracks and waypoints as requested by `output`.
///
/// Tables and JSON go to stdout, status lines to stderr.
pub(crate) fn emit(
    output: &OutputArgs,
    config: &Config,
    quiet: bool,
    tracks: &[TrackInfo],
    waypoints: &[Waypoint],
) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if output.json {
        let doc = json_document(tracks, (!output.list_only).then_some(waypoints))?;
        writeln!(out, "{doc}")?;
    } else {
        write_tracks(&mut out, tracks)?;
        if !output.list_only && output.gpx.is_none() {
            write_waypoints(&mut out, waypoints)?;
        }
    }
    out.flush()?;

    if let Some(path) = &output.gpx {
        if output.list_only {
            log::warn!("--list-only fetched no waypoints, skipping {}", path.display());
            return Ok(());
        }
        let options = GpxOptions {
            barometric_altitude: output.baro_altitude || config.download.baro_altitude,
            ..GpxOptions::default()
        };
        write_gpx(path, options, waypoints)?;
        if !quiet {
            eprintln!(
                "{} Wrote {} waypoints to {}",
                style("✓").green(),
                waypoints.len(),
                style(path.display()).yellow()
            );
        }
    }

    Ok(())
}

fn write_gpx(path: &Path, options: GpxOptions, waypoints: &[Waypoint]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = GpxWriter::new(BufWriter::new(file), options)
        .write_all(waypoints)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    out.flush()?;
    Ok(())
}

fn json_document(tracks: &[TrackInfo], waypoints: Option<&[Waypoint]>) -> Result<String> {
    let mut doc = serde_json::json!({ "tracks": tracks });
    if let Some(waypoints) = waypoints {
        doc["waypoints"] = serde_json::to_value(waypoints)?;
    }
    Ok(serde_json::to_string_pretty(&doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_document_list_only() {
        let doc = json_document(&[], None).unwrap();
        let value: serde_json::Value = serde_json::from_str(&doc).unwrap();
        assert!(value["tracks"].as_array().unwrap().is_empty());
        assert!(value.get("waypoints").is_none());
    }

    #[test]
    fn test_json_document_with_waypoints() {
        let doc = json_document(&[], Some(&[])).unwrap();
        let value: serde_json::Value = serde_json::from_str(&doc).unwrap();
        assert!(value["waypoints"].is_array());
    }

    #[test]
    fn test_write_gpx_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.gpx");
        write_gpx(&path, GpxOptions::default(), &[]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("<?xml"));
        assert!(text.trim_end().ends_with("</gpx>"));
    }
}
