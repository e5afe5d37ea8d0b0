//! `replay` command: decode a raw dump offline.

use anyhow::{Context, Result};
use console::style;
use gr260::{Decoder, RawDump};
use log::debug;
use std::path::Path;

use crate::config::Config;
use crate::{Cli, OutputArgs};

use super::output;

/// Replay command implementation.
pub(crate) fn cmd_replay(cli: &Cli, config: &Config, path: &Path, output: &OutputArgs) -> Result<()> {
    let dump = RawDump::from_file(path)
        .with_context(|| format!("Failed to read dump {}", path.display()))?;
    debug!(
        "Dump sections: track list {} bytes, waypoints {}",
        dump.track_list.data.len(),
        dump.waypoints
            .as_ref()
            .map_or_else(|| "absent".to_string(), |s| format!("{} bytes", s.data.len()))
    );

    let decoder = Decoder::replay(&dump)
        .with_context(|| format!("Failed to decode dump {}", path.display()))?;
    let (tracks, waypoints) = decoder.into_parts();

    if !cli.quiet {
        eprintln!(
            "{} {}: {} tracks, {} waypoints",
            style("📦").cyan(),
            path.display(),
            tracks.len(),
            waypoints.len()
        );
    }

    output::emit(output, config, cli.quiet, &tracks, &waypoints)
}
