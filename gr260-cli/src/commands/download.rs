//! `download` command: talk to the logger and fetch its memory.

use anyhow::{Context, Result};
use console::style;
use gr260::{CollectingSink, Phase, RecordSink, Session, SessionConfig, Summary, TrackInfo, Waypoint};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::config::Config;
use crate::{Cli, CliError, DownloadArgs, get_port, use_fancy_output};

use super::output;

/// Forwards records to a [`CollectingSink`] and drives a progress bar.
struct ProgressSink {
    records: CollectingSink,
    pb: ProgressBar,
    phase: Option<Phase>,
}

impl ProgressSink {
    fn new(pb: ProgressBar) -> Self {
        Self {
            records: CollectingSink::default(),
            pb,
            phase: None,
        }
    }
}

impl RecordSink for ProgressSink {
    fn tracks(&mut self, tracks: &[TrackInfo]) {
        self.records.tracks(tracks);
    }

    fn waypoints(&mut self, waypoints: &[Waypoint], tracks: &[TrackInfo]) {
        self.records.waypoints(waypoints, tracks);
    }

    fn progress(&mut self, phase: Phase, received: usize, total: Option<usize>) {
        if self.phase != Some(phase) {
            self.phase = Some(phase);
            self.pb.reset();
            self.pb.set_message(phase.name());
        }
        if let Some(total) = total {
            self.pb.set_length(total as u64);
        }
        self.pb.set_position(received as u64);
    }
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

/// Build the session settings from config defaults and command-line flags.
fn session_config(config: &Config, args: &DownloadArgs) -> Result<SessionConfig> {
    let mut session = config
        .download
        .apply(SessionConfig::default())
        .with_end_addr(args.to)
        .with_list_only(args.output.list_only);
    if let Some(retries) = args.max_retries {
        session = session.with_max_block_retries(retries);
    }
    session
        .validate()
        .map_err(|e| CliError::Config(e.to_string()))?;
    Ok(session)
}

fn create(path: &Path, what: &str) -> Result<BufWriter<File>> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create {what} file {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn print_summary(summary: &Summary) {
    let model = summary.model.as_deref().unwrap_or("unknown model");
    let firmware = summary
        .firmware
        .map(|fw| format!(" firmware {fw}"))
        .unwrap_or_default();
    eprintln!(
        "{} {model}{firmware}: {} tracks, {} waypoints, {} bytes, {} retransmits",
        style("✓").green(),
        summary.track_count,
        summary.waypoint_count,
        summary.bytes_received,
        summary.retransmits,
    );
}

/// Download command implementation.
pub(crate) fn cmd_download(cli: &Cli, config: &mut Config, args: &DownloadArgs) -> Result<()> {
    let settings = session_config(config, args)?;

    let port = get_port(cli, config)?;
    if !cli.quiet {
        eprintln!("{} Using port {}", style("🔌").cyan(), style(&port).green());
    }

    let mut session =
        Session::open(&port, settings).with_context(|| format!("Failed to open {port}"))?;
    if let Some(path) = &args.dump {
        session = session.with_dump(create(path, "dump")?);
    }
    if let Some(path) = &args.trace {
        session = session.with_trace(create(path, "trace")?);
    }

    if !cli.quiet {
        eprintln!("{} Waiting for the logger...", style("⏳").yellow());
    }

    let mut sink = ProgressSink::new(progress_bar(cli.quiet));
    let result = session.run(&mut sink);
    sink.pb.finish_and_clear();
    let summary = result.context("Download failed")?;

    if !cli.quiet {
        print_summary(&summary);
        if let Some(path) = &args.dump {
            eprintln!(
                "{} Saved raw dump to {}",
                style("✓").green(),
                style(path.display()).yellow()
            );
        }
    }

    output::emit(
        &args.output,
        config,
        cli.quiet,
        &sink.records.tracks,
        &sink.records.waypoints,
    )?;

    if summary.interrupted {
        return Err(CliError::Cancelled("Download interrupted, partial data kept".to_string()).into());
    }
    Ok(())
}
