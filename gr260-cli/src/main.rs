//! gr260dl - Command-line downloader for the Holux GR260 GPS logger.
//!
//! ## Features
//!
//! - Download tracks and waypoints over the logger's USB-UART cable
//! - Save raw memory dumps and replay them offline
//! - GPX export and fixed-width listings
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Ctrl-C presses so far.
static INTERRUPTS: AtomicUsize = AtomicUsize::new(0);

/// Presses already reported to the library.
static INTERRUPTS_SEEN: AtomicUsize = AtomicUsize::new(0);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Returns `true` once for each Ctrl-C press since the previous call.
///
/// A second press while the logger is saying goodbye ends the wait.
fn take_interrupt() -> bool {
    let presses = INTERRUPTS.load(Ordering::Relaxed);
    INTERRUPTS_SEEN.swap(presses, Ordering::Relaxed) != presses
}

/// Failure classes with their own exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or an unusable environment for it (exit 2).
    #[error("{0}")]
    Usage(String),
    /// Invalid settings (exit 3).
    #[error("{0}")]
    Config(String),
    /// Cancelled by the user (exit 130).
    #[error("{0}")]
    Cancelled(String),
}

/// gr260dl - Download tracks and waypoints from a Holux GR260 GPS logger.
///
/// Environment variables:
///   GR260_PORT              - Default serial port
///   GR260_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "gr260dl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "GR260_PORT")]
    port: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "GR260_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// List all available ports (including unknown types).
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Output options shared by `download` and `replay`.
#[derive(Args, Debug, Clone, Default)]
struct OutputArgs {
    /// Write the waypoints to a GPX file.
    #[arg(long, value_name = "FILE")]
    gpx: Option<PathBuf>,

    /// Only fetch and show the track list.
    #[arg(long)]
    list_only: bool,

    /// Use the barometric altitude for GPX elevation.
    #[arg(long)]
    baro_altitude: bool,

    /// Print tracks and waypoints as JSON to stdout.
    #[arg(long)]
    json: bool,
}

/// Arguments of the `download` command.
#[derive(Args, Debug, Clone)]
struct DownloadArgs {
    /// Download waypoint memory up to this address, skipping the track list.
    #[arg(long, value_name = "ADDR", value_parser = parse_addr, conflicts_with = "list_only")]
    to: Option<u32>,

    /// Save the received memory to a raw dump file.
    #[arg(long, value_name = "FILE")]
    dump: Option<PathBuf>,

    /// Log every exchanged line to a file.
    #[arg(long, value_name = "FILE")]
    trace: Option<PathBuf>,

    /// Retransmit requests allowed per block.
    #[arg(long, value_name = "N")]
    max_retries: Option<u32>,

    #[command(flatten)]
    output: OutputArgs,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Download tracks and waypoints from the logger.
    Download(DownloadArgs),

    /// Decode a raw dump saved by `download --dump`.
    Replay {
        /// Path to the dump file.
        dump: PathBuf,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse an address given in decimal or `0x` hex (underscores allowed).
fn parse_addr(s: &str) -> Result<u32, String> {
    let s: String = s.trim().chars().filter(|c| *c != '_').collect();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    parsed.map_err(|e| format!("Invalid address '{s}': {e}"))
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Config(_) => 3,
            CliError::Cancelled(_) => 130,
        };
    }
    match err.downcast_ref::<gr260::Error>() {
        Some(gr260::Error::Config(_)) => 3,
        Some(gr260::Error::DeviceNotFound) => 4,
        _ => 1,
    }
}

fn main() -> ExitCode {
    // NO_COLOR and TTY detection
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "gr260dl v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| {
        INTERRUPTS.fetch_add(1, Ordering::Relaxed);
    }) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    gr260::set_interrupt_checker(take_interrupt);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Download(args) => commands::download::cmd_download(cli, &mut config, args),
        Commands::Replay { dump, output } => commands::replay::cmd_replay(cli, &config, dump, output),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Resolve the serial port to use, prompting when needed.
fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;

    if !selected.is_known && !cli.non_interactive && options.port.is_none() {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}
