//! `list-ports` command.

use anyhow::Result;
use console::style;
use gr260::device::format_port_list;
use gr260::{auto_detect_port, discover_ports};

/// List ports command implementation.
///
/// With `json` the port list is the only output, on stdout.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = discover_ports();

    if json {
        println!("{}", serde_json::to_string_pretty(&detected)?);
        return Ok(());
    }

    eprintln!("{}", style("Serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for line in format_port_list(&detected) {
        eprintln!("  {} {}", style("•").green(), line);
    }

    if let Ok(port) = auto_detect_port() {
        eprintln!(
            "\n{} Auto-detected: {}",
            style("→").green().bold(),
            style(&port.name).cyan().bold()
        );
    }

    Ok(())
}
