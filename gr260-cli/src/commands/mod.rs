//! Command implementations.
//!
//! Each subcommand is implemented in its own module.

pub(crate) mod completions;
pub(crate) mod download;
pub(crate) mod output;
pub(crate) mod ports;
pub(crate) mod replay;
