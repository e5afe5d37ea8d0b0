//! # gr260
//!
//! Download engine for the GR260 GPS logger.
//!
//! The logger speaks a line-oriented `$PHLX...*XX` command protocol over a
//! USB-UART cable and streams its memory back as binary blocks interleaved
//! with those lines. This crate provides:
//!
//! - command framing and response classification
//! - a byte-level line/payload demultiplexer and block reassembler
//! - the download session state machine, with bounded retransmits
//! - decoding of track headers and waypoints
//! - raw memory dumps that can be replayed offline
//! - GPX and text listing export
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: `Serialize` for records and discovered ports
//!
//! ## Example
//!
//! ```rust,no_run
//! use gr260::export::{GpxOptions, GpxWriter};
//! use gr260::session::{CollectingSink, Session, SessionConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::default();
//!     let mut session = Session::open("/dev/ttyUSB0", config)?
//!         .with_dump(std::fs::File::create("gr260.bin")?);
//!
//!     let mut sink = CollectingSink::default();
//!     let summary = session.run(&mut sink)?;
//!     println!("{} waypoints in {} tracks", summary.waypoint_count, summary.track_count);
//!
//!     let file = std::fs::File::create("gr260.gpx")?;
//!     GpxWriter::new(file, GpxOptions::default()).write_all(&sink.waypoints)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod dump;
pub mod error;
pub mod export;
pub mod host;
pub mod port;
pub mod protocol;
pub mod record;
pub mod session;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    device::{DetectedPort, DeviceKind, TransportKind},
    dump::{DumpSection, DumpWriter, RawDump},
    error::{Error, Result},
    export::{GpxOptions, GpxWriter},
    host::{auto_detect_port, discover_ports},
    port::{Port, SerialConfig},
    protocol::block::Phase,
    protocol::command::{Command, Frame},
    protocol::response::{FirmwareVersion, Response},
    record::{Decoder, TrackInfo, Waypoint},
    session::{CollectingSink, NullSink, RecordSink, Session, SessionConfig, Summary},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_interrupt_checker_toggle_true_false() {
        test_set_interrupted(true);
        assert!(is_interrupted_requested());

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }
}
