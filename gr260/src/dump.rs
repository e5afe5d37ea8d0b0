//! Raw memory dump files.
//!
//! A dump mirrors the accepted payload of a download, one section per bulk
//! phase in arrival order:
//!
//! ```text
//! +-------------+-------------+---------------------------+
//! | total (u32) | chksum (u32)|  accepted block bytes ... |   track list
//! +-------------+-------------+---------------------------+
//! | total (u32) | chksum (u32)|  accepted block bytes ... |   waypoints
//! +-------------+-------------+---------------------------+
//! ```
//!
//! Both header words are little-endian and copied from the `$PHLX901`
//! announcement. When a session skips the track list, an empty `0, 0`
//! section is written first so the waypoints are always the second section.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::block::Phase;

/// Header and payload of one bulk phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpSection {
    /// Total size announced for the phase.
    pub total_size: u32,
    /// Checksum announced for the phase.
    pub checksum: u32,
    /// Payload bytes.
    pub data: Vec<u8>,
}

/// A parsed dump file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDump {
    /// Track header section.
    pub track_list: DumpSection,
    /// Waypoint section, absent for list-only downloads.
    pub waypoints: Option<DumpSection>,
}

impl RawDump {
    /// Parse a dump from a reader.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let track_list = read_section(&mut reader, Phase::TrackList)?
            .ok_or_else(|| Error::InvalidDump("file is empty".into()))?;
        let waypoints = read_section(&mut reader, Phase::Waypoints)?;

        let mut rest = [0u8; 1];
        if reader.read(&mut rest)? != 0 {
            warn!("Ignoring trailing data after the waypoint section");
        }

        Ok(Self {
            track_list,
            waypoints,
        })
    }

    /// Parse a dump file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::read_from(BufReader::new(file))
    }
}

/// Read one section. `Ok(None)` at a clean end of file.
fn read_section<R: Read>(reader: &mut R, phase: Phase) -> Result<Option<DumpSection>> {
    let mut header = [0u8; 8];
    let got = read_up_to(reader, &mut header)?;
    if got == 0 {
        return Ok(None);
    }
    if got < header.len() {
        return Err(Error::InvalidDump(format!(
            "{} header truncated after {got} bytes",
            phase.name()
        )));
    }

    let mut cursor = &header[..];
    let total_size = cursor.read_u32::<LittleEndian>()?;
    let checksum = cursor.read_u32::<LittleEndian>()?;

    // Bounded by the file, not the header
    let mut data = Vec::new();
    reader.by_ref().take(u64::from(total_size)).read_to_end(&mut data)?;
    let got = data.len();
    if got < total_size as usize {
        // An interrupted download leaves a short final section
        let whole = got - got % phase.record_size();
        warn!(
            "{} section holds {got} of {total_size} bytes, keeping {whole}",
            phase.name()
        );
        data.truncate(whole);
    }
    debug!("Read {} section: {} bytes", phase.name(), data.len());

    Ok(Some(DumpSection {
        total_size,
        checksum,
        data,
    }))
}

/// Fill `buf` as far as the reader allows.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Writes a dump while a download is in progress.
pub struct DumpWriter<W: Write> {
    inner: W,
    sections: usize,
}

impl DumpWriter<BufWriter<File>> {
    /// Create (or truncate) a dump file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> DumpWriter<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self { inner, sections: 0 }
    }

    /// Number of sections started so far.
    pub fn sections(&self) -> usize {
        self.sections
    }

    /// Start a section with the phase's announced size and checksum.
    pub fn begin_section(&mut self, total_size: u32, checksum: u32) -> Result<()> {
        self.inner.write_u32::<LittleEndian>(total_size)?;
        self.inner.write_u32::<LittleEndian>(checksum)?;
        self.sections += 1;
        Ok(())
    }

    /// Append an accepted block.
    pub fn write_block(&mut self, block: &[u8]) -> Result<()> {
        self.inner.write_all(block)?;
        Ok(())
    }

    /// Flush buffered data.
    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}
