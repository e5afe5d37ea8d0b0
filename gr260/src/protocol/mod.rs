//! GR260 serial protocol building blocks.
//!
//! - [`command`]: outbound `$PHLX...*XX` frames
//! - [`response`]: inbound line classification
//! - [`demux`]: line/payload separation of the inbound byte stream
//! - [`block`]: payload block reassembly

pub mod block;
pub mod command;
pub mod demux;
pub mod response;
