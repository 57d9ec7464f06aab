//! # binkp Files
//!
//! File transfer layer for the binkp session engine.
//!
//! This crate provides:
//! - [`TransferFile`]: one file in flight, with offset bookkeeping and resume
//! - Byte sources (outbound) and sinks (inbound), in memory and on disk
//! - [`InboundDir`]: the default inbound-file factory with name validation
//! - [`OutboundSpool`]: per-peer outbound directories

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod inbound;
pub mod sink;
pub mod source;
pub mod spool;
pub mod transfer;

pub use error::{FileError, Result};
pub use inbound::{InboundDir, SinkFactory, validate_filename};
pub use sink::{ByteSink, DiskSink, MemoryHandle, MemorySink};
pub use source::{ByteSource, DiskSource, MemorySource};
pub use spool::OutboundSpool;
pub use transfer::{Direction, FileInfo, TransferFile};

/// Suffix marking an inbound file that has not been finalized yet
pub const PARTIAL_SUFFIX: &str = ".part";

/// Longest file name accepted from a peer, in bytes
pub const MAX_FILENAME_LEN: usize = 255;
