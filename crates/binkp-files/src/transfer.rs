//! Files in flight.
//!
//! A [`TransferFile`] is one file being sent or received during a session.
//! It owns the offset bookkeeping so that the invariants hold no matter which
//! storage backs it:
//!
//! - `offset <= size` at all times
//! - an inbound file is finalized at most once, and only at `offset == size`
//! - a file is complete iff `offset == size` and, when receiving, finalized

use crate::error::{FileError, Result};
use crate::sink::ByteSink;
use crate::source::{ByteSource, DiskSource, MemorySource};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// We are sending this file to the peer
    Sending,
    /// The peer is sending this file to us
    Receiving,
}

impl Direction {
    /// Lowercase name for log output
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sending => "sending",
            Self::Receiving => "receiving",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared properties of a file, as carried in FILE offers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileInfo {
    /// File name (no directory components)
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Modification time, seconds since the Unix epoch
    pub mtime: i64,
}

impl FileInfo {
    /// Create file info
    pub fn new(name: impl Into<String>, size: u64, mtime: i64) -> Self {
        Self {
            name: name.into(),
            size,
            mtime,
        }
    }
}

enum Endpoint {
    Source(Box<dyn ByteSource>),
    Sink(Box<dyn ByteSink>),
}

/// One file being transferred in either direction
pub struct TransferFile {
    info: FileInfo,
    offset: u64,
    endpoint: Endpoint,
    finalized: bool,
    committed_path: Option<PathBuf>,
}

impl TransferFile {
    /// Create an outbound file over any byte source
    pub fn outbound(info: FileInfo, source: impl ByteSource + 'static) -> Self {
        Self {
            info,
            offset: 0,
            endpoint: Endpoint::Source(Box::new(source)),
            finalized: false,
            committed_path: None,
        }
    }

    /// Create an outbound file from an in-memory buffer
    pub fn from_bytes(name: impl Into<String>, mtime: i64, data: Vec<u8>) -> Self {
        let source = MemorySource::new(data);
        let info = FileInfo::new(name, source.len(), mtime);
        Self::outbound(info, source)
    }

    /// Open a file on disk for sending
    ///
    /// # Errors
    ///
    /// Returns an error if the path has no usable file name or cannot be
    /// opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_disk(DiskSource::open(path)?)
    }

    /// Send an already opened file; name, size and mtime come from its
    /// metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the path has no usable file name or the
    /// metadata cannot be read.
    pub fn from_disk(source: DiskSource) -> Result<Self> {
        let path = source.file_path();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FileError::InvalidName {
                name: path.display().to_string(),
                reason: "path has no UTF-8 file name",
            })?
            .to_string();

        let metadata = source.file().metadata()?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));

        Ok(Self::outbound(
            FileInfo::new(name, metadata.len(), mtime),
            source,
        ))
    }

    /// Create an inbound file over a sink.
    ///
    /// Partial data already in the sink becomes the initial offset (the
    /// resume point). Partial data longer than the declared size cannot
    /// belong to this file and is discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if discarding stale partial data fails.
    pub fn inbound(info: FileInfo, mut sink: Box<dyn ByteSink>) -> Result<Self> {
        let existing = sink.existing_len();
        let offset = if existing > info.size {
            tracing::debug!(
                "Discarding {} bytes of stale partial data for {}",
                existing,
                info.name
            );
            sink.truncate(0)?;
            0
        } else {
            existing
        };

        Ok(Self {
            info,
            offset,
            endpoint: Endpoint::Sink(sink),
            finalized: false,
            committed_path: None,
        })
    }

    /// Declared file properties
    #[must_use]
    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    /// File name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Declared size in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        self.info.size
    }

    /// Declared modification time
    #[must_use]
    pub fn mtime(&self) -> i64 {
        self.info.mtime
    }

    /// Bytes transferred so far
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes still to transfer
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.info.size - self.offset
    }

    /// Transfer direction
    #[must_use]
    pub fn direction(&self) -> Direction {
        match self.endpoint {
            Endpoint::Source(_) => Direction::Sending,
            Endpoint::Sink(_) => Direction::Receiving,
        }
    }

    /// Check if the inbound file has been committed
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Check if every byte has been transferred (and, inbound, committed)
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.offset == self.info.size
            && (self.direction() == Direction::Sending || self.finalized)
    }

    /// Storage location: the source path when sending, the committed path
    /// once an inbound file is finalized
    #[must_use]
    pub fn location(&self) -> Option<&Path> {
        match &self.endpoint {
            Endpoint::Source(source) => source.path(),
            Endpoint::Sink(_) => self.committed_path.as_deref(),
        }
    }

    /// Read the next chunk of an outbound file.
    ///
    /// Returns at most `max_len` bytes and advances the offset; returns an
    /// empty buffer once the declared size has been reached.
    ///
    /// # Errors
    ///
    /// Fails on inbound files, or if the source ends before the declared size.
    pub fn next_chunk(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let want = usize::try_from(self.remaining())
            .unwrap_or(usize::MAX)
            .min(max_len);
        let offset = self.offset;
        let Endpoint::Source(source) = &mut self.endpoint else {
            return Err(FileError::WrongDirection("receiving"));
        };
        if want == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let n = source.read_at(offset + filled as u64, &mut buf[filled..])?;
            if n == 0 {
                return Err(FileError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "{} ended at {} of {} declared bytes",
                        self.info.name,
                        offset + filled as u64,
                        self.info.size
                    ),
                )));
            }
            filled += n;
        }

        self.offset += want as u64;
        Ok(buf)
    }

    /// Move the transfer offset.
    ///
    /// Sending: any offset up to the declared size (honours a peer's GET).
    /// Receiving: only backwards, discarding received bytes past `offset`.
    ///
    /// # Errors
    ///
    /// Returns `SeekPastEnd` for targets beyond the allowed range and
    /// `AlreadyFinalized` for committed inbound files.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        match &mut self.endpoint {
            Endpoint::Source(_) => {
                if offset > self.info.size {
                    return Err(FileError::SeekPastEnd {
                        offset,
                        size: self.info.size,
                    });
                }
            }
            Endpoint::Sink(sink) => {
                if self.finalized {
                    return Err(FileError::AlreadyFinalized);
                }
                if offset > self.offset {
                    return Err(FileError::SeekPastEnd {
                        offset,
                        size: self.offset,
                    });
                }
                sink.truncate(offset)?;
            }
        }
        self.offset = offset;
        Ok(())
    }

    /// Append received bytes at the current offset.
    ///
    /// # Errors
    ///
    /// Returns `Overrun` if the bytes would exceed the declared size; the
    /// chunk is rejected whole and the offset is unchanged.
    pub fn accept_chunk(&mut self, bytes: &[u8]) -> Result<()> {
        let Endpoint::Sink(sink) = &mut self.endpoint else {
            return Err(FileError::WrongDirection("sending"));
        };
        if self.finalized {
            return Err(FileError::AlreadyFinalized);
        }
        if self.offset + bytes.len() as u64 > self.info.size {
            return Err(FileError::Overrun {
                len: bytes.len(),
                offset: self.offset,
                size: self.info.size,
            });
        }

        sink.append(bytes)?;
        self.offset += bytes.len() as u64;
        Ok(())
    }

    /// Durably commit an inbound file. Must be called exactly once, when
    /// `offset == size`.
    ///
    /// # Errors
    ///
    /// Returns `Incomplete` before the last byte, `AlreadyFinalized` on a
    /// second call, or the sink's commit failure.
    pub fn finalize(&mut self) -> Result<Option<PathBuf>> {
        let Endpoint::Sink(sink) = &mut self.endpoint else {
            return Err(FileError::WrongDirection("sending"));
        };
        if self.finalized {
            return Err(FileError::AlreadyFinalized);
        }
        if self.offset != self.info.size {
            return Err(FileError::Incomplete {
                offset: self.offset,
                size: self.info.size,
            });
        }

        let path = sink.commit()?;
        self.finalized = true;
        self.committed_path.clone_from(&path);
        Ok(path)
    }

    /// Tell the source the peer confirmed receipt.
    ///
    /// # Errors
    ///
    /// Fails on inbound files or if the source cannot release its storage.
    pub fn mark_delivered(&mut self) -> Result<()> {
        match &mut self.endpoint {
            Endpoint::Source(source) => Ok(source.release()?),
            Endpoint::Sink(_) => Err(FileError::WrongDirection("receiving")),
        }
    }

    /// Give up on an inbound file before finalize. No-op otherwise.
    pub fn abandon(&mut self) {
        if let Endpoint::Sink(sink) = &mut self.endpoint {
            if !self.finalized {
                sink.abandon();
            }
        }
    }
}

impl fmt::Debug for TransferFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferFile")
            .field("name", &self.info.name)
            .field("direction", &self.direction())
            .field("size", &self.info.size)
            .field("mtime", &self.info.mtime)
            .field("offset", &self.offset)
            .field("finalized", &self.finalized)
            .finish()
    }
}
