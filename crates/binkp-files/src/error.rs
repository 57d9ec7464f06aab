//! Error types for file transfers.

use std::io;
use thiserror::Error;

/// File transfer errors
#[derive(Debug, Error)]
pub enum FileError {
    /// Underlying storage failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Seek target lies beyond the end of the file
    #[error("cannot seek to {offset}: file is {size} bytes")]
    SeekPastEnd {
        /// Requested offset
        offset: u64,
        /// Declared file size
        size: u64,
    },

    /// Received bytes would run past the declared size
    #[error("{len} bytes at offset {offset} overrun declared size {size}")]
    Overrun {
        /// Length of the rejected chunk
        len: usize,
        /// Offset the chunk would be written at
        offset: u64,
        /// Declared file size
        size: u64,
    },

    /// Finalize called before every byte arrived
    #[error("file incomplete: {offset} of {size} bytes")]
    Incomplete {
        /// Bytes received so far
        offset: u64,
        /// Declared file size
        size: u64,
    },

    /// Finalize called a second time
    #[error("file already finalized")]
    AlreadyFinalized,

    /// Operation does not apply to this transfer direction
    #[error("operation not valid for a {0} file")]
    WrongDirection(&'static str),

    /// File name rejected as unsafe
    #[error("invalid file name {name:?}: {reason}")]
    InvalidName {
        /// The offending name
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },
}

/// Result type for file operations
pub type Result<T> = std::result::Result<T, FileError>;
