//! Byte sources for outbound files.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Random-access readable storage behind an outbound [`TransferFile`].
///
/// [`TransferFile`]: crate::TransferFile
pub trait ByteSource: Send {
    /// Read up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns 0 only at end of data.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Called once the peer has confirmed receipt.
    fn release(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Backing path, if the source lives on disk
    fn path(&self) -> Option<&Path> {
        None
    }
}

/// Source over an in-memory buffer
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    /// Create a source serving `data`
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Number of bytes held
    #[must_use]
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Check if the buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl ByteSource for MemorySource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }
}

/// Source over a file on disk
pub struct DiskSource {
    file: File,
    path: PathBuf,
    remove_on_delivery: bool,
}

impl DiskSource {
    /// Open `path` for reading
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            file,
            path,
            remove_on_delivery: false,
        })
    }

    /// Delete the file once the peer confirms receipt
    #[must_use]
    pub fn remove_on_delivery(mut self, remove: bool) -> Self {
        self.remove_on_delivery = remove;
        self
    }

    /// Access the open file handle
    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Path the file was opened from
    #[must_use]
    pub fn file_path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for DiskSource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read(buf)
    }

    fn release(&mut self) -> io::Result<()> {
        if self.remove_on_delivery {
            tracing::debug!("Removing delivered file {}", self.path.display());
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
