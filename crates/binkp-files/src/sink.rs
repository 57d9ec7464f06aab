//! Byte sinks for inbound files.
//!
//! A sink accumulates bytes for one inbound file and commits them when the
//! transfer completes. Until commit, nothing a sink holds may be treated as a
//! delivered file.

use crate::PARTIAL_SUFFIX;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Append-only writable storage behind an inbound [`TransferFile`].
///
/// [`TransferFile`]: crate::TransferFile
pub trait ByteSink: Send {
    /// Bytes left behind by an earlier interrupted transfer of the same file.
    fn existing_len(&self) -> u64 {
        0
    }

    /// Drop everything at and after `len`; later appends continue from there.
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// Append `bytes` at the current end.
    fn append(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Durably commit the received file.
    ///
    /// Returns the committed location for sinks that live on disk.
    fn commit(&mut self) -> io::Result<Option<PathBuf>>;

    /// Called when the session ends before commit.
    fn abandon(&mut self) {}
}

#[derive(Debug, Default)]
struct MemoryState {
    data: Vec<u8>,
    committed: bool,
    abandoned: bool,
}

/// In-memory sink, inspectable through a [`MemoryHandle`]
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

/// Read-only view of a [`MemorySink`] that outlives the transfer
#[derive(Debug, Clone)]
pub struct MemoryHandle {
    state: Arc<Mutex<MemoryState>>,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemorySink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink that already holds `partial` from an interrupted transfer
    #[must_use]
    pub fn with_partial(partial: Vec<u8>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                data: partial,
                ..MemoryState::default()
            })),
        }
    }

    /// Get a handle for inspecting the sink after the session
    #[must_use]
    pub fn handle(&self) -> MemoryHandle {
        MemoryHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl MemoryHandle {
    /// Bytes currently held
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        lock(&self.state).data.clone()
    }

    /// Check if the sink was committed
    #[must_use]
    pub fn is_committed(&self) -> bool {
        lock(&self.state).committed
    }

    /// Check if the transfer was abandoned before commit
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        lock(&self.state).abandoned
    }
}

impl ByteSink for MemorySink {
    fn existing_len(&self) -> u64 {
        lock(&self.state).data.len() as u64
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        let mut state = lock(&self.state);
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        state.data.truncate(len);
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        lock(&self.state).data.extend_from_slice(bytes);
        Ok(())
    }

    fn commit(&mut self) -> io::Result<Option<PathBuf>> {
        lock(&self.state).committed = true;
        Ok(None)
    }

    fn abandon(&mut self) {
        lock(&self.state).abandoned = true;
    }
}

/// Sink writing `<dir>/<name>.part`, renamed to `<dir>/<name>` on commit
pub struct DiskSink {
    file: File,
    partial_path: PathBuf,
    final_path: PathBuf,
    existing: u64,
    keep_partial: bool,
}

impl DiskSink {
    /// Open (or reopen) the partial file for `name` inside `dir`.
    ///
    /// The caller is responsible for validating `name`; see
    /// [`validate_filename`](crate::validate_filename).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or partial file cannot be created.
    pub fn create<P: AsRef<Path>>(dir: P, name: &str) -> io::Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let final_path = dir.join(name);
        let partial_path = dir.join(format!("{name}{PARTIAL_SUFFIX}"));

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&partial_path)?;
        let existing = file.seek(SeekFrom::End(0))?;
        if existing > 0 {
            tracing::debug!(
                "Found {} bytes of partial data in {}",
                existing,
                partial_path.display()
            );
        }

        Ok(Self {
            file,
            partial_path,
            final_path,
            existing,
            keep_partial: true,
        })
    }

    /// Whether an abandoned transfer leaves its `.part` file for resumption
    #[must_use]
    pub fn keep_partial(mut self, keep: bool) -> Self {
        self.keep_partial = keep;
        self
    }

    /// Path of the in-progress file
    #[must_use]
    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }

    /// Path the file will have once committed
    #[must_use]
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }
}

impl ByteSink for DiskSink {
    fn existing_len(&self) -> u64 {
        self.existing
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)?;
        self.file.seek(SeekFrom::Start(len))?;
        self.existing = self.existing.min(len);
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)
    }

    fn commit(&mut self) -> io::Result<Option<PathBuf>> {
        self.file.flush()?;
        self.file.sync_all()?;
        std::fs::rename(&self.partial_path, &self.final_path)?;
        tracing::debug!("Committed {}", self.final_path.display());
        Ok(Some(self.final_path.clone()))
    }

    fn abandon(&mut self) {
        if self.keep_partial {
            tracing::debug!("Leaving partial file {}", self.partial_path.display());
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.partial_path) {
            tracing::warn!(
                "Failed to remove partial file {}: {}",
                self.partial_path.display(),
                e
            );
        }
    }
}
