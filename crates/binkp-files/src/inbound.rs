//! Inbound file placement.
//!
//! The session engine never decides where received files go. It calls a
//! [`SinkFactory`] with the network name and the file name from the peer's
//! offer; [`InboundDir`] is the standard on-disk implementation.

use crate::error::{FileError, Result};
use crate::sink::{ByteSink, DiskSink};
use crate::{MAX_FILENAME_LEN, PARTIAL_SUFFIX};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Creates the sink for an accepted FILE offer: `(network_name, filename)`.
///
/// An error makes the engine decline the offer with SKIP.
pub type SinkFactory = Arc<dyn Fn(&str, &str) -> Result<Box<dyn ByteSink>> + Send + Sync>;

/// Directory name used when the peer's network is not known
const UNKNOWN_NETWORK: &str = "unknown";

/// Check that a peer-supplied file name is safe to create locally.
///
/// Names must be a single path component: no separators, no parent
/// references, no NUL or control bytes, at most 255 bytes.
///
/// # Errors
///
/// Returns `FileError::InvalidName` describing the first problem found.
pub fn validate_filename(name: &str) -> Result<()> {
    let reject = |reason: &'static str| -> Result<()> {
        Err(FileError::InvalidName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return reject("empty");
    }
    if name.len() > MAX_FILENAME_LEN {
        return reject("longer than 255 bytes");
    }
    if name.contains('\0') {
        return reject("contains a NUL byte");
    }
    if name.contains('/') || name.contains('\\') {
        return reject("contains a path separator");
    }
    if name == "." || name == ".." {
        return reject("refers to a directory");
    }
    if name.chars().any(char::is_control) {
        return reject("contains control characters");
    }
    if name.ends_with(PARTIAL_SUFFIX) {
        return reject("uses the reserved partial-file suffix");
    }
    Ok(())
}

/// Stores inbound files under `<root>/<network>/`
#[derive(Debug, Clone)]
pub struct InboundDir {
    root: PathBuf,
    keep_partial: bool,
}

impl InboundDir {
    /// Create a placement rooted at `root`
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            keep_partial: true,
        }
    }

    /// Whether interrupted transfers leave resumable `.part` files
    #[must_use]
    pub fn keep_partial(mut self, keep: bool) -> Self {
        self.keep_partial = keep;
        self
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory receiving files for `network`
    #[must_use]
    pub fn network_dir(&self, network: &str) -> PathBuf {
        if validate_filename(network).is_ok() {
            self.root.join(network)
        } else {
            self.root.join(UNKNOWN_NETWORK)
        }
    }

    /// Create the sink for one inbound file
    ///
    /// # Errors
    ///
    /// Returns an error for unsafe names or if the file cannot be created.
    pub fn create_sink(&self, network: &str, filename: &str) -> Result<DiskSink> {
        validate_filename(filename)?;
        let sink = DiskSink::create(self.network_dir(network), filename)?;
        Ok(sink.keep_partial(self.keep_partial))
    }

    /// Factory handed to the session engine
    #[must_use]
    pub fn factory(&self) -> SinkFactory {
        let dir = self.clone();
        Arc::new(move |network: &str, filename: &str| -> Result<Box<dyn ByteSink>> {
            let sink = dir.create_sink(network, filename)?;
            Ok(Box::new(sink))
        })
    }
}
