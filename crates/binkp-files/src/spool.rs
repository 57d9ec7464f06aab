//! Outbound spool directories.
//!
//! Each peer has its own directory under the spool root; every regular file
//! in it is queued for that peer. The directory name is chosen by the caller
//! (the core crate derives it from the peer's network address).

use crate::error::Result;
use crate::inbound::validate_filename;
use crate::source::DiskSource;
use crate::transfer::TransferFile;
use crate::PARTIAL_SUFFIX;
use std::path::{Path, PathBuf};

/// Per-peer outbound directories under one root
#[derive(Debug, Clone)]
pub struct OutboundSpool {
    root: PathBuf,
}

impl OutboundSpool {
    /// Create a spool rooted at `root`
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding files for the peer identified by `key`
    #[must_use]
    pub fn peer_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Copy `file` into the peer's directory, returning the spooled path.
    ///
    /// The copy is made under a partial-file name and renamed into place,
    /// so concurrent sessions never pick up a half-written file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file has no valid name or the copy fails.
    pub fn enqueue<P: AsRef<Path>>(&self, key: &str, file: P) -> Result<PathBuf> {
        let file = file.as_ref();
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        validate_filename(name)?;

        let dir = self.peer_dir(key);
        std::fs::create_dir_all(&dir)?;
        let target = dir.join(name);
        let staging = dir.join(format!("{name}{PARTIAL_SUFFIX}"));
        if let Err(e) = std::fs::copy(file, &staging) {
            let _ = std::fs::remove_file(&staging);
            return Err(e.into());
        }
        std::fs::rename(&staging, &target)?;
        tracing::info!("Spooled {} for {}", name, key);
        Ok(target)
    }

    /// Paths of the files queued for a peer, sorted by name
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be read.
    pub fn list(&self, key: &str) -> Result<Vec<PathBuf>> {
        let dir = self.peer_dir(key);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let valid = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| validate_filename(n).is_ok());
            if valid {
                paths.push(path);
            } else {
                tracing::warn!("Ignoring unsendable spool entry {}", path.display());
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Keys of all peers that have a spool directory
    ///
    /// # Errors
    ///
    /// Returns an error if the root exists but cannot be read.
    pub fn peers(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    keys.push(name.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Open every queued file for sending. Each file is removed from the
    /// spool once the peer confirms it.
    ///
    /// # Errors
    ///
    /// Returns an error if listing fails; individual files that cannot be
    /// opened are skipped with a warning.
    pub fn load(&self, key: &str) -> Result<Vec<TransferFile>> {
        let mut files = Vec::new();
        for path in self.list(key)? {
            match open_spooled(&path) {
                Ok(file) => files.push(file),
                Err(e) => tracing::warn!("Cannot open spooled file {}: {}", path.display(), e),
            }
        }
        Ok(files)
    }
}

fn open_spooled(path: &Path) -> Result<TransferFile> {
    let source = DiskSource::open(path)?.remove_on_delivery(true);
    TransferFile::from_disk(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_and_list() {
        let tmp = tempfile::tempdir().unwrap();
        let spool = OutboundSpool::new(tmp.path().join("out"));

        let src = tmp.path().join("s2.net");
        std::fs::write(&src, b"mail").unwrap();

        let spooled = spool.enqueue("20000.20000.2", &src).unwrap();
        assert_eq!(spooled, tmp.path().join("out/20000.20000.2/s2.net"));
        assert!(src.exists());

        assert_eq!(spool.list("20000.20000.2").unwrap(), vec![spooled.clone()]);
        assert_eq!(std::fs::read(&spooled).unwrap(), b"mail");
        // No staging copy left behind
        let entries = std::fs::read_dir(spool.peer_dir("20000.20000.2")).unwrap().count();
        assert_eq!(entries, 1);
        assert!(spool.list("1.1.1").unwrap().is_empty());
        assert_eq!(spool.peers().unwrap(), vec!["20000.20000.2".to_string()]);
    }

    #[test]
    fn test_list_skips_partials_and_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let spool = OutboundSpool::new(tmp.path());
        let dir = spool.peer_dir("1.2.3");
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("b.pkt"), b"b").unwrap();
        std::fs::write(dir.join("a.pkt"), b"a").unwrap();
        std::fs::write(dir.join("c.pkt.part"), b"c").unwrap();

        let names: Vec<_> = spool
            .list("1.2.3")
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.pkt", "b.pkt"]);
    }

    #[test]
    fn test_copy_in_progress_not_loaded() {
        let tmp = tempfile::tempdir().unwrap();
        let spool = OutboundSpool::new(tmp.path().join("out"));
        let dir = spool.peer_dir("1.2.3");
        std::fs::create_dir_all(&dir).unwrap();

        // What another enqueue looks like while its copy is running
        std::fs::write(dir.join(format!("big.pkt{PARTIAL_SUFFIX}")), b"half").unwrap();
        assert!(spool.load("1.2.3").unwrap().is_empty());

        let src = tmp.path().join("big.pkt");
        std::fs::write(&src, b"the whole packet").unwrap();
        spool.enqueue("1.2.3", &src).unwrap();

        let files = spool.load("1.2.3").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name(), "big.pkt");
        assert_eq!(files[0].size(), 16);
        assert!(!dir.join(format!("big.pkt{PARTIAL_SUFFIX}")).exists());
    }

    #[test]
    fn test_enqueue_missing_file_leaves_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let spool = OutboundSpool::new(tmp.path().join("out"));

        assert!(spool.enqueue("1.2.3", tmp.path().join("gone.pkt")).is_err());
        let dir = spool.peer_dir("1.2.3");
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn test_loaded_files_removed_on_delivery() {
        let tmp = tempfile::tempdir().unwrap();
        let spool = OutboundSpool::new(tmp.path());
        let dir = spool.peer_dir("1.2.3");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.pkt"), b"abc").unwrap();

        let mut files = spool.load("1.2.3").unwrap();
        assert_eq!(files.len(), 1);
        let file = &mut files[0];
        assert_eq!(file.name(), "a.pkt");
        assert_eq!(file.size(), 3);

        assert_eq!(file.next_chunk(16).unwrap(), b"abc");
        file.mark_delivered().unwrap();
        assert!(!dir.join("a.pkt").exists());
    }
}
