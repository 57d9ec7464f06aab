//! Files queued for peers.
//!
//! A session claims the files for its authenticated peer once the peer is
//! known, and releases whatever it could not deliver when it ends. A file is
//! claimed by at most one session at a time.

use crate::address::FtnAddress;
use binkp_files::{OutboundSpool, TransferFile};
use dashmap::{DashMap, DashSet};
use std::sync::{Mutex, PoisonError};

/// Supplies outbound files per peer
pub trait OutboundSource: Send + Sync {
    /// Take the files queued for `peer`, in offer order.
    fn claim(&self, peer: &FtnAddress) -> Vec<TransferFile>;

    /// Return files that were not confirmed by the peer.
    fn release(&self, peer: &FtnAddress, undelivered: Vec<TransferFile>);
}

/// In-memory per-peer queues
#[derive(Default)]
pub struct OutboundQueue {
    queues: DashMap<String, Mutex<Vec<TransferFile>>>,
}

impl OutboundQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `file` for `peer`
    pub fn push(&self, peer: &FtnAddress, file: TransferFile) {
        self.queues
            .entry(peer.spool_key())
            .or_default()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(file);
    }

    /// Number of files waiting for `peer`
    #[must_use]
    pub fn len(&self, peer: &FtnAddress) -> usize {
        self.queues.get(&peer.spool_key()).map_or(0, |q| {
            q.lock().unwrap_or_else(PoisonError::into_inner).len()
        })
    }

    /// Check if nothing is waiting for `peer`
    #[must_use]
    pub fn is_empty(&self, peer: &FtnAddress) -> bool {
        self.len(peer) == 0
    }
}

impl OutboundSource for OutboundQueue {
    fn claim(&self, peer: &FtnAddress) -> Vec<TransferFile> {
        self.queues
            .remove(&peer.spool_key())
            .map(|(_, q)| q.into_inner().unwrap_or_else(PoisonError::into_inner))
            .unwrap_or_default()
    }

    fn release(&self, peer: &FtnAddress, undelivered: Vec<TransferFile>) {
        if undelivered.is_empty() {
            return;
        }
        tracing::debug!("Re-queueing {} files for {}", undelivered.len(), peer);

        let mut rewound = Vec::with_capacity(undelivered.len());
        for mut file in undelivered {
            match file.seek(0) {
                Ok(()) => rewound.push(file),
                Err(e) => tracing::warn!("Dropping {} from queue: {}", file.name(), e),
            }
        }

        let entry = self.queues.entry(peer.spool_key()).or_default();
        let mut queue = entry.lock().unwrap_or_else(PoisonError::into_inner);
        // Released files go ahead of anything queued meanwhile
        rewound.append(&mut queue);
        *queue = rewound;
    }
}

/// Outbound files from per-peer spool directories on disk.
///
/// Delivered files are deleted from the spool; undelivered files stay for
/// the next session.
pub struct SpoolOutbound {
    spool: OutboundSpool,
    active: DashSet<String>,
}

impl SpoolOutbound {
    /// Serve files from `spool`
    #[must_use]
    pub fn new(spool: OutboundSpool) -> Self {
        Self {
            spool,
            active: DashSet::new(),
        }
    }

    /// Underlying spool
    #[must_use]
    pub fn spool(&self) -> &OutboundSpool {
        &self.spool
    }

    /// Check if a session currently holds `peer`'s files
    #[must_use]
    pub fn is_claimed(&self, peer: &FtnAddress) -> bool {
        self.active.contains(&peer.spool_key())
    }
}

impl OutboundSource for SpoolOutbound {
    fn claim(&self, peer: &FtnAddress) -> Vec<TransferFile> {
        let key = peer.spool_key();
        if !self.active.insert(key.clone()) {
            tracing::warn!("Outbound for {} already claimed by another session", peer);
            return Vec::new();
        }
        match self.spool.load(&key) {
            Ok(files) => {
                tracing::debug!("Claimed {} spooled files for {}", files.len(), peer);
                files
            }
            Err(e) => {
                tracing::error!("Cannot read spool for {}: {}", peer, e);
                Vec::new()
            }
        }
    }

    fn release(&self, peer: &FtnAddress, undelivered: Vec<TransferFile>) {
        if !undelivered.is_empty() {
            tracing::info!(
                "{} files for {} stay in the spool",
                undelivered.len(),
                peer
            );
        }
        self.active.remove(&peer.spool_key());
    }
}
