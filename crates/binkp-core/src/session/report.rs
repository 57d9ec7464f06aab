//! What a finished session hands back to its caller.

use super::state::Role;
use crate::address::FtnAddress;
use crate::error::SessionError;
use std::path::PathBuf;
use std::time::Duration;

/// Outcome for one outbound file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReport {
    /// File name
    pub name: String,
    /// Declared size
    pub size: u64,
    /// Peer confirmed receipt with GOT
    pub delivered: bool,
}

/// Outcome for one inbound file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundReport {
    /// File name
    pub name: String,
    /// Declared size
    pub size: u64,
    /// Durably committed
    pub finalized: bool,
    /// Committed location, for sinks on disk
    pub path: Option<PathBuf>,
}

/// Session traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames written
    pub frames_sent: u64,
    /// Frames read
    pub frames_received: u64,
    /// Bytes written
    pub bytes_sent: u64,
    /// Bytes read
    pub bytes_received: u64,
    /// Wall time from start to close
    pub elapsed: Duration,
}

/// Result of one session
#[derive(Debug)]
pub struct SessionReport {
    /// Our role
    pub role: Role,
    /// Addresses the peer offered
    pub remote_addresses: Vec<FtnAddress>,
    /// Address the peer was identified as
    pub remote_address: Option<FtnAddress>,
    /// Peer's `SYS` line
    pub remote_system: Option<String>,
    /// Whether a password was verified
    pub secure: bool,
    /// Success, or why the session failed
    pub result: Result<(), SessionError>,
    /// Every outbound file this session was responsible for
    pub outbound: Vec<OutboundReport>,
    /// Every inbound file the peer offered and we accepted
    pub inbound: Vec<InboundReport>,
    /// Traffic counters
    pub stats: SessionStats,
}

impl SessionReport {
    /// Check if the session reached Done
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Failure reason, if any
    #[must_use]
    pub fn error(&self) -> Option<&SessionError> {
        self.result.as_ref().err()
    }

    /// Names of outbound files the peer confirmed
    pub fn delivered(&self) -> impl Iterator<Item = &str> {
        self.outbound
            .iter()
            .filter(|f| f.delivered)
            .map(|f| f.name.as_str())
    }

    /// Names of inbound files committed locally
    pub fn received(&self) -> impl Iterator<Item = &str> {
        self.inbound
            .iter()
            .filter(|f| f.finalized)
            .map(|f| f.name.as_str())
    }
}
