//! Progress notifications emitted while a session runs.

use crate::address::FtnAddress;
use binkp_files::Direction;
use tokio::sync::mpsc;

/// Something observable happened in a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The peer's identity is settled
    PeerIdentified {
        /// Address the peer is known under
        address: FtnAddress,
        /// Peer's `SYS` line, if sent
        system: Option<String>,
        /// Whether the session is password protected
        secure: bool,
    },
    /// A file transfer began (or resumed)
    FileStarted {
        /// File name
        name: String,
        /// Direction
        direction: Direction,
        /// Declared size
        size: u64,
        /// Starting offset
        offset: u64,
    },
    /// Bytes moved
    Progress {
        /// File name
        name: String,
        /// Direction
        direction: Direction,
        /// Bytes transferred so far
        offset: u64,
        /// Declared size
        size: u64,
    },
    /// A file transfer ended
    FileFinished {
        /// File name
        name: String,
        /// Direction
        direction: Direction,
        /// Delivered (outbound) or finalized (inbound)
        success: bool,
    },
}

/// Sending half of an event channel
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Receiving half of an event channel
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Create an event channel
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
