//! Session roles and protocol phases.

use std::fmt;

/// Which side of the call we are
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// We dialed the peer
    Originating,
    /// The peer dialed us
    Answering,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Originating => f.write_str("originating"),
            Self::Answering => f.write_str("answering"),
        }
    }
}

/// Protocol phase
///
/// ```text
/// Init -> AwaitAddress -+-> AwaitPassword (answering) -+-> Transferring -> Done
///                       +-> AwaitOk (originating) -----+
///                       +------------------------------+
/// any phase -> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Sending banners (and ADR when originating)
    Init,
    /// Waiting for the peer's ADR
    AwaitAddress,
    /// Answering: waiting for the peer's PWD
    AwaitPassword,
    /// Originating: PWD sent, waiting for OK
    AwaitOk,
    /// Exchanging files
    Transferring,
    /// Both batches ended
    Done,
    /// Session failed
    Aborted,
}

impl Phase {
    /// Check if the session has ended
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Check if peer authentication is still in progress
    #[must_use]
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            Self::Init | Self::AwaitAddress | Self::AwaitPassword | Self::AwaitOk
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::AwaitAddress => "await-address",
            Self::AwaitPassword => "await-password",
            Self::AwaitOk => "await-ok",
            Self::Transferring => "transferring",
            Self::Done => "done",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}
