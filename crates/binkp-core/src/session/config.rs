//! Session configuration

use crate::address::FtnAddress;
use crate::codec::DEFAULT_WRITE_TIMEOUT;
use crate::frame::MAX_PAYLOAD;
use std::time::Duration;

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Largest data frame payload we send
    pub chunk_size: usize,

    /// Wait for each individual read
    pub read_timeout: Duration,

    /// Total time without incoming frames before the session is abandoned
    pub idle_timeout: Duration,

    /// Longest a single frame write may block on a peer that is not reading
    pub write_timeout: Duration,

    /// Offer (answering) and answer (originating) CRAM-MD5 challenges
    pub cram_md5: bool,

    /// Ask peers to resume partial inbound files with GET
    pub resume: bool,

    /// Accept sessions from peers missing from the address book
    pub allow_unlisted: bool,

    /// Largest incoming frame payload accepted
    pub max_payload: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8 * 1024,
            read_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            cram_md5: true,
            resume: true,
            allow_unlisted: true,
            max_payload: MAX_PAYLOAD,
        }
    }
}

impl SessionConfig {
    /// Chunk size clamped to what a single frame can carry
    #[must_use]
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.clamp(1, MAX_PAYLOAD)
    }
}

/// Identity of this system, announced at session start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNode {
    /// Our addresses, offered in ADR
    pub addresses: Vec<FtnAddress>,
    /// System name (`SYS`)
    pub system_name: String,
    /// Operator name (`ZYZ`)
    pub sysop: String,
    /// Location (`LOC`)
    pub location: String,
}

impl LocalNode {
    /// Create an identity with one address
    #[must_use]
    pub fn new(address: FtnAddress) -> Self {
        Self {
            addresses: vec![address],
            system_name: String::from("binkp node"),
            sysop: String::from("sysop"),
            location: String::from("nowhere"),
        }
    }

    /// Add another address
    #[must_use]
    pub fn with_address(mut self, address: FtnAddress) -> Self {
        self.addresses.push(address);
        self
    }

    /// Set the system name
    #[must_use]
    pub fn system_name(mut self, name: impl Into<String>) -> Self {
        self.system_name = name.into();
        self
    }

    /// Set the operator name
    #[must_use]
    pub fn sysop(mut self, sysop: impl Into<String>) -> Self {
        self.sysop = sysop.into();
        self
    }

    /// Set the location
    #[must_use]
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Informational NUL lines sent when a session starts
    #[must_use]
    pub fn banner(&self) -> Vec<String> {
        vec![
            format!("SYS {}", self.system_name),
            format!("ZYZ {}", self.sysop),
            format!("LOC {}", self.location),
            format!("VER binkp-rs/{} {}", crate::VERSION, crate::PROTOCOL_VERSION),
        ]
    }
}
