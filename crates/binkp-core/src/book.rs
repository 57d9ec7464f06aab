//! Peer lookup: which node is calling, and what password it must present.

use crate::address::FtnAddress;
use crate::auth;

/// Outcome of looking up a peer's claimed addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPeer {
    /// Address the peer is known under
    pub address: FtnAddress,
    /// Whether the session must be password protected
    pub requires_auth: bool,
    /// Session password; `None` when not configured
    pub password: Option<String>,
}

impl ResolvedPeer {
    /// Password to present or expect, `-` when unset
    #[must_use]
    pub fn password_or_dash(&self) -> &str {
        self.password.as_deref().unwrap_or(auth::NO_PASSWORD)
    }
}

/// Resolves claimed peer addresses. Shared read-only between sessions.
pub trait AddressBook: Send + Sync {
    /// Look up the first known address in `claimed`; `None` for unknown peers.
    fn resolve(&self, claimed: &[FtnAddress]) -> Option<ResolvedPeer>;
}

/// One configured peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    /// Peer address
    pub address: FtnAddress,
    /// Session password
    pub password: Option<String>,
    /// `host:port` to dial
    pub host: Option<String>,
}

impl NodeEntry {
    /// Create an entry without password or host
    #[must_use]
    pub fn new(address: FtnAddress) -> Self {
        Self {
            address,
            password: None,
            host: None,
        }
    }

    /// Set the session password
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the dial host
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

/// In-memory address book
#[derive(Debug, Clone, Default)]
pub struct NodeBook {
    entries: Vec<NodeEntry>,
}

impl NodeBook {
    /// Create an empty book
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; a later entry for the same node replaces the earlier one
    pub fn insert(&mut self, entry: NodeEntry) {
        self.entries.retain(|e| !e.address.same_node(&entry.address));
        self.entries.push(entry);
    }

    /// Builder-style [`NodeBook::insert`]
    #[must_use]
    pub fn with(mut self, entry: NodeEntry) -> Self {
        self.insert(entry);
        self
    }

    /// Entry for `address`
    #[must_use]
    pub fn get(&self, address: &FtnAddress) -> Option<&NodeEntry> {
        self.entries.iter().find(|e| e.address.same_node(address))
    }

    /// Password expected from `address`, `-` when none is configured
    #[must_use]
    pub fn expected_password_for(&self, address: &FtnAddress) -> &str {
        self.get(address)
            .and_then(|e| e.password.as_deref())
            .unwrap_or(auth::NO_PASSWORD)
    }

    /// All entries
    #[must_use]
    pub fn entries(&self) -> &[NodeEntry] {
        &self.entries
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the book is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl AddressBook for NodeBook {
    fn resolve(&self, claimed: &[FtnAddress]) -> Option<ResolvedPeer> {
        claimed.iter().find_map(|addr| {
            self.get(addr).map(|entry| {
                let password = entry
                    .password
                    .clone()
                    .filter(|p| !auth::is_unset(p));
                ResolvedPeer {
                    address: entry.address.clone(),
                    requires_auth: password.is_some(),
                    password,
                }
            })
        })
    }
}
