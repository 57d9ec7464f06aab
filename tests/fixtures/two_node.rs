//! Two-node test fixture
//!
//! Two nodes, each with its own temporary inbound and outbound spool
//! directories, connected by an in-memory duplex stream.
//!
//! # Example
//!
//! ```no_run
//! use binkp_integration_tests::fixtures::TwoNode;
//!
//! # async fn example() {
//! let nodes = TwoNode::with_password("sekrit");
//! nodes.caller.queue(&nodes.callee.address, "A.PKT", b"mail");
//! let (caller, callee) = nodes.run().await;
//! assert!(caller.is_success() && callee.is_success());
//! # }
//! ```

use binkp_core::{
    FtnAddress, LocalNode, NodeBook, NodeEntry, OutboundSource, Role, SessionConfig,
    SessionEngine, SessionReport, SpoolOutbound,
};
use binkp_files::{InboundDir, OutboundSpool};
use binkp_transport::{Connection, memory_pair};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Duplex buffer size; large enough that neither side blocks on writes
const PIPE_CAPACITY: usize = 4 << 20;

/// One node's identity and directories
pub struct NodeDirs {
    root: TempDir,
    /// Primary address
    pub address: FtnAddress,
    /// Identity announced to peers
    pub local: LocalNode,
    /// Known peers
    pub book: NodeBook,
    /// Engine tuning
    pub config: SessionConfig,
    outbound: Arc<SpoolOutbound>,
}

impl NodeDirs {
    /// Create a node with empty directories
    pub fn new(address: &str) -> Self {
        let root = tempfile::tempdir().expect("create temp dir");
        let address: FtnAddress = address.parse().expect("valid test address");
        let outbound = Arc::new(SpoolOutbound::new(OutboundSpool::new(
            root.path().join("outbound"),
        )));
        Self {
            local: LocalNode::new(address.clone()).system_name(address.to_string()),
            address,
            book: NodeBook::new(),
            config: SessionConfig::default(),
            outbound,
            root,
        }
    }

    /// Add `peer` to the address book
    pub fn know(&mut self, peer: &FtnAddress, password: Option<&str>) {
        let mut entry = NodeEntry::new(peer.clone());
        if let Some(password) = password {
            entry = entry.password(password);
        }
        self.book.insert(entry);
    }

    /// Inbound placement
    pub fn inbound(&self) -> InboundDir {
        InboundDir::new(self.root.path().join("inbound"))
    }

    /// Outbound spool
    pub fn spool(&self) -> &OutboundSpool {
        self.outbound.spool()
    }

    /// Outbound source shared by every session of this node
    pub fn outbound(&self) -> Arc<SpoolOutbound> {
        Arc::clone(&self.outbound)
    }

    /// Spool a file with `contents` for `peer`
    pub fn queue(&self, peer: &FtnAddress, name: &str, contents: &[u8]) -> PathBuf {
        let staging = self.root.path().join("staging");
        std::fs::create_dir_all(&staging).expect("create staging dir");
        let source = staging.join(name);
        std::fs::write(&source, contents).expect("write staged file");
        self.spool()
            .enqueue(&peer.spool_key(), &source)
            .expect("enqueue file")
    }

    /// Where a received file for `network` ends up
    pub fn received_path(&self, network: &str, name: &str) -> PathBuf {
        self.inbound().network_dir(network).join(name)
    }

    /// Build an engine for this node
    pub fn engine<C: Connection>(&self, conn: C, role: Role) -> SessionEngine<C> {
        SessionEngine::new(
            conn,
            role,
            self.local.clone(),
            Arc::new(self.book.clone()),
            self.outbound() as Arc<dyn OutboundSource>,
            self.inbound().factory(),
        )
        .with_config(self.config.clone())
    }
}

/// Caller and callee on one in-memory link
pub struct TwoNode {
    /// Originating side
    pub caller: NodeDirs,
    /// Answering side
    pub callee: NodeDirs,
}

impl TwoNode {
    /// Two nodes in fsxnet that do not know each other
    pub fn new() -> Self {
        Self {
            caller: NodeDirs::new("21:1/100@fsxnet"),
            callee: NodeDirs::new("21:1/200@fsxnet"),
        }
    }

    /// Two nodes that share a session password
    pub fn with_password(password: &str) -> Self {
        let mut nodes = Self::new();
        let (caller, callee) = (nodes.caller.address.clone(), nodes.callee.address.clone());
        nodes.caller.know(&callee, Some(password));
        nodes.callee.know(&caller, Some(password));
        nodes
    }

    /// Run one session, the caller expecting the callee's address
    pub async fn run(&self) -> (SessionReport, SessionReport) {
        let (a, b) = memory_pair(PIPE_CAPACITY);
        let originating = self
            .caller
            .engine(a, Role::Originating)
            .expect_peer(self.callee.address.clone());
        let answering = self.callee.engine(b, Role::Answering);
        tokio::join!(originating.run(), answering.run())
    }
}

impl Default for TwoNode {
    fn default() -> Self {
        Self::new()
    }
}
