//! Configuration system for the binkp mailer.

use binkp_core::{FtnAddress, LocalNode, NodeBook, NodeEntry, SessionConfig};
use binkp_files::{InboundDir, OutboundSpool};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Mailer configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Our identity
    #[serde(default)]
    pub node: NodeConfig,
    /// Listening and dialing
    #[serde(default)]
    pub network: NetworkConfig,
    /// Session tuning
    #[serde(default)]
    pub session: SessionSettings,
    /// Inbound and outbound directories
    #[serde(default)]
    pub paths: PathsConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Known peers
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Our FTN addresses, one per network
    #[serde(default)]
    pub addresses: Vec<String>,
    /// System name announced in `SYS`
    #[serde(default = "default_system_name")]
    pub system_name: String,
    /// Operator announced in `ZYZ`
    #[serde(default = "default_sysop")]
    pub sysop: String,
    /// Location announced in `LOC`
    #[serde(default = "default_location")]
    pub location: String,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Listen address for `answer`
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Concurrent inbound sessions; further callers get BSY
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Data frame size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Per-read timeout in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Inactivity budget in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Longest a single write may wait on a peer that stopped reading
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
    /// Use CRAM-MD5 challenges
    #[serde(default = "default_true")]
    pub cram_md5: bool,
    /// Resume partial inbound files
    #[serde(default = "default_true")]
    pub resume: bool,
    /// Accept callers missing from `[[peers]]`
    #[serde(default = "default_true")]
    pub allow_unlisted: bool,
}

/// Paths configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Inbound root; files land in `<inbound>/<network>/`
    #[serde(default = "default_inbound")]
    pub inbound: PathBuf,
    /// Outbound spool root
    #[serde(default = "default_outbound")]
    pub outbound: PathBuf,
    /// Keep `.part` files of interrupted transfers for resume
    #[serde(default = "default_true")]
    pub keep_partial: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// A known peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Peer FTN address
    pub address: String,
    /// Session password; `-` or absent for none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Dial host, `host:port` or bare host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

// Default values

fn default_system_name() -> String {
    "binkp node".to_string()
}

fn default_sysop() -> String {
    "sysop".to_string()
}

fn default_location() -> String {
    "nowhere".to_string()
}

fn default_listen_addr() -> String {
    format!("0.0.0.0:{}", binkp_transport::DEFAULT_PORT)
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_max_sessions() -> usize {
    8
}

fn default_chunk_size() -> usize {
    8 * 1024
}

fn default_read_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_write_timeout() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("binkp")
}

fn default_inbound() -> PathBuf {
    data_dir().join("inbound")
}

fn default_outbound() -> PathBuf {
    data_dir().join("outbound")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            system_name: default_system_name(),
            sysop: default_sysop(),
            location: default_location(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            connect_timeout_secs: default_connect_timeout(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            read_timeout_secs: default_read_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            write_timeout_secs: default_write_timeout(),
            cram_md5: true,
            resume: true,
            allow_unlisted: true,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            inbound: default_inbound(),
            outbound: default_outbound(),
            keep_partial: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("binkp/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Parse listen address as `SocketAddr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_listen_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.network.listen_addr.parse()?)
    }

    /// Our addresses, parsed
    ///
    /// # Errors
    ///
    /// Returns an error if any configured address is malformed.
    pub fn node_addresses(&self) -> anyhow::Result<Vec<FtnAddress>> {
        self.node
            .addresses
            .iter()
            .map(|a| {
                a.parse::<FtnAddress>()
                    .map_err(|e| anyhow::anyhow!("[node] address: {}", e))
            })
            .collect()
    }

    /// Identity announced to peers
    ///
    /// # Errors
    ///
    /// Returns an error if no valid address is configured.
    pub fn local_node(&self) -> anyhow::Result<LocalNode> {
        let mut addresses = self.node_addresses()?.into_iter();
        let Some(primary) = addresses.next() else {
            anyhow::bail!("No [node] addresses configured");
        };
        let node = addresses
            .fold(LocalNode::new(primary), LocalNode::with_address)
            .system_name(self.node.system_name.clone())
            .sysop(self.node.sysop.clone())
            .location(self.node.location.clone());
        Ok(node)
    }

    /// Engine tuning from `[session]`
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            chunk_size: self.session.chunk_size,
            read_timeout: Duration::from_secs(self.session.read_timeout_secs),
            idle_timeout: Duration::from_secs(self.session.idle_timeout_secs),
            write_timeout: Duration::from_secs(self.session.write_timeout_secs),
            cram_md5: self.session.cram_md5,
            resume: self.session.resume,
            allow_unlisted: self.session.allow_unlisted,
            ..SessionConfig::default()
        }
    }

    /// Address book built from `[[peers]]`
    ///
    /// # Errors
    ///
    /// Returns an error if a peer address is malformed.
    pub fn node_book(&self) -> anyhow::Result<NodeBook> {
        let mut book = NodeBook::new();
        for peer in &self.peers {
            let address: FtnAddress = peer
                .address
                .parse()
                .map_err(|e| anyhow::anyhow!("[[peers]] address: {}", e))?;
            let mut entry = NodeEntry::new(address);
            if let Some(password) = &peer.password {
                entry = entry.password(password.clone());
            }
            if let Some(host) = &peer.host {
                entry = entry.host(host.clone());
            }
            book.insert(entry);
        }
        Ok(book)
    }

    /// Inbound file factory root
    #[must_use]
    pub fn inbound_dir(&self) -> InboundDir {
        InboundDir::new(&self.paths.inbound).keep_partial(self.paths.keep_partial)
    }

    /// Outbound spool
    #[must_use]
    pub fn spool(&self) -> OutboundSpool {
        OutboundSpool::new(&self.paths.outbound)
    }

    /// Connect timeout
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.network.connect_timeout_secs)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.parse_listen_addr()?;

        if self.node.addresses.is_empty() {
            anyhow::bail!("At least one [node] address is required");
        }
        self.node_addresses()?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.session.chunk_size == 0 || self.session.chunk_size > binkp_core::MAX_PAYLOAD {
            anyhow::bail!(
                "Chunk size must be between 1 and {} bytes",
                binkp_core::MAX_PAYLOAD
            );
        }

        if self.session.read_timeout_secs == 0
            || self.session.idle_timeout_secs == 0
            || self.session.write_timeout_secs == 0
        {
            anyhow::bail!("Session timeouts must be at least one second");
        }
        if self.network.connect_timeout_secs == 0 {
            anyhow::bail!("Connect timeout must be at least one second");
        }

        if self.network.max_sessions == 0 || self.network.max_sessions > 1000 {
            anyhow::bail!("Max sessions must be between 1 and 1000");
        }

        let mut seen = HashSet::new();
        for peer in &self.peers {
            let address: FtnAddress = peer
                .address
                .parse()
                .map_err(|e| anyhow::anyhow!("[[peers]] address: {}", e))?;
            if !seen.insert(address.clone()) {
                anyhow::bail!("Peer {} configured twice", address);
            }
            if let Some(host) = &peer.host {
                validate_host(host, &peer.address)?;
            }
        }

        Ok(())
    }

    /// Look up a configured peer
    #[must_use]
    pub fn peer(&self, address: &FtnAddress) -> Option<&PeerConfig> {
        self.peers.iter().find(|p| {
            p.address
                .parse::<FtnAddress>()
                .is_ok_and(|a| a.same_node(address))
        })
    }

    /// Dial string for `address`, defaulting the port
    #[must_use]
    pub fn dial_host(&self, address: &FtnAddress) -> Option<String> {
        self.peer(address)
            .and_then(|p| p.host.as_deref())
            .map(with_default_port)
    }
}

/// Append the binkp port to a bare host name
#[must_use]
pub fn with_default_port(host: &str) -> String {
    if host.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
        host.to_string()
    } else {
        format!("{host}:{}", binkp_transport::DEFAULT_PORT)
    }
}

/// Validate `host[:port]` format
fn validate_host(addr: &str, peer: &str) -> anyhow::Result<()> {
    let (host, port) = match addr.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (addr, None),
    };

    if let Some(port_str) = port {
        let port: u16 = port_str.parse().map_err(|_| {
            anyhow::anyhow!("Peer {} host '{}' has invalid port: {}", peer, addr, port_str)
        })?;
        if port == 0 {
            anyhow::bail!("Peer {} host '{}' has invalid port: 0", peer, addr);
        }
    }

    if host.is_empty() {
        anyhow::bail!("Peer {} host '{}' has empty hostname", peer, addr);
    }
    if host.contains("..") || host.contains('/') || host.contains('\\') {
        anyhow::bail!("Peer {} host '{}' contains invalid characters", peer, addr);
    }

    Ok(())
}
