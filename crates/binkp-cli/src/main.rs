//! binkp mailer CLI
//!
//! Exchanges mail packets and files with other FTN nodes over binkp.

mod config;
mod progress;

use anyhow::Context;
use binkp_core::session::{self, SessionReport};
use binkp_core::{
    AddressBook, FtnAddress, OutboundSource, Role, SessionEngine, SpoolOutbound, refuse_busy,
};
use binkp_transport::{TcpConnection, connect};
use clap::{Parser, Subcommand};
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{SessionProgress, format_bytes, format_duration};

/// binkp - FidoNet-style mail exchange over TCP
#[derive(Parser)]
#[command(name = "binkp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept incoming sessions
    Answer {
        /// Listen address (overrides the config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Call a peer and exchange mail
    Call {
        /// Peer FTN address
        #[arg(required = true)]
        address: String,

        /// Host to dial (defaults to the peer's configured host)
        #[arg(long)]
        host: Option<String>,

        /// Hide progress bars
        #[arg(short, long)]
        quiet: bool,
    },

    /// Queue a file for a peer
    Send {
        /// File to send
        #[arg(required = true)]
        file: PathBuf,

        /// Recipient FTN address
        #[arg(required = true)]
        address: String,
    },

    /// List queued outbound files
    Queue {
        /// Only this peer
        address: Option<String>,
    },

    /// Validate the configuration and print a summary
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Cannot load config {}", path.display()))?,
        None => Config::load_or_default()?,
    };

    // RUST_LOG wins over the configured level
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate()?;

    match cli.command {
        Commands::Answer { bind } => answer(bind, &config).await?,
        Commands::Call {
            address,
            host,
            quiet,
        } => call(&address, host, quiet, &config).await?,
        Commands::Send { file, address } => queue_file(&file, &address, &config)?,
        Commands::Queue { address } => show_queue(address.as_deref(), &config)?,
        Commands::Check => check(&config)?,
    }

    Ok(())
}

fn parse_address(text: &str) -> anyhow::Result<FtnAddress> {
    text.parse()
        .map_err(|e| anyhow::anyhow!("Invalid address '{}': {}", text, e))
}

/// Accept connections until Ctrl+C
async fn answer(bind: Option<String>, config: &Config) -> anyhow::Result<()> {
    let bind = bind.unwrap_or_else(|| config.network.listen_addr.clone());
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Cannot listen on {bind}"))?;

    let local = config.local_node()?;
    let book: Arc<dyn AddressBook> = Arc::new(config.node_book()?);
    let outbound: Arc<dyn OutboundSource> = Arc::new(SpoolOutbound::new(config.spool()));
    let factory = config.inbound_dir().factory();
    let session_config = config.session_config();
    let slots = Arc::new(Semaphore::new(config.network.max_sessions));

    println!("binkp {} answering on {}", binkp_core::VERSION, bind);
    println!("Inbound:  {}", config.paths.inbound.display());
    println!("Outbound: {}", config.paths.outbound.display());
    println!("Press Ctrl+C to stop");

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                return Ok(());
            }
        };

        let conn = TcpConnection::from_tcp(stream);
        let Ok(permit) = Arc::clone(&slots).try_acquire_owned() else {
            tracing::warn!("Session limit reached, refusing {}", peer);
            tokio::spawn(refuse_busy(conn, "too many sessions, try again later"));
            continue;
        };

        tracing::info!("Incoming connection from {}", peer);
        let engine = SessionEngine::new(
            conn,
            Role::Answering,
            local.clone(),
            Arc::clone(&book),
            Arc::clone(&outbound),
            Arc::clone(&factory),
        )
        .with_config(session_config.clone());

        tokio::spawn(async move {
            let report = engine.run().await;
            log_report(&peer.to_string(), &report);
            drop(permit);
        });
    }
}

fn log_report(peer: &str, report: &SessionReport) {
    let who = report
        .remote_address
        .as_ref()
        .map_or_else(|| peer.to_string(), ToString::to_string);
    let sent = report.delivered().count();
    let received = report.received().count();
    match report.error() {
        None => tracing::info!(
            "Session with {} done: {} sent, {} received in {}",
            who,
            sent,
            received,
            format_duration(report.stats.elapsed)
        ),
        Some(e) => tracing::warn!(
            "Session with {} failed ({}): {}; {} sent, {} received",
            who,
            e.kind(),
            e,
            sent,
            received
        ),
    }
}

/// Dial a peer and run one originating session
async fn call(
    address: &str,
    host: Option<String>,
    quiet: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let address = parse_address(address)?;
    let host = match host {
        Some(host) => config::with_default_port(&host),
        None => config
            .dial_host(&address)
            .with_context(|| format!("No host configured for {address}; use --host"))?,
    };

    println!("Calling {} at {}", address, host);
    let conn = connect(&host, config.connect_timeout())
        .await
        .with_context(|| format!("Cannot connect to {host}"))?;

    let (events, receiver) = session::channel();
    let display = if quiet {
        SessionProgress::hidden()
    } else {
        SessionProgress::new()
    };
    let display = tokio::spawn(display.follow(receiver));

    let report = SessionEngine::new(
        conn,
        Role::Originating,
        config.local_node()?,
        Arc::new(config.node_book()?),
        Arc::new(SpoolOutbound::new(config.spool())),
        config.inbound_dir().factory(),
    )
    .with_config(config.session_config())
    .expect_peer(address.clone())
    .with_events(events)
    .run()
    .await;

    if let Err(e) = display.await {
        tracing::debug!("Progress display ended abnormally: {}", e);
    }

    print_report(&report);
    match report.result {
        Ok(()) => Ok(()),
        Err(e) if e.is_retriable() => Err(anyhow::anyhow!("{e} (will retry later)")),
        Err(e) => Err(e.into()),
    }
}

fn print_report(report: &SessionReport) {
    println!();
    let status = if report.is_success() {
        style("complete").green()
    } else {
        style("failed").red()
    };
    println!(
        "Session {} in {}",
        status,
        format_duration(report.stats.elapsed)
    );
    if let Some(system) = &report.remote_system {
        println!("  Remote system: {system}");
    }
    println!("  Secure: {}", report.secure);

    for file in &report.outbound {
        let mark = if file.delivered {
            style("sent").green()
        } else {
            style("kept").yellow()
        };
        println!("  -> {:<24} {:>12}  {}", file.name, format_bytes(file.size), mark);
    }
    for file in &report.inbound {
        let mark = if file.finalized {
            style("received").green()
        } else {
            style("partial").yellow()
        };
        println!("  <- {:<24} {:>12}  {}", file.name, format_bytes(file.size), mark);
    }

    println!(
        "  Traffic: {} sent, {} received",
        format_bytes(report.stats.bytes_sent),
        format_bytes(report.stats.bytes_received)
    );
}

/// Copy a file into a peer's spool directory
fn queue_file(file: &Path, address: &str, config: &Config) -> anyhow::Result<()> {
    let address = parse_address(address)?;
    if !file.is_file() {
        anyhow::bail!("File not found: {}", file.display());
    }
    if config.peer(&address).is_none() {
        tracing::warn!("{} is not a configured peer", address);
    }

    let queued = config.spool().enqueue(&address.spool_key(), file)?;
    let size = std::fs::metadata(&queued)?.len();
    println!(
        "Queued {} ({}) for {}",
        queued.display(),
        format_bytes(size),
        address
    );
    Ok(())
}

/// Print spooled files per peer
fn show_queue(address: Option<&str>, config: &Config) -> anyhow::Result<()> {
    let spool = config.spool();
    let keys = match address {
        Some(address) => vec![parse_address(address)?.spool_key()],
        None => spool.peers()?,
    };

    if keys.is_empty() {
        println!("Outbound queue is empty");
        return Ok(());
    }

    for key in keys {
        let files = spool.list(&key)?;
        let total: u64 = files
            .iter()
            .filter_map(|f| std::fs::metadata(f).ok())
            .map(|m| m.len())
            .sum();
        println!("{} ({} files, {})", key, files.len(), format_bytes(total));
        for file in files {
            let size = std::fs::metadata(&file).map(|m| m.len()).unwrap_or(0);
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            println!("  {:<32} {:>12}", name, format_bytes(size));
        }
    }
    Ok(())
}

/// Print the effective configuration
fn check(config: &Config) -> anyhow::Result<()> {
    let local = config.local_node()?;

    println!("binkp {}", binkp_core::VERSION);
    println!();

    println!("Node:");
    for address in &local.addresses {
        println!("  Address: {address}");
    }
    println!("  System: {}", local.system_name);
    println!("  Sysop: {}", local.sysop);
    println!("  Location: {}", local.location);
    println!();

    println!("Network:");
    println!("  Listen: {}", config.network.listen_addr);
    println!("  Max sessions: {}", config.network.max_sessions);
    println!();

    println!("Session:");
    println!(
        "  Chunk size: {}",
        format_bytes(config.session.chunk_size as u64)
    );
    println!(
        "  Timeouts: read {}s, idle {}s, write {}s",
        config.session.read_timeout_secs,
        config.session.idle_timeout_secs,
        config.session.write_timeout_secs
    );
    println!("  CRAM-MD5: {}", config.session.cram_md5);
    println!("  Resume: {}", config.session.resume);
    println!("  Unlisted callers: {}", config.session.allow_unlisted);
    println!();

    println!("Peers:");
    if config.peers.is_empty() {
        println!("  (none)");
    }
    for peer in &config.peers {
        let secured = peer
            .password
            .as_deref()
            .is_some_and(|p| !binkp_core::auth::is_unset(p));
        println!(
            "  {:<24} {:<28} {}",
            peer.address,
            peer.host.as_deref().unwrap_or("-"),
            if secured { "password" } else { "no password" }
        );
    }

    println!();
    println!("{}", style("Configuration OK").green());
    Ok(())
}
