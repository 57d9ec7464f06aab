//! The binkp session engine.
//!
//! One [`SessionEngine`] drives one connection from the first banner to the
//! final close: address exchange, authentication, then a symmetric file
//! exchange in which both sides offer their batch and end it with EOB.
//!
//! The engine is a strictly alternating read/decide/write loop. Incoming
//! frames are always drained before the next outbound frame is written, so
//! GET, SKIP, ERR and BSY are never starved by a large transfer.
//!
//! # Example
//!
//! ```no_run
//! use binkp_core::session::{LocalNode, Role, SessionEngine};
//! use binkp_core::{NodeBook, OutboundQueue};
//! use binkp_files::InboundDir;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = binkp_transport::connect("bbs.example.org:24554", std::time::Duration::from_secs(30)).await?;
//! let local = LocalNode::new("21:1/100@fsxnet".parse()?);
//! let report = SessionEngine::new(
//!     conn,
//!     Role::Originating,
//!     local,
//!     Arc::new(NodeBook::new()),
//!     Arc::new(OutboundQueue::new()),
//!     InboundDir::new("/var/spool/binkp/in").factory(),
//! )
//! .run()
//! .await;
//! println!("delivered: {:?}", report.delivered().collect::<Vec<_>>());
//! # Ok(())
//! # }
//! ```

mod config;
mod events;
mod report;
mod state;

pub use config::{LocalNode, SessionConfig};
pub use events::{EventReceiver, EventSender, SessionEvent, channel};
pub use report::{InboundReport, OutboundReport, SessionReport, SessionStats};
pub use state::{Phase, Role};

use crate::address::{FtnAddress, format_address_list, parse_address_list};
use crate::auth;
use crate::book::{AddressBook, ResolvedPeer};
use crate::codec::FrameCodec;
use crate::command::{Command, FileOffer, FileRef, nul_field};
use crate::error::{CodecError, FrameError, SessionError};
use crate::frame::Frame;
use crate::outbound::OutboundSource;
use binkp_files::{Direction, FileError, FileInfo, SinkFactory, TransferFile};
use binkp_transport::{Connection, ConnectionError};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A busy caller gets this long to take our BSY
const BUSY_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// What happens to data frames for the current inbound file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InboundMode {
    /// Appending to the file
    Receiving,
    /// GET sent; waiting for the peer to re-offer from this offset
    AwaitingReoffer(u64),
    /// Offer declined with SKIP
    Discarding,
}

struct Incoming {
    offer: FileOffer,
    file: Option<TransferFile>,
    mode: InboundMode,
}

struct Outgoing {
    file: TransferFile,
    /// Data frames still to send
    streaming: bool,
}

/// Runs one binkp session over a connection
pub struct SessionEngine<C> {
    codec: FrameCodec<C>,
    role: Role,
    local: LocalNode,
    config: SessionConfig,
    book: Arc<dyn AddressBook>,
    outbound: Arc<dyn OutboundSource>,
    factory: SinkFactory,
    expected_peer: Option<FtnAddress>,
    events: Option<EventSender>,

    phase: Phase,
    remote_addresses: Vec<FtnAddress>,
    remote_system: Option<String>,
    peer: Option<ResolvedPeer>,
    secure: bool,
    presented_password: bool,
    challenge_sent: Option<Vec<u8>>,
    challenge_received: Option<Vec<u8>>,
    ignore_stray_pwd: bool,
    peer_aborted: bool,
    idle: Duration,

    claimed_for: Option<FtnAddress>,
    pending: VecDeque<TransferFile>,
    current_out: Option<Outgoing>,
    skipped: Vec<TransferFile>,
    incoming: Option<Incoming>,
    eob_sent: bool,
    eob_received: bool,

    outbound_reports: Vec<OutboundReport>,
    inbound_reports: Vec<InboundReport>,
}

impl<C: Connection> SessionEngine<C> {
    /// Create an engine bound to `conn`.
    ///
    /// `outbound` is consulted once the peer is identified; `factory`
    /// creates a sink for every accepted FILE offer.
    pub fn new(
        conn: C,
        role: Role,
        local: LocalNode,
        book: Arc<dyn AddressBook>,
        outbound: Arc<dyn OutboundSource>,
        factory: SinkFactory,
    ) -> Self {
        let config = SessionConfig::default();
        let mut codec = FrameCodec::with_max_payload(conn, config.max_payload);
        codec.set_write_timeout(config.write_timeout);
        Self {
            codec,
            role,
            local,
            config,
            book,
            outbound,
            factory,
            expected_peer: None,
            events: None,
            phase: Phase::Init,
            remote_addresses: Vec::new(),
            remote_system: None,
            peer: None,
            secure: false,
            presented_password: false,
            challenge_sent: None,
            challenge_received: None,
            ignore_stray_pwd: false,
            peer_aborted: false,
            idle: Duration::ZERO,
            claimed_for: None,
            pending: VecDeque::new(),
            current_out: None,
            skipped: Vec::new(),
            incoming: None,
            eob_sent: false,
            eob_received: false,
            outbound_reports: Vec::new(),
            inbound_reports: Vec::new(),
        }
    }

    /// Use non-default tuning
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.codec.set_max_payload(config.max_payload);
        self.codec.set_write_timeout(config.write_timeout);
        self.config = config;
        self
    }

    /// Originating side: require the peer to present `address`
    #[must_use]
    pub fn expect_peer(mut self, address: FtnAddress) -> Self {
        self.expected_peer = Some(address);
        self
    }

    /// Send progress events to `events`
    #[must_use]
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run the session to completion and close the connection.
    ///
    /// Never fails as such: the outcome, including partial results of a
    /// failed session, is in the returned report.
    pub async fn run(mut self) -> SessionReport {
        let started = Instant::now();
        tracing::info!("Starting {} session", self.role);

        let result = match self.drive().await {
            Ok(()) => {
                self.phase = Phase::Done;
                tracing::info!("Session complete");
                Ok(())
            }
            Err(err) => {
                tracing::warn!("Session aborted during {}: {}", self.phase, err);
                self.phase = Phase::Aborted;
                if err.notify_peer() && !self.peer_aborted {
                    let reply = Command::Err(err.to_string());
                    if let Err(e) = self.codec.send(&reply).await {
                        tracing::debug!("Could not send M_ERR: {}", e);
                    }
                }
                Err(err)
            }
        };

        self.codec.close().await;
        self.finish(result, started.elapsed())
    }

    async fn drive(&mut self) -> Result<(), SessionError> {
        self.start().await?;
        self.handshake().await?;
        self.transfer().await
    }

    async fn send(&mut self, command: Command) -> Result<(), SessionError> {
        self.codec.send(&command).await.map_err(Into::into)
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            // A dropped receiver just means nobody is watching
            let _ = events.send(event);
        }
    }

    /// Wait for the next frame, charging read timeouts to the idle budget
    async fn wait_frame(&mut self) -> Result<Frame, SessionError> {
        loop {
            match self.codec.read_frame(self.config.read_timeout).await {
                Ok(frame) => {
                    self.idle = Duration::ZERO;
                    return Ok(frame);
                }
                Err(CodecError::Connection(ConnectionError::Timeout(waited))) => {
                    self.idle += waited;
                    if self.idle >= self.config.idle_timeout {
                        return Err(SessionError::Timeout(self.idle));
                    }
                    tracing::debug!("No frame for {:?} during {}", self.idle, self.phase);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn parse_command(frame: &Frame) -> Result<Option<Command>, SessionError> {
        match Command::from_frame(frame) {
            Ok(command) => {
                tracing::debug!("<- {}", command);
                Ok(Some(command))
            }
            Err(FrameError::UnknownCommand(code)) => {
                tracing::warn!("Ignoring unknown command code {}", code);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ============ Handshake ============

    async fn start(&mut self) -> Result<(), SessionError> {
        for line in self.local.banner() {
            self.send(Command::Nul(line)).await?;
        }
        if self.role == Role::Originating {
            self.send_address().await?;
        }
        self.phase = Phase::AwaitAddress;
        Ok(())
    }

    async fn send_address(&mut self) -> Result<(), SessionError> {
        let list = format_address_list(&self.local.addresses);
        self.send(Command::Adr(list)).await
    }

    async fn handshake(&mut self) -> Result<(), SessionError> {
        while self.phase.is_handshake() {
            let frame = self.wait_frame().await?;
            if !frame.is_command() {
                return Err(SessionError::violation(
                    "data frame before authentication",
                ));
            }
            let Some(command) = Self::parse_command(&frame)? else {
                continue;
            };

            match command {
                Command::Nul(text) => self.on_nul(&text),
                Command::Err(text) => return Err(self.peer_error(text)),
                Command::Bsy(text) => {
                    self.peer_aborted = true;
                    return Err(SessionError::PeerBusy(text));
                }
                Command::Adr(text) if self.phase == Phase::AwaitAddress => {
                    self.on_address(&text).await?;
                }
                Command::Adr(_) => tracing::warn!("Ignoring repeated M_ADR"),
                Command::Pwd(text) if self.phase == Phase::AwaitPassword => {
                    self.on_password(&text).await?;
                }
                Command::Ok(text) if self.phase == Phase::AwaitOk => self.on_ok(&text),
                other => {
                    return Err(SessionError::violation(format!(
                        "unexpected {} during {}",
                        other.code().name(),
                        self.phase
                    )));
                }
            }
        }
        Ok(())
    }

    fn on_nul(&mut self, text: &str) {
        match nul_field(text) {
            Some(("SYS", system)) => self.remote_system = Some(system.to_string()),
            Some(("OPT", options)) => {
                if self.role == Role::Originating && self.config.cram_md5 {
                    if let Some(challenge) = auth::parse_challenge(options) {
                        tracing::debug!("Peer offered CRAM-MD5");
                        self.challenge_received = Some(challenge);
                    }
                }
            }
            Some((key, value)) => tracing::trace!("Peer info {}: {}", key, value),
            None => {}
        }
    }

    fn peer_error(&mut self, text: String) -> SessionError {
        self.peer_aborted = true;
        if self.phase == Phase::AwaitOk && self.presented_password {
            SessionError::auth(format!("rejected by peer: {text}"))
        } else {
            SessionError::PeerError(text)
        }
    }

    async fn on_address(&mut self, text: &str) -> Result<(), SessionError> {
        let claimed = parse_address_list(text);
        if claimed.is_empty() {
            return Err(SessionError::violation("M_ADR without valid addresses"));
        }
        tracing::info!("Peer addresses: {}", format_address_list(&claimed));
        self.remote_addresses = claimed;

        match self.role {
            Role::Answering => self.answer_address().await,
            Role::Originating => self.originate_address().await,
        }
    }

    async fn answer_address(&mut self) -> Result<(), SessionError> {
        match self.book.resolve(&self.remote_addresses) {
            Some(peer) if peer.requires_auth => {
                if self.config.cram_md5 {
                    let challenge = auth::generate_challenge();
                    let opt = format!("OPT {}", auth::challenge_option(&challenge));
                    self.send(Command::Nul(opt)).await?;
                    self.challenge_sent = Some(challenge);
                }
                self.peer = Some(peer);
                self.send_address().await?;
                self.phase = Phase::AwaitPassword;
                Ok(())
            }
            Some(peer) => {
                self.peer = Some(peer);
                self.send_address().await?;
                self.accept_unsecured().await
            }
            None if self.config.allow_unlisted => {
                tracing::info!("Accepting unlisted peer");
                self.send_address().await?;
                self.accept_unsecured().await
            }
            None => Err(SessionError::auth(format!(
                "unknown address {}",
                format_address_list(&self.remote_addresses)
            ))),
        }
    }

    async fn accept_unsecured(&mut self) -> Result<(), SessionError> {
        self.send(Command::Ok("non-secure".into())).await?;
        self.secure = false;
        self.ignore_stray_pwd = true;
        self.enter_transfer();
        Ok(())
    }

    async fn on_password(&mut self, offered: &str) -> Result<(), SessionError> {
        let expected = self
            .peer
            .as_ref()
            .map(|p| p.password_or_dash().to_string())
            .ok_or_else(|| SessionError::violation("M_PWD before M_ADR"))?;

        if !auth::verify_password(&expected, offered, self.challenge_sent.as_deref()) {
            return Err(SessionError::auth("incorrect password"));
        }
        self.send(Command::Ok("secure".into())).await?;
        self.secure = true;
        self.enter_transfer();
        Ok(())
    }

    async fn originate_address(&mut self) -> Result<(), SessionError> {
        let resolved = match &self.expected_peer {
            Some(expected) => {
                if !self.remote_addresses.iter().any(|a| a.same_node(expected)) {
                    return Err(SessionError::auth(format!(
                        "peer did not present {expected}"
                    )));
                }
                Some(
                    self.book
                        .resolve(std::slice::from_ref(expected))
                        .unwrap_or_else(|| ResolvedPeer {
                            address: expected.clone(),
                            requires_auth: false,
                            password: None,
                        }),
                )
            }
            None => self.book.resolve(&self.remote_addresses),
        };

        let password = resolved.as_ref().and_then(|p| p.password.clone());
        let response = match (&password, &self.challenge_received) {
            (Some(password), Some(challenge)) => auth::cram_response(password, challenge)
                .ok_or_else(|| SessionError::auth("cannot compute CRAM-MD5 response"))?,
            (Some(password), None) => password.clone(),
            (None, _) => auth::NO_PASSWORD.to_string(),
        };

        self.peer = resolved;
        self.presented_password = password.is_some();
        self.send(Command::Pwd(response)).await?;
        self.phase = Phase::AwaitOk;
        Ok(())
    }

    fn on_ok(&mut self, text: &str) {
        self.secure = self.presented_password && !text.contains("non-secure");
        self.enter_transfer();
    }

    fn enter_transfer(&mut self) {
        self.phase = Phase::Transferring;

        if let Some(peer) = &self.peer {
            let address = peer.address.clone();
            self.pending = self.outbound.claim(&address).into();
            self.claimed_for = Some(address);
        }

        let address = self
            .peer
            .as_ref()
            .map(|p| p.address.clone())
            .or_else(|| self.remote_addresses.first().cloned());
        if let Some(address) = address {
            tracing::info!(
                "Session with {} established ({}, {} files queued)",
                address,
                if self.secure { "secure" } else { "non-secure" },
                self.pending.len()
            );
            self.emit(SessionEvent::PeerIdentified {
                address,
                system: self.remote_system.clone(),
                secure: self.secure,
            });
        }
    }

    // ============ File exchange ============

    async fn transfer(&mut self) -> Result<(), SessionError> {
        let chunk_size = self.config.effective_chunk_size();
        loop {
            if self.batches_done() {
                return Ok(());
            }

            while let Some(frame) = self.codec.poll_frame().await? {
                self.idle = Duration::ZERO;
                self.on_transfer_frame(frame).await?;
                if self.batches_done() {
                    return Ok(());
                }
            }

            if self.step_outbound(chunk_size).await? {
                continue;
            }

            let frame = self.wait_frame().await?;
            self.on_transfer_frame(frame).await?;
        }
    }

    /// Both sides have sent EOB and nothing is left in flight
    fn batches_done(&self) -> bool {
        self.eob_sent && self.eob_received
    }

    /// Send at most one outbound frame. Returns false if there was nothing
    /// to send.
    async fn step_outbound(&mut self, chunk_size: usize) -> Result<bool, SessionError> {
        if let Some(out) = self.current_out.as_mut() {
            if !out.streaming {
                return Ok(false);
            }
            let chunk = out.file.next_chunk(chunk_size)?;
            let (offset, size) = (out.file.offset(), out.file.size());
            let name = out.file.name().to_string();
            if offset == size {
                out.streaming = false;
                tracing::debug!("All of {} sent, awaiting M_GOT", name);
            }
            if chunk.is_empty() {
                return Ok(false);
            }

            self.codec.write_frame(&Frame::data(chunk)).await?;
            self.emit(SessionEvent::Progress {
                name,
                direction: Direction::Sending,
                offset,
                size,
            });
            return Ok(true);
        }

        if let Some(file) = self.pending.pop_front() {
            self.offer(file).await?;
            return Ok(true);
        }

        if !self.eob_sent {
            self.send(Command::Eob).await?;
            self.eob_sent = true;
            return Ok(true);
        }
        Ok(false)
    }

    async fn offer(&mut self, file: TransferFile) -> Result<(), SessionError> {
        let offer = FileOffer::new(file.name(), file.size(), file.mtime(), file.offset());
        tracing::info!(
            "Sending {} ({} bytes) from offset {}",
            offer.name,
            offer.size,
            offer.offset
        );
        self.current_out = Some(Outgoing {
            file,
            streaming: true,
        });
        self.send(Command::File(offer.clone())).await?;
        self.emit(SessionEvent::FileStarted {
            name: offer.name,
            direction: Direction::Sending,
            size: offer.size,
            offset: offer.offset,
        });
        Ok(())
    }

    async fn on_transfer_frame(&mut self, frame: Frame) -> Result<(), SessionError> {
        if !frame.is_command() {
            return self.on_data(&frame.into_payload()).await;
        }
        let Some(command) = Self::parse_command(&frame)? else {
            return Ok(());
        };

        match command {
            Command::Nul(text) => self.on_nul(&text),
            Command::Adr(_) => tracing::warn!("Ignoring M_ADR after authentication"),
            Command::Pwd(_) if self.ignore_stray_pwd => {
                self.ignore_stray_pwd = false;
                tracing::debug!("Ignoring M_PWD on non-secure session");
            }
            Command::Pwd(_) => {
                return Err(SessionError::violation("M_PWD after authentication"));
            }
            Command::Ok(_) => tracing::debug!("Ignoring M_OK after authentication"),
            Command::File(offer) => self.on_file(offer).await?,
            Command::Got(file) => self.on_got(&file),
            Command::Get(offer) => self.on_get(offer).await?,
            Command::Skip(file) => self.on_skip(&file),
            Command::Eob => self.on_eob()?,
            Command::Err(text) => return Err(self.peer_error(text)),
            Command::Bsy(text) => {
                self.peer_aborted = true;
                return Err(SessionError::PeerBusy(text));
            }
        }
        Ok(())
    }

    fn is_current_out(&self, name: &str, size: u64) -> bool {
        self.current_out
            .as_ref()
            .is_some_and(|out| out.file.name() == name && out.file.size() == size)
    }

    fn on_got(&mut self, got: &FileRef) {
        if !self.is_current_out(&got.name, got.size) {
            tracing::warn!("Ignoring M_GOT for {}, which is not in flight", got.name);
            return;
        }
        let Some(mut out) = self.current_out.take() else {
            return;
        };

        if out.file.offset() < out.file.size() {
            tracing::info!("Peer already has {}", got.name);
        }
        if let Err(e) = out.file.mark_delivered() {
            tracing::warn!("Delivered {} but could not release it: {}", got.name, e);
        }
        tracing::info!("Delivered {} ({} bytes)", got.name, got.size);

        self.outbound_reports.push(OutboundReport {
            name: got.name.clone(),
            size: got.size,
            delivered: true,
        });
        self.emit(SessionEvent::FileFinished {
            name: got.name.clone(),
            direction: Direction::Sending,
            success: true,
        });
    }

    fn on_skip(&mut self, skip: &FileRef) {
        if !self.is_current_out(&skip.name, skip.size) {
            tracing::warn!("Ignoring M_SKIP for {}, which is not in flight", skip.name);
            return;
        }
        let Some(out) = self.current_out.take() else {
            return;
        };

        tracing::info!("Peer skipped {}", skip.name);
        self.outbound_reports.push(OutboundReport {
            name: skip.name.clone(),
            size: skip.size,
            delivered: false,
        });
        self.skipped.push(out.file);
        self.emit(SessionEvent::FileFinished {
            name: skip.name.clone(),
            direction: Direction::Sending,
            success: false,
        });
    }

    async fn on_get(&mut self, get: FileOffer) -> Result<(), SessionError> {
        if !self.is_current_out(&get.name, get.size) {
            tracing::warn!("Ignoring M_GET for {}, which is not in flight", get.name);
            return Ok(());
        }
        if get.offset > get.size {
            return Err(SessionError::violation(format!(
                "M_GET for {} at {} beyond its {} bytes",
                get.name, get.offset, get.size
            )));
        }

        let offer = {
            let Some(out) = self.current_out.as_mut() else {
                return Ok(());
            };
            out.file.seek(get.offset)?;
            out.streaming = true;
            FileOffer::new(out.file.name(), out.file.size(), out.file.mtime(), get.offset)
        };

        tracing::info!("Peer asked for {} from offset {}", offer.name, offer.offset);
        self.send(Command::File(offer.clone())).await?;
        self.emit(SessionEvent::FileStarted {
            name: offer.name,
            direction: Direction::Sending,
            size: offer.size,
            offset: offer.offset,
        });
        Ok(())
    }

    fn network_name(&self) -> String {
        self.peer
            .as_ref()
            .and_then(|p| p.address.network_name())
            .or_else(|| {
                self.remote_addresses
                    .iter()
                    .find_map(FtnAddress::network_name)
            })
            .unwrap_or_default()
            .to_string()
    }

    async fn on_file(&mut self, offer: FileOffer) -> Result<(), SessionError> {
        if offer.offset > offer.size {
            return Err(SessionError::violation(format!(
                "M_FILE for {} at {} beyond its {} bytes",
                offer.name, offer.offset, offer.size
            )));
        }

        let reoffer = self.incoming.as_ref().is_some_and(|incoming| {
            matches!(incoming.mode, InboundMode::AwaitingReoffer(_))
                && incoming.offer.refers_to(&offer.file_ref())
        });
        if reoffer {
            return self.on_reoffer(offer).await;
        }

        self.abandon_incoming("peer offered another file");
        self.start_incoming(offer).await
    }

    async fn decline(&mut self, offer: FileOffer, reason: &str) -> Result<(), SessionError> {
        tracing::warn!("Skipping {}: {}", offer.name, reason);
        self.send(Command::Skip(offer.file_ref())).await?;
        self.incoming = Some(Incoming {
            offer,
            file: None,
            mode: InboundMode::Discarding,
        });
        Ok(())
    }

    async fn start_incoming(&mut self, offer: FileOffer) -> Result<(), SessionError> {
        let network = self.network_name();
        tracing::info!(
            "Peer offers {} ({} bytes) from offset {}",
            offer.name,
            offer.size,
            offer.offset
        );

        let sink = match (self.factory)(&network, &offer.name) {
            Ok(sink) => sink,
            Err(e) => return self.decline(offer, &e.to_string()).await,
        };
        let info = FileInfo::new(offer.name.clone(), offer.size, offer.mtime);
        let mut file = match TransferFile::inbound(info, sink) {
            Ok(file) => file,
            Err(e) => return self.decline(offer, &e.to_string()).await,
        };
        if !self.config.resume && file.offset() > 0 {
            file.seek(0)?;
        }

        let have = file.offset();
        if offer.offset == have {
            self.incoming = Some(Incoming {
                offer,
                file: Some(file),
                mode: InboundMode::Receiving,
            });
            self.receiving_started(have);
            return self.finalize_if_complete().await;
        }

        tracing::info!("Asking for {} from offset {}", offer.name, have);
        let get = FileOffer::new(offer.name.clone(), offer.size, offer.mtime, have);
        self.incoming = Some(Incoming {
            offer,
            file: Some(file),
            mode: InboundMode::AwaitingReoffer(have),
        });
        self.send(Command::Get(get)).await
    }

    async fn on_reoffer(&mut self, offer: FileOffer) -> Result<(), SessionError> {
        let start = {
            let Some(incoming) = self.incoming.as_mut() else {
                return Ok(());
            };
            let InboundMode::AwaitingReoffer(requested) = incoming.mode else {
                return Ok(());
            };
            let Some(file) = incoming.file.as_mut() else {
                return Ok(());
            };
            if offer.offset > requested {
                return Err(SessionError::violation(format!(
                    "{} re-offered at {}, past the {} bytes we asked for",
                    offer.name, offer.offset, requested
                )));
            }
            if offer.offset < file.offset() {
                file.seek(offer.offset)?;
            }
            incoming.offer = offer;
            incoming.mode = InboundMode::Receiving;
            file.offset()
        };

        self.receiving_started(start);
        self.finalize_if_complete().await
    }

    fn receiving_started(&self, offset: u64) {
        if let Some(incoming) = &self.incoming {
            self.emit(SessionEvent::FileStarted {
                name: incoming.offer.name.clone(),
                direction: Direction::Receiving,
                size: incoming.offer.size,
                offset,
            });
        }
    }

    async fn on_data(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        let progress = {
            let Some(incoming) = self.incoming.as_mut() else {
                return Err(SessionError::violation("data frame without an open file"));
            };
            if incoming.mode != InboundMode::Receiving {
                tracing::trace!(
                    "Discarding {} bytes for {}",
                    payload.len(),
                    incoming.offer.name
                );
                return Ok(());
            }
            let Some(file) = incoming.file.as_mut() else {
                return Err(SessionError::violation("data frame without an open file"));
            };
            match file.accept_chunk(payload) {
                Ok(()) => {}
                Err(FileError::Overrun { len, offset, size }) => {
                    return Err(SessionError::violation(format!(
                        "{} bytes at {} overrun {} ({} bytes)",
                        len,
                        offset,
                        file.name(),
                        size
                    )));
                }
                Err(e) => return Err(e.into()),
            }
            SessionEvent::Progress {
                name: file.name().to_string(),
                direction: Direction::Receiving,
                offset: file.offset(),
                size: file.size(),
            }
        };

        self.emit(progress);
        self.finalize_if_complete().await
    }

    async fn finalize_if_complete(&mut self) -> Result<(), SessionError> {
        let ready = self.incoming.as_ref().is_some_and(|incoming| {
            incoming.mode == InboundMode::Receiving
                && incoming
                    .file
                    .as_ref()
                    .is_some_and(|f| f.offset() == f.size())
        });
        if !ready {
            return Ok(());
        }
        let Some(mut file) = self.incoming.take().and_then(|incoming| incoming.file) else {
            return Ok(());
        };

        let path = file.finalize()?;
        match &path {
            Some(path) => tracing::info!(
                "Received {} ({} bytes) into {}",
                file.name(),
                file.size(),
                path.display()
            ),
            None => tracing::info!("Received {} ({} bytes)", file.name(), file.size()),
        }

        self.inbound_reports.push(InboundReport {
            name: file.name().to_string(),
            size: file.size(),
            finalized: true,
            path,
        });
        let got = FileRef::new(file.name(), file.size(), file.mtime());
        let finished = SessionEvent::FileFinished {
            name: got.name.clone(),
            direction: Direction::Receiving,
            success: true,
        };
        self.send(Command::Got(got)).await?;
        self.emit(finished);
        Ok(())
    }

    fn abandon_incoming(&mut self, reason: &str) {
        let Some(mut file) = self.incoming.take().and_then(|incoming| incoming.file) else {
            return;
        };
        tracing::warn!(
            "Abandoning {} at {} of {} bytes: {}",
            file.name(),
            file.offset(),
            file.size(),
            reason
        );
        file.abandon();
        self.inbound_reports.push(InboundReport {
            name: file.name().to_string(),
            size: file.size(),
            finalized: false,
            path: None,
        });
        self.emit(SessionEvent::FileFinished {
            name: file.name().to_string(),
            direction: Direction::Receiving,
            success: false,
        });
    }

    fn on_eob(&mut self) -> Result<(), SessionError> {
        if let Some(incoming) = &self.incoming {
            if incoming.mode != InboundMode::Discarding {
                return Err(SessionError::violation(format!(
                    "M_EOB while {} is incomplete",
                    incoming.offer.name
                )));
            }
            self.incoming = None;
        }
        tracing::debug!("Peer ended its batch");
        self.eob_received = true;
        Ok(())
    }

    // ============ Teardown ============

    fn finish(mut self, result: Result<(), SessionError>, elapsed: Duration) -> SessionReport {
        self.abandon_incoming("session ended");

        let mut unsent = Vec::new();
        if let Some(out) = self.current_out.take() {
            unsent.push(out.file);
        }
        unsent.extend(self.pending.drain(..));
        for file in &unsent {
            self.outbound_reports.push(OutboundReport {
                name: file.name().to_string(),
                size: file.size(),
                delivered: false,
            });
        }

        if let Some(address) = self.claimed_for.take() {
            let mut undelivered = std::mem::take(&mut self.skipped);
            undelivered.extend(unsent);
            self.outbound.release(&address, undelivered);
        }

        let codec = self.codec.stats();
        SessionReport {
            role: self.role,
            remote_addresses: self.remote_addresses,
            remote_address: self.peer.map(|p| p.address),
            remote_system: self.remote_system,
            secure: self.secure,
            result,
            outbound: self.outbound_reports,
            inbound: self.inbound_reports,
            stats: SessionStats {
                frames_sent: codec.frames_sent,
                frames_received: codec.frames_received,
                bytes_sent: codec.bytes_sent,
                bytes_received: codec.bytes_received,
                elapsed,
            },
        }
    }
}

/// Turn a caller away with BSY and close the connection.
pub async fn refuse_busy<C: Connection>(conn: C, reason: &str) {
    let mut codec = FrameCodec::new(conn);
    codec.set_write_timeout(BUSY_WRITE_TIMEOUT);
    if let Err(e) = codec.send(&Command::Bsy(reason.to_string())).await {
        tracing::debug!("Could not send M_BSY: {}", e);
    }
    codec.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::{NodeBook, NodeEntry};
    use crate::outbound::OutboundQueue;
    use binkp_files::{ByteSink, MemoryHandle, MemorySink};
    use binkp_transport::memory_pair;
    use std::sync::Mutex;

    type Received = Arc<Mutex<Vec<(String, MemoryHandle)>>>;

    fn memory_factory() -> (SinkFactory, Received) {
        let received: Received = Arc::default();
        let sinks = Arc::clone(&received);
        let factory: SinkFactory = Arc::new(
            move |_network: &str, name: &str| -> binkp_files::Result<Box<dyn ByteSink>> {
                let sink = MemorySink::new();
                sinks.lock().unwrap().push((name.to_string(), sink.handle()));
                Ok(Box::new(sink))
            },
        );
        (factory, received)
    }

    fn addr(s: &str) -> FtnAddress {
        s.parse().unwrap()
    }

    struct Node {
        local: LocalNode,
        book: NodeBook,
        queue: Arc<OutboundQueue>,
        factory: SinkFactory,
        received: Received,
        config: SessionConfig,
    }

    impl Node {
        fn new(address: &str) -> Self {
            let (factory, received) = memory_factory();
            Self {
                local: LocalNode::new(addr(address)).system_name(address),
                book: NodeBook::new(),
                queue: Arc::new(OutboundQueue::new()),
                factory,
                received,
                config: SessionConfig::default(),
            }
        }

        fn engine<C: Connection>(&self, conn: C, role: Role) -> SessionEngine<C> {
            SessionEngine::new(
                conn,
                role,
                self.local.clone(),
                Arc::new(self.book.clone()),
                Arc::clone(&self.queue) as Arc<dyn OutboundSource>,
                Arc::clone(&self.factory),
            )
            .with_config(self.config.clone())
        }

        fn received(&self, name: &str) -> Option<MemoryHandle> {
            self.received
                .lock()
                .unwrap()
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, h)| h.clone())
        }
    }

    async fn run_pair(
        caller: &Node,
        callee: &Node,
        expect: Option<&str>,
    ) -> (SessionReport, SessionReport) {
        let (a, b) = memory_pair(1 << 20);
        let mut originating = caller.engine(a, Role::Originating);
        if let Some(expected) = expect {
            originating = originating.expect_peer(addr(expected));
        }
        let answering = callee.engine(b, Role::Answering);
        tokio::join!(originating.run(), answering.run())
    }

    #[tokio::test]
    async fn test_secure_exchange_both_directions() {
        let mut caller = Node::new("21:1/100@fsxnet");
        let mut callee = Node::new("21:1/200@fsxnet");
        caller
            .book
            .insert(NodeEntry::new(addr("21:1/200@fsxnet")).password("sekrit"));
        callee
            .book
            .insert(NodeEntry::new(addr("21:1/100@fsxnet")).password("sekrit"));

        let outbound: Vec<u8> = (0..100u8).collect();
        caller.queue.push(
            &addr("21:1/200@fsxnet"),
            TransferFile::from_bytes("A.PKT", 1_700_000_000, outbound.clone()),
        );
        callee.queue.push(
            &addr("21:1/100@fsxnet"),
            TransferFile::from_bytes("B.PKT", 1_700_000_000, vec![7; 20_000]),
        );

        let (ours, theirs) = run_pair(&caller, &callee, Some("21:1/200@fsxnet")).await;

        assert!(ours.is_success(), "{:?}", ours.error());
        assert!(theirs.is_success(), "{:?}", theirs.error());
        assert!(ours.secure && theirs.secure);
        assert_eq!(ours.delivered().collect::<Vec<_>>(), ["A.PKT"]);
        assert_eq!(theirs.delivered().collect::<Vec<_>>(), ["B.PKT"]);
        assert_eq!(ours.remote_system.as_deref(), Some("21:1/200@fsxnet"));

        let a_pkt = callee.received("A.PKT").unwrap();
        assert!(a_pkt.is_committed());
        assert_eq!(a_pkt.contents(), outbound);
        assert_eq!(caller.received("B.PKT").unwrap().contents(), vec![7; 20_000]);

        assert!(caller.queue.is_empty(&addr("21:1/200@fsxnet")));
        assert_eq!(ours.stats.bytes_sent, theirs.stats.bytes_received);
    }

    #[tokio::test]
    async fn test_plain_password_without_cram() {
        let mut caller = Node::new("2:5020/1");
        let mut callee = Node::new("2:5020/2");
        caller.config.cram_md5 = false;
        callee.config.cram_md5 = false;
        caller
            .book
            .insert(NodeEntry::new(addr("2:5020/2")).password("plain"));
        callee
            .book
            .insert(NodeEntry::new(addr("2:5020/1")).password("plain"));

        let (ours, theirs) = run_pair(&caller, &callee, None).await;
        assert!(ours.is_success() && theirs.is_success());
        assert!(ours.secure && theirs.secure);
        assert!(ours.outbound.is_empty() && ours.inbound.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let mut caller = Node::new("21:1/100@fsxnet");
        let mut callee = Node::new("21:1/200@fsxnet");
        caller
            .book
            .insert(NodeEntry::new(addr("21:1/200@fsxnet")).password("guess"));
        callee
            .book
            .insert(NodeEntry::new(addr("21:1/100@fsxnet")).password("sekrit"));
        caller.queue.push(
            &addr("21:1/200@fsxnet"),
            TransferFile::from_bytes("A.PKT", 0, vec![1; 10]),
        );

        let (ours, theirs) = run_pair(&caller, &callee, Some("21:1/200@fsxnet")).await;

        assert!(matches!(
            theirs.error(),
            Some(SessionError::AuthenticationFailed(_))
        ));
        assert!(matches!(
            ours.error(),
            Some(SessionError::AuthenticationFailed(_))
        ));
        assert!(!ours.secure);
        assert!(callee.received("A.PKT").is_none());
        // Never claimed, so still queued
        assert_eq!(caller.queue.len(&addr("21:1/200@fsxnet")), 1);
    }

    #[tokio::test]
    async fn test_unlisted_caller_gets_non_secure_session() {
        let caller = Node::new("21:1/100@fsxnet");
        let callee = Node::new("21:1/200@fsxnet");
        caller.queue.push(
            &addr("21:1/200@fsxnet"),
            TransferFile::from_bytes("A.PKT", 0, vec![3; 100]),
        );

        let (ours, theirs) = run_pair(&caller, &callee, Some("21:1/200@fsxnet")).await;

        assert!(ours.is_success(), "{:?}", ours.error());
        assert!(theirs.is_success(), "{:?}", theirs.error());
        assert!(!ours.secure && !theirs.secure);
        assert_eq!(theirs.received().collect::<Vec<_>>(), ["A.PKT"]);
        assert_eq!(theirs.remote_address, None);
    }

    #[tokio::test]
    async fn test_unlisted_caller_refused() {
        let caller = Node::new("21:1/100@fsxnet");
        let mut callee = Node::new("21:1/200@fsxnet");
        callee.config.allow_unlisted = false;

        let (ours, theirs) = run_pair(&caller, &callee, None).await;

        assert!(matches!(
            theirs.error(),
            Some(SessionError::AuthenticationFailed(_))
        ));
        assert!(matches!(ours.error(), Some(SessionError::PeerError(_))));
    }

    #[tokio::test]
    async fn test_unexpected_answering_address() {
        let caller = Node::new("21:1/100@fsxnet");
        let callee = Node::new("21:1/200@fsxnet");

        let (ours, theirs) = run_pair(&caller, &callee, Some("21:1/999@fsxnet")).await;

        assert!(matches!(
            ours.error(),
            Some(SessionError::AuthenticationFailed(_))
        ));
        assert!(matches!(theirs.error(), Some(SessionError::PeerError(_))));
    }

    #[tokio::test]
    async fn test_refuse_busy() {
        let caller = Node::new("21:1/100@fsxnet");
        let (a, b) = memory_pair(4096);
        let engine = caller.engine(a, Role::Originating);

        let busy = async move {
            let mut codec = FrameCodec::new(b);
            loop {
                let frame = codec.read_frame(Duration::from_secs(5)).await.unwrap();
                if matches!(Command::from_frame(&frame), Ok(Command::Adr(_))) {
                    break;
                }
            }
            refuse_busy(codec.into_inner(), "too many sessions").await;
        };

        let (report, ()) = tokio::join!(engine.run(), busy);

        match report.error() {
            Some(SessionError::PeerBusy(reason)) => assert_eq!(reason, "too many sessions"),
            other => panic!("unexpected result {other:?}"),
        }
        assert!(report.error().unwrap().is_retriable());
    }

    #[tokio::test]
    async fn test_events_follow_transfer() {
        let mut caller = Node::new("21:1/100@fsxnet");
        let callee = Node::new("21:1/200@fsxnet");
        caller
            .book
            .insert(NodeEntry::new(addr("21:1/200@fsxnet")));
        caller.queue.push(
            &addr("21:1/200@fsxnet"),
            TransferFile::from_bytes("A.PKT", 0, vec![9; 50]),
        );

        let (tx, mut rx) = channel();
        let (a, b) = memory_pair(1 << 20);
        let originating = caller.engine(a, Role::Originating).with_events(tx);
        let answering = callee.engine(b, Role::Answering);
        let (ours, _) = tokio::join!(originating.run(), answering.run());
        assert!(ours.is_success());

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(
            events.first(),
            Some(SessionEvent::PeerIdentified { secure: false, .. })
        ));
        assert!(events.contains(&SessionEvent::FileFinished {
            name: "A.PKT".into(),
            direction: Direction::Sending,
            success: true,
        }));
    }
}
