//! # binkp Core
//!
//! Protocol implementation for binkp, the TCP mail-exchange protocol used
//! between FidoNet Technology Network (FTN) nodes.
//!
//! This crate provides:
//! - Frame encoding and incremental decoding
//! - Typed commands and their argument grammar
//! - FTN address parsing and formatting
//! - Plain and CRAM-MD5 password authentication
//! - The session state machine that drives one exchange
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Session                                  │
//! │   (handshake, authentication, bidirectional file exchange)       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Commands                                 │
//! │   (ADR, PWD, FILE, GOT, GET, SKIP, EOB, ERR, BSY, ...)           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Frames                                   │
//! │   (2-byte header, command bit, up to 32767 payload bytes)        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod auth;
pub mod book;
pub mod codec;
pub mod command;
pub mod error;
pub mod frame;
pub mod outbound;
pub mod session;

pub use address::{FtnAddress, address_for_network, format_address_list, parse_address_list};
pub use book::{AddressBook, NodeBook, NodeEntry, ResolvedPeer};
pub use codec::{CodecStats, FrameCodec};
pub use command::{Command, CommandCode, FileOffer, FileRef};
pub use error::{AddressError, CodecError, FrameError, SessionError};
pub use frame::{Frame, FrameDecoder, FrameKind, HEADER_SIZE, MAX_PAYLOAD};
pub use outbound::{OutboundQueue, OutboundSource, SpoolOutbound};
pub use session::{
    InboundReport, LocalNode, OutboundReport, Phase, Role, SessionConfig, SessionEngine,
    SessionEvent, SessionReport, SessionStats, refuse_busy,
};

/// Implementation version, announced in the `VER` banner line
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol revision we speak
pub const PROTOCOL_VERSION: &str = "binkp/1.0";
