//! # binkp Transport
//!
//! Byte-stream transport layer for the binkp session engine.
//!
//! This crate provides:
//! - The [`Connection`] trait, the only I/O seam the session engine uses
//! - [`StreamConnection`], an adapter over any tokio byte stream
//! - TCP dialing helpers and an in-memory duplex pair for loopback sessions
//!
//! Framing lives one layer up in `binkp-core`; nothing here knows about
//! binkp frames.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod stream;

pub use connection::{Connection, ConnectionError, ConnectionResult, ConnectionStats};
pub use stream::{StreamConnection, TcpConnection, connect, memory_pair};

/// Default TCP port for binkp
pub const DEFAULT_PORT: u16 = 24554;
