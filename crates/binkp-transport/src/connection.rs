//! Connection trait abstraction for binkp byte streams.
//!
//! A `Connection` is an ordered, reliable-but-not-guaranteed-available byte
//! stream. Every read carries its own timeout so that the session engine can
//! poll briefly between data frames and wait longer while idle. Writes carry
//! one too: a peer that stops reading must not stall a session forever.

use async_trait::async_trait;
use std::io;
use std::time::Duration;

/// Connection errors
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The read or write did not complete within the caller's deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Peer closed the stream, or it was closed locally
    #[error("connection closed")]
    Closed,

    /// Network failure from the underlying stream
    #[error("connection failed: {0}")]
    Io(#[from] io::Error),
}

impl ConnectionError {
    /// Returns true if this is a timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Result type for connection operations
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Bidirectional byte stream used by a single binkp session.
///
/// Implementations must never run two operations concurrently; the session
/// engine owns the connection exclusively and alternates reads and writes.
///
/// # Examples
///
/// ```no_run
/// use binkp_transport::{Connection, connect};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut conn = connect("bbs.example.com:24554", Duration::from_secs(30)).await?;
/// conn.write(&[0x80, 0x01, 0x05], Duration::from_secs(10)).await?;
/// let reply = conn.read(2, Duration::from_secs(10)).await?;
/// println!("peer sent {} bytes", reply.len());
/// conn.close().await;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Connection: Send {
    /// Read at most `max_bytes`, waiting no longer than `timeout`.
    ///
    /// Returns at least one byte on success.
    ///
    /// # Errors
    /// `ConnectionError::Timeout` if nothing arrived in time,
    /// `ConnectionError::Closed` once the stream has ended.
    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> ConnectionResult<Vec<u8>>;

    /// Write all of `bytes`, giving up after `timeout`.
    ///
    /// After a timed-out write the peer may have seen part of `bytes`, so
    /// the stream should only be closed.
    ///
    /// # Errors
    /// `ConnectionError::Timeout` if the peer did not take the bytes in time,
    /// `ConnectionError::Closed` or `ConnectionError::Io` if the stream is gone.
    async fn write(&mut self, bytes: &[u8], timeout: Duration) -> ConnectionResult<()>;

    /// Close the stream. Idempotent; failures are swallowed.
    async fn close(&mut self);

    /// Check if the connection has been closed.
    fn is_closed(&self) -> bool;

    /// Get connection statistics.
    fn stats(&self) -> ConnectionStats {
        ConnectionStats::default()
    }
}

/// Connection statistics
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    /// Total bytes written
    pub bytes_sent: u64,
    /// Total bytes read
    pub bytes_received: u64,
    /// Successful write calls
    pub writes: u64,
    /// Successful read calls
    pub reads: u64,
    /// Reads that ended in a timeout
    pub read_timeouts: u64,
    /// Writes that ended in a timeout
    pub write_timeouts: u64,
}

impl ConnectionStats {
    /// Create new empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful write
    pub fn record_write(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.writes += 1;
    }

    /// Record a successful read
    pub fn record_read(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.reads += 1;
    }

    /// Record a read timeout
    pub fn record_timeout(&mut self) {
        self.read_timeouts += 1;
    }

    /// Record a write timeout
    pub fn record_write_timeout(&mut self) {
        self.write_timeouts += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_stats() {
        let mut stats = ConnectionStats::new();
        assert_eq!(stats.bytes_sent, 0);

        stats.record_write(100);
        stats.record_write(20);
        assert_eq!(stats.bytes_sent, 120);
        assert_eq!(stats.writes, 2);

        stats.record_read(7);
        assert_eq!(stats.bytes_received, 7);
        assert_eq!(stats.reads, 1);

        stats.record_timeout();
        assert_eq!(stats.read_timeouts, 1);

        stats.record_write_timeout();
        assert_eq!(stats.write_timeouts, 1);
        assert_eq!(stats.read_timeouts, 1);
    }

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::Closed;
        assert_eq!(err.to_string(), "connection closed");

        let err = ConnectionError::Timeout(Duration::from_secs(2));
        assert!(err.to_string().contains("timed out"));
        assert!(err.is_timeout());
        assert!(!ConnectionError::Closed.is_timeout());
    }

    #[test]
    fn test_connection_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let err = ConnectionError::from(io_err);
        assert!(matches!(err, ConnectionError::Io(_)));
    }
}
