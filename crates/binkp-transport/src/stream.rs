//! Tokio stream adapter implementing [`Connection`].
//!
//! Any `AsyncRead + AsyncWrite` byte stream can carry a binkp session: TCP
//! sockets for real peers, and `tokio::io::DuplexStream` for loopback
//! sessions in tests and tools.

use crate::connection::{Connection, ConnectionError, ConnectionResult, ConnectionStats};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;

/// Connection over a tokio byte stream.
pub struct StreamConnection<S> {
    stream: S,
    peer: String,
    closed: bool,
    stats: ConnectionStats,
}

/// Connection over a TCP socket
pub type TcpConnection = StreamConnection<TcpStream>;

impl<S> StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a stream. `peer` is a label used only in log output.
    pub fn new(stream: S, peer: impl Into<String>) -> Self {
        Self {
            stream,
            peer: peer.into(),
            closed: false,
            stats: ConnectionStats::new(),
        }
    }

    /// Label of the remote end
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Unwrap the underlying stream
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl TcpConnection {
    /// Wrap an accepted TCP socket, disabling Nagle so small command frames
    /// are not delayed behind data.
    #[must_use]
    pub fn from_tcp(stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY: {}", e);
        }
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self::new(stream, peer)
    }
}

/// Dial a binkp peer over TCP.
///
/// # Errors
/// `ConnectionError::Timeout` if the connect does not complete within
/// `timeout`, `ConnectionError::Io` if it is refused or unreachable.
pub async fn connect(addr: &str, timeout: Duration) -> ConnectionResult<TcpConnection> {
    tracing::debug!("Connecting to {}", addr);
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(result) => result?,
        Err(_) => return Err(ConnectionError::Timeout(timeout)),
    };
    Ok(TcpConnection::from_tcp(stream))
}

/// Create two connected in-memory connections.
///
/// `capacity` bounds the bytes buffered in each direction before a writer
/// waits for the reader.
#[must_use]
pub fn memory_pair(
    capacity: usize,
) -> (StreamConnection<DuplexStream>, StreamConnection<DuplexStream>) {
    let (a, b) = tokio::io::duplex(capacity);
    (
        StreamConnection::new(a, "memory:a"),
        StreamConnection::new(b, "memory:b"),
    )
}

#[async_trait]
impl<S> Connection for StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> ConnectionResult<Vec<u8>> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }

        let mut buf = vec![0u8; max_bytes.max(1)];
        match tokio::time::timeout(timeout, self.stream.read(&mut buf)).await {
            Ok(Ok(0)) => {
                tracing::debug!("Peer {} closed the stream", self.peer);
                self.closed = true;
                Err(ConnectionError::Closed)
            }
            Ok(Ok(n)) => {
                buf.truncate(n);
                self.stats.record_read(n);
                Ok(buf)
            }
            Ok(Err(e)) => {
                self.closed = true;
                Err(ConnectionError::Io(e))
            }
            Err(_) => {
                self.stats.record_timeout();
                Err(ConnectionError::Timeout(timeout))
            }
        }
    }

    async fn write(&mut self, bytes: &[u8], timeout: Duration) -> ConnectionResult<()> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }

        let result = tokio::time::timeout(timeout, async {
            self.stream.write_all(bytes).await?;
            self.stream.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => {
                self.stats.record_write(bytes.len());
                Ok(())
            }
            Ok(Err(e)) => {
                self.closed = true;
                Err(ConnectionError::Io(e))
            }
            Err(_) => {
                tracing::debug!("Peer {} stopped reading", self.peer);
                self.stats.record_write_timeout();
                Err(ConnectionError::Timeout(timeout))
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!("Shutdown of {} failed: {}", self.peer, e);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn stats(&self) -> ConnectionStats {
        self.stats.clone()
    }
}
