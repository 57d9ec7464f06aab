//! Frame I/O over a [`Connection`].

use crate::command::Command;
use crate::error::CodecError;
use crate::frame::{Frame, FrameDecoder, MAX_PAYLOAD};
use binkp_transport::{Connection, ConnectionError};
use bytes::BytesMut;
use std::time::Duration;

/// Deadline for each frame write unless configured otherwise
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(60);

/// Frame-level traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecStats {
    /// Frames written
    pub frames_sent: u64,
    /// Frames read
    pub frames_received: u64,
    /// Bytes written, headers included
    pub bytes_sent: u64,
    /// Bytes read, headers included
    pub bytes_received: u64,
}

/// Reads and writes binkp frames on one connection.
///
/// Partially received frames stay buffered across read timeouts.
pub struct FrameCodec<C> {
    conn: C,
    decoder: FrameDecoder,
    write_buf: BytesMut,
    write_timeout: Duration,
    stats: CodecStats,
}

impl<C: Connection> FrameCodec<C> {
    /// Wrap a connection
    pub fn new(conn: C) -> Self {
        Self::with_max_payload(conn, MAX_PAYLOAD)
    }

    /// Wrap a connection, rejecting incoming payloads above `max_payload`
    pub fn with_max_payload(conn: C, max_payload: usize) -> Self {
        Self {
            conn,
            decoder: FrameDecoder::with_max_payload(max_payload),
            write_buf: BytesMut::new(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            stats: CodecStats::default(),
        }
    }

    /// Change the incoming payload limit
    pub fn set_max_payload(&mut self, max_payload: usize) {
        self.decoder.set_max_payload(max_payload);
    }

    /// Change how long a single frame write may take
    pub fn set_write_timeout(&mut self, timeout: Duration) {
        self.write_timeout = timeout;
    }

    /// Read the next frame, waiting at most `timeout` for each piece of it.
    ///
    /// # Errors
    ///
    /// `CodecError::Frame` for a malformed stream, `CodecError::Connection`
    /// for timeouts and transport failures.
    pub async fn read_frame(&mut self, timeout: Duration) -> Result<Frame, CodecError> {
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                self.stats.frames_received += 1;
                self.stats.bytes_received += frame.encoded_len() as u64;
                tracing::trace!(
                    "<- {:?} frame, {} bytes",
                    frame.kind(),
                    frame.payload().len()
                );
                return Ok(frame);
            }
            let bytes = self.conn.read(self.decoder.wanted(), timeout).await?;
            self.decoder.extend(&bytes);
        }
    }

    /// Return a frame only if one can be completed without waiting.
    ///
    /// # Errors
    ///
    /// Same as [`FrameCodec::read_frame`], except that a timeout yields
    /// `Ok(None)`.
    pub async fn poll_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        match self.read_frame(Duration::ZERO).await {
            Ok(frame) => Ok(Some(frame)),
            Err(CodecError::Connection(ConnectionError::Timeout(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write one frame, giving up once the write timeout passes.
    ///
    /// # Errors
    ///
    /// `CodecError::Frame` if the frame cannot be encoded,
    /// `CodecError::Connection` if the write fails or times out.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), CodecError> {
        self.write_buf.clear();
        frame.encode_into(&mut self.write_buf)?;
        self.conn.write(&self.write_buf, self.write_timeout).await?;
        self.stats.frames_sent += 1;
        self.stats.bytes_sent += self.write_buf.len() as u64;
        tracing::trace!(
            "-> {:?} frame, {} bytes",
            frame.kind(),
            frame.payload().len()
        );
        Ok(())
    }

    /// Write a command frame.
    ///
    /// # Errors
    ///
    /// See [`FrameCodec::write_frame`].
    pub async fn send(&mut self, command: &Command) -> Result<(), CodecError> {
        tracing::debug!("-> {}", command);
        self.write_frame(&command.to_frame()).await
    }

    /// Close the underlying connection
    pub async fn close(&mut self) {
        self.conn.close().await;
    }

    /// Traffic counters
    #[must_use]
    pub fn stats(&self) -> CodecStats {
        self.stats
    }

    /// Access the connection
    #[must_use]
    pub fn connection(&self) -> &C {
        &self.conn
    }

    /// Unwrap the connection, dropping any buffered input
    pub fn into_inner(self) -> C {
        self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, FileOffer};
    use binkp_transport::memory_pair;

    const WAIT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_command_exchange() {
        let (a, b) = memory_pair(1024);
        let mut left = FrameCodec::new(a);
        let mut right = FrameCodec::new(b);

        let offer = Command::File(FileOffer::new("A.PKT", 3, 0, 0));
        left.send(&offer).await.unwrap();
        left.write_frame(&Frame::data(&b"abc"[..])).await.unwrap();

        let frame = right.read_frame(Duration::from_secs(1)).await.unwrap();
        assert_eq!(Command::from_frame(&frame).unwrap(), offer);
        let frame = right.read_frame(Duration::from_secs(1)).await.unwrap();
        assert_eq!(frame.payload().as_ref(), b"abc");

        assert_eq!(left.stats().frames_sent, 2);
        assert_eq!(right.stats().frames_received, 2);
        assert_eq!(left.stats().bytes_sent, right.stats().bytes_received);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_frame_survives_timeout() {
        let (a, mut b) = memory_pair(1024);
        let mut codec = FrameCodec::new(a);

        let wire = Frame::data(&b"hello"[..]).encode().unwrap();
        b.write(&wire[..3], WAIT).await.unwrap();

        let err = codec.read_frame(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(
            err,
            CodecError::Connection(ConnectionError::Timeout(_))
        ));

        b.write(&wire[3..], WAIT).await.unwrap();
        let frame = codec.read_frame(Duration::from_secs(1)).await.unwrap();
        assert_eq!(frame.payload().as_ref(), b"hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_gives_up_on_stalled_peer() {
        let (a, _b) = memory_pair(64);
        let mut codec = FrameCodec::new(a);
        codec.set_write_timeout(Duration::from_secs(5));

        let err = codec
            .write_frame(&Frame::data(vec![0u8; 1024]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::Connection(ConnectionError::Timeout(d)) if d == Duration::from_secs(5)
        ));
        assert_eq!(codec.stats().frames_sent, 0);
    }

    #[tokio::test]
    async fn test_poll_frame_without_data() {
        let (a, _b) = memory_pair(64);
        let mut codec = FrameCodec::new(a);
        assert!(codec.poll_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_decode_error_reported() {
        let (a, mut b) = memory_pair(64);
        let mut codec = FrameCodec::new(a);
        b.write(&[0x80, 0x00], WAIT).await.unwrap();

        let err = codec.read_frame(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, CodecError::Frame(_)));
    }

    #[tokio::test]
    async fn test_peer_close() {
        let (a, mut b) = memory_pair(64);
        let mut codec = FrameCodec::new(a);
        b.close().await;

        let err = codec.read_frame(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(
            err,
            CodecError::Connection(ConnectionError::Closed)
        ));
    }
}
