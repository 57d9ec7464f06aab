//! Frame encoding and decoding for the binkp wire protocol.
//!
//! Every wire unit is a 2-byte big-endian header followed by the payload.
//! The top header bit marks a command frame; the remaining 15 bits carry the
//! payload length (0 to 32767). A command frame's first payload byte is the
//! command code.
//!
//! ```text
//!  15 14                                0
//! +--+----------------------------------+---------------------+
//! |C |          payload length          |  payload ...        |
//! +--+----------------------------------+---------------------+
//! ```

use crate::error::FrameError;
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 2;

/// Largest payload a frame can carry
pub const MAX_PAYLOAD: usize = 0x7FFF;

/// Header bit marking a command frame
const COMMAND_BIT: u16 = 0x8000;

/// Frame kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Control frame; payload starts with a command code
    Command,
    /// Raw file content for the file currently in flight
    Data,
}

/// A single binkp wire unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    payload: Bytes,
}

impl Frame {
    /// Create a data frame
    pub fn data(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Data,
            payload: payload.into(),
        }
    }

    /// Create a command frame from a command code and argument bytes
    #[must_use]
    pub fn command(code: u8, args: &[u8]) -> Self {
        let mut payload = BytesMut::with_capacity(1 + args.len());
        payload.put_u8(code);
        payload.put_slice(args);
        Self {
            kind: FrameKind::Command,
            payload: payload.freeze(),
        }
    }

    /// Frame kind
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Check if this is a command frame
    #[must_use]
    pub fn is_command(&self) -> bool {
        self.kind == FrameKind::Command
    }

    /// Full payload, including the command code for command frames
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the frame, returning its payload
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Encoded size on the wire
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Append the wire encoding to `dst`.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Oversized` if the payload exceeds [`MAX_PAYLOAD`],
    /// or `FrameError::EmptyCommand` for a command frame with no payload.
    pub fn encode_into(&self, dst: &mut BytesMut) -> Result<(), FrameError> {
        let len = self.payload.len();
        if len > MAX_PAYLOAD {
            return Err(FrameError::Oversized {
                len,
                max: MAX_PAYLOAD,
            });
        }
        if self.is_command() && len == 0 {
            return Err(FrameError::EmptyCommand);
        }

        // len <= 0x7FFF, checked above
        let mut header = len as u16;
        if self.is_command() {
            header |= COMMAND_BIT;
        }
        dst.reserve(HEADER_SIZE + len);
        dst.put_u16(header);
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Encode to a fresh buffer
    ///
    /// # Errors
    ///
    /// See [`Frame::encode_into`].
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf.to_vec())
    }

    /// Decode one frame from the start of `buf`, returning the frame and the
    /// number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Truncated` if `buf` holds less than a complete
    /// frame, or `FrameError::EmptyCommand` for a zero-length command frame.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), FrameError> {
        let (kind, len) = parse_header(buf)?;
        let total = HEADER_SIZE + len;
        if buf.len() < total {
            return Err(FrameError::Truncated {
                expected: total,
                actual: buf.len(),
            });
        }
        let frame = Self {
            kind,
            payload: Bytes::copy_from_slice(&buf[HEADER_SIZE..total]),
        };
        Ok((frame, total))
    }
}

/// Parse a frame header into kind and payload length.
///
/// # Errors
///
/// Returns `FrameError::Truncated` if fewer than two bytes are available, or
/// `FrameError::EmptyCommand` for a command header with zero length.
pub fn parse_header(buf: &[u8]) -> Result<(FrameKind, usize), FrameError> {
    if buf.len() < HEADER_SIZE {
        return Err(FrameError::Truncated {
            expected: HEADER_SIZE,
            actual: buf.len(),
        });
    }
    let header = u16::from_be_bytes([buf[0], buf[1]]);
    let len = usize::from(header & !COMMAND_BIT);
    if header & COMMAND_BIT != 0 {
        if len == 0 {
            return Err(FrameError::EmptyCommand);
        }
        Ok((FrameKind::Command, len))
    } else {
        Ok((FrameKind::Data, len))
    }
}

/// Incremental decoder for a byte stream that arrives in arbitrary pieces.
///
/// Bytes that do not yet form a complete frame stay buffered, so a read
/// timeout in the middle of a frame loses nothing.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    pending: Option<(FrameKind, usize)>,
    max_payload: usize,
}

impl FrameDecoder {
    /// Create a decoder accepting payloads up to [`MAX_PAYLOAD`]
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD)
    }

    /// Create a decoder with a lower payload limit
    #[must_use]
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(HEADER_SIZE + MAX_PAYLOAD),
            pending: None,
            max_payload: max_payload.min(MAX_PAYLOAD),
        }
    }

    /// Change the payload limit for frames not yet started
    pub fn set_max_payload(&mut self, max_payload: usize) {
        self.max_payload = max_payload.min(MAX_PAYLOAD);
    }

    /// Append received bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of bytes needed before the next frame can be produced
    #[must_use]
    pub fn wanted(&self) -> usize {
        match self.pending {
            None => HEADER_SIZE.saturating_sub(self.buffer.len()).max(1),
            Some((_, len)) => len.saturating_sub(self.buffer.len()).max(1),
        }
    }

    /// Buffered byte count
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if nothing is buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.pending.is_none()
    }

    /// Extract the next complete frame, if one is buffered.
    ///
    /// # Errors
    ///
    /// Returns a `FrameError` if the stream is malformed; the decoder should
    /// not be used afterwards.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let (kind, len) = match self.pending {
            Some(pending) => pending,
            None => {
                if self.buffer.len() < HEADER_SIZE {
                    return Ok(None);
                }
                let (kind, len) = parse_header(&self.buffer[..HEADER_SIZE])?;
                if len > self.max_payload {
                    return Err(FrameError::Oversized {
                        len,
                        max: self.max_payload,
                    });
                }
                let _ = self.buffer.split_to(HEADER_SIZE);
                self.pending = Some((kind, len));
                (kind, len)
            }
        };

        if self.buffer.len() < len {
            return Ok(None);
        }
        self.pending = None;
        let payload = self.buffer.split_to(len).freeze();
        Ok(Some(Frame { kind, payload }))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
