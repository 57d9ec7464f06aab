//! Scripted fake connection.
//!
//! The peer's side of a session is written up front as a list of frames (or
//! raw bytes); the engine reads them in order regardless of what it writes.
//! Everything the engine writes is captured for inspection after the run.

use async_trait::async_trait;
use binkp_core::{Command, CommandCode, Frame, FrameDecoder};
use binkp_transport::{Connection, ConnectionError, ConnectionResult, ConnectionStats};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a read does once the script has run out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhausted {
    /// Report the stream as closed by the peer
    Close,
    /// Wait out every read timeout, as a silent peer would
    Stall,
}

#[derive(Debug, Default)]
struct Captured {
    written: Vec<u8>,
    closed: bool,
}

type Gate = Box<dyn Fn(&ScriptHandle) -> bool + Send>;

enum Step {
    Bytes(Vec<u8>),
    /// Hold back the rest of the script until the engine has written
    /// something that satisfies the gate
    Until(Gate),
}

/// Fake peer replaying a fixed script
pub struct ScriptedConnection {
    script: VecDeque<Step>,
    exhausted: Exhausted,
    handle: ScriptHandle,
    closed: bool,
    stats: ConnectionStats,
}

/// View of what the engine wrote, usable after the connection is consumed
#[derive(Debug, Clone)]
pub struct ScriptHandle {
    captured: Arc<Mutex<Captured>>,
}

impl ScriptedConnection {
    /// Create an empty script that stalls when exhausted
    pub fn new() -> (Self, ScriptHandle) {
        let handle = ScriptHandle {
            captured: Arc::new(Mutex::new(Captured::default())),
        };
        let conn = Self {
            script: VecDeque::new(),
            exhausted: Exhausted::Stall,
            handle: handle.clone(),
            closed: false,
            stats: ConnectionStats::new(),
        };
        (conn, handle)
    }

    /// Queue a command from the peer
    pub fn command(self, command: Command) -> Self {
        self.frame(&command.to_frame())
    }

    /// Queue a data frame from the peer
    pub fn data(self, bytes: &[u8]) -> Self {
        self.frame(&Frame::data(bytes.to_vec()))
    }

    /// Queue any frame
    pub fn frame(self, frame: &Frame) -> Self {
        let wire = frame.encode().expect("scripted frame must encode");
        self.raw(&wire)
    }

    /// Queue raw bytes, delivered by a single read
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.script.push_back(Step::Bytes(bytes.to_vec()));
        self
    }

    /// Deliver nothing further until `gate` holds for what the engine wrote.
    ///
    /// Reads in the meantime time out immediately.
    pub fn until(mut self, gate: impl Fn(&ScriptHandle) -> bool + Send + 'static) -> Self {
        self.script.push_back(Step::Until(Box::new(gate)));
        self
    }

    /// Wait until the engine has written a command with `code`
    pub fn after_command(self, code: CommandCode) -> Self {
        self.until(move |h| h.commands().iter().any(|c| c.code() == code))
    }

    /// Wait until the engine has written `len` bytes of file data
    pub fn after_data(self, len: usize) -> Self {
        self.until(move |h| h.data().len() >= len)
    }

    /// Set what happens after the last scripted byte
    pub fn then(mut self, exhausted: Exhausted) -> Self {
        self.exhausted = exhausted;
        self
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> ConnectionResult<Vec<u8>> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }

        loop {
            match self.script.pop_front() {
                Some(Step::Bytes(mut chunk)) => {
                    if chunk.len() > max_bytes {
                        let rest = chunk.split_off(max_bytes.max(1));
                        self.script.push_front(Step::Bytes(rest));
                    }
                    self.stats.record_read(chunk.len());
                    return Ok(chunk);
                }
                Some(Step::Until(gate)) => {
                    if gate(&self.handle) {
                        continue;
                    }
                    self.script.push_front(Step::Until(gate));
                    self.stats.record_timeout();
                    return Err(ConnectionError::Timeout(timeout));
                }
                None => {
                    return match self.exhausted {
                        Exhausted::Close => Err(ConnectionError::Closed),
                        Exhausted::Stall => {
                            tokio::time::sleep(timeout).await;
                            self.stats.record_timeout();
                            Err(ConnectionError::Timeout(timeout))
                        }
                    };
                }
            }
        }
    }

    async fn write(&mut self, bytes: &[u8], _timeout: Duration) -> ConnectionResult<()> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        self.handle
            .captured
            .lock()
            .unwrap()
            .written
            .extend_from_slice(bytes);
        self.stats.record_write(bytes.len());
        Ok(())
    }

    async fn close(&mut self) {
        self.closed = true;
        self.handle.captured.lock().unwrap().closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn stats(&self) -> ConnectionStats {
        self.stats.clone()
    }
}

impl ScriptHandle {
    /// Every frame the engine wrote, in order
    pub fn frames(&self) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&self.captured.lock().unwrap().written);
        let mut frames = Vec::new();
        while let Some(frame) = decoder.next_frame().expect("engine wrote a malformed frame") {
            frames.push(frame);
        }
        frames
    }

    /// Every command the engine wrote, in order
    pub fn commands(&self) -> Vec<Command> {
        self.frames()
            .iter()
            .filter(|f| f.is_command())
            .map(|f| Command::from_frame(f).expect("engine wrote an unparsable command"))
            .collect()
    }

    /// Payloads of every data frame the engine wrote, concatenated
    pub fn data(&self) -> Vec<u8> {
        self.frames()
            .iter()
            .filter(|f| !f.is_command())
            .flat_map(|f| f.payload().to_vec())
            .collect()
    }

    /// Check if the engine closed the connection
    pub fn is_closed(&self) -> bool {
        self.captured.lock().unwrap().closed
    }

    /// Last command written, if any
    pub fn last_command(&self) -> Option<Command> {
        self.commands().pop()
    }
}
