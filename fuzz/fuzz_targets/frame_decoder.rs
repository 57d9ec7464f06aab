//! Fuzz target for the streaming frame decoder
//!
//! Feeds arbitrary bytes in arbitrary pieces. The decoder must never panic,
//! and every frame it yields must parse as a command or be plain data.

#![no_main]

use arbitrary::Arbitrary;
use binkp_core::{Command, FrameDecoder};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    max_payload: u16,
    pieces: Vec<Vec<u8>>,
}

fuzz_target!(|input: Input| {
    let max_payload = usize::from(input.max_payload % 0x8000);
    let mut decoder = FrameDecoder::with_max_payload(max_payload);

    'feed: for piece in &input.pieces {
        decoder.extend(piece);
        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => {
                    assert!(frame.payload().len() <= max_payload);
                    if frame.is_command() {
                        let _ = Command::from_frame(&frame);
                    }
                }
                Ok(None) => break,
                // The stream is unusable after an error
                Err(_) => break 'feed,
            }
        }
    }
});
