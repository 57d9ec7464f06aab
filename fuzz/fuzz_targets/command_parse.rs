//! Fuzz target for command argument parsing
//!
//! Every command that parses must survive a trip back through the wire
//! format unchanged.

#![no_main]

use binkp_core::{Command, Frame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&code, args)) = data.split_first() else {
        return;
    };
    let Ok(command) = Command::from_frame(&Frame::command(code, args)) else {
        return;
    };

    // Lossy UTF-8 and unescaping may normalize, but only once
    let reparsed = Command::from_frame(&command.to_frame()).expect("re-encoded command parses");
    assert_eq!(reparsed, command);
});
