//! Test fixtures
//!
//! - [`ScriptedConnection`]: a fake peer that replays pre-loaded bytes and
//!   captures everything the engine writes
//! - [`TwoNode`]: two nodes with on-disk inbound and spool directories

mod scripted;
mod two_node;

pub use scripted::{Exhausted, ScriptHandle, ScriptedConnection};
pub use two_node::{NodeDirs, TwoNode};
