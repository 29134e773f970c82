//! Line protocol shared between firmware and emulator targets.
//!
//! [`grammar`] parses a line, [`commands`] decides what it asks for, and
//! [`response`] renders the reply.

pub mod commands;
pub mod grammar;
pub mod response;

pub use commands::{Action, CommandError, interpret};
pub use grammar::{Command, NumericPolicy};
pub use response::{Response, ResponseLine};
