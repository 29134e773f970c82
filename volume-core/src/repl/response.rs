//! Protocol response lines.

use core::fmt::{self, Write};

use heapless::String;

use crate::presses::Volume;

use super::commands::CommandError;

/// Capacity of a rendered response, newline included.
pub const RESPONSE_LINE_CAPACITY: usize = 32;

pub type ResponseLine = String<RESPONSE_LINE_CAPACITY>;

/// Reply sent to a client for one command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Volume(Volume),
    TestDone,
    Error(CommandError),
}

impl Response {
    /// Renders the response as a newline-terminated line.
    #[must_use]
    pub fn to_line(&self) -> ResponseLine {
        let mut line = ResponseLine::new();
        // Longest response is well under the line capacity.
        let _ = writeln!(line, "{self}");
        line
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Volume(volume) => write!(f, "OK volume={volume}"),
            Response::TestDone => f.write_str("OK test done"),
            Response::Error(error) => write!(f, "ERR {error}"),
        }
    }
}
