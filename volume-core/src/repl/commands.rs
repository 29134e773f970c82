//! Command interpreter.
//!
//! Turns a received line into the action the controller should take, given the
//! mirrored volume and whether a press job or resync is in flight. The function
//! is pure; scheduling happens in [`crate::controller`].

use core::fmt;

use crate::presses::{MAX_VOLUME, PressLine, Volume};

use super::grammar::{self, Command, NumericPolicy};

/// Reasons a command is refused. Each maps to one `ERR` line.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommandError {
    Busy,
    AtMax,
    AtMin,
    OutOfRange,
    Malformed,
    Unknown,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Busy => f.write_str("busy"),
            CommandError::AtMax => write!(f, "already at max ({MAX_VOLUME})"),
            CommandError::AtMin => f.write_str("already at min (0)"),
            CommandError::OutOfRange => write!(f, "range 0-{MAX_VOLUME}"),
            CommandError::Malformed => f.write_str("malformed"),
            CommandError::Unknown => f.write_str("unknown command"),
        }
    }
}

/// Work requested by an accepted command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Single press on `line`; volume becomes `target` once it completes.
    Press { line: PressLine, target: Volume },
    /// Sweep to the floor and climb to `target`.
    Resync { target: Volume },
    SelfTest,
    /// Answer immediately with the given volume.
    Report(Volume),
}

/// Decides what a command line asks for.
///
/// The busy check comes first, so every line (including `GET` and unknown
/// text) is refused with [`CommandError::Busy`] while work is in flight.
///
/// # Errors
///
/// Returns the [`CommandError`] whose `ERR` line should be sent back.
pub fn interpret(
    line: &str,
    volume: Volume,
    busy: bool,
    policy: NumericPolicy,
) -> Result<Action, CommandError> {
    if busy {
        return Err(CommandError::Busy);
    }

    match grammar::parse(line).map_err(|_| CommandError::Unknown)? {
        Command::Up => volume
            .step_up()
            .map(|target| Action::Press {
                line: PressLine::Up,
                target,
            })
            .ok_or(CommandError::AtMax),
        Command::Down => volume
            .step_down()
            .map(|target| Action::Press {
                line: PressLine::Down,
                target,
            })
            .ok_or(CommandError::AtMin),
        Command::Set(raw) => {
            let level = grammar::set_level(raw, policy).map_err(|_| CommandError::Malformed)?;
            Volume::from_level(level)
                .map(|target| Action::Resync { target })
                .ok_or(CommandError::OutOfRange)
        }
        Command::Sync => Ok(Action::Resync {
            target: Volume::DEFAULT,
        }),
        Command::Get => Ok(Action::Report(volume)),
        Command::Test => Ok(Action::SelfTest),
    }
}
