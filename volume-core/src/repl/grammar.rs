#![allow(clippy::module_name_repetitions)]

//! Parser for the line-oriented volume protocol.
//!
//! Commands are matched case-sensitively against the trimmed line with
//! `winnow` combinators. `SET:` keeps its raw suffix so the numeric policy can
//! be applied separately by [`set_level`].

use core::fmt;

use winnow::ascii::{digit0, digit1, multispace0};
use winnow::combinator::{alt, eof, opt, preceded, terminated};
use winnow::prelude::*;
use winnow::token::{one_of, rest};

/// Parsed protocol command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Up,
    Down,
    /// `SET:` followed by the unparsed level text.
    Set(&'a str),
    Sync,
    Get,
    Test,
}

/// How the `SET:` suffix is turned into a number.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum NumericPolicy {
    /// Leading whitespace, optional sign, leading digits; trailing text ignored and
    /// no digits reads as zero.
    #[default]
    Permissive,
    /// Optional sign followed by at least one digit and nothing else.
    Strict,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GrammarError {
    UnknownCommand,
    MalformedNumber,
}

impl fmt::Display for GrammarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarError::UnknownCommand => f.write_str("unknown command"),
            GrammarError::MalformedNumber => f.write_str("malformed number"),
        }
    }
}

/// Parses a single protocol line. Surrounding whitespace is ignored.
///
/// # Errors
///
/// Returns [`GrammarError::UnknownCommand`] when the line matches no command.
pub fn parse(line: &str) -> Result<Command<'_>, GrammarError> {
    command
        .parse(line.trim())
        .map_err(|_| GrammarError::UnknownCommand)
}

/// Interprets the text after `SET:` according to `policy`.
///
/// Magnitudes beyond `i64` saturate, so out-of-range input stays out of range.
///
/// # Errors
///
/// Returns [`GrammarError::MalformedNumber`] when `policy` is
/// [`NumericPolicy::Strict`] and `raw` is not a plain signed integer.
pub fn set_level(raw: &str, policy: NumericPolicy) -> Result<i64, GrammarError> {
    match policy {
        NumericPolicy::Permissive => {
            let mut input = raw;
            leading_integer
                .parse_next(&mut input)
                .map(|(sign, digits)| accumulate(sign, digits))
                .map_err(|_| GrammarError::MalformedNumber)
        }
        NumericPolicy::Strict => strict_integer
            .parse(raw)
            .map(|(sign, digits)| accumulate(sign, digits))
            .map_err(|_| GrammarError::MalformedNumber),
    }
}

fn command<'a>(input: &mut &'a str) -> ModalResult<Command<'a>> {
    alt((
        preceded("SET:", rest).map(Command::Set),
        terminated(keyword, eof),
    ))
    .parse_next(input)
}

fn keyword<'a>(input: &mut &'a str) -> ModalResult<Command<'a>> {
    alt((
        "UP".value(Command::Up),
        "DOWN".value(Command::Down),
        "SYNC".value(Command::Sync),
        "GET".value(Command::Get),
        "TEST".value(Command::Test),
    ))
    .parse_next(input)
}

fn leading_integer<'a>(input: &mut &'a str) -> ModalResult<(Option<char>, &'a str)> {
    preceded(multispace0, (opt(one_of(['+', '-'])), digit0)).parse_next(input)
}

fn strict_integer<'a>(input: &mut &'a str) -> ModalResult<(Option<char>, &'a str)> {
    (opt(one_of(['+', '-'])), digit1).parse_next(input)
}

fn accumulate(sign: Option<char>, digits: &str) -> i64 {
    let magnitude = digits.bytes().fold(0_i64, |acc, digit| {
        acc.saturating_mul(10)
            .saturating_add(i64::from(digit - b'0'))
    });
    if sign == Some('-') {
        -magnitude
    } else {
        magnitude
    }
}
