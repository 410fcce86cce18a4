//! Console grammar.

use core::fmt;

use winnow::ascii::{dec_uint, hex_uint, multispace0, multispace1};
use winnow::combinator::{alt, opt, preceded};
use winnow::error::ContextError;
use winnow::prelude::*;

/// Largest batch a single `tick` may request.
pub const MAX_TICKS: u32 = 1_000;

/// Simulated sensor output that can be overridden from the console.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SensorInput {
    Humidity,
    Temperature,
    Light,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
    /// Post this many sample ticks, letting the node settle after each.
    Tick(u32),
    SelfTest,
    Status,
    /// Replace a sensor's raw conversion result.
    Set(SensorInput, u16),
    Help,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SyntaxError {
    pub offset: usize,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unexpected input at column {}", self.offset + 1)
    }
}

/// Parses one console line.
///
/// # Errors
///
/// [`SyntaxError`] pointing at the first byte the grammar rejected.
pub fn parse(line: &str) -> Result<Command, SyntaxError> {
    command()
        .parse(line.trim())
        .map_err(|error| SyntaxError {
            offset: error.offset(),
        })
}

fn command<'a>() -> impl Parser<&'a str, Command, ContextError> {
    move |input: &mut &'a str| {
        let command = alt((
            preceded(("tick", multispace0), opt(tick_count))
                .map(|count| Command::Tick(count.unwrap_or(1))),
            "selftest".value(Command::SelfTest),
            "status".value(Command::Status),
            "help".value(Command::Help),
            preceded(("set", multispace1), (sensor, multispace1, raw_value))
                .map(|(sensor, _, raw)| Command::Set(sensor, raw)),
        ))
        .parse_next(input)?;

        multispace0.parse_next(input)?;
        Ok(command)
    }
}

fn tick_count(input: &mut &str) -> Result<u32, ContextError> {
    dec_uint
        .verify(|count: &u32| (1..=MAX_TICKS).contains(count))
        .parse_next(input)
}

fn sensor(input: &mut &str) -> Result<SensorInput, ContextError> {
    alt((
        "humidity".value(SensorInput::Humidity),
        "temperature".value(SensorInput::Temperature),
        "light".value(SensorInput::Light),
    ))
    .parse_next(input)
}

fn raw_value(input: &mut &str) -> Result<u16, ContextError> {
    alt((preceded(alt(("0x", "0X")), hex_uint), dec_uint)).parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_defaults_to_one() {
        assert_eq!(parse("tick"), Ok(Command::Tick(1)));
        assert_eq!(parse("  tick 12 "), Ok(Command::Tick(12)));
    }

    #[test]
    fn tick_count_is_bounded() {
        assert!(parse("tick 0").is_err());
        assert!(parse("tick 1001").is_err());
        assert_eq!(parse("tick 1000"), Ok(Command::Tick(MAX_TICKS)));
    }

    #[test]
    fn set_accepts_hex_and_decimal() {
        assert_eq!(
            parse("set humidity 0x683A"),
            Ok(Command::Set(SensorInput::Humidity, 0x683A))
        );
        assert_eq!(
            parse("set light 5208"),
            Ok(Command::Set(SensorInput::Light, 5208))
        );
        assert!(parse("set light 70000").is_err());
        assert!(parse("set pressure 1").is_err());
    }

    #[test]
    fn keywords_must_stand_alone() {
        assert_eq!(parse("selftest"), Ok(Command::SelfTest));
        assert_eq!(parse("status"), Ok(Command::Status));
        assert!(parse("ticks").is_err());
        assert!(parse("status now").is_err());
    }

    #[test]
    fn error_points_past_the_accepted_prefix() {
        let error = parse("help me").unwrap_err();
        assert_eq!(error.offset, 5);
    }
}
