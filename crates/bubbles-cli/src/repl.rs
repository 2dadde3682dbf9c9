//! Line commands typed at the interactive prompt

use bubbles_core::Coordinates;

use crate::error::{CliError, Result};

pub const HELP: &str = "\
/peers              list who is near
/loc <lat> <lon>    share your position
/name <name>        change your display name
/start, /stop       resume or pause the radio
/help               this text
/quit               leave
anything else       message everyone nearby";

#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Message(String),
    Peers,
    Location(Coordinates),
    Name(String),
    Start,
    Stop,
    Help,
    Quit,
}

/// Parse one input line; blank lines yield nothing
pub fn parse(line: &str) -> Result<Option<ReplCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(ReplCommand::Message(line.to_string())));
    };

    let (command, argument) = match rest.split_once(char::is_whitespace) {
        Some((command, argument)) => (command, argument.trim()),
        None => (rest, ""),
    };
    let parsed = match command {
        "peers" | "p" => ReplCommand::Peers,
        "loc" | "l" => ReplCommand::Location(parse_coordinates(argument)?),
        "name" | "n" if !argument.is_empty() => ReplCommand::Name(argument.to_string()),
        "name" | "n" => return Err(CliError::input("usage: /name <name>")),
        "start" => ReplCommand::Start,
        "stop" => ReplCommand::Stop,
        "help" | "h" | "?" => ReplCommand::Help,
        "quit" | "q" | "exit" => ReplCommand::Quit,
        other => {
            return Err(CliError::input(format!(
                "unknown command /{}, try /help",
                other
            )))
        }
    };
    Ok(Some(parsed))
}

/// Accepts `lat lon` or `lat,lon`
fn parse_coordinates(argument: &str) -> Result<Coordinates> {
    let usage = || CliError::input("usage: /loc <latitude> <longitude>");
    let mut parts = argument
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty());
    let latitude: f64 = parts.next().ok_or_else(usage)?.parse().map_err(|_| usage())?;
    let longitude: f64 = parts.next().ok_or_else(usage)?.parse().map_err(|_| usage())?;
    if parts.next().is_some() {
        return Err(usage());
    }

    let coordinates = Coordinates::new(latitude, longitude);
    if !coordinates.is_valid() {
        return Err(CliError::input(format!(
            "{} is not a position on Earth",
            coordinates
        )));
    }
    Ok(coordinates)
}
