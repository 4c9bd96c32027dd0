//! Console commands typed while the client runs.

use crate::client::SyncClient;
use crate::utils::parse_time;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    TogglePause,
    Seek(f64),
    SeekRelative(f64),
    UndoSeek,
    Offset(f64),
    OffsetRelative(f64),
    Room(Option<String>),
    List,
    Help,
}

pub const HELP: &str = "\
Available commands:
  p                 toggle pause
  s [+-]time        seek to time, or by an amount with +/-
  u                 undo last seek
  o [+-]seconds     set or adjust your offset
  r [name]          change room (defaults to the file name)
  l                 show user list
  h                 show this help";

/// Split off a leading `+`/`-`, returning the sign and the rest.
fn signed(argument: &str) -> (Option<f64>, &str) {
    if let Some(rest) = argument.strip_prefix('+') {
        (Some(1.0), rest)
    } else if let Some(rest) = argument.strip_prefix('-') {
        (Some(-1.0), rest)
    } else {
        (None, argument)
    }
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (name, argument) = match line.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (line, ""),
    };

    match name {
        "p" => Ok(Command::TogglePause),
        "u" => Ok(Command::UndoSeek),
        "l" => Ok(Command::List),
        "h" | "help" | "?" => Ok(Command::Help),
        "r" => Ok(Command::Room(
            (!argument.is_empty()).then(|| argument.to_string()),
        )),
        "s" => {
            let (sign, time) = signed(argument);
            let seconds = parse_time(time).ok_or_else(|| format!("Invalid time '{argument}'"))?;
            Ok(match sign {
                Some(sign) => Command::SeekRelative(sign * seconds),
                None => Command::Seek(seconds),
            })
        }
        "o" => {
            let (sign, amount) = signed(argument);
            let seconds: f64 = amount
                .parse()
                .map_err(|_| format!("Invalid offset '{argument}'"))?;
            Ok(match sign {
                Some(sign) => Command::OffsetRelative(sign * seconds),
                None => Command::Offset(seconds),
            })
        }
        "" => Err("Empty command".to_string()),
        other => Err(format!("Unknown command '{other}', type h for help")),
    }
}

impl Command {
    pub fn execute(self, client: &SyncClient) {
        match self {
            Command::TogglePause => client.toggle_pause(),
            Command::Seek(position) => client.seek(position),
            Command::SeekRelative(delta) => client.seek_relative(delta),
            Command::UndoSeek => client.undo_seek(),
            Command::Offset(offset) => client.set_user_offset(offset),
            Command::OffsetRelative(delta) => client.set_user_offset(client.user_offset() + delta),
            Command::Room(room) => client.change_room(room),
            Command::List => client.request_user_list(),
            Command::Help => client.show_message(HELP),
        }
    }
}
