use std::io::{self, BufRead};
use std::str::FromStr;
use std::sync::mpsc;
use std::thread;

use thiserror::Error;

use crate::module::result::Answer;

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Mount a group of the first or second attempt by descriptor index.
    Open(usize),
    Answer { offset: usize, answer: Answer },
    /// Finish the group on screen.
    Submit,
    /// During the retake, an item number makes the move conditional on
    /// still being at that item.
    Next(Option<usize>),
    Back(Option<usize>),
    Retry,
    Status,
    Cancel,
    Quit,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("'{command}' expects {expected}")]
    MissingArgument {
        command: &'static str,
        expected: &'static str,
    },
    #[error("'{0}' is not a valid number")]
    BadNumber(String),
}

fn parse_usize(token: &str) -> Result<usize, ParseCommandError> {
    token
        .parse()
        .map_err(|_| ParseCommandError::BadNumber(token.to_string()))
}

/// Optional 1-based item number, as shown in the retake prompts.
fn parse_item(token: &str) -> Result<Option<usize>, ParseCommandError> {
    if token.is_empty() {
        return Ok(None);
    }
    match parse_usize(token)? {
        0 => Err(ParseCommandError::BadNumber(token.to_string())),
        item => Ok(Some(item)),
    }
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map(|(w, r)| (w, r.trim()))
            .unwrap_or((line, ""));
        match word.to_ascii_lowercase().as_str() {
            "" => Err(ParseCommandError::Empty),
            "open" | "o" => {
                if rest.is_empty() {
                    return Err(ParseCommandError::MissingArgument {
                        command: "open",
                        expected: "a group number",
                    });
                }
                Ok(Command::Open(parse_usize(rest)?))
            }
            "answer" | "a" => {
                let (offset, value) = rest
                    .split_once(char::is_whitespace)
                    .ok_or(ParseCommandError::MissingArgument {
                        command: "answer",
                        expected: "an item offset and a value",
                    })?;
                let answer = Answer::from_str(value.trim()).unwrap_or_else(|never| match never {});
                Ok(Command::Answer {
                    offset: parse_usize(offset)?,
                    answer,
                })
            }
            "submit" | "s" => Ok(Command::Submit),
            "next" | "n" => Ok(Command::Next(parse_item(rest)?)),
            "back" | "b" => Ok(Command::Back(parse_item(rest)?)),
            "retry" | "r" => Ok(Command::Retry),
            "status" | "?" => Ok(Command::Status),
            "cancel" => Ok(Command::Cancel),
            "quit" | "q" | "exit" => Ok(Command::Quit),
            other => Err(ParseCommandError::Unknown(other.to_string())),
        }
    }
}

pub enum AppEvent {
    Command(Command),
    Invalid(ParseCommandError),
    /// Input closed.
    Eof,
}

/// Reads commands line by line on a background thread.
pub struct EventHandler {
    rx: mpsc::Receiver<AppEvent>,
}

impl EventHandler {
    pub fn new() -> Self {
        Self::from_reader(io::BufReader::new(io::stdin()))
    }

    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            for line in reader.lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let event = match line.parse::<Command>() {
                    Ok(command) => AppEvent::Command(command),
                    Err(err) => AppEvent::Invalid(err),
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
            let _ = tx.send(AppEvent::Eof);
        });

        Self { rx }
    }

    pub fn next(&self) -> anyhow::Result<AppEvent> {
        Ok(self.rx.recv()?)
    }
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_navigation_commands() {
        assert_eq!("next".parse::<Command>(), Ok(Command::Next(None)));
        assert_eq!(" N ".parse::<Command>(), Ok(Command::Next(None)));
        assert_eq!("next 4".parse::<Command>(), Ok(Command::Next(Some(4))));
        assert_eq!("back".parse::<Command>(), Ok(Command::Back(None)));
        assert_eq!("b 2".parse::<Command>(), Ok(Command::Back(Some(2))));
        assert_eq!("retry".parse::<Command>(), Ok(Command::Retry));
        assert_eq!("?".parse::<Command>(), Ok(Command::Status));
        assert_eq!("q".parse::<Command>(), Ok(Command::Quit));
        assert_eq!("open 2".parse::<Command>(), Ok(Command::Open(2)));
    }

    #[test]
    fn test_parse_answer_values() {
        assert_eq!(
            "answer 0 3".parse::<Command>(),
            Ok(Command::Answer {
                offset: 0,
                answer: Answer::Choice(3)
            })
        );
        assert_eq!(
            "a 1 2,0,1".parse::<Command>(),
            Ok(Command::Answer {
                offset: 1,
                answer: Answer::Order(vec![2, 0, 1])
            })
        );
        assert_eq!(
            "answer 2 the lighthouse keeper".parse::<Command>(),
            Ok(Command::Answer {
                offset: 2,
                answer: Answer::Text("the lighthouse keeper".to_string())
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Command>(), Err(ParseCommandError::Empty));
        assert_eq!(
            "jump".parse::<Command>(),
            Err(ParseCommandError::Unknown("jump".to_string()))
        );
        assert!(matches!(
            "answer 3".parse::<Command>(),
            Err(ParseCommandError::MissingArgument { command: "answer", .. })
        ));
        assert_eq!(
            "open x".parse::<Command>(),
            Err(ParseCommandError::BadNumber("x".to_string()))
        );
        assert_eq!(
            "next 0".parse::<Command>(),
            Err(ParseCommandError::BadNumber("0".to_string()))
        );
        assert!(matches!(
            "open".parse::<Command>(),
            Err(ParseCommandError::MissingArgument { command: "open", .. })
        ));
    }

    #[test]
    fn test_reader_thread_emits_commands_then_eof() {
        let input = Cursor::new("open 0\n\nbogus\nsubmit\n");
        let events = EventHandler::from_reader(input);

        assert!(matches!(events.next().unwrap(), AppEvent::Command(Command::Open(0))));
        assert!(matches!(events.next().unwrap(), AppEvent::Invalid(ParseCommandError::Unknown(_))));
        assert!(matches!(events.next().unwrap(), AppEvent::Command(Command::Submit)));
        assert!(matches!(events.next().unwrap(), AppEvent::Eof));
    }
}
