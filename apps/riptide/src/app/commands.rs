//! Line-oriented interaction commands read from stdin.

use std::str::FromStr;

use thiserror::Error;

use crate::binder::UserAction;

pub const USAGE: &str = "\
commands:
  click <selector>
  key <code> <selector>
  input <selector> = <value>
  check <true|false> <selector>
  html [selector]
  rescan
  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Deliver a user action to the first element matching `selector`.
    Act { selector: String, action: UserAction },
    Html { selector: Option<String> },
    Rescan,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if line.is_empty() {
            return Err(CommandError::Empty);
        }
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        match verb.to_ascii_lowercase().as_str() {
            "click" => {
                let selector = required(rest, "click <selector>")?;
                Ok(Command::Act {
                    selector,
                    action: UserAction::Click,
                })
            }
            "key" => {
                let (code, selector) = split_word(rest).ok_or(CommandError::Usage("key <code> <selector>"))?;
                Ok(Command::Act {
                    selector,
                    action: UserAction::KeyDown { code },
                })
            }
            "input" => {
                const HINT: &str = "input <selector> = <value>";
                let (selector, value) = match rest.split_once(" = ") {
                    Some((selector, value)) => (selector, value),
                    None => (rest.strip_suffix(" =").ok_or(CommandError::Usage(HINT))?, ""),
                };
                Ok(Command::Act {
                    selector: required(selector, HINT)?,
                    action: UserAction::Input {
                        value: value.to_string(),
                    },
                })
            }
            "check" => {
                const HINT: &str = "check <true|false> <selector>";
                let (flag, selector) = split_word(rest).ok_or(CommandError::Usage(HINT))?;
                let checked = match flag.to_ascii_lowercase().as_str() {
                    "true" | "on" | "1" => true,
                    "false" | "off" | "0" => false,
                    _ => return Err(CommandError::Usage(HINT)),
                };
                Ok(Command::Act {
                    selector,
                    action: UserAction::Check { checked },
                })
            }
            "html" => Ok(Command::Html {
                selector: (!rest.is_empty()).then(|| rest.to_string()),
            }),
            "rescan" => Ok(Command::Rescan),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

fn required(value: &str, usage: &'static str) -> Result<String, CommandError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CommandError::Usage(usage));
    }
    Ok(value.to_string())
}

/// First word and the non-empty remainder.
fn split_word(rest: &str) -> Option<(String, String)> {
    let (word, remainder) = rest.split_once(char::is_whitespace)?;
    let remainder = remainder.trim();
    if remainder.is_empty() {
        return None;
    }
    Some((word.to_string(), remainder.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Command, CommandError> {
        line.parse()
    }

    #[test]
    fn parses_actions_with_spaced_selectors() {
        assert_eq!(
            parse(r#"click div[gl-uid="1"] button"#),
            Ok(Command::Act {
                selector: r#"div[gl-uid="1"] button"#.into(),
                action: UserAction::Click
            })
        );
        assert_eq!(
            parse("key Enter  #search input"),
            Ok(Command::Act {
                selector: "#search input".into(),
                action: UserAction::KeyDown {
                    code: "Enter".into()
                }
            })
        );
        assert_eq!(
            parse("check off #done"),
            Ok(Command::Act {
                selector: "#done".into(),
                action: UserAction::Check { checked: false }
            })
        );
    }

    #[test]
    fn input_value_follows_the_equals_separator() {
        assert_eq!(
            parse("input form #name = Ada Lovelace"),
            Ok(Command::Act {
                selector: "form #name".into(),
                action: UserAction::Input {
                    value: "Ada Lovelace".into()
                }
            })
        );
        assert_eq!(
            parse("input #name ="),
            Ok(Command::Act {
                selector: "#name".into(),
                action: UserAction::Input { value: String::new() }
            })
        );
        assert_eq!(
            parse("input #name"),
            Err(CommandError::Usage("input <selector> = <value>"))
        );
    }

    #[test]
    fn plain_commands() {
        assert_eq!(parse("  html  "), Ok(Command::Html { selector: None }));
        assert_eq!(
            parse("html #app"),
            Ok(Command::Html {
                selector: Some("#app".into())
            })
        );
        assert_eq!(parse("RESCAN"), Ok(Command::Rescan));
        assert_eq!(parse("exit"), Ok(Command::Quit));
    }

    #[test]
    fn reports_bad_input() {
        assert_eq!(parse(""), Err(CommandError::Empty));
        assert_eq!(parse("dance"), Err(CommandError::Unknown("dance".into())));
        assert_eq!(parse("click"), Err(CommandError::Usage("click <selector>")));
        assert_eq!(
            parse("check maybe #done"),
            Err(CommandError::Usage("check <true|false> <selector>"))
        );
        assert_eq!(parse("key Enter"), Err(CommandError::Usage("key <code> <selector>")));
    }
}
