//! Special commands for the interactive chat loop
//!
//! Lines starting with `/` are commands; anything else is sent to the
//! estimate assistant. Commands are case-insensitive.

use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command argument could not be parsed
    #[error("Invalid argument for {command}: {arg}\n\nUsage: {usage}")]
    InvalidArgument {
        command: String,
        arg: String,
        usage: String,
    },

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Commands handled by the chat loop itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Start a new conversation
    New,
    /// List saved sessions
    Sessions,
    /// Load the next page of sessions
    More,
    /// Switch to a saved session by backend index
    Open(i64),
    /// Hide or show a transcript turn
    Toggle(usize),
    /// Ask again after a failed reply
    Retry,
    /// Reprint the transcript
    Transcript,
    /// Insert the platform picker step
    Platform,
    /// Show the remaining anonymous quota
    Quota,
    /// Show help
    Help,
    /// Leave the chat loop
    Exit,
    /// Not a command; send the text
    None,
}

fn argument<T: std::str::FromStr>(
    command: &str,
    usage: &str,
    rest: &str,
) -> Result<T, CommandError> {
    let rest = rest.trim();
    if rest.is_empty() {
        return Err(CommandError::MissingArgument {
            command: command.to_string(),
            usage: usage.to_string(),
        });
    }
    rest.parse().map_err(|_| CommandError::InvalidArgument {
        command: command.to_string(),
        arg: rest.to_string(),
        usage: usage.to_string(),
    })
}

/// Parse one input line
///
/// # Examples
///
/// ```
/// use estimate_chat::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// assert_eq!(parse_special_command("/open 42").unwrap(), SpecialCommand::Open(42));
/// assert_eq!(parse_special_command("a shop app").unwrap(), SpecialCommand::None);
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if !trimmed.starts_with('/') && lower != "exit" && lower != "quit" {
        return Ok(SpecialCommand::None);
    }

    let (name, rest) = lower.split_once(' ').unwrap_or((lower.as_str(), ""));
    match name {
        "/new" => Ok(SpecialCommand::New),
        "/sessions" | "/list" => Ok(SpecialCommand::Sessions),
        "/more" => Ok(SpecialCommand::More),
        "/open" => argument("/open", "/open <session index>", rest).map(SpecialCommand::Open),
        "/toggle" => {
            argument("/toggle", "/toggle <turn number>", rest).map(SpecialCommand::Toggle)
        }
        "/retry" => Ok(SpecialCommand::Retry),
        "/history" | "/transcript" => Ok(SpecialCommand::Transcript),
        "/platform" => Ok(SpecialCommand::Platform),
        "/quota" => Ok(SpecialCommand::Quota),
        "/help" | "/?" => Ok(SpecialCommand::Help),
        "/quit" | "/exit" | "exit" | "quit" => Ok(SpecialCommand::Exit),
        _ => Err(CommandError::UnknownCommand(trimmed.to_string())),
    }
}

/// Print chat loop help
pub fn print_help() {
    println!(
        r#"
Chat Commands
=============

CONVERSATIONS:
  /new            - Start a new conversation
  /sessions       - List saved sessions
  /more           - Load more sessions
  /open <index>   - Switch to a saved session

TRANSCRIPT:
  /history        - Reprint the transcript
  /toggle <n>     - Hide or show turn n
  /retry          - Ask again after a failed reply
  /platform       - Insert the platform selection step

OTHER:
  /quota          - Show today's remaining anonymous calls
  /help           - Show this help
  /quit           - Leave the chat

Anything else is sent to the estimate assistant.
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(
            parse_special_command("How much for an iOS app?").unwrap(),
            SpecialCommand::None
        );
    }

    #[test]
    fn test_commands_are_case_insensitive() {
        assert_eq!(parse_special_command("/NEW").unwrap(), SpecialCommand::New);
        assert_eq!(parse_special_command("  /Quota ").unwrap(), SpecialCommand::Quota);
        assert_eq!(parse_special_command("quit").unwrap(), SpecialCommand::Exit);
    }

    #[test]
    fn test_arguments() {
        assert_eq!(parse_special_command("/open 7").unwrap(), SpecialCommand::Open(7));
        assert_eq!(parse_special_command("/toggle 3").unwrap(), SpecialCommand::Toggle(3));
        assert!(matches!(
            parse_special_command("/open"),
            Err(CommandError::MissingArgument { .. })
        ));
        assert!(matches!(
            parse_special_command("/toggle x"),
            Err(CommandError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_unknown_command() {
        let err = parse_special_command("/frobnicate").unwrap_err();
        assert!(err.to_string().contains("/frobnicate"));
    }
}
