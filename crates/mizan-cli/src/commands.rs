//! Slash commands for interactive mode

use std::path::PathBuf;

/// Result of parsing a slash command
#[derive(Debug, PartialEq, Eq)]
pub enum CommandResult {
    /// Start a fresh conversation
    New,
    /// List stored conversations
    List,
    /// Open a stored conversation
    Open(String),
    /// Delete one conversation
    Delete(String),
    /// Delete every conversation
    DeleteAll,
    /// Force a history refresh
    Sync,
    /// Fact-check a text against an image
    FactCheck { image: Option<PathBuf>, text: String },
    /// Show a message to the user
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse a slash command; `None` if the input is a plain question
pub fn parse_command(input: &str) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next().unwrap_or_default().to_lowercase();
    let args = parts.next().map(str::trim).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),
        "new" | "n" => CommandResult::New,
        "list" | "l" => CommandResult::List,
        "open" | "o" => match args {
            "" => CommandResult::Message("Usage: /open <conversation-id>".to_string()),
            id => CommandResult::Open(id.to_string()),
        },
        "delete" | "d" => match args {
            "" => CommandResult::Message("Usage: /delete <conversation-id>|all".to_string()),
            "all" => CommandResult::DeleteAll,
            id => CommandResult::Delete(id.to_string()),
        },
        "sync" => CommandResult::Sync,
        "factcheck" | "fc" => parse_fact_check(args),
        "quit" | "exit" | "q" => CommandResult::Exit,
        _ => CommandResult::Unknown(command),
    })
}

/// `/factcheck [@image-path] <text>`
fn parse_fact_check(args: &str) -> CommandResult {
    let (image, text) = match args.strip_prefix('@') {
        Some(rest) => {
            let mut parts = rest.splitn(2, ' ');
            let path = parts.next().unwrap_or_default();
            let text = parts.next().map(str::trim).unwrap_or("");
            (Some(PathBuf::from(path)), text)
        }
        None => (None, args),
    };
    if text.is_empty() {
        return CommandResult::Message("Usage: /factcheck [@image-path] <text>".to_string());
    }
    CommandResult::FactCheck {
        image,
        text: text.to_string(),
    }
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?               Show this help message
  /new, /n                    Start a new conversation
  /list, /l                   List conversations
  /open, /o <id>              Continue a conversation
  /delete, /d <id>|all        Delete a conversation, or all of them
  /sync                       Refresh history from the server
  /factcheck, /fc [@img] <t>  Fact-check a text, optionally with its image
  /quit, /exit, /q            Exit mizan

Press Ctrl-C while an answer streams to cancel it."#
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(parse_command("What is zakat?"), None);
    }

    #[test]
    fn test_parse_basic_commands() {
        assert_eq!(parse_command("/new"), Some(CommandResult::New));
        assert_eq!(parse_command(" /Q "), Some(CommandResult::Exit));
        assert_eq!(
            parse_command("/open abc-123"),
            Some(CommandResult::Open("abc-123".into()))
        );
        assert_eq!(parse_command("/delete all"), Some(CommandResult::DeleteAll));
        assert_eq!(
            parse_command("/frobnicate"),
            Some(CommandResult::Unknown("frobnicate".into()))
        );
    }

    #[test]
    fn test_parse_fact_check() {
        assert_eq!(
            parse_command("/fc @/tmp/post.png The moon split twice"),
            Some(CommandResult::FactCheck {
                image: Some(PathBuf::from("/tmp/post.png")),
                text: "The moon split twice".into(),
            })
        );
        assert_eq!(
            parse_command("/factcheck A claim"),
            Some(CommandResult::FactCheck {
                image: None,
                text: "A claim".into(),
            })
        );
        assert!(matches!(
            parse_command("/factcheck @img.png"),
            Some(CommandResult::Message(_))
        ));
    }
}
