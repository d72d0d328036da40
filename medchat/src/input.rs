//! Parsing of lines typed at the prompt.
//!
//! Plain text is a chat message; lines starting with `/` are commands.

use medchat_core::ChatSnapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Message(String),
    New,
    Consult(Option<String>),
    List,
    Switch(String),
    Delete(String),
    Clear,
    Reconnect,
    Status,
    Help,
    Quit,
    Empty,
}

pub const HELP: &str = "\
Commands:
  /new                 start a new consultation
  /consult [disease]   start a consultation seeded with a suspected disease
  /list                list conversations
  /switch <n|id>       open a conversation from /list
  /delete <n|id>       delete a conversation
  /clear               delete every conversation
  /reconnect           retry the server connection now
  /status              show connection status
  /quit                exit
Anything else is sent to the assistant.";

pub fn parse(line: &str) -> Result<Input, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Input::Message(line.to_string()));
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, Some(rest.trim()).filter(|a| !a.is_empty())),
        None => (command, None),
    };

    match (name, arg) {
        ("new", None) => Ok(Input::New),
        ("consult", arg) => Ok(Input::Consult(arg.map(str::to_string))),
        ("list" | "ls", None) => Ok(Input::List),
        ("switch", Some(target)) => Ok(Input::Switch(target.to_string())),
        ("delete" | "rm", Some(target)) => Ok(Input::Delete(target.to_string())),
        ("clear", None) => Ok(Input::Clear),
        ("reconnect", None) => Ok(Input::Reconnect),
        ("status", None) => Ok(Input::Status),
        ("help" | "?", None) => Ok(Input::Help),
        ("quit" | "exit" | "q", None) => Ok(Input::Quit),
        ("switch" | "delete" | "rm", None) => Err(format!("/{} needs a conversation", name)),
        (_, Some(_)) if is_known(name) => Err(format!("/{} takes no argument", name)),
        _ => Err(format!("unknown command /{} (try /help)", name)),
    }
}

fn is_known(name: &str) -> bool {
    matches!(
        name,
        "new" | "list" | "ls" | "clear" | "reconnect" | "status" | "help" | "?" | "quit" | "exit" | "q"
    )
}

/// Resolve a `/list` position (1-based) or a conversation id prefix.
pub fn resolve_conversation(snapshot: &ChatSnapshot, target: &str) -> Option<String> {
    if let Ok(position) = target.parse::<usize>() {
        return position
            .checked_sub(1)
            .and_then(|idx| snapshot.conversations.get(idx))
            .map(|c| c.id.clone());
    }

    let mut matches = snapshot
        .conversations
        .iter()
        .filter(|c| c.id.starts_with(target));
    match (matches.next(), matches.next()) {
        (Some(only), None) => Some(only.id.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use medchat_core::{Conversation, Message};

    #[test]
    fn test_plain_text_is_a_message() {
        assert_eq!(
            parse("  j'ai de la fièvre  "),
            Ok(Input::Message("j'ai de la fièvre".to_string()))
        );
        assert_eq!(parse("   "), Ok(Input::Empty));
    }

    #[test]
    fn test_commands() {
        assert_eq!(parse("/new"), Ok(Input::New));
        assert_eq!(parse("/consult"), Ok(Input::Consult(None)));
        assert_eq!(
            parse("/consult  bronchite aiguë "),
            Ok(Input::Consult(Some("bronchite aiguë".to_string())))
        );
        assert_eq!(parse("/switch 2"), Ok(Input::Switch("2".to_string())));
        assert_eq!(parse("/rm abc"), Ok(Input::Delete("abc".to_string())));
        assert_eq!(parse("/q"), Ok(Input::Quit));
    }

    #[test]
    fn test_command_errors() {
        assert!(parse("/switch").unwrap_err().contains("needs a conversation"));
        assert!(parse("/new now").unwrap_err().contains("takes no argument"));
        assert!(parse("/bogus").unwrap_err().contains("unknown command"));
    }

    #[test]
    fn test_resolve_conversation() {
        let now = Utc::now();
        let mut first = Conversation::new(Message::synthetic("bonjour", now), now);
        first.id = "aaa-1".to_string();
        let mut second = Conversation::new(Message::synthetic("bonjour", now), now);
        second.id = "aab-2".to_string();
        let snapshot = ChatSnapshot {
            conversations: vec![first, second],
            ..Default::default()
        };

        assert_eq!(resolve_conversation(&snapshot, "2").as_deref(), Some("aab-2"));
        assert_eq!(resolve_conversation(&snapshot, "0"), None);
        assert_eq!(resolve_conversation(&snapshot, "3"), None);
        assert_eq!(resolve_conversation(&snapshot, "aaa").as_deref(), Some("aaa-1"));
        // Ambiguous prefix
        assert_eq!(resolve_conversation(&snapshot, "aa"), None);
    }
}
