//! Slash commands. These bypass the gate and are answered at once.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Force a full reindex.
    Index,
    Search(String),
    VoiceOn,
    VoiceOff,
    /// Answer this one message with the secondary backend.
    Secondary(String),
}

/// Parse a command from message text. Returns `None` for ordinary text
/// and unknown commands. A `@botname` suffix on the command is ignored.
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;
    let (head, arg) = match rest.split_once(char::is_whitespace) {
        Some((head, arg)) => (head, arg.trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or(head).to_lowercase();

    match name.as_str() {
        "index" => Some(Command::Index),
        "search" => Some(Command::Search(arg.to_string())),
        "voiceon" => Some(Command::VoiceOn),
        "voiceoff" => Some(Command::VoiceOff),
        "ds" => Some(Command::Secondary(arg.to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        assert_eq!(parse_command("/index"), Some(Command::Index));
        assert_eq!(
            parse_command("/search  field theory "),
            Some(Command::Search("field theory".into()))
        );
        assert_eq!(parse_command("/voiceon"), Some(Command::VoiceOn));
        assert_eq!(parse_command("/VoiceOff"), Some(Command::VoiceOff));
        assert_eq!(
            parse_command("/ds what is love?"),
            Some(Command::Secondary("what is love?".into()))
        );
    }

    #[test]
    fn bot_suffix_is_ignored() {
        assert_eq!(parse_command("/index@cadence_bot"), Some(Command::Index));
        assert_eq!(
            parse_command("/search@cadence_bot rust"),
            Some(Command::Search("rust".into()))
        );
    }

    #[test]
    fn ordinary_text_and_unknown_commands_are_not_commands() {
        assert_eq!(parse_command("hello /index"), None);
        assert_eq!(parse_command("/unknown thing"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn missing_arguments_are_empty() {
        assert_eq!(parse_command("/search"), Some(Command::Search(String::new())));
        assert_eq!(parse_command("/ds"), Some(Command::Secondary(String::new())));
    }
}
