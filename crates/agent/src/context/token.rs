//! Token estimation utilities.
//!
//! Uses a character-based heuristic: about 4 characters per token, counted
//! in characters rather than bytes so Cyrillic and CJK text is not
//! overestimated fourfold.

use cadence_core::message::Message;

/// Estimate the token count for a string. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Estimate tokens for a single message including per-message overhead
/// for role name and delimiters.
pub fn estimate_message_tokens(message: &Message) -> usize {
    4 + estimate_tokens(&message.content)
}

pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Longest prefix of `text` that fits in `tokens`, cut on a char boundary.
pub fn truncate_to_tokens(text: &str, tokens: usize) -> &str {
    let max_chars = tokens.saturating_mul(4);
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn counts_chars_not_bytes() {
        assert_eq!(estimate_tokens("привет"), 2);
    }

    #[test]
    fn message_includes_overhead() {
        let msgs = vec![Message::user("test"), Message::assistant("world")];
        assert_eq!(estimate_message_tokens(&msgs[0]), 5);
        assert_eq!(estimate_messages_tokens(&msgs), 11);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_to_tokens("абвгдежз", 1), "абвг");
        assert_eq!(truncate_to_tokens("short", 10), "short");
        assert_eq!(truncate_to_tokens("anything", 0), "");
    }
}
