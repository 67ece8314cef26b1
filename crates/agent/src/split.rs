//! Splitting long replies into transport-sized parts.

pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Split `text` into parts of at most `max_chars` characters, cutting at
/// the last newline inside each window when there is one.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut parts = Vec::new();
    let mut rest: Vec<char> = text.chars().collect();

    while rest.len() > max_chars {
        let window = &rest[..max_chars];
        let cut = window
            .iter()
            .rposition(|c| *c == '\n')
            .filter(|&pos| pos > 0)
            .unwrap_or(max_chars);
        let part: String = rest[..cut].iter().collect();
        let part = part.trim_end().to_string();
        if !part.is_empty() {
            parts.push(part);
        }
        let skip = if rest.get(cut) == Some(&'\n') { cut + 1 } else { cut };
        rest.drain(..skip);
    }

    let tail: String = rest.into_iter().collect();
    if !tail.trim().is_empty() || parts.is_empty() {
        parts.push(tail);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_part() {
        assert_eq!(split_message("hello", 10), vec!["hello"]);
        assert_eq!(split_message("", 10), vec![""]);
    }

    #[test]
    fn prefers_newline_boundaries() {
        let text = "first line\nsecond line\nthird";
        let parts = split_message(text, 15);
        assert_eq!(parts, vec!["first line", "second line", "third"]);
    }

    #[test]
    fn hard_cuts_without_newlines() {
        let text = "a".repeat(25);
        let parts = split_message(&text, 10);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.chars().count() <= 10));
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn parts_never_exceed_limit() {
        let text = "word ".repeat(3000) + "\n" + &"x".repeat(5000);
        let parts = split_message(&text, MAX_MESSAGE_CHARS);
        assert!(parts.iter().all(|p| p.chars().count() <= MAX_MESSAGE_CHARS));
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "ж".repeat(12);
        let parts = split_message(&text, 5);
        assert_eq!(parts, vec!["жжжжж", "жжжжж", "жж"]);
    }
}
