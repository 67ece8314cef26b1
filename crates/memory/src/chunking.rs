//! Splitting documents into overlapping windows and hashing their content.

use sha2::{Digest, Sha256};

/// Window parameters for [`chunk_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpec {
    pub size: usize,
    pub overlap: usize,
}

impl ChunkSpec {
    pub fn new(size: usize, overlap: usize) -> Self {
        Self { size, overlap }
    }

    /// Distance between window starts. Never zero.
    fn step(&self) -> usize {
        self.size.saturating_sub(self.overlap).max(1)
    }
}

impl Default for ChunkSpec {
    fn default() -> Self {
        Self::new(900, 120)
    }
}

/// Split `text` into windows of `spec.size` characters starting every
/// `size - overlap` characters. Windows that are blank after trimming are
/// dropped. Sizes count Unicode scalar values, never splitting a character.
pub fn chunk_text(text: &str, spec: ChunkSpec) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if spec.size == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + spec.size).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        if !chunk.trim().is_empty() {
            chunks.push(chunk);
        }
        start += spec.step();
    }
    chunks
}

/// Hex-encoded SHA-256 of a document's content.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_with_overlap() {
        let chunks = chunk_text("abcdefghij", ChunkSpec::new(6, 2));
        assert_eq!(chunks, vec!["abcdef", "efghij", "ij"]);
    }

    #[test]
    fn blank_windows_are_dropped() {
        assert!(chunk_text("     ", ChunkSpec::new(3, 1)).is_empty());
        let chunks = chunk_text("ab      ", ChunkSpec::new(3, 0));
        assert_eq!(chunks, vec!["ab "]);
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk_text("hello", ChunkSpec::default()), vec!["hello"]);
    }

    #[test]
    fn multibyte_text_is_split_on_characters() {
        let chunks = chunk_text("привет мир", ChunkSpec::new(6, 0));
        assert_eq!(chunks, vec!["привет", " мир"]);
    }

    #[test]
    fn overlap_equal_to_size_still_advances() {
        let chunks = chunk_text("abc", ChunkSpec::new(2, 2));
        assert_eq!(chunks, vec!["ab", "bc", "c"]);
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        assert_eq!(content_hash("a"), content_hash("a"));
        assert_ne!(content_hash("a"), content_hash("b"));
        assert_eq!(content_hash("").len(), 64);
    }
}
