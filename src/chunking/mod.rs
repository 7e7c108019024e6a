//! Character-window chunker
//!
//! Splits extracted document text into overlapping fixed-size character
//! windows. Input is sanitized first so identical documents always produce
//! identical chunk boundaries.

use regex::Regex;
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

/// Default window size in characters
pub const DEFAULT_CHUNK_SIZE: usize = 800;
/// Default overlap between consecutive windows
pub const DEFAULT_OVERLAP: usize = 120;

/// A contiguous slice of a source document's normalized text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Logical document identifier (relative path)
    pub source: String,
    /// 0-based position within the source
    pub chunk_index: usize,
    /// Trimmed window text
    pub text: String,
}

impl Chunk {
    /// Stable identifier `source::chunk_index`
    pub fn id(&self) -> String {
        chunk_id(&self.source, self.chunk_index)
    }
}

/// Build the stable id for a (source, chunk index) pair
pub fn chunk_id(source: &str, chunk_index: usize) -> String {
    format!("{}::{}", source, chunk_index)
}

fn whitespace_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[ \t\x0B\x0C\u{00A0}\u{2000}-\u{200A}\u{202F}\u{205F}\u{3000}]{2,}")
            .expect("whitespace pattern is valid")
    })
}

fn is_zero_width(c: char) -> bool {
    matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}')
}

/// Normalize text before chunking
///
/// NFC composition, `\r\n`/`\r` to `\n`, zero-width characters removed,
/// control characters other than `\n` and `\t` removed, and runs of two or
/// more horizontal whitespace characters collapsed to a single space.
pub fn sanitize(text: &str) -> String {
    let nfc: String = text.nfc().collect();
    let unified = nfc.replace("\r\n", "\n").replace('\r', "\n");

    let filtered: String = unified
        .chars()
        .filter(|&c| !is_zero_width(c))
        .filter(|&c| !c.is_control() || c == '\n' || c == '\t')
        .collect();

    whitespace_runs().replace_all(&filtered, " ").into_owned()
}

/// Split `text` into overlapping character windows
///
/// `chunk_size == 0` falls back to [`DEFAULT_CHUNK_SIZE`]; an overlap that is
/// not smaller than the window is clamped to a quarter of it. Blank input
/// yields no chunks, which callers treat as "remove this source".
pub fn chunk_by_chars(source: &str, text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let cleaned: Vec<char> = sanitize(text).chars().collect();
    let mut out = Vec::new();
    if cleaned.is_empty() {
        return out;
    }

    let chunk_size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    let overlap = if overlap >= chunk_size {
        chunk_size / 4
    } else {
        overlap
    };

    let len = cleaned.len();
    let mut start = 0usize;
    let mut chunk_index = 0usize;
    loop {
        let end = len.min(start + chunk_size);
        let window: String = cleaned[start..end].iter().collect();
        let slice = window.trim();
        if !slice.is_empty() {
            out.push(Chunk {
                source: source.to_string(),
                chunk_index,
                text: slice.to_string(),
            });
            chunk_index += 1;
        }
        if end >= len {
            break;
        }
        start = end - overlap;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_windows() {
        let chunks = chunk_by_chars("doc.txt", "ABCDEFGHIJ", 4, 2);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["ABCD", "CDEF", "EFGH", "GHIJ"]);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert_eq!(c.source, "doc.txt");
        }
        assert_eq!(chunks[2].id(), "doc.txt::2");
    }

    #[test]
    fn test_blank_input_yields_nothing() {
        assert!(chunk_by_chars("a", "", 10, 2).is_empty());
        assert!(chunk_by_chars("a", "   \n\t  \u{200B}", 10, 2).is_empty());
    }

    #[test]
    fn test_overlap_clamped() {
        // overlap >= size is clamped to size / 4 = 1
        let chunks = chunk_by_chars("s", "ABCDEFGH", 4, 9);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["ABCD", "DEFG", "GH"]);
    }

    #[test]
    fn test_zero_chunk_size_uses_default() {
        let text = "x".repeat(DEFAULT_CHUNK_SIZE + 10);
        let chunks = chunk_by_chars("s", &text, 0, 0);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text.chars().count(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_whitespace_only_windows_skipped_without_gaps() {
        let text = format!("ab{}cd", " ".repeat(1));
        let chunks = chunk_by_chars("s", &text, 2, 0);
        let indices: Vec<usize> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(chunks.iter().all(|c| !c.text.trim().is_empty()));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("a\r\nb\rc"), "a\nb\nc");
        assert_eq!(sanitize("a\u{200B}b\u{FEFF}c"), "abc");
        assert_eq!(sanitize("a\u{0007}b\tc"), "ab\tc");
        assert_eq!(sanitize("a    b\u{00A0}\u{3000}c"), "a b c");
        assert_eq!(sanitize("keep\n\nnewlines"), "keep\n\nnewlines");
        // decomposed e + combining acute composes to a single char
        assert_eq!(sanitize("e\u{0301}"), "\u{00E9}");
    }

    #[test]
    fn test_multibyte_characters_counted_as_chars() {
        let chunks = chunk_by_chars("s", "ÄÖÜäöü", 3, 0);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["ÄÖÜ", "äöü"]);
    }
}
