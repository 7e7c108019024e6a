//! Text extraction from library files
use super::extension_of;
use crate::error::{LibragError, Result};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Formats that need a document parser rather than a text read
pub const BINARY_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "rtf", "odt", "ppt", "pptx", "xls", "xlsx",
];

/// Turns a file into plain text
///
/// Implementations run on a blocking thread.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String>;
}

/// Reads text-family files as UTF-8 (lossy) and renders CSV rows as
/// `header=value` lines
///
/// Binary office and PDF formats are rejected so a caller can plug in an
/// extractor that understands them.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        let ext = extension_of(path);
        if BINARY_EXTENSIONS.contains(&ext.as_str()) {
            return Err(LibragError::InvalidRequest(format!(
                "No text extractor configured for .{} files: {}",
                ext,
                path.display()
            )));
        }

        let bytes = std::fs::read(path)
            .map_err(|e| LibragError::io(e, format!("Failed to read file: {}", path.display())))?;
        let text = String::from_utf8_lossy(&bytes);

        if ext == "csv" {
            Ok(normalize(&render_csv(&text)))
        } else {
            Ok(normalize(&text))
        }
    }
}

fn horizontal_space() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t\u{00A0}\x0C\x0B]+").expect("space pattern is valid"))
}

fn blank_line_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("newline pattern is valid"))
}

/// Unify line endings, squeeze horizontal whitespace and blank-line runs, trim
fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let squeezed = horizontal_space().replace_all(&unified, " ");
    blank_line_runs()
        .replace_all(&squeezed, "\n\n")
        .trim()
        .to_string()
}

/// Pick the delimiter that occurs most often in the header line
fn sniff_delimiter(text: &str) -> char {
    let first = text.lines().next().unwrap_or_default();
    let count = |c: char| first.chars().filter(|&x| x == c).count();
    let mut best = (',', count(','));
    for candidate in [';', '\t', '|'] {
        let n = count(candidate);
        if n > best.1 {
            best = (candidate, n);
        }
    }
    best.0
}

/// Split CSV text into records of trimmed fields
///
/// Double quotes group a field (delimiters and newlines inside are literal)
/// and `""` inside a quoted field is an escaped quote.
fn parse_csv(text: &str, delim: char) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            c if c == delim => record.push(std::mem::take(&mut field).trim().to_string()),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field).trim().to_string());
                let done = std::mem::take(&mut record);
                if !(done.len() == 1 && done[0].is_empty()) {
                    records.push(done);
                }
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field.trim().to_string());
        records.push(record);
    }
    records
}

fn quote_if_needed(value: &str) -> String {
    let v = value.trim();
    if v.is_empty() || v.chars().any(|c| c.is_whitespace() || c == '|' || c == ':') {
        format!("\"{}\"", v.replace('"', "\\\""))
    } else {
        v.to_string()
    }
}

/// One line per data row: `row N: h1=v1 | h2=v2`
fn render_csv(text: &str) -> String {
    let delim = sniff_delimiter(text);
    let mut records = parse_csv(text, delim).into_iter();
    let Some(headers) = records.next() else {
        return String::new();
    };

    let mut out = String::new();
    for (row, record) in records.enumerate() {
        let cells: Vec<String> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let value = record.get(i).map(String::as_str).unwrap_or("");
                format!("{}={}", h, quote_if_needed(value))
            })
            .collect();
        out.push_str(&format!("row {}: {}\n", row + 1, cells.join(" | ")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  a\t\tb\r\n\r\n\r\n\r\nc  "), "a b\n\nc");
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("a;b;c\n1;2;3"), ';');
        assert_eq!(sniff_delimiter("a\tb\n"), '\t');
        assert_eq!(sniff_delimiter("a,b|c,d"), ',');
        assert_eq!(sniff_delimiter("single"), ',');
    }

    #[test]
    fn test_parse_csv_quotes() {
        let rows = parse_csv("name,quote\n\"Smith, J\",\"said \"\"hi\"\"\"\n", ',');
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec!["Smith, J", "said \"hi\""]);
    }

    #[test]
    fn test_render_csv() {
        let text = "name;food\nAlice;sushi\nBob Lee;\n";
        let rendered = render_csv(text);
        assert_eq!(
            rendered,
            "row 1: name=Alice | food=sushi\nrow 2: name=\"Bob Lee\" | food=\"\"\n"
        );
    }

    #[test]
    fn test_extract_plain_and_binary() {
        let temp_dir = TempDir::new().unwrap();
        let txt = temp_dir.path().join("a.txt");
        std::fs::write(&txt, "hello   world\r\n").unwrap();
        assert_eq!(PlainTextExtractor.extract(&txt).unwrap(), "hello world");

        let pdf = temp_dir.path().join("doc.PDF");
        std::fs::write(&pdf, b"%PDF-1.4").unwrap();
        assert!(matches!(
            PlainTextExtractor.extract(&pdf),
            Err(LibragError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_extract_invalid_utf8_is_lossy() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bytes.txt");
        std::fs::write(&path, [b'o', b'k', 0xFF, b'!']).unwrap();
        let text = PlainTextExtractor.extract(&path).unwrap();
        assert!(text.starts_with("ok"));
        assert!(text.ends_with('!'));
    }
}
