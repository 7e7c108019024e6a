//! Source-labelled context block for the generation prompt

use crate::index::SearchHit;

/// Returned instead of an empty string so prompts stay well-formed
pub const NO_MATCHES: &str = "(no matches)";

/// Concatenate hits as `\n[source#chunk] (score 0.123)\n<text>` within
/// `max_chars` characters
///
/// Stops before a header that would not fit. The last text may be cut to
/// fill the remaining budget exactly.
pub fn build_context(hits: &[SearchHit], max_chars: usize) -> String {
    if hits.is_empty() {
        return NO_MATCHES.to_string();
    }

    let mut out = String::with_capacity(max_chars.min(8192));
    let mut len = 0usize;

    for hit in hits {
        let header = format!("\n[{}#{}] (score {:.3})\n", hit.source, hit.chunk_index, hit.score);
        let header_len = header.chars().count();
        if len + header_len > max_chars {
            break;
        }
        out.push_str(&header);
        len += header_len;

        let remain = max_chars - len;
        let text_len = hit.text.chars().count();
        if text_len <= remain {
            out.push_str(&hit.text);
            len += text_len;
        } else {
            out.extend(hit.text.chars().take(remain));
            break;
        }
    }

    out
}
