//! Text chunking strategies.
//!
//! All strategies share the flush-and-continue rule: after a full chunk is
//! flushed, the next buffer starts with the last `overlap` characters of the
//! flushed content (empty when overlap is 0). Lengths are measured in
//! characters, not bytes, so multi-byte text never splits mid-scalar.
//! Chunks that are empty after trimming are dropped without advancing the
//! sequence number.

use std::path::Path;

use anyhow::Result;
use tracing::warn;

use crate::parse::FileType;

/// Chunk boundary selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Heading,
    Paragraph,
    Fixed,
    Function,
}

impl Strategy {
    /// Parse a config value; unknown names warn and fall back to `fixed`.
    pub fn parse(name: &str) -> Strategy {
        match name {
            "heading" => Strategy::Heading,
            "paragraph" => Strategy::Paragraph,
            "fixed" => Strategy::Fixed,
            "function" => Strategy::Function,
            other => {
                warn!("unknown chunk strategy '{}', using fixed", other);
                Strategy::Fixed
            }
        }
    }

    /// Strategy auto-selection for a detected file type.
    pub fn for_file(ftype: FileType, configured: Strategy) -> Strategy {
        match ftype {
            FileType::Markdown => Strategy::Heading,
            FileType::Code => Strategy::Function,
            FileType::Text => Strategy::Paragraph,
            _ => configured,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Heading => "heading",
            Strategy::Paragraph => "paragraph",
            Strategy::Fixed => "fixed",
            Strategy::Function => "function",
        }
    }
}

/// Split `text` into chunks under the given strategy.
pub fn chunk_text(text: &str, strategy: Strategy, chunk_size: usize, overlap: usize) -> Vec<String> {
    match strategy {
        Strategy::Heading => {
            chunk_on_lines(text, overlap, chunk_size, |line| line.starts_with('#'))
        }
        Strategy::Function => chunk_on_lines(text, overlap, 2 * chunk_size, |line| {
            is_function_boundary(line.trim_start())
        }),
        Strategy::Paragraph => chunk_paragraphs(text, chunk_size, overlap),
        Strategy::Fixed => chunk_fixed(text, chunk_size, overlap),
    }
}

/// Stage chunks as `NN.txt` files in `dir`, returning the count written.
///
/// Pad width grows with the chunk count (min 2), so a 150-chunk document
/// numbers `001.txt`..`150.txt` while small documents keep `01.txt`.
pub fn write_chunks(dir: &Path, chunks: &[String]) -> Result<usize> {
    for (i, chunk) in chunks.iter().enumerate() {
        std::fs::write(dir.join(chunk_file_name(i + 1, chunks.len())), chunk)?;
    }
    Ok(chunks.len())
}

/// File name for 1-based chunk `index` out of `total`.
pub fn chunk_file_name(index: usize, total: usize) -> String {
    let width = total.to_string().len().max(2);
    format!("{:0width$}.txt", index, width = width)
}

/// Line-accumulating chunker shared by the heading and function strategies:
/// flush when `is_boundary` matches a line (keeping the line in the next
/// buffer), and defensively when the buffer reaches `hard_limit` characters.
fn chunk_on_lines<F>(text: &str, overlap: usize, hard_limit: usize, is_boundary: F) -> Vec<String>
where
    F: Fn(&str) -> bool,
{
    let mut chunks = Vec::new();
    let mut buffer: Vec<String> = Vec::new();
    let mut buffer_len = 0usize;

    for line in text.split('\n') {
        if is_boundary(line) && buffer_len > 0 {
            let chunk = buffer.join("\n");
            if !chunk.trim().is_empty() {
                chunks.push(chunk.clone());
            }
            buffer = if overlap > 0 {
                vec![tail_chars(&chunk, overlap), line.to_string()]
            } else {
                vec![line.to_string()]
            };
            buffer_len = buffer.iter().map(|b| b.chars().count()).sum();
            continue;
        }

        buffer_len += line.chars().count() + 1;
        buffer.push(line.to_string());

        if buffer_len >= hard_limit {
            let chunk = buffer.join("\n");
            if !chunk.trim().is_empty() {
                chunks.push(chunk.clone());
            }
            buffer = if overlap > 0 {
                vec![tail_chars(&chunk, overlap)]
            } else {
                Vec::new()
            };
            buffer_len = buffer.iter().map(|b| b.chars().count()).sum();
        }
    }

    if !buffer.is_empty() {
        let chunk = buffer.join("\n");
        if !chunk.trim().is_empty() {
            chunks.push(chunk);
        }
    }

    chunks
}

fn chunk_paragraphs(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    let mut buffer_len = 0usize;

    for para in &split_paragraphs(text) {
        let para_len = para.chars().count();

        if !buffer.is_empty() && buffer_len + para_len + 2 > chunk_size {
            chunks.push(buffer.clone());
            if overlap > 0 {
                let carried = tail_chars(&buffer, overlap);
                buffer = format!("{}\n\n{}", carried, para);
            } else {
                buffer = para.to_string();
            }
        } else if !buffer.is_empty() {
            buffer.push_str("\n\n");
            buffer.push_str(para);
        } else {
            buffer = para.to_string();
        }
        buffer_len = buffer.chars().count();
    }

    if !buffer.trim().is_empty() {
        chunks.push(buffer);
    }

    chunks
}

/// Paragraphs are runs of non-blank lines separated by one or more
/// whitespace-only lines.
fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n").trim().to_string());
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n").trim().to_string());
    }
    paragraphs.retain(|p| !p.is_empty());
    paragraphs
}

fn chunk_fixed(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if chunk_size == 0 {
        return Vec::new();
    }
    // Overlap below chunk_size guarantees forward progress.
    let effective_overlap = if chunk_size > 1 {
        overlap.min(chunk_size - 1)
    } else {
        0
    };

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < len {
        let end = (start + chunk_size).min(len);
        let chunk: String = chars[start..end].iter().collect();
        if !chunk.trim().is_empty() {
            chunks.push(chunk);
        }
        if end == len {
            break;
        }
        start = end - effective_overlap;
    }
    chunks
}

fn is_function_boundary(line: &str) -> bool {
    const PREFIXES: &[&str] = &[
        "def ", "class ", "function ", "func ", "fn ", "pub fn ", "export ",
    ];
    if PREFIXES.iter().any(|p| line.starts_with(p)) {
        return true;
    }
    is_bash_function_header(line)
}

/// Matches `name()` or `name() {` shell function headers.
fn is_bash_function_header(line: &str) -> bool {
    let Some(idx) = line.find("()") else {
        return false;
    };
    let name = &line[..idx];
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return false;
    }
    let rest = line[idx + 2..].trim();
    rest.is_empty() || rest == "{"
}

/// Last `n` characters of `s` (the whole string when shorter).
fn tail_chars(s: &str, n: usize) -> String {
    let count = s.chars().count();
    if count <= n {
        return s.to_string();
    }
    s.chars().skip(count - n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_splits_on_headers() {
        let text = "# One\nalpha body text\n# Two\nbeta body text\n# Three\ngamma body text";
        let chunks = chunk_text(text, Strategy::Heading, 1000, 0);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].starts_with("# One"));
        assert!(chunks[1].starts_with("# Two"));
        assert!(chunks[2].starts_with("# Three"));
    }

    #[test]
    fn test_heading_respects_size_limit() {
        let text = "no headers here\n".repeat(100);
        let chunks = chunk_text(&text, Strategy::Heading, 200, 0);
        assert!(chunks.len() > 1);
    }

    #[test]
    fn test_heading_overlap_carries_tail() {
        let text = "# One\nalpha\n# Two\nbeta";
        let chunks = chunk_text(text, Strategy::Heading, 1000, 5);
        assert_eq!(chunks.len(), 2);
        let tail = tail_chars(&chunks[0], 5);
        assert!(chunks[1].starts_with(&tail));
    }

    #[test]
    fn test_paragraph_groups_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text(text, Strategy::Paragraph, 1000, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("First paragraph."));
        assert!(chunks[0].contains("Third paragraph."));
    }

    #[test]
    fn test_paragraph_flushes_on_limit() {
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = chunk_text(text, Strategy::Paragraph, 30, 0);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(!c.trim().is_empty());
        }
    }

    #[test]
    fn test_paragraph_blank_lines_with_spaces() {
        let text = "one\n   \ntwo";
        let chunks = chunk_text(text, Strategy::Paragraph, 4, 0);
        assert_eq!(chunks, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_fixed_exact_slices() {
        let text = "abcdefghij";
        let chunks = chunk_text(text, Strategy::Fixed, 4, 0);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_fixed_overlap() {
        let text = "abcdefghij";
        let chunks = chunk_text(text, Strategy::Fixed, 4, 2);
        assert_eq!(chunks[0], "abcd");
        assert_eq!(chunks[1], "cdef");
    }

    #[test]
    fn test_fixed_overlap_clamped_below_size() {
        // overlap >= chunk_size must still make progress
        let text = "abcdef";
        let chunks = chunk_text(text, Strategy::Fixed, 3, 10);
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0], "abc");
    }

    #[test]
    fn test_fixed_multibyte_safe() {
        let text = "héllo wörld çà va bien";
        let chunks = chunk_text(text, Strategy::Fixed, 5, 1);
        assert!(!chunks.is_empty());
        // Re-joining loses nothing but the overlap duplication.
        assert!(chunks.concat().contains("héllo"));
    }

    #[test]
    fn test_function_boundaries() {
        let text = "fn alpha() {\n    body\n}\npub fn beta() {\n    body\n}\ndef gamma():\n    pass";
        let chunks = chunk_text(text, Strategy::Function, 1000, 0);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[1].starts_with("pub fn beta"));
        assert!(chunks[2].starts_with("def gamma"));
    }

    #[test]
    fn test_function_bash_header() {
        assert!(is_function_boundary("my_func() {"));
        assert!(is_function_boundary("my_func()"));
        assert!(!is_function_boundary("call_site(arg)"));
        assert!(!is_function_boundary("() {"));
    }

    #[test]
    fn test_function_defensive_flush() {
        let text = "x\n".repeat(2000);
        let chunks = chunk_text(&text, Strategy::Function, 100, 0);
        assert!(chunks.len() > 1);
    }

    #[test]
    fn test_empty_input_no_chunks() {
        for s in [Strategy::Heading, Strategy::Paragraph, Strategy::Fixed, Strategy::Function] {
            assert!(chunk_text("", s, 100, 10).is_empty());
            assert!(chunk_text("   \n\n  ", s, 100, 10).is_empty());
        }
    }

    #[test]
    fn test_unknown_strategy_falls_back_to_fixed() {
        assert_eq!(Strategy::parse("bogus"), Strategy::Fixed);
        assert_eq!(Strategy::parse("heading"), Strategy::Heading);
    }

    #[test]
    fn test_chunk_file_name_widths() {
        assert_eq!(chunk_file_name(1, 3), "01.txt");
        assert_eq!(chunk_file_name(12, 99), "12.txt");
        assert_eq!(chunk_file_name(7, 150), "007.txt");
    }

    #[test]
    fn test_write_chunks() {
        let tmp = tempfile::TempDir::new().unwrap();
        let chunks = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let n = write_chunks(tmp.path(), &chunks).unwrap();
        assert_eq!(n, 3);
        assert_eq!(std::fs::read_to_string(tmp.path().join("01.txt")).unwrap(), "one");
        assert_eq!(std::fs::read_to_string(tmp.path().join("03.txt")).unwrap(), "three");
    }

    #[test]
    fn test_deterministic() {
        let text = "# A\nalpha\n# B\nbeta\n# C\ngamma";
        let a = chunk_text(text, Strategy::Heading, 50, 10);
        let b = chunk_text(text, Strategy::Heading, 50, 10);
        assert_eq!(a, b);
    }
}
