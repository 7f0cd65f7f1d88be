use memchr::{memchr, memchr2, memchr_iter};
use std::ops::Range;

/// Per-line comment stripper.
///
/// The only state carried from one line to the next is whether a `/* ... */`
/// block is currently open. Everything else is decided on the line itself.
#[derive(Debug, Default)]
pub(crate) struct CommentStripper {
    in_block_comment: bool,
}

impl CommentStripper {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn in_block_comment(&self) -> bool {
        self.in_block_comment
    }

    /// Normalize one raw line: returns `None` for blank lines and lines that
    /// are entirely a comment, otherwise the trimmed line without any
    /// trailing comment.
    pub(crate) fn normalize(&mut self, raw_line: &str) -> Option<String> {
        let line = raw_line.trim();

        if self.in_block_comment {
            if line.ends_with("*/") {
                self.in_block_comment = false;
            }
            return None;
        }

        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            return None;
        }
        if line.starts_with("/*") {
            // a block comment that also closes on this line does not carry over
            let closes_here = line.len() >= 4 && line.ends_with("*/");
            self.in_block_comment = !closes_here;
            return None;
        }
        if line.starts_with("//") {
            return None;
        }

        let strings = string_literals(line.as_bytes());
        let end = comment_start(line.as_bytes(), &strings).unwrap_or(line.len());
        let cleaned = line[..end].trim();
        if cleaned.is_empty() {
            None
        } else {
            Some(cleaned.to_string())
        }
    }
}

/// Find the byte ranges of all string literals ("..." and '...') in a line.
/// An opening quote without a matching closing quote is not a string.
pub(crate) fn string_literals(data: &[u8]) -> Vec<Range<usize>> {
    let mut literals = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let Some(rel_pos) = memchr2(b'"', b'\'', &data[pos..]) else {
            break;
        };
        let start = pos + rel_pos;
        let quote = data[start];
        if let Some(rel_end) = memchr(quote, &data[start + 1..]) {
            let end = start + 1 + rel_end + 1;
            literals.push(start..end);
            pos = end;
        } else {
            // unterminated: pass the quote through unchanged
            pos = start + 1;
        }
    }
    literals
}

fn inside(literals: &[Range<usize>], pos: usize) -> bool {
    literals.iter().any(|range| range.contains(&pos))
}

/// Position where a trailing comment starts, if the line has one.
/// Recognized: `#...` anywhere, `;...` and `//...` when preceded by whitespace.
fn comment_start(data: &[u8], literals: &[Range<usize>]) -> Option<usize> {
    let hash = memchr_iter(b'#', data).find(|&pos| !inside(literals, pos));

    let semicolon = memchr_iter(b';', data)
        .filter(|&pos| !inside(literals, pos))
        .find(|&pos| pos > 0 && pos + 1 < data.len() && matches!(data[pos - 1], b' ' | b'\t'));

    let slashes = memchr::memmem::find_iter(data, b"//")
        .filter(|&pos| !inside(literals, pos))
        .find(|&pos| pos > 0 && matches!(data[pos - 1], b' ' | b'\t'));

    [hash, semicolon, slashes].into_iter().flatten().min()
}
