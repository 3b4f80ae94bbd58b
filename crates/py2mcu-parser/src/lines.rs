//! Logical-line splitting.
//!
//! The splitter produces a copy of the source with the same byte length in
//! which comments and backslash continuations are blanked out, plus the list
//! of logical lines. Newlines inside brackets and triple-quoted strings do
//! not end a logical line, so the expression parser can treat every
//! newline it sees as plain whitespace. Offsets into the copy are offsets
//! into the source.

use alloc::string::String;
use alloc::vec::Vec;

use py2mcu_ast::{CompileError, CompileResult, Span};

/// Maps byte offsets to line and column numbers.
#[derive(Clone, Debug)]
pub(crate) struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub(crate) fn new(source: &str) -> Self {
        let mut starts = alloc::vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    pub(crate) fn span(&self, source: &str, offset: usize) -> Span {
        let offset = offset.min(source.len());
        let line = self.starts.partition_point(|&s| s <= offset).max(1);
        let start = self.starts[line - 1];
        let column = source
            .get(start..offset)
            .map_or(offset - start, |text| text.chars().count());
        Span::new(offset, line, column + 1)
    }
}

/// One logical line of source.
#[derive(Clone, Debug)]
pub(crate) struct LogicalLine {
    /// Offset of the first non-blank character.
    pub start: usize,
    /// Offset just past the last character, before the newline.
    pub end: usize,
    /// Indentation width, with tabs advancing to the next multiple of 8.
    pub indent: usize,
    /// Text of the last comment on the line, without the `#`.
    pub comment: Option<String>,
}

pub(crate) struct SourceText {
    pub clean: String,
    pub lines: Vec<LogicalLine>,
    pub index: LineIndex,
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\x0c' | b'\r')
}

pub(crate) fn split_lines(source: &str) -> CompileResult<SourceText> {
    let index = LineIndex::new(source);
    let bytes = source.as_bytes();
    let mut clean = bytes.to_vec();
    let mut lines = Vec::new();
    let err = |msg: &str, offset: usize| CompileError::parse(msg, index.span(source, offset));

    let mut i = 0;
    while i < bytes.len() {
        // Start of a physical line outside any logical line.
        let mut indent = 0;
        while i < bytes.len() && is_space(bytes[i]) {
            match bytes[i] {
                b'\t' => indent = (indent / 8 + 1) * 8,
                b' ' => indent += 1,
                _ => {}
            }
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        match bytes[i] {
            b'\n' => {
                i += 1;
                continue;
            }
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    clean[i] = b' ';
                    i += 1;
                }
                continue;
            }
            b'\\' if bytes.get(i + 1) == Some(&b'\n') => {
                clean[i] = b' ';
                clean[i + 1] = b' ';
                i += 2;
                continue;
            }
            _ => {}
        }

        let start = i;
        let mut depth: usize = 0;
        let mut comment = None;
        let mut end = bytes.len();
        while i < bytes.len() {
            let b = bytes[i];
            match b {
                b'#' => {
                    let from = i;
                    while i < bytes.len() && bytes[i] != b'\n' {
                        clean[i] = b' ';
                        i += 1;
                    }
                    comment = Some(String::from(source[from + 1..i].trim_end_matches('\r')));
                    continue;
                }
                b'\\' => {
                    let next = if bytes.get(i + 1) == Some(&b'\r') { i + 2 } else { i + 1 };
                    if bytes.get(next) == Some(&b'\n') {
                        for byte in &mut clean[i..=next] {
                            *byte = b' ';
                        }
                        i = next + 1;
                        continue;
                    }
                    return Err(err("unexpected character after line continuation character", i));
                }
                b'\'' | b'"' => {
                    i = skip_string(bytes, i).map_err(|(msg, at)| err(msg, at))?;
                    continue;
                }
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| err("unmatched closing bracket", i))?;
                }
                b'\r' => clean[i] = b' ',
                b'\n' if depth == 0 => {
                    end = i;
                    i += 1;
                    break;
                }
                _ => {}
            }
            i += 1;
        }
        if depth > 0 {
            return Err(err("unexpected end of file inside brackets", start));
        }
        lines.push(LogicalLine {
            start,
            end,
            indent,
            comment,
        });
    }

    let clean = String::from_utf8(clean)
        .map_err(|_| CompileError::parse("source is not valid UTF-8", Span::default()))?;
    Ok(SourceText {
        clean,
        lines,
        index,
    })
}

/// Skip a string literal starting at the quote at `i`, returning the offset
/// just past its closing quote.
fn skip_string(bytes: &[u8], i: usize) -> Result<usize, (&'static str, usize)> {
    let quote = bytes[i];
    let triple = bytes.get(i + 1) == Some(&quote) && bytes.get(i + 2) == Some(&quote);
    let mut j = if triple { i + 3 } else { i + 1 };
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'\n' if !triple => return Err(("unterminated string literal", i)),
            q if q == quote => {
                if !triple {
                    return Ok(j + 1);
                }
                if bytes.get(j + 1) == Some(&quote) && bytes.get(j + 2) == Some(&quote) {
                    return Ok(j + 3);
                }
                j += 1;
            }
            _ => j += 1,
        }
    }
    Err(if triple {
        ("unterminated triple-quoted string literal", i)
    } else {
        ("unterminated string literal", i)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(source: &str) -> Vec<String> {
        let text = split_lines(source).unwrap();
        text.lines
            .iter()
            .map(|l| String::from(text.clean[l.start..l.end].trim_end()))
            .collect()
    }

    #[test]
    fn test_comments_are_blanked_and_kept() {
        let text = split_lines("x = 1  # @#define uint8_t\n").unwrap();
        assert_eq!(text.clean.len(), "x = 1  # @#define uint8_t\n".len());
        assert_eq!(text.lines.len(), 1);
        assert_eq!(text.lines[0].comment.as_deref(), Some(" @#define uint8_t"));
        assert!(!text.clean.contains('#'));
    }

    #[test]
    fn test_brackets_join_lines() {
        assert_eq!(texts("f(1,\n  2)\ny = 3\n").len(), 2);
    }

    #[test]
    fn test_hash_inside_string_is_not_a_comment() {
        let text = split_lines("s = \"a # b\"\n").unwrap();
        assert!(text.lines[0].comment.is_none());
        assert!(text.clean.contains("a # b"));
    }

    #[test]
    fn test_triple_quoted_string_spans_lines() {
        assert_eq!(texts("\"\"\"\none\ntwo\n\"\"\"\nx = 1\n").len(), 2);
    }

    #[test]
    fn test_indent_with_tabs() {
        let text = split_lines("if x:\n\ty = 1\n").unwrap();
        assert_eq!(text.lines[1].indent, 8);
    }

    #[test]
    fn test_unterminated_string() {
        assert!(split_lines("s = 'abc\n").is_err());
    }

    #[test]
    fn test_span_columns_count_chars() {
        let source = "é = 1\n";
        let index = LineIndex::new(source);
        let span = index.span(source, source.find('=').unwrap());
        assert_eq!((span.line, span.column), (1, 3));
    }
}
