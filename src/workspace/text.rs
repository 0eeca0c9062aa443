//! Applying text edits to document content.
//!
//! Positions are zero-based lines and UTF-16 character offsets. `\n`, `\r\n`
//! and `\r` all end a line. A character offset past the end of its line is
//! clamped to the line end; a line past the end of the document is an error,
//! except for the position `(line_count, 0)` which denotes the end of the text.

use crate::types::{AnyTextEdit, Position, Range};
use thiserror::Error;

/// Why a set of text edits could not be applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TextEditError {
    #[error("line {line} is out of range (document has {line_count} lines)")]
    LineOutOfRange { line: u32, line_count: usize },

    #[error("range {start:?}..{end:?} ends before it starts")]
    InvertedRange { start: Position, end: Position },

    #[error("edits at {first:?} and {second:?} overlap")]
    Overlapping { first: Range, second: Range },
}

/// Byte offsets of every line in a text.
struct LineIndex {
    /// `(start, end)` of each line's content, excluding the terminator.
    lines: Vec<(usize, usize)>,
    len: usize,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let bytes = text.as_bytes();
        let mut lines = Vec::new();
        let mut start = 0;
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\n' => {
                    lines.push((start, i));
                    start = i + 1;
                }
                b'\r' => {
                    lines.push((start, i));
                    if bytes.get(i + 1) == Some(&b'\n') {
                        i += 1;
                    }
                    start = i + 1;
                }
                _ => {}
            }
            i += 1;
        }
        lines.push((start, bytes.len()));
        Self {
            lines,
            len: text.len(),
        }
    }

    fn offset(&self, text: &str, position: Position) -> Result<usize, TextEditError> {
        let line = position.line as usize;
        if line == self.lines.len() && position.character == 0 {
            return Ok(self.len);
        }
        let (start, end) = *self
            .lines
            .get(line)
            .ok_or(TextEditError::LineOutOfRange {
                line: position.line,
                line_count: self.lines.len(),
            })?;

        let mut units = 0u32;
        for (index, ch) in text[start..end].char_indices() {
            if units >= position.character {
                return Ok(start + index);
            }
            units += ch.len_utf16() as u32;
        }
        Ok(end)
    }
}

/// Apply `edits` to `text` and return the new content.
///
/// All ranges refer to the original text. Ranges must not overlap; several
/// inserts at the same position are applied in the order given.
pub fn apply_text_edits(text: &str, edits: &[AnyTextEdit]) -> Result<String, TextEditError> {
    let index = LineIndex::new(text);

    let mut resolved = Vec::with_capacity(edits.len());
    for edit in edits {
        let range = edit.range();
        if range.end < range.start {
            return Err(TextEditError::InvertedRange {
                start: range.start,
                end: range.end,
            });
        }
        let start = index.offset(text, range.start)?;
        let end = index.offset(text, range.end)?;
        resolved.push((start, end, range, edit.new_text()));
    }

    // Stable: same-position inserts keep their order.
    resolved.sort_by_key(|&(start, end, _, _)| (start, end));

    for pair in resolved.windows(2) {
        let (_, prev_end, prev_range, _) = pair[0];
        let (next_start, _, next_range, _) = pair[1];
        if next_start < prev_end {
            return Err(TextEditError::Overlapping {
                first: prev_range,
                second: next_range,
            });
        }
    }

    let mut result = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end, _, new_text) in resolved {
        result.push_str(&text[cursor..start]);
        result.push_str(new_text);
        cursor = end;
    }
    result.push_str(&text[cursor..]);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextEdit;

    fn apply(text: &str, edits: Vec<TextEdit>) -> Result<String, TextEditError> {
        let edits: Vec<AnyTextEdit> = edits.into_iter().map(Into::into).collect();
        apply_text_edits(text, &edits)
    }

    #[test]
    fn test_insert_at_start() {
        let result = apply("hello\nworld", vec![TextEdit::insert(Position::new(0, 0), "X")]);
        assert_eq!(result.unwrap(), "Xhello\nworld");
    }

    #[test]
    fn test_replace_across_lines() {
        let edit = TextEdit::replace(Range::from_coords(0, 3, 1, 2), "-");
        assert_eq!(apply("hello\nworld", vec![edit]).unwrap(), "hel-rld");
    }

    #[test]
    fn test_edits_refer_to_original_text() {
        let edits = vec![
            TextEdit::replace(Range::from_coords(1, 0, 1, 5), "there"),
            TextEdit::delete(Range::from_coords(0, 0, 0, 1)),
        ];
        assert_eq!(apply("hello\nworld", edits).unwrap(), "ello\nthere");
    }

    #[test]
    fn test_same_position_inserts_keep_order() {
        let edits = vec![
            TextEdit::insert(Position::new(0, 1), "a"),
            TextEdit::insert(Position::new(0, 1), "b"),
        ];
        assert_eq!(apply("xy", edits).unwrap(), "xaby");
    }

    #[test]
    fn test_insert_next_to_replacement() {
        let edits = vec![
            TextEdit::replace(Range::from_coords(0, 0, 0, 2), "Z"),
            TextEdit::insert(Position::new(0, 0), "<"),
        ];
        assert_eq!(apply("xy", edits).unwrap(), "<Z");
    }

    #[test]
    fn test_overlap_rejected() {
        let edits = vec![
            TextEdit::replace(Range::from_coords(0, 0, 0, 3), "a"),
            TextEdit::replace(Range::from_coords(0, 2, 0, 4), "b"),
        ];
        assert!(matches!(
            apply("abcdef", edits),
            Err(TextEditError::Overlapping { .. })
        ));
    }

    #[test]
    fn test_line_out_of_range() {
        let edit = TextEdit::insert(Position::new(5, 0), "x");
        assert!(matches!(
            apply("one\ntwo", vec![edit]),
            Err(TextEditError::LineOutOfRange { line: 5, line_count: 2 })
        ));
    }

    #[test]
    fn test_end_of_document_position() {
        let edit = TextEdit::insert(Position::new(2, 0), "three");
        assert_eq!(apply("one\ntwo\n", vec![edit]).unwrap(), "one\ntwo\nthree");

        let edit = TextEdit::insert(Position::new(2, 0), "!");
        assert_eq!(apply("one\ntwo", vec![edit]).unwrap(), "one\ntwo!");
    }

    #[test]
    fn test_character_clamped_to_line_end() {
        let edit = TextEdit::insert(Position::new(0, 99), "!");
        assert_eq!(apply("ab\ncd", vec![edit]).unwrap(), "ab!\ncd");
    }

    #[test]
    fn test_utf16_offsets() {
        // '😀' is two UTF-16 code units.
        let edit = TextEdit::insert(Position::new(0, 3), "|");
        assert_eq!(apply("a😀b", vec![edit]).unwrap(), "a😀|b");
    }

    #[test]
    fn test_crlf_lines() {
        let edit = TextEdit::replace(Range::from_coords(1, 0, 1, 3), "TWO");
        assert_eq!(apply("one\r\ntwo\r\n", vec![edit]).unwrap(), "one\r\nTWO\r\n");
    }

    #[test]
    fn test_inverted_range() {
        let edit = TextEdit::replace(Range::from_coords(0, 3, 0, 1), "x");
        assert!(matches!(
            apply("abcdef", vec![edit]),
            Err(TextEditError::InvertedRange { .. })
        ));
    }
}
