use crate::{ParserOptions, Token};

/// Cursor over the pending buffer of one chunk-parse call.
///
/// The scanner knows nothing about rows; it only classifies what comes next.
/// `has_more_data` tells it whether the buffer can still grow, which decides
/// if a trailing carriage return is a row delimiter or the first half of CRLF.
pub struct Scanner<'a> {
    line: &'a str,
    cursor: usize,
    has_more_data: bool,
    options: &'a ParserOptions,
}

impl<'a> Scanner<'a> {
    pub fn new(line: &'a str, options: &'a ParserOptions, has_more_data: bool) -> Self {
        Self {
            line,
            cursor: 0,
            has_more_data,
            options,
        }
    }

    pub fn options(&self) -> &'a ParserOptions {
        self.options
    }

    pub fn has_more_data(&self) -> bool {
        self.has_more_data
    }

    pub fn has_more_characters(&self) -> bool {
        self.cursor < self.line.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The whole buffer as currently truncated.
    pub fn line(&self) -> &'a str {
        self.line
    }

    pub fn line_from_cursor(&self) -> &'a str {
        &self.line[self.cursor..]
    }

    fn token_at(&self, start: usize) -> Option<Token<'a>> {
        let rest = &self.line[start..];
        let c = rest.chars().next()?;
        let len = if rest.starts_with("\r\n") {
            2
        } else {
            c.len_utf8()
        };
        Some(Token {
            text: &rest[..len],
            start,
            end: start + len,
        })
    }

    /// First token at or after the cursor that is not whitespace. Row
    /// delimiters and field delimiters are returned even when they are
    /// whitespace characters. `None` means only whitespace is left.
    pub fn next_non_space_token(&self) -> Option<Token<'a>> {
        let options = self.options;
        self.line_from_cursor()
            .char_indices()
            .find(|&(_, c)| {
                c == '\r' || c == '\n' || options.is_delimiter(c) || !c.is_whitespace()
            })
            .and_then(|(offset, _)| self.token_at(self.cursor + offset))
    }

    pub fn next_character_token(&self) -> Option<Token<'a>> {
        self.token_at(self.cursor)
    }

    /// A lone CR at the very end of the buffer while more data may arrive:
    /// the next chunk could start with LF.
    pub fn is_ambiguous_carriage_return(&self, token: &Token<'_>) -> bool {
        self.has_more_data && token.is_carriage_return() && token.end == self.line.len()
    }

    /// Moves past the next row delimiter. Returns `false` when the end of the
    /// line is not known yet.
    pub fn advance_past_line(&mut self) -> bool {
        let rest = self.line_from_cursor();
        match rest.find(['\r', '\n']) {
            Some(idx) => {
                let tail = &rest[idx..];
                if tail == "\r" && self.has_more_data {
                    return false;
                }
                let len = if tail.starts_with("\r\n") { 2 } else { 1 };
                self.cursor += idx + len;
                true
            }
            None if self.has_more_data => false,
            None => {
                self.cursor = self.line.len();
                true
            }
        }
    }

    pub fn advance_to(&mut self, cursor: usize) {
        self.cursor = cursor;
    }

    pub fn advance_to_token(&mut self, token: &Token<'_>) {
        self.cursor = token.start;
    }

    pub fn advance_past_token(&mut self, token: &Token<'_>) {
        self.cursor = token.end;
    }

    /// Drops everything before the cursor; the cursor becomes 0.
    pub fn truncate_to_cursor(&mut self) {
        self.line = &self.line[self.cursor..];
        self.cursor = 0;
    }
}
