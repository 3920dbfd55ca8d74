use crate::ParserOptions;

/// A classified span of the pending buffer. `end` is exclusive.
///
/// Tokens are one character, except a CR LF pair which is a single
/// row-delimiter token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
}

impl<'a> Token<'a> {
    fn as_char(&self) -> Option<char> {
        let mut chars = self.text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(c),
            _ => None,
        }
    }

    pub fn is_row_delimiter(&self) -> bool {
        matches!(self.text, "\n" | "\r" | "\r\n")
    }

    pub fn is_carriage_return(&self) -> bool {
        self.text == "\r"
    }

    pub fn is_delimiter(&self, options: &ParserOptions) -> bool {
        self.as_char().is_some_and(|c| options.is_delimiter(c))
    }

    pub fn is_quote(&self, options: &ParserOptions) -> bool {
        options.quote().is_some() && self.as_char() == options.quote()
    }

    pub fn is_escape(&self, options: &ParserOptions) -> bool {
        options.escape_char().is_some() && self.as_char() == options.escape_char()
    }

    pub fn is_comment(&self, options: &ParserOptions) -> bool {
        options.comment().is_some() && self.as_char() == options.comment()
    }
}
