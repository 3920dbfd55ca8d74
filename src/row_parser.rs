use crate::{CsvError, CsvResult, ParserOptions, Scanner, Token};

/// Outcome of one [`RowParser::parse`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedRow {
    /// A complete row; the scanner is truncated past it.
    Row(Vec<String>),
    /// Input was consumed without producing a row (comment line, ignored
    /// empty row). Call again.
    Skipped,
    /// Nothing more can be parsed until more data arrives, or the buffer
    /// holds only whitespace.
    Pending,
}

/// Single-row grammar: turns the text at the scanner's cursor into at most one
/// row of fields. Never returns a partial row.
pub struct RowParser<'o> {
    options: &'o ParserOptions,
}

impl<'o> RowParser<'o> {
    pub fn new(options: &'o ParserOptions) -> Self {
        Self { options }
    }

    pub fn parse(&self, scanner: &mut Scanner<'_>) -> CsvResult<ParsedRow> {
        if self.options.supports_comments() {
            if let Some(token) = scanner.next_character_token() {
                if token.is_comment(self.options) {
                    if !scanner.advance_past_line() {
                        return Ok(ParsedRow::Pending);
                    }
                    scanner.truncate_to_cursor();
                    return Ok(ParsedRow::Skipped);
                }
            }
        }

        if scanner.next_non_space_token().is_none() {
            return Ok(ParsedRow::Pending);
        }
        let Some(columns) = self.parse_columns(scanner)? else {
            return Ok(ParsedRow::Pending);
        };
        if self.options.ignore_empty() && is_empty_row(&columns) {
            return Ok(ParsedRow::Skipped);
        }
        Ok(ParsedRow::Row(columns))
    }

    fn parse_columns(&self, scanner: &mut Scanner<'_>) -> CsvResult<Option<Vec<String>>> {
        let has_more_data = scanner.has_more_data();
        let mut columns = Vec::new();

        let mut current = scanner.next_non_space_token();
        if let Some(token) = current {
            if token.is_delimiter(self.options) {
                // leading delimiter: the first column is empty
                columns.push(String::new());
                current = scanner.next_non_space_token();
            }
        }

        while let Some(token) = current {
            if token.is_row_delimiter() {
                if scanner.is_ambiguous_carriage_return(&token) {
                    return Ok(None);
                }
                scanner.advance_past_token(&token);
                scanner.truncate_to_cursor();
                return Ok(Some(columns));
            }
            if !self.skip_column_parse(scanner, &token, &mut columns) {
                match self.parse_column(scanner)? {
                    Some(column) => columns.push(column),
                    None => return Ok(None),
                }
            }
            current = scanner.next_non_space_token();
        }

        if !has_more_data {
            scanner.truncate_to_cursor();
            return Ok(Some(columns));
        }
        Ok(None)
    }

    // Consumes a delimiter token; pushes an empty column when the delimiter is
    // followed by another delimiter, a row delimiter, or the end of the buffer.
    fn skip_column_parse(
        &self,
        scanner: &mut Scanner<'_>,
        token: &Token<'_>,
        columns: &mut Vec<String>,
    ) -> bool {
        if !token.is_delimiter(self.options) {
            return false;
        }
        scanner.advance_past_token(token);
        match scanner.next_character_token() {
            None => {
                columns.push(String::new());
                true
            }
            Some(next) if next.is_row_delimiter() || next.is_delimiter(self.options) => {
                columns.push(String::new());
                true
            }
            Some(_) => false,
        }
    }

    fn parse_column(&self, scanner: &mut Scanner<'_>) -> CsvResult<Option<String>> {
        if let Some(token) = scanner.next_non_space_token() {
            if token.is_quote(self.options) {
                scanner.advance_to_token(&token);
                return self.parse_quoted(scanner);
            }
        }
        Ok(self.parse_unquoted(scanner))
    }

    fn parse_unquoted(&self, scanner: &mut Scanner<'_>) -> Option<String> {
        if !scanner.has_more_characters() {
            return None;
        }
        let start = scanner.cursor();
        while let Some(token) = scanner.next_character_token() {
            if token.is_delimiter(self.options) || token.is_row_delimiter() {
                break;
            }
            scanner.advance_past_token(&token);
        }
        let raw = &scanner.line()[start..scanner.cursor()];
        Some(self.format(raw))
    }

    fn format(&self, raw: &str) -> String {
        match (self.options.ltrim(), self.options.rtrim()) {
            (true, true) => raw.trim(),
            (true, false) => raw.trim_start(),
            (false, true) => raw.trim_end(),
            (false, false) => raw,
        }
        .to_string()
    }

    fn parse_quoted(&self, scanner: &mut Scanner<'_>) -> CsvResult<Option<String>> {
        if !scanner.has_more_characters() {
            return Ok(None);
        }
        let original_cursor = scanner.cursor();
        let (value, closed) = self.gather_between_quotes(scanner);
        if !closed {
            scanner.advance_to(original_cursor);
            if !scanner.has_more_data() {
                return Err(CsvError::MissingClosingQuote {
                    quote: self.options.quote().unwrap_or('"'),
                    context: preview(scanner.line_from_cursor(), None),
                });
            }
            return Ok(None);
        }
        self.check_for_malformed_column(scanner)?;
        Ok(Some(value))
    }

    fn gather_between_quotes(&self, scanner: &mut Scanner<'_>) -> (String, bool) {
        let options = self.options;
        let mut value = String::new();
        let mut found_opening = false;
        let mut found_closing = false;

        while !found_closing {
            let Some(mut token) = scanner.next_character_token() else {
                break;
            };
            let is_quote = token.is_quote(options);
            if !found_opening && is_quote {
                found_opening = true;
            } else if found_opening {
                if token.is_escape(options) {
                    scanner.advance_past_token(&token);
                    match scanner.next_character_token() {
                        Some(following)
                            if following.is_quote(options) || following.is_escape(options) =>
                        {
                            value.push_str(following.text);
                            token = following;
                        }
                        // the escape is the quote itself and nothing is escaped
                        _ if is_quote => found_closing = true,
                        _ => value.push_str(token.text),
                    }
                } else if is_quote {
                    found_closing = true;
                } else {
                    value.push_str(token.text);
                }
            }
            scanner.advance_past_token(&token);
        }
        (value, found_closing)
    }

    // A closing quote must be followed by a delimiter or a row delimiter.
    fn check_for_malformed_column(&self, scanner: &mut Scanner<'_>) -> CsvResult<()> {
        match scanner.next_non_space_token() {
            Some(token) if token.is_delimiter(self.options) || token.is_row_delimiter() => {
                scanner.advance_to_token(&token);
                Ok(())
            }
            Some(token) => Err(CsvError::UnexpectedToken {
                delimiter: self.options.delimiter(),
                found: token.text.to_string(),
                context: preview(scanner.line_from_cursor(), Some(10)),
            }),
            None => {
                if !scanner.has_more_data() {
                    scanner.advance_past_line();
                }
                Ok(())
            }
        }
    }
}

/// Every field is empty or whitespace.
pub(crate) fn is_empty_row(row: &[String]) -> bool {
    row.iter().all(|field| field.chars().all(char::is_whitespace))
}

fn preview(text: &str, max_chars: Option<usize>) -> String {
    let limit = max_chars.unwrap_or(usize::MAX);
    text.chars()
        .take(limit)
        .map(|c| match c {
            '\r' | '\n' => "\\n".to_string(),
            c => c.to_string(),
        })
        .collect()
}
