use std::sync::Arc;

use crate::{CsvResult, ParsedRow, ParserOptions, RowParser, Scanner};

const BOM: char = '\u{feff}';

/// Chunk parser: owns the text carried over between calls and drains as many
/// complete rows as the buffer holds.
///
/// Splitting the same input differently never duplicates or drops a row.
#[derive(Debug)]
pub struct Parser {
    options: Arc<ParserOptions>,
    pending: String,
    started: bool,
}

impl Parser {
    pub fn new(options: Arc<ParserOptions>) -> Self {
        Self {
            options,
            pending: String::new(),
            started: false,
        }
    }

    /// Text that could not be resolved into rows yet.
    pub fn remainder(&self) -> &str {
        &self.pending
    }

    /// Appends `text` to the pending buffer and returns every complete row.
    /// With `has_more_data == false` the buffer is flushed: a final row without
    /// a terminator is returned and an open quote is an error.
    pub fn parse(&mut self, text: &str, has_more_data: bool) -> CsvResult<Vec<Vec<String>>> {
        let mut line = std::mem::take(&mut self.pending);
        line.push_str(text);
        if !self.started && !line.is_empty() {
            self.started = true;
            if line.starts_with(BOM) {
                line.drain(..BOM.len_utf8());
            }
        }
        if line.is_empty() {
            return Ok(Vec::new());
        }

        let row_parser = RowParser::new(&self.options);
        let mut scanner = Scanner::new(&line, &self.options, has_more_data);
        let mut rows = Vec::new();
        loop {
            match row_parser.parse(&mut scanner)? {
                ParsedRow::Row(row) => rows.push(row),
                ParsedRow::Skipped => continue,
                ParsedRow::Pending => break,
            }
        }
        self.pending = scanner.line().to_string();
        Ok(rows)
    }
}
