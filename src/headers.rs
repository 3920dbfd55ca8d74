use std::sync::Arc;

use crate::{CsvError, CsvResult, HeaderSpec, HeaderTransformFn, ParserOptions, Record, Row};

/// Result of resolving one raw row against the headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// The row was consumed as the header row.
    Header,
    Valid(Row),
    /// Column count does not fit the headers under strict column handling.
    /// Carries the original fields.
    Invalid { row: Row, reason: String },
}

/// Decides which row holds the headers and turns data rows into records.
///
/// Headers, once set, never change for the life of the resolver.
pub struct HeaderResolver {
    options: Arc<ParserOptions>,
    headers: Option<Vec<Option<String>>>,
    use_first_row: bool,
    transform: Option<HeaderTransformFn>,
    processed_first_row: bool,
}

impl HeaderResolver {
    pub fn new(options: Arc<ParserOptions>) -> Self {
        let (headers, use_first_row, transform) = match options.headers() {
            HeaderSpec::None => (None, false, None),
            HeaderSpec::FirstRow => (None, true, None),
            HeaderSpec::Explicit(names) => (Some(names.clone()), false, None),
            HeaderSpec::Transform(f) => (None, false, Some(Arc::clone(f))),
        };
        Self {
            options,
            headers,
            use_first_row,
            transform,
            processed_first_row: false,
        }
    }

    pub fn headers(&self) -> Option<&[Option<String>]> {
        self.headers.as_deref()
    }

    pub fn resolve(&mut self, row: Vec<String>) -> CsvResult<Resolved> {
        if !self.should_map_row(&row)? {
            return Ok(Resolved::Header);
        }
        self.process_row(row)
    }

    fn should_map_row(&mut self, row: &[String]) -> CsvResult<bool> {
        if self.transform.is_none() && self.options.rename_headers() && !self.processed_first_row
        {
            if self.headers.is_none() {
                return Err(CsvError::RenameHeaders);
            }
            self.processed_first_row = true;
            return Ok(false);
        }
        if self.headers.is_some() {
            return Ok(true);
        }
        let discovered = match &self.transform {
            Some(transform) => Some(transform(row)),
            None if self.use_first_row => Some(row.iter().cloned().map(Some).collect()),
            None => None,
        };
        match discovered {
            Some(headers) => {
                self.set_headers(headers)?;
                Ok(false)
            }
            None => Ok(true),
        }
    }

    fn set_headers(&mut self, headers: Vec<Option<String>>) -> CsvResult<()> {
        check_unique(&headers)?;
        self.headers = Some(headers);
        Ok(())
    }

    fn process_row(&self, row: Vec<String>) -> CsvResult<Resolved> {
        let Some(headers) = &self.headers else {
            return Ok(Resolved::Valid(Row::Fields(row)));
        };
        let expected = headers.len();
        let got = row.len();

        if got > expected && !self.options.discard_unmapped_columns() {
            if !self.options.strict_column_handling() {
                return Err(CsvError::ColumnMismatch { expected, got });
            }
            return Ok(invalid(row, expected, got));
        }
        if got < expected && self.options.strict_column_handling() {
            return Ok(invalid(row, expected, got));
        }

        let mut record = Record::with_capacity(expected);
        let mut values = row.into_iter();
        for header in headers {
            let value = values.next().unwrap_or_default();
            if let Some(name) = header {
                record.insert(name.as_str(), value);
            }
        }
        Ok(Resolved::Valid(Row::Record(record)))
    }
}

fn invalid(row: Vec<String>, expected: usize, got: usize) -> Resolved {
    Resolved::Invalid {
        row: Row::Fields(row),
        reason: format!("Column header mismatch expected: {expected} columns got: {got}"),
    }
}

/// Headers must be unique; gaps and empty names are not compared.
pub(crate) fn check_unique(headers: &[Option<String>]) -> CsvResult<()> {
    let mut seen: Vec<&str> = Vec::with_capacity(headers.len());
    let mut duplicates: Vec<String> = Vec::new();
    for name in headers.iter().flatten().filter(|h| !h.is_empty()) {
        if seen.contains(&name.as_str()) {
            if !duplicates.contains(name) {
                duplicates.push(name.clone());
            }
        } else {
            seen.push(name);
        }
    }
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(CsvError::DuplicateHeaders(duplicates))
    }
}
