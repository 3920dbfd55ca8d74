use std::fmt;
use std::sync::Arc;

use encoding_rs::Encoding;

use crate::headers::check_unique;
use crate::{CsvError, CsvResult};

/// Maps the first row of the input to the final header list.
pub type HeaderTransformFn = Arc<dyn Fn(&[String]) -> Vec<Option<String>> + Send + Sync>;

/// Where column names come from.
#[derive(Clone, Default)]
pub enum HeaderSpec {
    /// No headers; rows stay positional.
    #[default]
    None,
    /// The first row is the header row.
    FirstRow,
    /// Names supplied up front. `None` drops that column.
    Explicit(Vec<Option<String>>),
    /// The first row is handed to a function that returns the names.
    Transform(HeaderTransformFn),
}

impl HeaderSpec {
    /// Explicit headers without gaps.
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        HeaderSpec::Explicit(names.into_iter().map(|n| Some(n.into())).collect())
    }

    pub fn transform<F>(f: F) -> Self
    where
        F: Fn(&[String]) -> Vec<Option<String>> + Send + Sync + 'static,
    {
        HeaderSpec::Transform(Arc::new(f))
    }
}

impl fmt::Debug for HeaderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderSpec::None => write!(f, "None"),
            HeaderSpec::FirstRow => write!(f, "FirstRow"),
            HeaderSpec::Explicit(names) => f.debug_tuple("Explicit").field(names).finish(),
            HeaderSpec::Transform(_) => write!(f, "Transform(<fn>)"),
        }
    }
}

/// Validated, immutable parser configuration.
///
/// Build one with [`ParserOptions::builder`]; the default value parses
/// comma-separated UTF-8 with `"` quoting and no headers.
#[derive(Debug, Clone)]
pub struct ParserOptions {
    delimiters: Vec<char>,
    quote: Option<char>,
    escape: Option<char>,
    comment: Option<char>,
    ltrim: bool,
    rtrim: bool,
    headers: HeaderSpec,
    rename_headers: bool,
    discard_unmapped_columns: bool,
    strict_column_handling: bool,
    ignore_empty: bool,
    max_rows: usize,
    skip_lines: usize,
    skip_rows: usize,
    encoding: &'static Encoding,
    chunk_capacity: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            delimiters: vec![','],
            quote: Some('"'),
            escape: None,
            comment: None,
            ltrim: false,
            rtrim: false,
            headers: HeaderSpec::None,
            rename_headers: false,
            discard_unmapped_columns: false,
            strict_column_handling: false,
            ignore_empty: false,
            max_rows: 0,
            skip_lines: 0,
            skip_rows: 0,
            encoding: encoding_rs::UTF_8,
            // 1 MiB reads keep syscalls down on large files
            chunk_capacity: 1 << 20,
        }
    }
}

impl ParserOptions {
    pub fn builder() -> ParserOptionsBuilder {
        ParserOptionsBuilder::default()
    }

    /// The primary delimiter; the one quoted in parse errors.
    pub fn delimiter(&self) -> char {
        self.delimiters[0]
    }

    pub fn delimiters(&self) -> &[char] {
        &self.delimiters
    }

    pub fn is_delimiter(&self, c: char) -> bool {
        self.delimiters.contains(&c)
    }

    pub fn quote(&self) -> Option<char> {
        self.quote
    }

    /// Escape character inside quoted fields; falls back to the quote.
    pub fn escape_char(&self) -> Option<char> {
        self.escape.or(self.quote)
    }

    pub fn comment(&self) -> Option<char> {
        self.comment
    }

    pub fn supports_comments(&self) -> bool {
        self.comment.is_some()
    }

    pub fn ltrim(&self) -> bool {
        self.ltrim
    }

    pub fn rtrim(&self) -> bool {
        self.rtrim
    }

    pub fn headers(&self) -> &HeaderSpec {
        &self.headers
    }

    pub fn rename_headers(&self) -> bool {
        self.rename_headers
    }

    pub fn discard_unmapped_columns(&self) -> bool {
        self.discard_unmapped_columns
    }

    pub fn strict_column_handling(&self) -> bool {
        self.strict_column_handling
    }

    pub fn ignore_empty(&self) -> bool {
        self.ignore_empty
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    pub fn limit_rows(&self) -> bool {
        self.max_rows > 0
    }

    pub fn skip_lines(&self) -> usize {
        self.skip_lines
    }

    pub fn skip_rows(&self) -> usize {
        self.skip_rows
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }
}

/// Builder for [`ParserOptions`]. Validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct ParserOptionsBuilder {
    delimiters: Vec<String>,
    encoding_label: Option<String>,
    options: ParserOptions,
}

impl Default for ParserOptionsBuilder {
    fn default() -> Self {
        Self {
            delimiters: vec![",".to_string()],
            encoding_label: None,
            options: ParserOptions::default(),
        }
    }
}

impl ParserOptionsBuilder {
    /// Field delimiter. Must be exactly one character.
    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiters = vec![delimiter.into()];
        self
    }

    /// Several accepted delimiters; the first is the primary one.
    pub fn delimiters<I, S>(mut self, delimiters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.delimiters = delimiters.into_iter().map(Into::into).collect();
        self
    }

    /// `None` disables quoting entirely.
    pub fn quote(mut self, quote: Option<char>) -> Self {
        self.options.quote = quote;
        self
    }

    pub fn escape(mut self, escape: char) -> Self {
        self.options.escape = Some(escape);
        self
    }

    pub fn comment(mut self, comment: char) -> Self {
        self.options.comment = Some(comment);
        self
    }

    pub fn trim(mut self, trim: bool) -> Self {
        self.options.ltrim = trim;
        self.options.rtrim = trim;
        self
    }

    pub fn ltrim(mut self, ltrim: bool) -> Self {
        self.options.ltrim = ltrim;
        self
    }

    pub fn rtrim(mut self, rtrim: bool) -> Self {
        self.options.rtrim = rtrim;
        self
    }

    pub fn headers(mut self, headers: HeaderSpec) -> Self {
        self.options.headers = headers;
        self
    }

    pub fn rename_headers(mut self, rename: bool) -> Self {
        self.options.rename_headers = rename;
        self
    }

    pub fn discard_unmapped_columns(mut self, discard: bool) -> Self {
        self.options.discard_unmapped_columns = discard;
        self
    }

    pub fn strict_column_handling(mut self, strict: bool) -> Self {
        self.options.strict_column_handling = strict;
        self
    }

    pub fn ignore_empty(mut self, ignore: bool) -> Self {
        self.options.ignore_empty = ignore;
        self
    }

    /// Stop after this many delivered rows. 0 means no limit.
    pub fn max_rows(mut self, max_rows: usize) -> Self {
        self.options.max_rows = max_rows;
        self
    }

    /// Physical rows dropped before header discovery.
    pub fn skip_lines(mut self, skip_lines: usize) -> Self {
        self.options.skip_lines = skip_lines;
        self
    }

    /// Logical rows dropped after the header row.
    pub fn skip_rows(mut self, skip_rows: usize) -> Self {
        self.options.skip_rows = skip_rows;
        self
    }

    pub fn encoding(mut self, encoding: &'static Encoding) -> Self {
        self.options.encoding = encoding;
        self.encoding_label = None;
        self
    }

    /// WHATWG encoding label, e.g. `"latin1"` or `"utf-16le"`.
    pub fn encoding_label(mut self, label: impl Into<String>) -> Self {
        self.encoding_label = Some(label.into());
        self
    }

    pub fn chunk_capacity(mut self, capacity: usize) -> Self {
        self.options.chunk_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> CsvResult<ParserOptions> {
        let mut options = self.options;

        if self.delimiters.is_empty() {
            return Err(CsvError::InvalidOption(
                "at least one delimiter is required".into(),
            ));
        }
        options.delimiters = self
            .delimiters
            .iter()
            .map(|d| {
                let mut chars = d.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(c),
                    _ => Err(CsvError::InvalidOption(
                        "delimiter option must be one character long".into(),
                    )),
                }
            })
            .collect::<CsvResult<Vec<_>>>()?;

        if let Some(label) = self.encoding_label {
            options.encoding = Encoding::for_label(label.trim().as_bytes())
                .ok_or_else(|| CsvError::InvalidOption(format!("unknown encoding: {label}")))?;
        }

        if let HeaderSpec::Explicit(names) = &options.headers {
            check_unique(names)?;
        }

        Ok(options)
    }
}
