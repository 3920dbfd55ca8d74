//! Incremental CSV parsing with header mapping and row pipelines.
//!
//! - Bytes arrive in chunks of any size; rows are tokenized across chunk
//!   boundaries without buffering the whole input.
//! - Headers can come from the first row, an explicit list, or a function.
//! - Each row can be transformed and validated by sync or async callbacks.
//! - [`CsvParser`] is pull-driven: nothing is read from the source until the
//!   consumer asks for the next event.
//!
//! Data shape:
//! - `ParseEvent::{Headers, Data, Invalid, End}`
//! - Rows: [`Row::Fields`] (headerless) or [`Row::Record`] (keyed by header)
#![cfg_attr(docsrs, feature(doc_cfg))]
//
mod codec;
mod headers;
mod io;
mod options;
mod parser;
mod row;
mod row_parser;
mod scanner;
mod stream;
mod token;
mod transform;

pub use crate::codec::TextDecoder;
pub use crate::headers::{HeaderResolver, Resolved};
pub use crate::io::{build_reader, parse_path, reader_from_path, ByteReader, SourceMeta};
pub use crate::options::{HeaderSpec, HeaderTransformFn, ParserOptions, ParserOptionsBuilder};
pub use crate::parser::Parser;
pub use crate::row::{Record, Row};
pub use crate::row_parser::{ParsedRow, RowParser};
pub use crate::scanner::Scanner;
pub use crate::stream::{
    ChannelSource, ChunkStream, CsvParser, ParseEvent, RowCounters, RowWriter,
};
pub use crate::token::Token;
pub use crate::transform::{RowOutcome, RowPipeline, RowTransform, RowValidation, RowValidator};

use thiserror::Error;
use tokio::io::AsyncRead;

/// Boxed error returned by user transform and validate callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result summary of a fully drained parser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseSummary {
    pub row_count: usize,
    pub invalid_count: usize,
    pub headers: Vec<String>,
}

/// Error type returned by this crate.
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("{0}")]
    InvalidOption(String),
    #[error("Parse Error: expected: '{delimiter}' OR new line got: '{found}'. at '{context}'")]
    UnexpectedToken {
        delimiter: char,
        found: String,
        context: String,
    },
    #[error("Parse Error: missing closing: '{quote}' in line: at '{context}'")]
    MissingClosingQuote { quote: char, context: String },
    #[error("Duplicate headers found {}", json_list(.0))]
    DuplicateHeaders(Vec<String>),
    #[error("Unexpected Error: column header mismatch expected: {expected} columns got: {got}")]
    ColumnMismatch { expected: usize, got: usize },
    #[error("Error renaming headers: new headers must be provided in an array")]
    RenameHeaders,
    #[error("Missing required header: {0}")]
    MissingHeader(String),
    #[error("{0}")]
    Callback(BoxError),
    #[error("callback panicked: {0}")]
    CallbackPanic(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type CsvResult<T> = std::result::Result<T, CsvError>;

// Renders names as a compact JSON array: ["a","b"]
fn json_list(names: &[String]) -> String {
    serde_json::to_string(names).unwrap_or_default()
}

/// Drain a parser over `reader` and check that every required header exists.
/// Rows are counted, not kept.
pub async fn process_csv_stream<R>(
    reader: R,
    options: ParserOptions,
    required_headers: &[&str],
) -> CsvResult<ParseSummary>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut parser = CsvParser::from_reader(reader, options);
    let mut summary = ParseSummary::default();
    let mut saw_headers = false;

    while let Some(event) = parser.next_event().await {
        match event? {
            ParseEvent::Headers(headers) => {
                saw_headers = true;
                summary.headers = headers.into_iter().flatten().collect();
                if let Some(missing) = required_headers
                    .iter()
                    .find(|req| !summary.headers.iter().any(|h| h == *req))
                {
                    return Err(CsvError::MissingHeader(missing.to_string()));
                }
            }
            ParseEvent::Data(_) => {}
            ParseEvent::Invalid { .. } => summary.invalid_count += 1,
            ParseEvent::End { row_count } => summary.row_count = row_count,
        }
    }

    if !saw_headers {
        if let Some(first) = required_headers.first() {
            return Err(CsvError::MissingHeader(first.to_string()));
        }
    }
    Ok(summary)
}
