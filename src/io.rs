use async_compression::tokio::bufread::{GzipDecoder, ZstdDecoder};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, BufReader};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::{CsvParser, CsvResult, ParserOptions};

/// Byte source after optional decompression.
pub type ByteReader = Box<dyn AsyncRead + Unpin + Send>;

#[derive(Debug, Clone, Default)]
pub struct SourceMeta {
    /// e.g. "application/gzip" or "text/csv"
    pub content_type: String,
    /// e.g. "gzip", "zstd", or empty
    pub content_encoding: String,
    /// just the key/filename (used for extension fallback)
    pub name_hint: String,
}

impl SourceMeta {
    /// Best-effort meta from the file extension only.
    pub fn for_path(path: &Path) -> Self {
        let name_hint = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let (content_type, content_encoding) = match ext {
            "gz" => ("application/gzip", "gzip"),
            "zst" => ("application/zstd", "zstd"),
            _ => ("text/csv", ""),
        };
        Self {
            content_type: content_type.into(),
            content_encoding: content_encoding.into(),
            name_hint,
        }
    }

    // decompression choice: encoding -> type -> extension
    fn is_gzip(&self) -> bool {
        self.has_encoding("gzip")
            || matches!(
                self.content_type.to_ascii_lowercase().as_str(),
                "application/gzip" | "application/x-gzip"
            )
            || self.name_hint.ends_with(".gz")
    }

    fn is_zstd(&self) -> bool {
        self.has_encoding("zstd")
            || self.content_type.eq_ignore_ascii_case("application/zstd")
            || self.name_hint.ends_with(".zst")
    }

    fn has_encoding(&self, name: &str) -> bool {
        self.content_encoding
            .split(',')
            .any(|s| s.trim().eq_ignore_ascii_case(name))
    }
}

/// Wraps a raw reader with decompression chosen from `meta`.
/// Character decoding happens later, inside the parser.
pub fn build_reader<R>(raw: R, meta: SourceMeta) -> (ByteReader, SourceMeta)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    // Use a larger buffer for fewer syscalls (1 MiB)
    let buf = BufReader::with_capacity(1 << 20, raw);
    let reader: ByteReader = if meta.is_gzip() {
        debug!(name = %meta.name_hint, "gzip source");
        Box::new(GzipDecoder::new(buf))
    } else if meta.is_zstd() {
        debug!(name = %meta.name_hint, "zstd source");
        Box::new(ZstdDecoder::new(buf))
    } else {
        Box::new(buf)
    };
    (reader, meta)
}

/// Build a reader from a local file path (meta from extension).
pub async fn reader_from_path(path: impl AsRef<Path>) -> CsvResult<(ByteReader, SourceMeta)> {
    let path = path.as_ref();
    let file = File::open(path).await?;
    Ok(build_reader(file, SourceMeta::for_path(path)))
}

/// Opens `path` and returns a parser over its (decompressed) bytes.
pub async fn parse_path(
    path: impl AsRef<Path>,
    options: ParserOptions,
) -> CsvResult<CsvParser<ReaderStream<ByteReader>>> {
    let (reader, _meta) = reader_from_path(path).await?;
    Ok(CsvParser::from_reader(reader, options))
}
