use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::channel::mpsc;
use futures::stream::{self, Stream, StreamExt};
use futures::SinkExt;
use tokio::io::AsyncRead;
use tokio_util::codec::Decoder;
use tokio_util::io::ReaderStream;
use tracing::{debug, trace, warn};

use crate::{
    BoxError, CsvError, CsvResult, HeaderResolver, Parser, ParserOptions, Resolved, Row,
    RowOutcome, RowPipeline, RowTransform, RowValidation, RowValidator, TextDecoder,
};

// Rows handled from one chunk before giving the scheduler a turn.
const YIELD_EVERY_ROWS: usize = 100;

/// What a [`CsvParser`] reports, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    /// Final header list. At most once, before any row event.
    Headers(Vec<Option<String>>),
    Data(Row),
    /// Rejected by strict column handling or by the validator.
    /// `row_number` is the row count including this row.
    Invalid {
        row: Row,
        row_number: usize,
        reason: Option<String>,
    },
    /// Terminal event; never follows an error.
    End { row_count: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounters {
    /// Rows delivered as `Data` or `Invalid`.
    pub row_count: usize,
    /// Raw rows after skipped lines, excluding the header row.
    pub parsed_row_count: usize,
    /// Every raw row the chunk parser produced.
    pub parsed_line_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Collecting,
    Limited,
    Ended,
    Errored,
}

/// In-memory chunk source used by [`CsvParser::from_chunks`].
pub type ChunkStream = stream::Iter<std::vec::IntoIter<io::Result<Bytes>>>;

/// Stream orchestrator: pulls byte chunks from `S`, decodes and tokenizes them,
/// resolves headers and runs the row pipeline.
///
/// The source is polled only when every row of the previous chunk has been
/// handed out, so a consumer that stops calling [`CsvParser::next_event`]
/// stops all reading. The source is dropped as soon as the row limit is hit,
/// the input ends or an error occurs; later input is never read.
pub struct CsvParser<S> {
    source: Option<S>,
    options: Arc<ParserOptions>,
    decoder: TextDecoder,
    undecoded: BytesMut,
    parser: Parser,
    headers: HeaderResolver,
    pipeline: RowPipeline,
    rows: VecDeque<Vec<String>>,
    events: VecDeque<ParseEvent>,
    error: Option<CsvError>,
    counters: RowCounters,
    state: State,
    headers_emitted: bool,
    source_done: bool,
    rows_since_yield: usize,
}

impl<S> CsvParser<S> {
    pub fn new(source: S, options: ParserOptions) -> Self {
        let options = Arc::new(options);
        Self {
            source: Some(source),
            decoder: TextDecoder::new(options.encoding()),
            undecoded: BytesMut::new(),
            parser: Parser::new(Arc::clone(&options)),
            headers: HeaderResolver::new(Arc::clone(&options)),
            pipeline: RowPipeline::new(),
            rows: VecDeque::new(),
            events: VecDeque::new(),
            error: None,
            counters: RowCounters::default(),
            state: State::Collecting,
            headers_emitted: false,
            source_done: false,
            rows_since_yield: 0,
            options,
        }
    }

    /// Synchronous transform. Returning `Ok(None)` drops the row.
    pub fn transform<F>(mut self, f: F) -> Self
    where
        F: FnMut(Row) -> Result<Option<Row>, BoxError> + Send + 'static,
    {
        self.pipeline.set_transform(RowTransform::sync(f));
        self
    }

    pub fn transform_async<F, Fut>(mut self, f: F) -> Self
    where
        F: FnMut(Row) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<Row>, BoxError>> + Send + 'static,
    {
        self.pipeline.set_transform(RowTransform::from_async(f));
        self
    }

    /// Synchronous validator returning `bool`, `(bool, reason)` or a
    /// [`RowValidation`].
    pub fn validate<F, V>(mut self, f: F) -> Self
    where
        F: FnMut(&Row) -> Result<V, BoxError> + Send + 'static,
        V: Into<RowValidation>,
    {
        self.pipeline.set_validator(RowValidator::sync(f));
        self
    }

    pub fn validate_async<F, Fut, V>(mut self, f: F) -> Self
    where
        F: FnMut(Row) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, BoxError>> + Send + 'static,
        V: Into<RowValidation>,
    {
        self.pipeline.set_validator(RowValidator::from_async(f));
        self
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Headers, once known.
    pub fn headers(&self) -> Option<&[Option<String>]> {
        self.headers.headers()
    }

    pub fn counters(&self) -> RowCounters {
        self.counters
    }
}

impl<R> CsvParser<ReaderStream<R>>
where
    R: AsyncRead + Unpin,
{
    /// Reads `reader` in chunks of [`ParserOptions::chunk_capacity`] bytes.
    pub fn from_reader(reader: R, options: ParserOptions) -> Self {
        let capacity = options.chunk_capacity();
        CsvParser::new(ReaderStream::with_capacity(reader, capacity), options)
    }
}

impl CsvParser<ChunkStream> {
    pub fn from_chunks<I, C>(chunks: I, options: ParserOptions) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Bytes>,
    {
        let chunks: Vec<io::Result<Bytes>> = chunks.into_iter().map(|c| Ok(c.into())).collect();
        CsvParser::new(stream::iter(chunks), options)
    }

    pub fn from_text(text: &str, options: ParserOptions) -> Self {
        Self::from_chunks([Bytes::copy_from_slice(text.as_bytes())], options)
    }
}

impl CsvParser<ChannelSource> {
    /// Push-style input. [`RowWriter::write`] waits while `capacity` chunks
    /// are queued and the consumer is not pulling events.
    pub fn channel(options: ParserOptions, capacity: usize) -> (RowWriter, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        let ended = Arc::new(AtomicBool::new(false));
        let writer = RowWriter {
            tx,
            ended: Arc::clone(&ended),
        };
        let source = ChannelSource {
            rx,
            ended,
            done: false,
        };
        (writer, CsvParser::new(source, options))
    }
}

impl<S, B> CsvParser<S>
where
    S: Stream<Item = io::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    /// Next event, or `None` once the stream has ended or failed.
    ///
    /// An error is returned once; every later call returns `None`.
    pub async fn next_event(&mut self) -> Option<CsvResult<ParseEvent>> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Some(Ok(event));
            }
            if let Some(err) = self.error.take() {
                return Some(Err(err));
            }
            if matches!(self.state, State::Ended | State::Errored) {
                return None;
            }
            if let Err(err) = self.step().await {
                warn!(error = %err, row_count = self.counters.row_count, "csv stream failed");
                self.state = State::Errored;
                self.rows.clear();
                self.source = None;
                self.error = Some(err);
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = CsvResult<ParseEvent>> {
        stream::unfold(self, |mut parser| async move {
            let event = parser.next_event().await?;
            Some((event, parser))
        })
    }

    async fn step(&mut self) -> CsvResult<()> {
        self.check_and_emit_headers();
        if self.state == State::Collecting && self.limit_reached() {
            debug!(max_rows = self.options.max_rows(), "row limit reached");
            self.state = State::Limited;
            self.rows.clear();
        }
        if self.state == State::Collecting {
            if let Some(row) = self.rows.pop_front() {
                self.rows_since_yield += 1;
                if self.rows_since_yield >= YIELD_EVERY_ROWS {
                    self.rows_since_yield = 0;
                    tokio::task::yield_now().await;
                }
                return self.process_row(row).await;
            }
            if !self.source_done {
                return self.pull_chunk().await;
            }
        }
        self.finish();
        Ok(())
    }

    async fn pull_chunk(&mut self) -> CsvResult<()> {
        self.rows_since_yield = 0;
        let next = match self.source.as_mut() {
            Some(source) => source.next().await,
            None => None,
        };
        let rows = match next {
            Some(chunk) => {
                let chunk = chunk?;
                let bytes = chunk.as_ref();
                trace!(len = bytes.len(), "chunk received");
                self.undecoded.extend_from_slice(bytes);
                let Some(text) = self.decoder.decode(&mut self.undecoded)? else {
                    return Ok(());
                };
                self.parser.parse(&text, true)?
            }
            None => {
                self.source_done = true;
                let mut tail = String::new();
                while let Some(text) = self.decoder.decode_eof(&mut self.undecoded)? {
                    tail.push_str(&text);
                }
                self.parser.parse(&tail, false)?
            }
        };
        self.rows.extend(rows);
        Ok(())
    }

    async fn process_row(&mut self, raw: Vec<String>) -> CsvResult<()> {
        let skip_rows = self.options.skip_rows();
        let counters = &mut self.counters;
        counters.parsed_line_count += 1;
        if counters.parsed_line_count <= self.options.skip_lines() {
            return Ok(());
        }
        counters.row_count += 1;
        counters.parsed_row_count += 1;

        let resolved = self.headers.resolve(raw)?;
        self.check_and_emit_headers();
        let row = match resolved {
            Resolved::Header => {
                self.counters.row_count -= 1;
                self.counters.parsed_row_count -= 1;
                return Ok(());
            }
            _ if self.counters.parsed_row_count <= skip_rows => {
                self.counters.row_count -= 1;
                return Ok(());
            }
            Resolved::Invalid { row, reason } => {
                self.events.push_back(ParseEvent::Invalid {
                    row,
                    row_number: self.counters.row_count,
                    reason: Some(reason),
                });
                return Ok(());
            }
            Resolved::Valid(row) => row,
        };

        match self.pipeline.transform_and_validate(row).await? {
            RowOutcome::Emit(row) => self.events.push_back(ParseEvent::Data(row)),
            RowOutcome::Invalid { row, reason } => self.events.push_back(ParseEvent::Invalid {
                row,
                row_number: self.counters.row_count,
                reason,
            }),
            RowOutcome::Suppressed => self.counters.row_count -= 1,
        }
        Ok(())
    }

    fn check_and_emit_headers(&mut self) {
        if self.headers_emitted {
            return;
        }
        if let Some(headers) = self.headers.headers() {
            debug!(?headers, "headers discovered");
            self.events.push_back(ParseEvent::Headers(headers.to_vec()));
            self.headers_emitted = true;
        }
    }

    fn limit_reached(&self) -> bool {
        let max_rows = self.options.max_rows();
        max_rows > 0 && self.counters.row_count >= max_rows
    }

    fn finish(&mut self) {
        debug!(row_count = self.counters.row_count, "csv stream ended");
        self.state = State::Ended;
        self.source = None;
        self.events.push_back(ParseEvent::End {
            row_count: self.counters.row_count,
        });
    }
}

/// Sending half of [`CsvParser::channel`].
///
/// Dropping the writer without calling [`RowWriter::end`] fails the parse
/// with [`io::ErrorKind::UnexpectedEof`].
pub struct RowWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    ended: Arc<AtomicBool>,
}

impl RowWriter {
    /// Queues one chunk; waits while the channel is full.
    ///
    /// Fails with [`io::ErrorKind::BrokenPipe`] once the parser has stopped
    /// reading: it was dropped, hit its row limit, or failed.
    pub async fn write(&mut self, chunk: impl Into<Bytes>) -> CsvResult<()> {
        self.send(Ok(chunk.into())).await
    }

    /// Hands an upstream read failure to the parser, which fails with it.
    pub async fn fail(&mut self, err: io::Error) -> CsvResult<()> {
        self.send(Err(err)).await
    }

    /// Signals end of input.
    pub fn end(mut self) {
        self.ended.store(true, Ordering::Release);
        self.tx.close_channel();
    }

    async fn send(&mut self, item: io::Result<Bytes>) -> CsvResult<()> {
        self.tx.send(item).await.map_err(|_| {
            CsvError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "csv parser stopped reading",
            ))
        })
    }
}

/// Receiving half of [`CsvParser::channel`].
pub struct ChannelSource {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    ended: Arc<AtomicBool>,
    done: bool,
}

impl Stream for ChannelSource {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match ready!(self.rx.poll_next_unpin(cx)) {
            Some(item) => Poll::Ready(Some(item)),
            None => {
                self.done = true;
                if self.ended.load(Ordering::Acquire) {
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "csv writer dropped before end",
                    ))))
                }
            }
        }
    }
}
