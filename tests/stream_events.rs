use bytes::Bytes;
use csv_stream::{
    BoxError, ChunkStream, CsvError, CsvParser, CsvResult, HeaderSpec, ParseEvent,
    ParserOptions, Record, Row,
};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn fields(values: &[&str]) -> Row {
    Row::Fields(values.iter().map(|v| v.to_string()).collect())
}

fn record(pairs: &[(&str, &str)]) -> Row {
    Row::Record(pairs.iter().copied().collect::<Record>())
}

fn names(values: &[&str]) -> Vec<Option<String>> {
    values.iter().map(|v| Some(v.to_string())).collect()
}

fn first_row() -> csv_stream::ParserOptionsBuilder {
    ParserOptions::builder().headers(HeaderSpec::FirstRow)
}

async fn events(parser: CsvParser<ChunkStream>) -> anyhow::Result<Vec<ParseEvent>> {
    Ok(parser.into_stream().try_collect::<Vec<_>>().await?)
}

async fn results(parser: CsvParser<ChunkStream>) -> Vec<CsvResult<ParseEvent>> {
    parser.into_stream().collect().await
}

#[tokio::test]
async fn first_row_becomes_headers() -> anyhow::Result<()> {
    let parser = CsvParser::from_text("first_name,last_name\nFirst1,Last1", first_row().build()?);
    assert_eq!(
        events(parser).await?,
        vec![
            ParseEvent::Headers(names(&["first_name", "last_name"])),
            ParseEvent::Data(record(&[("first_name", "First1"), ("last_name", "Last1")])),
            ParseEvent::End { row_count: 1 },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn extra_column_is_fatal() -> anyhow::Result<()> {
    let out = results(CsvParser::from_text("a,b\n1,2,3", first_row().build()?)).await;
    assert_eq!(out.len(), 2);
    assert!(matches!(out[0], Ok(ParseEvent::Headers(_))));
    let err = out[1].as_ref().unwrap_err();
    assert_eq!(
        err.to_string(),
        "Unexpected Error: column header mismatch expected: 2 columns got: 3"
    );
    Ok(())
}

#[tokio::test]
async fn extra_columns_can_be_discarded() -> anyhow::Result<()> {
    let options = first_row().discard_unmapped_columns(true).build()?;
    let out = events(CsvParser::from_text("a,b\n1,2,3\n", options)).await?;
    assert_eq!(out[1], ParseEvent::Data(record(&[("a", "1"), ("b", "2")])));
    Ok(())
}

#[tokio::test]
async fn skipped_rows_never_reach_callbacks() -> anyhow::Result<()> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let validated = Arc::new(AtomicUsize::new(0));
    let options = first_row().skip_rows(2).build()?;

    let seen_in = Arc::clone(&seen);
    let validated_in = Arc::clone(&validated);
    let parser = CsvParser::from_text("h\n1\n2\n3\n4\n5\n", options)
        .transform(move |row| {
            if let Some(value) = row.as_record().and_then(|r| r.get("h")) {
                seen_in.lock().unwrap().push(value.to_string());
            }
            Ok(Some(row))
        })
        .validate(move |_: &Row| {
            validated_in.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        });

    let out = events(parser).await?;
    let data: Vec<_> = out
        .iter()
        .filter(|e| matches!(e, ParseEvent::Data(_)))
        .collect();
    assert_eq!(data.len(), 3);
    assert_eq!(out.last(), Some(&ParseEvent::End { row_count: 3 }));
    assert_eq!(*seen.lock().unwrap(), vec!["3", "4", "5"]);
    assert_eq!(validated.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn skip_lines_apply_before_header_discovery() -> anyhow::Result<()> {
    let options = first_row().skip_lines(2).build()?;
    let out = events(CsvParser::from_text("report\ngenerated today\nid\n7\n", options)).await?;
    assert_eq!(
        out,
        vec![
            ParseEvent::Headers(names(&["id"])),
            ParseEvent::Data(record(&[("id", "7")])),
            ParseEvent::End { row_count: 1 },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn escaped_quotes_are_kept() -> anyhow::Result<()> {
    let out = events(CsvParser::from_text(
        "\"\"\"Street\"\"\"\n",
        ParserOptions::default(),
    ))
    .await?;
    assert_eq!(out[0], ParseEvent::Data(fields(&["\"Street\""])));
    Ok(())
}

#[tokio::test]
async fn alternating_validation() -> anyhow::Result<()> {
    let mut n = 0;
    let parser = CsvParser::from_text("1\n2\n3\n4\n", ParserOptions::default()).validate(
        move |_: &Row| {
            n += 1;
            Ok((n % 2 == 1, "even row"))
        },
    );
    let out = events(parser).await?;
    assert_eq!(
        out,
        vec![
            ParseEvent::Data(fields(&["1"])),
            ParseEvent::Invalid {
                row: fields(&["2"]),
                row_number: 2,
                reason: Some("even row".into()),
            },
            ParseEvent::Data(fields(&["3"])),
            ParseEvent::Invalid {
                row: fields(&["4"]),
                row_number: 4,
                reason: Some("even row".into()),
            },
            ParseEvent::End { row_count: 4 },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn headers_fire_once_before_rows_with_tiny_chunks() -> anyhow::Result<()> {
    let input = "a,b\n1,2\n3,4\n";
    let chunks: Vec<Bytes> = input.as_bytes().chunks(1).map(Bytes::copy_from_slice).collect();
    let out = events(CsvParser::from_chunks(chunks, first_row().build()?)).await?;
    let header_positions: Vec<usize> = out
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, ParseEvent::Headers(_)))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(header_positions, vec![0]);
    assert_eq!(out.last(), Some(&ParseEvent::End { row_count: 2 }));
    Ok(())
}

#[tokio::test]
async fn strict_short_rows_are_invalid_and_honor_skip_rows() -> anyhow::Result<()> {
    let options = first_row()
        .strict_column_handling(true)
        .skip_rows(1)
        .build()?;
    let out = events(CsvParser::from_text("a,b\n1\n2,3\n4\n", options)).await?;
    assert_eq!(
        out,
        vec![
            ParseEvent::Headers(names(&["a", "b"])),
            ParseEvent::Data(record(&[("a", "2"), ("b", "3")])),
            ParseEvent::Invalid {
                row: fields(&["4"]),
                row_number: 2,
                reason: Some("Column header mismatch expected: 2 columns got: 1".into()),
            },
            ParseEvent::End { row_count: 2 },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn short_rows_are_padded_by_default() -> anyhow::Result<()> {
    let out = events(CsvParser::from_text("a,b\n1\n", first_row().build()?)).await?;
    assert_eq!(out[1], ParseEvent::Data(record(&[("a", "1"), ("b", "")])));
    Ok(())
}

#[tokio::test]
async fn max_rows_stops_pulling_input() -> anyhow::Result<()> {
    let pulls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&pulls);
    let chunks: Vec<std::io::Result<Bytes>> =
        (0..1000).map(|i| Ok(Bytes::from(format!("{i}\n")))).collect();
    let source = stream::iter(chunks).inspect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let options = ParserOptions::builder().max_rows(3).build()?;
    let mut parser = CsvParser::new(source, options);
    let mut out = Vec::new();
    while let Some(event) = parser.next_event().await {
        out.push(event?);
    }
    assert_eq!(
        out,
        vec![
            ParseEvent::Data(fields(&["0"])),
            ParseEvent::Data(fields(&["1"])),
            ParseEvent::Data(fields(&["2"])),
            ParseEvent::End { row_count: 3 },
        ]
    );
    assert_eq!(pulls.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn source_is_not_read_ahead_of_the_consumer() -> anyhow::Result<()> {
    let pulls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&pulls);
    let source = stream::iter(vec![
        Ok::<_, std::io::Error>(Bytes::from_static(b"a\n")),
        Ok(Bytes::from_static(b"b\n")),
        Ok(Bytes::from_static(b"c\n")),
    ])
    .inspect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let mut parser = CsvParser::new(source, ParserOptions::default());

    assert_eq!(parser.next_event().await.transpose()?, Some(ParseEvent::Data(fields(&["a"]))));
    assert_eq!(pulls.load(Ordering::SeqCst), 1);
    assert_eq!(parser.next_event().await.transpose()?, Some(ParseEvent::Data(fields(&["b"]))));
    assert_eq!(pulls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn rename_headers_replaces_first_row() -> anyhow::Result<()> {
    let options = ParserOptions::builder()
        .headers(HeaderSpec::names(["x", "y"]))
        .rename_headers(true)
        .build()?;
    let out = events(CsvParser::from_text("a,b\n1,2\n", options)).await?;
    assert_eq!(
        out,
        vec![
            ParseEvent::Headers(names(&["x", "y"])),
            ParseEvent::Data(record(&[("x", "1"), ("y", "2")])),
            ParseEvent::End { row_count: 1 },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn rename_headers_needs_explicit_names() -> anyhow::Result<()> {
    let options = first_row().rename_headers(true).build()?;
    let out = results(CsvParser::from_text("a,b\n1,2\n", options)).await;
    assert_eq!(out.len(), 1);
    assert_eq!(
        out[0].as_ref().unwrap_err().to_string(),
        "Error renaming headers: new headers must be provided in an array"
    );
    Ok(())
}

#[tokio::test]
async fn header_function_and_gaps() -> anyhow::Result<()> {
    let options = ParserOptions::builder()
        .headers(HeaderSpec::transform(|row| {
            row.iter()
                .map(|h| (h != "skip").then(|| h.to_uppercase()))
                .collect()
        }))
        .build()?;
    let out = events(CsvParser::from_text("a,skip,c\n1,2,3\n", options)).await?;
    assert_eq!(
        out,
        vec![
            ParseEvent::Headers(vec![Some("A".into()), None, Some("C".into())]),
            ParseEvent::Data(record(&[("A", "1"), ("C", "3")])),
            ParseEvent::End { row_count: 1 },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn duplicate_headers_are_fatal() -> anyhow::Result<()> {
    let out = results(CsvParser::from_text("a,b,a\n1,2,3\n", first_row().build()?)).await;
    assert_eq!(out.len(), 1);
    assert_eq!(
        out[0].as_ref().unwrap_err().to_string(),
        r#"Duplicate headers found ["a"]"#
    );
    Ok(())
}

#[tokio::test]
async fn duplicate_header_with_tab_is_json_escaped() -> anyhow::Result<()> {
    let input = "\"a\tb\",\"a\tb\"\n1,2\n";
    let out = results(CsvParser::from_text(input, first_row().build()?)).await;
    assert_eq!(
        out[0].as_ref().unwrap_err().to_string(),
        r#"Duplicate headers found ["a\tb"]"#
    );
    Ok(())
}

#[tokio::test]
async fn comments_and_empty_rows() -> anyhow::Result<()> {
    let options = ParserOptions::builder()
        .comment('#')
        .ignore_empty(true)
        .build()?;
    let out = events(CsvParser::from_text("# note\na,b\n\n,\nc,d\n", options)).await?;
    assert_eq!(
        out,
        vec![
            ParseEvent::Data(fields(&["a", "b"])),
            ParseEvent::Data(fields(&["c", "d"])),
            ParseEvent::End { row_count: 2 },
        ]
    );

    let out = events(CsvParser::from_text("a\n\nb\n", ParserOptions::default())).await?;
    assert_eq!(
        out,
        vec![
            ParseEvent::Data(fields(&["a"])),
            ParseEvent::Data(fields(&[])),
            ParseEvent::Data(fields(&["b"])),
            ParseEvent::End { row_count: 3 },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn async_callbacks_keep_row_order() -> anyhow::Result<()> {
    let parser = CsvParser::from_text("a\nb\nc\n", ParserOptions::default())
        .transform_async(|row: Row| async move {
            tokio::task::yield_now().await;
            let values: Vec<String> = row.values().iter().map(|v| v.to_uppercase()).collect();
            Ok::<_, BoxError>(Some(Row::Fields(values)))
        })
        .validate_async(|row: Row| async move { Ok::<_, BoxError>(row.values() != vec!["B"]) });
    let out = events(parser).await?;
    assert_eq!(
        out,
        vec![
            ParseEvent::Data(fields(&["A"])),
            ParseEvent::Invalid {
                row: fields(&["B"]),
                row_number: 2,
                reason: None,
            },
            ParseEvent::Data(fields(&["C"])),
            ParseEvent::End { row_count: 3 },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn suppressed_rows_are_not_counted() -> anyhow::Result<()> {
    let parser = CsvParser::from_text("1\n2\n3\n4\n", ParserOptions::default()).transform(|row| {
        let keep = row.values().first().is_some_and(|v| *v != "2");
        Ok(keep.then_some(row))
    });
    let out = events(parser).await?;
    assert_eq!(out.len(), 4);
    assert_eq!(out.last(), Some(&ParseEvent::End { row_count: 3 }));
    Ok(())
}

#[tokio::test]
async fn callback_error_ends_the_stream_once() -> anyhow::Result<()> {
    let mut parser =
        CsvParser::from_text("1\n2\n3\n", ParserOptions::default()).transform(|row| {
            if row.values() == vec!["2"] {
                return Err("bad row 2".into());
            }
            Ok(Some(row))
        });
    assert_eq!(parser.next_event().await.transpose()?, Some(ParseEvent::Data(fields(&["1"]))));
    let err = parser.next_event().await.and_then(Result::err);
    assert_eq!(err.map(|e| e.to_string()), Some("bad row 2".to_string()));
    assert!(parser.next_event().await.is_none());
    assert!(parser.next_event().await.is_none());
    Ok(())
}

#[tokio::test]
async fn validator_panic_is_an_error() -> anyhow::Result<()> {
    let parser = CsvParser::from_text("1\n", ParserOptions::default())
        .validate(|_: &Row| -> Result<bool, BoxError> { panic!("validator exploded") });
    let out = results(parser).await;
    assert_eq!(out.len(), 1);
    assert!(matches!(&out[0], Err(CsvError::CallbackPanic(msg)) if msg == "validator exploded"));
    Ok(())
}

#[tokio::test]
async fn malformed_quote_is_reported() -> anyhow::Result<()> {
    let out = results(CsvParser::from_text("\"a\" b,c\n", ParserOptions::default())).await;
    assert_eq!(out.len(), 1);
    assert_eq!(
        out[0].as_ref().unwrap_err().to_string(),
        "Parse Error: expected: ',' OR new line got: 'b'. at ' b,c\\n'"
    );
    Ok(())
}

#[tokio::test]
async fn latin1_input_is_decoded() -> anyhow::Result<()> {
    let options = ParserOptions::builder().encoding_label("latin1").build()?;
    let parser = CsvParser::from_chunks([&b"caf\xe9,na"[..], &b"\xefve\n"[..]], options);
    let out = events(parser).await?;
    assert_eq!(out[0], ParseEvent::Data(fields(&["caf\u{e9}", "na\u{ef}ve"])));
    Ok(())
}

#[tokio::test]
async fn utf8_split_inside_a_character() -> anyhow::Result<()> {
    let input = "\u{feff}\u{e9}t\u{e9},\u{fc}ber\n";
    let chunks: Vec<Bytes> = input.as_bytes().chunks(1).map(Bytes::copy_from_slice).collect();
    let out = events(CsvParser::from_chunks(chunks, ParserOptions::default())).await?;
    assert_eq!(out[0], ParseEvent::Data(fields(&["\u{e9}t\u{e9}", "\u{fc}ber"])));
    Ok(())
}

#[tokio::test]
async fn only_one_bom_is_stripped() -> anyhow::Result<()> {
    let input: &[u8] = b"\xef\xbb\xbf\xef\xbb\xbfa,b\n";
    let out = events(CsvParser::from_chunks([input], ParserOptions::default())).await?;
    assert_eq!(out[0], ParseEvent::Data(fields(&["\u{feff}a", "b"])));
    Ok(())
}

#[tokio::test]
async fn long_chunk_lets_other_tasks_run() -> anyhow::Result<()> {
    let ticks = Arc::new(AtomicUsize::new(0));
    let ticker_ticks = Arc::clone(&ticks);
    let ticker = tokio::spawn(async move {
        loop {
            ticker_ticks.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
        }
    });

    let input: String = (0..1_000).map(|i| format!("{i}\n")).collect();
    let mut parser = CsvParser::from_text(&input, ParserOptions::default());
    let mut ticks_at_first_row = None;
    let mut ticks_at_end = None;
    while let Some(event) = parser.next_event().await {
        match event? {
            ParseEvent::Data(_) if ticks_at_first_row.is_none() => {
                ticks_at_first_row = Some(ticks.load(Ordering::SeqCst));
            }
            ParseEvent::End { row_count } => {
                assert_eq!(row_count, 1_000);
                ticks_at_end = Some(ticks.load(Ordering::SeqCst));
            }
            _ => {}
        }
    }
    ticker.abort();

    assert_eq!(ticks_at_first_row, Some(0));
    assert!(ticks_at_end.is_some_and(|t| t > 0));
    Ok(())
}

#[tokio::test]
async fn many_rows_in_one_chunk() -> anyhow::Result<()> {
    let input: String = (0..2_500).map(|i| format!("{i},{}\n", i * 2)).collect();
    let parser = CsvParser::from_text(&input, ParserOptions::default()).validate(|row: &Row| {
        Ok(row.len() == 2)
    });
    let out = events(parser).await?;
    assert_eq!(out.len(), 2_501);
    assert_eq!(out.last(), Some(&ParseEvent::End { row_count: 2_500 }));
    Ok(())
}

#[tokio::test]
async fn writer_feeds_parser_from_another_task() -> anyhow::Result<()> {
    let (mut writer, parser) = CsvParser::channel(first_row().build()?, 2);
    let producer = tokio::spawn(async move {
        writer.write("id,na").await?;
        writer.write("me\n").await?;
        for i in 0..1_000 {
            writer.write(format!("{i},\"n{i}\"\n")).await?;
        }
        writer.end();
        Ok::<_, CsvError>(())
    });

    let out: Vec<ParseEvent> = parser.into_stream().try_collect().await?;
    producer.await??;

    assert_eq!(out[0], ParseEvent::Headers(names(&["id", "name"])));
    assert_eq!(out[1], ParseEvent::Data(record(&[("id", "0"), ("name", "n0")])));
    assert_eq!(out.last(), Some(&ParseEvent::End { row_count: 1_000 }));
    Ok(())
}

#[tokio::test]
async fn writer_is_released_when_max_rows_is_reached() -> anyhow::Result<()> {
    let options = ParserOptions::builder().max_rows(1).build()?;
    let (mut writer, mut parser) = CsvParser::channel(options, 1);
    let producer = tokio::spawn(async move {
        for i in 0..10 {
            if writer.write(format!("{i}\n")).await.is_err() {
                return;
            }
        }
        writer.end();
    });

    let mut out = Vec::new();
    while let Some(event) = parser.next_event().await {
        out.push(event?);
    }
    assert_eq!(
        out,
        vec![ParseEvent::Data(fields(&["0"])), ParseEvent::End { row_count: 1 }]
    );
    tokio::time::timeout(Duration::from_secs(2), producer).await??;
    Ok(())
}

#[tokio::test]
async fn writer_dropped_mid_stream_is_an_error() -> anyhow::Result<()> {
    let (mut writer, parser) = CsvParser::channel(ParserOptions::default(), 4);
    let producer = tokio::spawn(async move {
        writer.write("1\n2\n").await?;
        drop(writer);
        Ok::<_, CsvError>(())
    });

    let out: Vec<CsvResult<ParseEvent>> = parser.into_stream().collect().await;
    producer.await??;

    assert_eq!(out.len(), 3);
    assert!(matches!(
        &out[2],
        Err(CsvError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof
    ));
    Ok(())
}

#[tokio::test]
async fn upstream_read_error_is_fatal() -> anyhow::Result<()> {
    let (mut writer, mut parser) = CsvParser::channel(ParserOptions::default(), 4);
    writer.write("a\n").await?;
    writer
        .fail(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection reset"))
        .await?;

    assert_eq!(parser.next_event().await.transpose()?, Some(ParseEvent::Data(fields(&["a"]))));
    let err = parser.next_event().await.and_then(Result::err);
    assert!(matches!(err, Some(CsvError::Io(_))));
    assert!(parser.next_event().await.is_none());
    Ok(())
}
