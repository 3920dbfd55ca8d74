use csv_stream::{parse_path, HeaderSpec, ParseEvent, ParserOptions, Row};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./data/sample.csv.gz"));

    let options = ParserOptions::builder()
        .headers(HeaderSpec::FirstRow)
        .trim(true)
        .build()?;
    let mut parser = parse_path(&path, options).await?.validate(|row: &Row| {
        let has_sku = row
            .as_record()
            .and_then(|r| r.get("sku"))
            .is_some_and(|sku| !sku.is_empty());
        Ok((has_sku, "missing sku"))
    });

    while let Some(event) = parser.next_event().await {
        match event? {
            ParseEvent::Headers(headers) => println!("headers: {headers:?}"),
            ParseEvent::Data(_) => {}
            ParseEvent::Invalid {
                row_number, reason, ..
            } => println!("row {row_number} invalid: {}", reason.unwrap_or_default()),
            ParseEvent::End { row_count } => println!("rows: {row_count}"),
        }
    }
    Ok(())
}
