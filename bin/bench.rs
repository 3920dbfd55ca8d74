use clap::{Arg, ArgAction, Command};
use crc32fast::Hasher as Crc32;
use csv_stream::{parse_path, HeaderSpec, ParseEvent, ParserOptions, Row};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let matches = Command::new("bench")
        .arg(
            Arg::new("path")
                .long("path")
                .value_parser(clap::value_parser!(PathBuf))
                .required(true),
        )
        .arg(Arg::new("delimiter").long("delimiter").default_value(","))
        .arg(
            Arg::new("no_header")
                .long("no-header")
                .help("Treat the first row as data")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("required")
                .long("required")
                .help("Header that must be present")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("skip_lines")
                .long("skip-lines")
                .value_parser(clap::value_parser!(usize))
                .default_value("0"),
        )
        .arg(
            Arg::new("skip_rows")
                .long("skip-rows")
                .value_parser(clap::value_parser!(usize))
                .default_value("0"),
        )
        .arg(
            Arg::new("max_rows")
                .long("max-rows")
                .help("Stop after N rows (0 = all)")
                .value_parser(clap::value_parser!(usize))
                .default_value("0"),
        )
        .arg(Arg::new("trim").long("trim").action(ArgAction::SetTrue))
        .arg(
            Arg::new("strict")
                .long("strict")
                .help("Report rows with too few or too many columns as invalid")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verify")
                .long("verify")
                .help("CRC32 over every emitted field")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let path = matches
        .get_one::<PathBuf>("path")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Provide --path <file>"))?;
    let required: Vec<String> = matches
        .get_many::<String>("required")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let verify = matches.get_flag("verify");

    let headers = if matches.get_flag("no_header") {
        HeaderSpec::None
    } else {
        HeaderSpec::FirstRow
    };
    let options = ParserOptions::builder()
        .delimiter(
            matches
                .get_one::<String>("delimiter")
                .map(String::as_str)
                .unwrap_or(","),
        )
        .headers(headers)
        .skip_lines(matches.get_one::<usize>("skip_lines").copied().unwrap_or(0))
        .skip_rows(matches.get_one::<usize>("skip_rows").copied().unwrap_or(0))
        .max_rows(matches.get_one::<usize>("max_rows").copied().unwrap_or(0))
        .trim(matches.get_flag("trim"))
        .strict_column_handling(matches.get_flag("strict"))
        .build()?;

    let start = Instant::now();
    let mut parser = parse_path(&path, options).await?;
    let mut crc = Crc32::new();
    let mut row_count = 0;
    let mut invalid_count = 0;
    let mut header_names: Vec<String> = Vec::new();

    while let Some(event) = parser.next_event().await {
        match event? {
            ParseEvent::Headers(names) => {
                header_names = names.into_iter().flatten().collect();
                if let Some(missing) = required.iter().find(|r| !header_names.contains(r)) {
                    anyhow::bail!("Missing required header: '{missing}'");
                }
            }
            ParseEvent::Data(row) => {
                if verify {
                    update_crc(&mut crc, &row);
                }
            }
            ParseEvent::Invalid { .. } => invalid_count += 1,
            ParseEvent::End { row_count: n } => row_count = n,
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    let rps = (row_count as f64) / elapsed;
    if verify {
        println!(
            "source={} rows={} invalid={} headers={:?} crc=0x{:08x}\nelapsed={:.1}s rows/sec={:.0}",
            path.display(),
            row_count,
            invalid_count,
            header_names,
            crc.finalize(),
            elapsed,
            rps
        );
    } else {
        println!(
            "source={} rows={} invalid={} headers={:?}\nelapsed={:.1}s rows/sec={:.0}",
            path.display(),
            row_count,
            invalid_count,
            header_names,
            elapsed,
            rps
        );
    }
    Ok(())
}

// fields separated by '\x1f' (unit separator), rows by '\x1e'
fn update_crc(crc: &mut Crc32, row: &Row) {
    for (i, field) in row.values().into_iter().enumerate() {
        if i > 0 {
            crc.update(&[0x1f]);
        }
        crc.update(field.as_bytes());
    }
    crc.update(&[0x1e]);
}
