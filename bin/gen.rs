use clap::{Arg, ArgAction, Command};
use std::io::{self, Write};

fn main() -> anyhow::Result<()> {
    let matches = Command::new("gen")
        .about("Write a deterministic CSV file to stdout")
        .arg(
            Arg::new("rows")
                .long("rows")
                .value_parser(clap::value_parser!(u64))
                .required(true),
        )
        .arg(
            Arg::new("with_header")
                .long("with-header")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("cols")
                .long("cols")
                .value_parser(clap::value_parser!(usize))
                .default_value("3"),
        )
        .arg(Arg::new("delim").long("delim").default_value(","))
        .arg(
            Arg::new("quote_every")
                .long("quote-every")
                .help("Quote every Nth field and embed the delimiter and a quote in it (0 = never)")
                .value_parser(clap::value_parser!(u64))
                .default_value("0"),
        )
        .arg(
            Arg::new("crlf")
                .long("crlf")
                .help("Terminate rows with \\r\\n")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let rows = matches.get_one::<u64>("rows").copied().unwrap_or_default();
    let with_header = matches.get_flag("with_header");
    let cols = matches.get_one::<usize>("cols").copied().unwrap_or(3).max(1);
    let delim = matches
        .get_one::<String>("delim")
        .map(String::as_str)
        .unwrap_or(",");
    let quote_every = matches.get_one::<u64>("quote_every").copied().unwrap_or(0);
    let eol = if matches.get_flag("crlf") { "\r\n" } else { "\n" };

    let mut out = io::BufWriter::new(io::stdout().lock());

    if with_header {
        write!(&mut out, "sku")?;
        for i in 1..cols {
            write!(&mut out, "{delim}col{i}")?;
        }
        write!(&mut out, "{eol}")?;
    }

    // sku, col1, col2, ... with every Nth field quoted
    let mut field_no: u64 = 0;
    for i in 0..rows {
        write!(&mut out, "SKU{i:010}")?;
        for c in 1..cols {
            field_no += 1;
            if quote_every > 0 && field_no % quote_every == 0 {
                write!(&mut out, "{delim}\"v{c}{delim}\"\"{i}\"\"\"")?;
            } else {
                write!(&mut out, "{delim}v{c}_{i}")?;
            }
        }
        write!(&mut out, "{eol}")?;
        if i % 10_000 == 0 {
            out.flush()?;
        } // keep buffers moving on huge runs
    }

    out.flush()?;
    Ok(())
}
