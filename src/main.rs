use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::ProgressBar;
use mwdump_sql::config::{self, ConvertOptions};
use mwdump_sql::parser::{self as dump, TagStream};
use mwdump_sql::{ConversionStats, Converter};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "mwdump-sql")]
#[command(about = "Convert MediaWiki XML dumps into batched SQL INSERT statements")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to the dump (.xml or .xml.bz2), or "-" to read XML from stdin.
    /// When omitted, the path is read from the first line of stdin
    input: Option<String>,

    /// Write SQL to this file instead of stdout
    #[arg(short, long)]
    output: Option<String>,

    /// Per-table batch size in bytes before an INSERT is flushed
    #[arg(long, default_value_t = config::BATCH_THRESHOLD_BYTES)]
    batch_bytes: usize,

    /// Emit COMMIT;/BEGIN; after this many output bytes (single transaction if unset)
    #[arg(long)]
    commit_every: Option<u64>,

    /// Disable the progress spinner
    #[arg(long)]
    no_progress: bool,
}

fn read_path_from_stdin() -> Result<String> {
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read dump path from stdin")?;
    let path = line.trim_end_matches(['\r', '\n']).to_string();
    if path.is_empty() {
        bail!("No input given: pass a dump path or pipe one on stdin");
    }
    Ok(path)
}

fn open_sink(output: Option<&str>) -> Result<Box<dyn Write>> {
    Ok(match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(BufWriter::with_capacity(config::WRITE_BUFFER_CAPACITY, file))
        }
        None => Box::new(BufWriter::with_capacity(
            config::WRITE_BUFFER_CAPACITY,
            io::stdout().lock(),
        )),
    })
}

fn run(cli: Cli) -> Result<ConversionStats> {
    let input = match cli.input {
        Some(input) => input,
        None => read_path_from_stdin()?,
    };

    let options = ConvertOptions {
        batch_bytes: cli.batch_bytes,
        commit_every: cli.commit_every,
    };

    let progress = if cli.no_progress {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };

    let sink = open_sink(cli.output.as_deref())?;
    let converter = Converter::new(sink, &options)?.with_progress(progress);

    if input == "-" {
        info!("Reading dump from stdin");
        let source: Box<dyn BufRead> = Box::new(BufReader::with_capacity(
            config::READ_BUFFER_CAPACITY,
            io::stdin().lock(),
        ));
        converter.run(TagStream::new(source))
    } else {
        converter.run(dump::open_dump(&input)?)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // stdout carries the SQL
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let start = Instant::now();
    match run(cli) {
        Ok(stats) => {
            eprintln!();
            eprintln!("=== Summary ===");
            eprintln!("Conversion time:    {:.2}s", start.elapsed().as_secs_f64());
            eprintln!("Pages written:      {}", stats.pages());
            eprintln!("Revisions written:  {}", stats.revisions());
            eprintln!("INSERT statements:  {}", stats.statements());
            eprintln!("Bytes written:      {}", stats.bytes());
            eprintln!("Ignored fields:     {}", stats.ignored());
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
