use anyhow::{bail, Context, Result as AnyhowResult};
use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tailpage::services::{log_dirs, status_log::StatusHandle, tracing_setup};
use tailpage::{new_searcher, Config, Document, Searcher, StoreError};

/// Print windows of large files and streams through a chunked document store
#[derive(Parser, Debug)]
#[command(name = "tailpage")]
#[command(about = "Pager-style reader for large, piped, and growing text", long_about = None)]
#[command(version)]
struct Args {
    /// File to read. Use "-" or omit for stdin.
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Keep reading as the input grows
    #[arg(short, long)]
    follow: bool,

    /// Keep already-read chunks when the file is reloaded
    #[arg(long)]
    watch: bool,

    /// Print only lines matching this pattern
    #[arg(long, value_name = "PATTERN")]
    search: Option<String>,

    /// Treat the search pattern as a regular expression
    #[arg(long)]
    regexp: bool,

    /// Case-sensitive search
    #[arg(short = 'i', long)]
    case_sensitive: bool,

    /// Case-sensitive only if the pattern has an uppercase letter
    #[arg(long)]
    smart_case: bool,

    /// First line to print (0-based)
    #[arg(long, default_value_t = 0)]
    start: usize,

    /// Maximum number of lines (or matches) to print
    #[arg(long, value_name = "N")]
    lines: Option<usize>,

    /// Lines per chunk
    #[arg(long, value_name = "N")]
    chunk_size: Option<usize>,

    /// Resident chunk limit for stdin and pipes (0 or less: unlimited)
    #[arg(long, value_name = "N", allow_hyphen_values = true)]
    memory_limit: Option<i64>,

    /// Resident chunk limit for regular files
    #[arg(long, value_name = "N")]
    memory_limit_file: Option<usize>,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Path to log file for diagnostics (default: state dir)
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    dump_config: bool,
}

fn load_config(args: &Args) -> AnyhowResult<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_or_default().context("Failed to load default config")?,
    };

    if let Some(chunk_size) = args.chunk_size {
        config.store.chunk_size = chunk_size;
    }
    if let Some(limit) = args.memory_limit {
        config.store.load_chunks_limit = limit;
    }
    if let Some(limit) = args.memory_limit_file {
        config.store.file_load_chunks_limit = limit;
    }
    config.store.watch |= args.watch;
    config.search.regexp |= args.regexp;
    config.search.case_sensitive |= args.case_sensitive;
    config.search.smart_case |= args.smart_case;

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn open_document(args: &Args, config: &Config) -> AnyhowResult<Document> {
    let doc = match &args.file {
        Some(path) if path.as_os_str() != "-" => Document::open_file(path, config.store.clone())
            .with_context(|| format!("Failed to open {}", path.display()))?,
        _ => Document::from_reader(io::stdin(), config.store.clone())
            .context("Failed to read stdin")?,
    };
    Ok(doc)
}

/// Drops the oldest chunk of a saturated stream window so reading can resume.
fn slide_window(doc: &Document, n: usize) -> AnyhowResult<()> {
    let before = doc.start_num();
    if let Some(&newest) = doc.loaded_chunks().first() {
        doc.request_load(newest)?;
    }
    if doc.start_num() == before {
        bail!("memory limit reached before line {n}");
    }
    Ok(())
}

/// Fetches line `n`, sliding a saturated stream window forward when needed.
fn fetch_line(doc: &Document, n: usize) -> AnyhowResult<Option<Vec<u8>>> {
    loop {
        match doc.get_line(n) {
            Ok(line) => return Ok(line),
            Err(StoreError::OverChunkLimit) => slide_window(doc, n)?,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Next match at or after `from`, sliding a saturated stream window as the search advances.
fn next_match(doc: &Document, from: usize, searcher: &Arc<dyn Searcher>) -> AnyhowResult<Option<usize>> {
    let mut from = from;
    loop {
        match doc.search_forward(from, Arc::clone(searcher)) {
            Ok(found) => return Ok(found),
            Err(StoreError::OverChunkLimit) => {
                // Everything resident was searched.
                from = from.max(doc.end_num());
                slide_window(doc, from)?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn print_window(doc: &Document, out: &mut impl Write, start: usize, limit: usize) -> AnyhowResult<usize> {
    let mut n = start;
    while n - start < limit {
        let Some(line) = fetch_line(doc, n)? else {
            break;
        };
        out.write_all(&line)?;
        n += 1;
    }
    Ok(n)
}

fn print_matches(
    doc: &Document,
    out: &mut impl Write,
    searcher: Arc<dyn Searcher>,
    start: usize,
    limit: usize,
) -> AnyhowResult<usize> {
    let mut from = start;
    let mut printed = 0;
    while printed < limit {
        let Some(n) = next_match(doc, from, &searcher)? else {
            break;
        };
        if let Some(line) = fetch_line(doc, n)? {
            out.write_all(&line)?;
            printed += 1;
        }
        from = n + 1;
    }
    Ok(doc.end_num().max(from))
}

fn drain_status(status: Option<&StatusHandle>) {
    let Some(status) = status else {
        return;
    };
    while let Ok(message) = status.receiver.try_recv() {
        eprintln!("tailpage: {message}");
    }
}

fn follow(
    doc: &mut Document,
    out: &mut impl Write,
    searcher: Option<Arc<dyn Searcher>>,
    mut next: usize,
    status: Option<&StatusHandle>,
) -> AnyhowResult<()> {
    let interval = Duration::from_millis(doc.config().follow_interval_ms);
    doc.set_follow_mode(true);
    loop {
        std::thread::sleep(interval);
        if doc.is_closed() {
            return Ok(());
        }
        let end = doc.end_num();
        while next < end {
            // Skimmed file chunks are faulted in.
            let line = match doc.line(next) {
                Some(line) => Some(line),
                None => fetch_line(doc, next)?,
            };
            if let Some(line) = line {
                write_if_match(out, &line, searcher.as_deref())?;
            }
            next += 1;
        }
        out.flush()?;
        drain_status(status);
    }
}

fn write_if_match(out: &mut impl Write, line: &[u8], searcher: Option<&dyn Searcher>) -> io::Result<()> {
    if searcher.map_or(true, |s| s.is_match(line)) {
        out.write_all(line)?;
    }
    Ok(())
}

fn main() -> AnyhowResult<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    if args.dump_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let log_path = args.log_file.clone().unwrap_or_else(log_dirs::main_log_path);
    log_dirs::cleanup_stale_logs();
    let status = tracing_setup::init_global(&log_path);
    tracing::info!("tailpage starting, logging to {}", log_path.display());

    let mut doc = open_document(&args, &config)?;
    tracing::debug!("reading {}", doc.name());
    let searcher = match &args.search {
        Some(pattern) => Some(
            new_searcher(pattern, &config.search)
                .with_context(|| format!("Invalid search pattern {pattern:?}"))?,
        ),
        None => None,
    };

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    let limit = args.lines.unwrap_or(usize::MAX);
    let next = match &searcher {
        Some(searcher) => print_matches(&doc, &mut out, Arc::clone(searcher), args.start, limit)?,
        None => print_window(&doc, &mut out, args.start, limit)?,
    };
    out.flush()?;
    drain_status(status.as_ref());

    if args.follow && args.lines.is_none() {
        follow(&mut doc, &mut out, searcher, next, status.as_ref())?;
    }

    doc.request_close()?;
    Ok(())
}
