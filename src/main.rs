use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use itertools::Itertools;
use miette::{miette, IntoDiagnostic, WrapErr};
use predicate_tree::{DecodeOptions, Evaluator, Predicate, Row, DEFAULT_MAX_DEPTH, MAX_DEPTH_LIMIT};
use slog::{debug, info, o, Drain, Level, LevelFilter, Logger};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Encode, inspect and evaluate time-series predicate trees
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// log decoding and evaluation details to stderr
    #[clap(short, long, global = true)]
    verbose: bool,
    /// deepest node accepted when decoding
    #[clap(
        long,
        global = true,
        default_value_t = DEFAULT_MAX_DEPTH as u64,
        value_parser = clap::value_parser!(u64).range(1..=MAX_DEPTH_LIMIT as u64)
    )]
    max_depth: u64,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode a JSON predicate tree into protobuf wire bytes
    Encode {
        /// JSON file, or `-` for stdin
        input: PathBuf,
        /// output file; defaults to stdout
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
    /// Decode protobuf wire bytes and print the tree
    Decode {
        /// encoded predicate, or `-` for stdin
        input: PathBuf,
        /// print JSON instead of the text form
        #[clap(long)]
        json: bool,
    },
    /// Evaluate an encoded predicate against JSON-lines records
    Eval {
        /// encoded predicate
        input: PathBuf,
        /// records, one `{"tags": {..}, "fields": {..}}` object per line; defaults to stdin
        #[clap(short, long)]
        records: Option<PathBuf>,
        /// number of concurrent evaluation workers
        #[clap(short, long, default_value_t = 4)]
        workers: usize,
    },
}

#[tokio::main]
pub async fn main() -> miette::Result<()> {
    let args = Args::parse();
    let logger = build_logger(args.verbose);
    let options = DecodeOptions::default().with_max_depth(args.max_depth as usize);

    match args.command {
        Command::Encode { input, output } => {
            let (predicate, bytes) = encode_json(&read_input(&input).await?)?;
            info!(logger, "encoded predicate"; "predicate" => %predicate, "bytes" => bytes.len());
            write_output(output.as_deref(), &bytes).await
        }
        Command::Decode { input, json } => {
            let predicate = Predicate::decode_with(&read_input(&input).await?, &options)?;
            debug!(
                logger, "decoded predicate";
                "depth" => predicate.root().depth(),
                "tags" => predicate.tag_keys().iter().join(","),
                "fields" => predicate.field_keys().iter().join(",")
            );

            let rendered = if json {
                serde_json::to_string_pretty(&predicate).into_diagnostic()?
            } else {
                predicate.to_string()
            };
            write_output(None, format!("{}\n", rendered).as_bytes()).await
        }
        Command::Eval {
            input,
            records,
            workers,
        } => {
            let predicate = Predicate::decode_with(&read_input(&input).await?, &options)?;
            let predicate = Arc::new(predicate);

            let source = match records {
                Some(path) => read_input(&path).await?,
                None => read_input(Path::new("-")).await?,
            };
            let rows = parse_rows(&source)?;

            let results = eval_rows(&logger, predicate, rows, workers.max(1)).await?;
            write_output(None, render_results(&results).as_bytes()).await
        }
    }
}

fn build_logger(verbose: bool) -> Logger {
    let level = if verbose { Level::Debug } else { Level::Warning };
    let decorator = slog_term::PlainSyncDecorator::new(std::io::stderr());
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    Logger::root(LevelFilter::new(drain, level).fuse(), o!())
}

/// Parse and validate a JSON predicate tree, returning it with its wire bytes
fn encode_json(json: &[u8]) -> miette::Result<(Predicate, Vec<u8>)> {
    let predicate: Predicate = serde_json::from_slice(json)
        .into_diagnostic()
        .wrap_err("reading JSON predicate")?;
    predicate.validate()?;
    let bytes = predicate.encode_to_vec();
    Ok((predicate, bytes))
}

fn parse_rows(source: &[u8]) -> miette::Result<Vec<Row>> {
    let text = std::str::from_utf8(source)
        .into_diagnostic()
        .wrap_err("records are not UTF-8")?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .into_diagnostic()
                .wrap_err_with(|| format!("record on line {}", idx + 1))
        })
        .collect()
}

/// Evaluate rows in contiguous chunks, one evaluator per chunk, keeping the
/// results in input order.
async fn eval_rows(
    logger: &Logger,
    predicate: Arc<Predicate>,
    rows: Vec<Row>,
    workers: usize,
) -> miette::Result<Vec<Result<bool, predicate_tree::Error>>> {
    let chunk_size = rows.len().div_ceil(workers).max(1);
    let mut rows = rows.into_iter().peekable();
    let mut tasks = Vec::new();

    while rows.peek().is_some() {
        let chunk: Vec<Row> = rows.by_ref().take(chunk_size).collect();
        let predicate = Arc::clone(&predicate);
        let logger = logger.new(o!("worker" => tasks.len()));
        tasks.push(tokio::task::spawn_blocking(move || {
            let mut evaluator = Evaluator::new(&logger, &predicate);
            let results: Vec<_> = chunk.iter().map(|row| evaluator.eval(row)).collect();
            debug!(logger, "chunk finished"; "records" => chunk.len(), "patterns" => evaluator.patterns().len());
            results
        }));
    }

    let chunks = futures::future::try_join_all(tasks)
        .await
        .map_err(|err| miette!("evaluation worker failed: {}", err))?;
    Ok(chunks.into_iter().flatten().collect())
}

/// one line per record: `true`, `false` or `error: <message>`
fn render_results(results: &[Result<bool, predicate_tree::Error>]) -> String {
    results
        .iter()
        .map(|result| match result {
            Ok(b) => format!("{}\n", b),
            Err(err) => format!("error: {}\n", err),
        })
        .collect()
}

async fn read_input(path: &Path) -> miette::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if path.as_os_str() == "-" {
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .into_diagnostic()?;
    } else {
        buf = tokio::fs::read(path)
            .await
            .into_diagnostic()
            .wrap_err_with(|| format!("reading {}", path.display()))?;
    }
    Ok(buf)
}

async fn write_output(path: Option<&Path>, bytes: &[u8]) -> miette::Result<()> {
    match path {
        Some(path) => tokio::fs::write(path, bytes)
            .await
            .into_diagnostic()
            .wrap_err_with(|| format!("writing {}", path.display())),
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(bytes).await.into_diagnostic()?;
            stdout.flush().await.into_diagnostic()
        }
    }
}
