/// `chstat` -- Report on graphite-clickhouse query logs
///
/// Run with --help for brief help, or with --fmt=help on any reporting command for the list of
/// output fields.
///
/// Quirks
///
/// A request is only ever reported once it is complete, ie once its access line has been seen.
/// --from and --until select requests by the timestamp of their *last* log line, so a request that
/// straddles --from is included even though most of its work happened before.
///
/// `aggregate` reads a saved aggregate document if the input file name ends in `.json`, and --from
/// and --until do not apply to such input: the document holds reduced statistics, not requests.
mod aggregate;
mod format;
mod print;
mod records;
mod top;

use anyhow::{bail, Result};
use chlog::{AggSortKey, RequestSort, Sort};
use clap::{Args, Parser, Subcommand};
use rustutils::{parse_duration, parse_utc_time, timestamp_nanos, Timestamp};
use std::io;
use std::process;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print information about the program
    Version,

    /// Read the log and print the completed requests that pass the filters
    Print(PrintCmdArgs),

    /// Read the log and print the heaviest requests for every time interval
    Top(TopCmdArgs),

    /// Group requests by the shape of their queries and print or save statistics for the groups
    Aggregate(AggregateCmdArgs),
}

#[derive(Args, Debug)]
pub struct PrintCmdArgs {
    #[command(flatten)]
    input_args: InputArgs,

    #[command(flatten)]
    filter_args: PrintFilterArgs,

    #[command(flatten)]
    print_args: PrintArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct TopCmdArgs {
    #[command(flatten)]
    input_args: InputArgs,

    #[command(flatten)]
    top_args: TopArgs,

    #[command(flatten)]
    print_args: PrintArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct AggregateCmdArgs {
    #[command(flatten)]
    input_args: InputArgs,

    #[command(flatten)]
    aggregate_args: AggregateArgs,

    #[command(flatten)]
    print_args: PrintArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug, Default)]
pub struct InputArgs {
    /// Log file to read, or for `aggregate` also a saved document (*.json) [default: stdin]
    #[arg(long, short)]
    input: Option<String>,

    /// Select requests at this time and later, YYYY-MM-DDTHH:MM:SS (UTC) [default: no limit]
    #[arg(long, short, value_parser = parse_time)]
    from: Option<Timestamp>,

    /// Select requests before this time, YYYY-MM-DDTHH:MM:SS (UTC) [default: no limit]
    #[arg(long, short, value_parser = parse_time)]
    until: Option<Timestamp>,
}

impl InputArgs {
    /// The selection window in nanoseconds, zero meaning "no bound".

    pub fn window(&self) -> (i64, i64) {
        (
            self.from.as_ref().and_then(timestamp_nanos).unwrap_or(0),
            self.until.as_ref().and_then(timestamp_nanos).unwrap_or(0),
        )
    }
}

/// True if `timestamp` is within [from, until), where a zero bound is absent.

pub fn in_window(timestamp: i64, from: i64, until: i64) -> bool {
    !(from > 0 && timestamp < from) && !(until > 0 && timestamp >= until)
}

#[derive(Args, Debug, Default)]
pub struct PrintFilterArgs {
    /// Select requests that took longer than this many seconds
    #[arg(long, short)]
    time: Option<f64>,

    /// Select requests that read more than this many rows in all
    #[arg(long, short)]
    read_rows: Option<i64>,

    /// Select requests that read at least this many index rows
    #[arg(long, short = 'I')]
    i_read_rows: Option<i64>,

    /// Select requests that read at least this many data rows
    #[arg(long, short = 'D')]
    d_read_rows: Option<i64>,

    /// Select requests with this response status (repeatable) [default: all]
    #[arg(long, short)]
    status: Vec<i64>,

    /// Exclude requests with this response status (repeatable) [default: none]
    #[arg(long, short = 'S')]
    status_skip: Vec<i64>,
}

#[derive(Args, Debug)]
pub struct TopArgs {
    /// Print this many requests per interval
    #[arg(long, short = 'n', default_value = "10", value_parser = parse_count)]
    top: usize,

    /// Order requests by qtime, rtime, read_rows, index_read_rows, data_read_rows, or queries
    #[arg(long, short, default_value = "qtime", value_parser = parse_sort)]
    sort: Sort,

    /// Length of the reporting interval, eg 10s, 5m, 1m30s, at least 1s
    #[arg(long, short, default_value = "10s", value_parser = parse_interval)]
    duration: chrono::Duration,

    /// Include requests that have not completed in the final report
    #[arg(long, default_value_t = false)]
    incomplete: bool,
}

#[derive(Args, Debug)]
pub struct AggregateArgs {
    /// Print this many groups per section
    #[arg(long, short = 'n', default_value = "10", value_parser = parse_count)]
    top: usize,

    /// Order groups by qtime, rtime, data_time, read_rows, index_read_rows, data_read_rows,
    /// queries, or errors
    #[arg(long, short, default_value = "qtime", value_parser = parse_request_sort)]
    sort: RequestSort,

    /// Rank groups by this statistic: max, p99, p95, p90, or p50
    #[arg(long, short, default_value = "max", value_parser = parse_agg_key)]
    key: AggSortKey,

    /// Save the reduced groups to this file (*.json) instead of printing them
    #[arg(long, short, value_parser = parse_output)]
    output: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct PrintArgs {
    /// Select fields and format for the output [default: see --fmt=help]
    #[arg(long)]
    fmt: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct MetaArgs {
    /// Log progress and statistics about the input to stderr
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

// The command arg parsers don't need to include the string being parsed because the error generated
// by clap includes that.

fn parse_time(s: &str) -> Result<Timestamp> {
    parse_utc_time(s)
}

fn parse_count(s: &str) -> Result<usize> {
    let n = usize::from_str(s)?;
    if n == 0 {
        bail!("Count must be positive")
    }
    Ok(n)
}

fn parse_interval(s: &str) -> Result<chrono::Duration> {
    let d = parse_duration(s)?;
    if d < chrono::Duration::seconds(1) {
        bail!("Interval must be at least 1s")
    }
    Ok(d)
}

fn parse_sort(s: &str) -> Result<Sort> {
    Sort::from_str(s)
}

fn parse_request_sort(s: &str) -> Result<RequestSort> {
    RequestSort::from_str(s)
}

fn parse_agg_key(s: &str) -> Result<AggSortKey> {
    AggSortKey::from_str(s)
}

fn parse_output(s: &str) -> Result<String> {
    if !s.ends_with(".json") {
        bail!("Only json output is supported, the file name must end in .json")
    }
    Ok(s.to_string())
}

// Log to stderr so that reports on stdout stay clean.  RUST_LOG overrides --verbose.

fn init_logging(meta_args: &MetaArgs) {
    let level = if meta_args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

fn main() {
    match chstat() {
        Ok(()) => {}
        Err(msg) => {
            eprintln!("ERROR: {}", msg);
            process::exit(1);
        }
    }
}

fn chstat() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        // Syntax:
        //  - components of the version string are space-separated but there are spaces nowhere else
        //  - the keyword "chstat" is always the first component
        //  - other components are in random order
        //  - every component is keyword(value)
        //  - "version" carries a semver
        //  - "features" carries a comma-separated list of enabled features
        println!("chstat version(0.1.0) features()");
        return Ok(());
    }

    if match cli.command {
        Commands::Print(ref print_args) => {
            format::maybe_help(&print_args.print_args.fmt, &records::fmt_help)
        }
        Commands::Top(ref top_args) => format::maybe_help(&top_args.print_args.fmt, &records::fmt_help),
        Commands::Aggregate(ref agg_args) => {
            format::maybe_help(&agg_args.print_args.fmt, &aggregate::fmt_help)
        }
        Commands::Version => false,
    } {
        return Ok(());
    }

    let meta_args = match cli.command {
        Commands::Print(ref print_args) => &print_args.meta_args,
        Commands::Top(ref top_args) => &top_args.meta_args,
        Commands::Aggregate(ref agg_args) => &agg_args.meta_args,
        Commands::Version => bail!("Unexpected command"),
    };
    init_logging(meta_args);

    match cli.command {
        Commands::Print(ref print_args) => print::print_requests(
            &mut io::stdout(),
            &print_args.input_args,
            &print_args.filter_args,
            &print_args.print_args,
        ),
        Commands::Top(ref top_args) => top::top_requests(
            &mut io::stdout(),
            &top_args.input_args,
            &top_args.top_args,
            &top_args.print_args,
        ),
        Commands::Aggregate(ref agg_args) => aggregate::aggregate_requests(
            &mut io::stdout(),
            &agg_args.input_args,
            &agg_args.aggregate_args,
            &agg_args.print_args,
        ),
        Commands::Version => bail!("Unexpected command"),
    }
}

#[test]
fn test_parse_count() {
    assert!(parse_count("10").unwrap() == 10);
    assert!(parse_count("0").is_err());
    assert!(parse_count("-1").is_err());
    assert!(parse_count("ten").is_err());
}

#[test]
fn test_parse_interval() {
    assert!(parse_interval("10s").unwrap().num_seconds() == 10);
    assert!(parse_interval("1m30s").unwrap().num_seconds() == 90);
    assert!(parse_interval("1s").is_ok());
    assert!(parse_interval("0s").is_err());
    assert!(parse_interval("10").is_err());
    assert!(parse_interval("").is_err());
}

#[test]
fn test_parse_output() {
    assert!(parse_output("agg.json").unwrap() == "agg.json");
    assert!(parse_output("agg.csv").is_err());
}

#[test]
fn test_window() {
    let args = InputArgs {
        from: Some(parse_time("2023-01-28T06:23:00").unwrap()),
        ..Default::default()
    };
    let (from, until) = args.window();
    assert!(from == 1674886980 * 1_000_000_000);
    assert!(until == 0);
    assert!(in_window(from, from, until));
    assert!(!in_window(from - 1, from, until));
    assert!(in_window(from + 1, 0, from + 2));
    assert!(!in_window(from + 2, 0, from + 2));
}

#[test]
fn test_cli() {
    let cli = Cli::try_parse_from(["chstat", "top", "-n", "5", "-s", "read_rows", "-d", "1m"]).unwrap();
    match cli.command {
        Commands::Top(ref args) => {
            assert!(args.top_args.top == 5);
            assert!(args.top_args.sort == Sort::ReadRows);
            assert!(args.top_args.duration.num_seconds() == 60);
            assert!(!args.top_args.incomplete);
            assert!(args.input_args.input.is_none());
        }
        _ => panic!("Expected top"),
    }

    let cli = Cli::try_parse_from(["chstat", "aggregate", "-i", "x.log"]).unwrap();
    match cli.command {
        Commands::Aggregate(ref args) => {
            assert!(args.aggregate_args.top == 10);
            assert!(args.aggregate_args.sort == RequestSort::QTime);
            assert!(args.aggregate_args.key == AggSortKey::Max);
            assert!(args.aggregate_args.output.is_none());
            assert!(args.input_args.input == Some("x.log".to_string()));
        }
        _ => panic!("Expected aggregate"),
    }

    let cli = Cli::try_parse_from(["chstat", "print", "-s", "200", "-s", "404", "-I", "100", "-v"]).unwrap();
    match cli.command {
        Commands::Print(ref args) => {
            assert!(args.filter_args.status == vec![200, 404]);
            assert!(args.filter_args.i_read_rows == Some(100));
            assert!(args.filter_args.time.is_none());
            assert!(args.meta_args.verbose);
        }
        _ => panic!("Expected print"),
    }

    assert!(Cli::try_parse_from(["chstat", "top", "-n", "0"]).is_err());
    assert!(Cli::try_parse_from(["chstat", "top", "-d", "500ms"]).is_err());
    assert!(Cli::try_parse_from(["chstat", "top", "-s", "errors"]).is_err());
    assert!(Cli::try_parse_from(["chstat", "aggregate", "-o", "out.csv"]).is_err());
    assert!(Cli::try_parse_from(["chstat", "aggregate", "-k", "p75"]).is_err());
    assert!(Cli::try_parse_from(["chstat", "print", "-f", "2023-01-28"]).is_err());
}
