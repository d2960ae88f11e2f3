/// `buzzparse` -- Convert BuzzBlog benchmark logs to CSV
///
/// Every subcommand reads one log and writes its records as CSV, with a fixed header for the kind
/// of log:
///
///   buzzparse loadgen --log_filepath logs/node0/loadgen.log --csv_filepath loadgen.csv
///
/// Logs whose names end in `.gz` are decompressed on the fly.  Lines that can't be parsed are
/// skipped and reported on stderr; the conversion fails only if the log as a whole can't be
/// understood, in which case nothing useful is left in the output file.
///
/// Environment:
///
///   RUST_LOG selects what is logged to stderr [default: buzzparse=info,buzzlog=info]
///
///   BUZZPARSE_REQUEST_TYPES names a JSON file with the request type table for `loadgen`
///   [default: the built-in table for the BuzzBlog API]
mod output;

use anyhow::{bail, Result};
use buzzlog::{
    builtin_request_types, by_average, collectl_header, open_log, parse_buffer_flush_log,
    parse_cache_log, parse_collectl_log, parse_lock_trace, parse_query_log, parse_request_log,
    parse_rpc_log, parse_tcp_listen_backlog_log, parse_tcp_retransmit_log, read_target_log,
    target_log_header, HardwareType, LockTraceEntry, RequestTypeTable, ToColumns,
    BUFFER_FLUSH_HEADER, CACHE_LOG_HEADER, QUERY_LOG_HEADER, REQUEST_LOG_HEADER, RPC_LOG_HEADER,
    TCP_LISTEN_BACKLOG_HEADER, TCP_RETRANSMIT_HEADER,
};
use clap::{Args, Parser, Subcommand};
use output::{write_records, CsvSink};
use std::env;
use std::path::PathBuf;
use std::process;
use tracing::info;
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

    /// Convert a load generator request log (loadgen.log)
    Loadgen(ConvertArgs),

    /// Convert a service RPC call log (calls.log)
    Rpc(ConvertArgs),

    /// Convert a database query log (queries.log)
    Query(ConvertArgs),

    /// Convert a Redis command log (redis.log)
    Redis(ConvertArgs),

    /// Convert a collectl log; the subsystem is taken from the file name (.cpu, .numa, .dsk)
    Collectl(ConvertArgs),

    /// Convert a bpftrace TCP listen backlog log
    Tcplistenbl(ConvertArgs),

    /// Convert a bpftrace TCP retransmit log
    Tcpretrans(ConvertArgs),

    /// Convert an rAdvisor target log
    Radvisor(ConvertArgs),

    /// Convert an rAdvisor buffer flush log
    Bufferflush(ConvertArgs),

    /// Convert a lock contention trace to per-process spin and hold times
    Locktrace(ConvertArgs),
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Log file to read
    #[arg(long = "log_filepath")]
    log_filepath: PathBuf,

    /// CSV file to write
    #[arg(long = "csv_filepath")]
    csv_filepath: PathBuf,
}

const REQUEST_TYPES_VAR: &str = "BUZZPARSE_REQUEST_TYPES";

const DEFAULT_LOG_FILTER: &str = "buzzparse=info,buzzlog=info";

const LOCK_TRACE_HEADER: [&str; 6] = ["section", "pid", "name", "total_ns", "count", "avg_ns"];

struct LockTraceRow<'a> {
    section: &'static str,
    entry: &'a LockTraceEntry,
}

impl<'a> ToColumns for LockTraceRow<'a> {
    fn columns(&self) -> Vec<String> {
        vec![
            self.section.to_string(),
            self.entry.pid.to_string(),
            self.entry.name.clone(),
            self.entry.total_ns.to_string(),
            self.entry.count.to_string(),
            self.entry.average_ns().to_string(),
        ]
    }
}

fn main() {
    init_logging();
    match buzzparse() {
        Ok(()) => {}
        Err(msg) => {
            eprintln!("ERROR: {:#}", msg);
            process::exit(1);
        }
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn buzzparse() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        // Syntax: keyword(value) components separated by spaces; "buzzparse" always comes first.
        println!("buzzparse version({})", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let (args, rows) = convert(&cli.command)?;
    info!(
        "{}: {rows} rows written to {}",
        args.log_filepath.display(),
        args.csv_filepath.display()
    );
    Ok(())
}

fn convert(command: &Commands) -> Result<(&ConvertArgs, usize)> {
    let converted = match command {
        Commands::Version => bail!("Nothing to convert"),
        Commands::Loadgen(args) => {
            let owned;
            let table = match env::var(REQUEST_TYPES_VAR) {
                Ok(filename) => {
                    info!("Request types from {filename}");
                    owned = RequestTypeTable::from_json_file(&filename)?;
                    &owned
                }
                Err(_) => builtin_request_types()?,
            };
            let parsed = parse_request_log(open_log(&args.log_filepath)?, table)?;
            (
                args,
                write_records(&args.csv_filepath, &REQUEST_LOG_HEADER, &parsed.records)?,
            )
        }
        Commands::Rpc(args) => {
            let parsed = parse_rpc_log(open_log(&args.log_filepath)?)?;
            (args, write_records(&args.csv_filepath, &RPC_LOG_HEADER, &parsed.records)?)
        }
        Commands::Query(args) => {
            let parsed = parse_query_log(open_log(&args.log_filepath)?)?;
            (args, write_records(&args.csv_filepath, &QUERY_LOG_HEADER, &parsed.records)?)
        }
        Commands::Redis(args) => {
            let parsed = parse_cache_log(open_log(&args.log_filepath)?)?;
            (args, write_records(&args.csv_filepath, &CACHE_LOG_HEADER, &parsed.records)?)
        }
        Commands::Collectl(args) => {
            let name = match args.log_filepath.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => bail!("No file name in {}", args.log_filepath.display()),
            };
            let Some(hw_type) = HardwareType::from_filename(&name) else {
                bail!("Can't tell the collectl subsystem of {name}: expected .cpu, .numa or .dsk");
            };
            let parsed = parse_collectl_log(open_log(&args.log_filepath)?, hw_type)?;
            let header = collectl_header(hw_type);
            (args, write_records(&args.csv_filepath, &header, &parsed.records)?)
        }
        Commands::Tcplistenbl(args) => {
            let parsed = parse_tcp_listen_backlog_log(open_log(&args.log_filepath)?)?;
            (
                args,
                write_records(&args.csv_filepath, &TCP_LISTEN_BACKLOG_HEADER, &parsed.records)?,
            )
        }
        Commands::Tcpretrans(args) => {
            let parsed = parse_tcp_retransmit_log(open_log(&args.log_filepath)?)?;
            (
                args,
                write_records(&args.csv_filepath, &TCP_RETRANSMIT_HEADER, &parsed.records)?,
            )
        }
        Commands::Radvisor(args) => {
            let (metadata, mut entries) = read_target_log(open_log(&args.log_filepath)?)?;
            if let Some(id) = &metadata.target_id {
                info!("Target {id}, log version {}", metadata.version);
            }
            let mut sink = CsvSink::create(&args.csv_filepath, &target_log_header())?;
            for entry in entries.by_ref() {
                sink.write(&entry?)?;
            }
            info!("target log: {} rows skipped", entries.diagnostics().len());
            (args, sink.finish()?)
        }
        Commands::Bufferflush(args) => {
            let parsed = parse_buffer_flush_log(open_log(&args.log_filepath)?)?;
            (
                args,
                write_records(&args.csv_filepath, &BUFFER_FLUSH_HEADER, &parsed.records)?,
            )
        }
        Commands::Locktrace(args) => {
            let trace = parse_lock_trace(open_log(&args.log_filepath)?)?;
            let mut sink = CsvSink::create(&args.csv_filepath, &LOCK_TRACE_HEADER)?;
            for (section, entries) in [("spin", &trace.spin), ("hold", &trace.hold)] {
                for entry in by_average(entries) {
                    sink.write(&LockTraceRow { section, entry })?;
                }
            }
            (args, sink.finish()?)
        }
    };
    Ok(converted)
}

#[cfg(test)]
fn run(args: &[&str]) -> Result<usize> {
    let cli = Cli::try_parse_from(args)?;
    let (_, rows) = convert(&cli.command)?;
    Ok(rows)
}

#[test]
fn test_convert_rpc() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("calls.csv");
    let rows = run(&[
        "buzzparse",
        "rpc",
        "--log_filepath",
        "../tests/buzzlog/calls.log",
        "--csv_filepath",
        csv.to_str().unwrap(),
    ])
    .unwrap();
    assert!(rows == 4);
    let text = std::fs::read_to_string(&csv).unwrap();
    let mut lines = text.lines();
    assert!(lines.next() == Some("timestamp,request_id,server,function,latency"));
    assert!(lines.count() == 4);
}

#[test]
fn test_convert_collectl() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("node0.csv");
    let rows = run(&[
        "buzzparse",
        "collectl",
        "--log_filepath",
        "../tests/buzzlog/node0.dsk",
        "--csv_filepath",
        csv.to_str().unwrap(),
    ])
    .unwrap();
    assert!(rows == 4);
    let text = std::fs::read_to_string(&csv).unwrap();
    assert!(text.starts_with("timestamp,hw_no,name,reads,"));
    assert!(text.contains("\n2021-03-02 09:30:00.000000,1,sdb,"));
}

#[test]
fn test_convert_locktrace() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("lock.csv");
    let rows = run(&[
        "buzzparse",
        "locktrace",
        "--log_filepath",
        "../tests/buzzlog/locktrace.log",
        "--csv_filepath",
        csv.to_str().unwrap(),
    ])
    .unwrap();
    assert!(rows == 5);
    let text = std::fs::read_to_string(&csv).unwrap();
    let lines = text.lines().collect::<Vec<&str>>();
    assert!(lines[0] == "section,pid,name,total_ns,count,avg_ns");
    // Sorted by average within each section.
    assert!(lines[1] == "spin,777,redis-server,100,2,50");
    assert!(lines[3] == "spin,4321,post_server,3000,15,200");
    assert!(lines[4] == "hold,99,idle,0,0,0");
}

#[test]
fn test_convert_radvisor() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("target.csv");
    let rows = run(&[
        "buzzparse",
        "radvisor",
        "--log_filepath",
        "../tests/buzzlog/target.log",
        "--csv_filepath",
        csv.to_str().unwrap(),
    ])
    .unwrap();
    assert!(rows == 2);
}

#[test]
fn test_convert_errors() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("out.csv");
    let csv = csv.to_str().unwrap();

    // Missing input
    assert!(run(&[
        "buzzparse",
        "query",
        "--log_filepath",
        "no-such.log",
        "--csv_filepath",
        csv
    ])
    .is_err());

    // Not a collectl file name
    assert!(run(&[
        "buzzparse",
        "collectl",
        "--log_filepath",
        "../tests/buzzlog/calls.log",
        "--csv_filepath",
        csv
    ])
    .is_err());

    // Flags are required and there are no others
    assert!(run(&["buzzparse", "rpc", "--log_filepath", "x"]).is_err());
    assert!(run(&["buzzparse", "rpc", "--log-filepath", "x", "--csv_filepath", csv]).is_err());
}
