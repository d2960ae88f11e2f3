/// The BuzzBlog benchmark leaves behind a directory of logs for every experiment: the load
/// generator's request log, the RPC, query and cache logs of the microservices, collectl hardware
/// monitor logs, rAdvisor container accounting logs, bpftrace TCP logs and lock contention traces.
/// The formats are semi-structured text (a timestamp and key=value fields, fixed-width columns,
/// quoted strings) or CSV, sometimes with a metadata block in front.
///
/// This library turns each log into an ordered sequence of typed records.  For every kind of log
/// there is:
///
/// - a record type with fixed fields, numbers and timestamps already parsed;
///
/// - a tokenizer that turns one line (or CSV row) into zero or more records, or reports why it
///   could not;
///
/// - a `parse_*` function that drives the tokenizer across a whole log and returns the records
///   together with a diagnostic for every line that was skipped.
///
/// Malformed lines cost only themselves.  Errors that mean the log as a whole can't be understood
/// (a missing section, a request type not in the classification table, I/O errors) abort the parse.
///
/// The parsers share no mutable state and may be run concurrently on different logs.
mod assembler;
mod bufferflush;
mod cache;
mod collectl;
mod experiment;
mod locktrace;
mod logkind;
mod outcome;
mod query;
mod request;
mod rpc;
mod source;
mod target;
mod tcp;
mod tokens;

// Line- and row-level outcomes: the reason a line was skipped, a skipped line, and the result of
// parsing a whole log.

pub use outcome::Diagnostic;
pub use outcome::LineError;
pub use outcome::LineResult;
pub use outcome::Parsed;

// Drive a tokenizer across all the lines (or CSV rows) of a log.

pub use assembler::assemble_lines;
pub use assembler::parse_lines;
pub use assembler::parse_rows;
pub use assembler::CsvRows;
pub use assembler::Row;

// Open a log file, gunzipping if needed, and iterate over its lines.

pub use source::is_gzipped;
pub use source::open_log;
pub use source::LossyLines;

// The kinds of log, and recognizing them by file name.

pub use logkind::LogKind;

// Request (load generator) logs and the request type classification table.

pub use request::builtin_request_types;
pub use request::parse_request_log;
pub use request::request_time_span;
pub use request::ReadWrite;
pub use request::RequestLogEntry;
pub use request::RequestLogParser;
pub use request::RequestStatus;
pub use request::RequestTypeTable;
pub use request::REQUEST_LOG_HEADER;

// RPC call logs.

pub use rpc::parse_rpc_log;
pub use rpc::RpcLogEntry;
pub use rpc::RpcLogParser;
pub use rpc::RPC_LOG_HEADER;

// Database query logs.

pub use query::parse_query_log;
pub use query::QueryLogEntry;
pub use query::QueryLogParser;
pub use query::QueryType;
pub use query::QUERY_LOG_HEADER;

// Cache (Redis) command logs.

pub use cache::parse_cache_log;
pub use cache::CacheCommandLogEntry;
pub use cache::CacheLogParser;
pub use cache::CACHE_LOG_HEADER;

// Collectl hardware monitor logs.

pub use collectl::collectl_header;
pub use collectl::parse_collectl_log;
pub use collectl::CollectlParser;
pub use collectl::HardwareMonitorEntry;
pub use collectl::HardwareSample;
pub use collectl::HardwareType;
pub use collectl::MetricValue;

// bpftrace TCP listen backlog and retransmit logs.

pub use tcp::parse_tcp_listen_backlog_log;
pub use tcp::parse_tcp_retransmit_log;
pub use tcp::TcpListenBacklogEntry;
pub use tcp::TcpLogParser;
pub use tcp::TcpRetransmitEntry;
pub use tcp::TCP_LISTEN_BACKLOG_HEADER;
pub use tcp::TCP_RETRANSMIT_HEADER;

// rAdvisor target logs: the metadata block, then a lazy sequence of entries.

pub use target::read_target_log;
pub use target::target_log_header;
pub use target::IoStats;
pub use target::PidLimit;
pub use target::TargetLogEntries;
pub use target::TargetLogEntry;
pub use target::TargetLogMetadata;
pub use target::MIN_TARGET_LOG_VERSION;

// rAdvisor buffer flush logs.

pub use bufferflush::parse_buffer_flush_log;
pub use bufferflush::BufferFlushLogEntry;
pub use bufferflush::BUFFER_FLUSH_HEADER;

// Lock contention traces: per-process spin and hold times, and concurrency over time.

pub use locktrace::by_average;
pub use locktrace::parse_lock_trace;
pub use locktrace::ConcurrencyCurve;
pub use locktrace::LockTrace;
pub use locktrace::LockTraceEntry;

// Find and parse the logs of an experiment directory.

pub use experiment::Experiment;
pub use experiment::NodeLog;

/// A record that can be written as a CSV row.  The columns are in the order of the header for the
/// record kind (`REQUEST_LOG_HEADER` etc).  Timestamps are formatted by
/// `rustutils::format_timestamp`.

pub trait ToColumns {
    fn columns(&self) -> Vec<String>;
}
