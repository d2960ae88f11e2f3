/// Cache command logs, written by the services around every Redis command:
///
///   [2021-01-01 00:00:00.123456789] pid=12 tid=13 request_id=ab12 latency=0.0004 service_name=post command=GET post:5
///
/// The command is the remainder of the line and may contain spaces.
use crate::assembler;
use crate::tokens::{micros_timestamp_field, millis_field};
use crate::{LineError, LineResult, Parsed, ToColumns};

use anyhow::Result;
use regex::Regex;
use rustutils::{format_timestamp, Timestamp};
use std::io::BufRead;
use ustr::Ustr;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheCommandLogEntry {
    // Truncated to microseconds.
    pub timestamp: Timestamp,
    pub request_id: String,

    // Milliseconds.
    pub latency: f64,
    pub service_name: Ustr,
    pub command: String,
}

pub const CACHE_LOG_HEADER: [&str; 5] =
    ["timestamp", "request_id", "latency", "service_name", "command"];

impl ToColumns for CacheCommandLogEntry {
    fn columns(&self) -> Vec<String> {
        vec![
            format_timestamp(&self.timestamp),
            self.request_id.clone(),
            self.latency.to_string(),
            self.service_name.to_string(),
            self.command.clone(),
        ]
    }
}

pub struct CacheLogParser {
    line: Regex,
}

impl CacheLogParser {
    pub fn new() -> Result<CacheLogParser> {
        Ok(CacheLogParser {
            line: Regex::new(
                r"^\[([^\]]+)\] pid=(\S+) tid=(\S+) request_id=(\S+) latency=(\S+) service_name=(\S+) command=(.+)$",
            )?,
        })
    }

    pub fn parse_line(&self, l: &str) -> LineResult<CacheCommandLogEntry> {
        let Some(caps) = self.line.captures(l) else {
            return Err(LineError::NoMatch("cache"));
        };
        Ok(CacheCommandLogEntry {
            timestamp: micros_timestamp_field("timestamp", &caps[1])?,
            request_id: caps[4].to_string(),
            latency: millis_field("latency", &caps[5])?,
            service_name: Ustr::from(&caps[6]),
            command: caps[7].to_string(),
        })
    }
}

pub fn parse_cache_log<R: BufRead>(reader: R) -> Result<Parsed<CacheCommandLogEntry>> {
    let parser = CacheLogParser::new()?;
    assembler::parse_lines("cache", reader, |l| parser.parse_line(l).map(Some))
}

#[test]
fn test_cache_line() {
    let p = CacheLogParser::new().unwrap();
    let r = p
        .parse_line("[2021-01-01 00:00:01.000001999] pid=12 tid=13 request_id=ab12 latency=0.25 service_name=post command=HGET post:5 author")
        .unwrap();
    assert!(format_timestamp(&r.timestamp) == "2021-01-01 00:00:01.000001");
    assert!(r.request_id == "ab12");
    assert!(r.latency == 250.0);
    assert!(r.service_name.as_str() == "post");
    assert!(r.command == "HGET post:5 author");

    assert!(p
        .parse_line("[2021-01-01 00:00:01.0] pid=12 tid=13 request_id=ab12 latency=0.25 command=GET x")
        .err()
        == Some(LineError::NoMatch("cache")));
}

#[test]
fn test_cache_log_file() {
    let file = std::fs::File::open("../tests/buzzlog/redis.log").unwrap();
    let p = parse_cache_log(std::io::BufReader::new(file)).unwrap();
    assert!(p.records.len() == 3);
    assert!(p.diagnostics.len() == 1);
    assert!(p.diagnostics[0].reason == LineError::bad_field("latency", "n/a"));
}
