/// RPC call logs, written by the client side of every service-to-service call:
///
///   [2021-01-01 00:00:00.123456789] pid=12 tid=13 request_id=ab12 server=post:9000 function=retrieve_post latency=0.00123
use crate::assembler;
use crate::tokens::{millis_field, timestamp_field};
use crate::{LineError, LineResult, Parsed, ToColumns};

use anyhow::Result;
use regex::Regex;
use rustutils::{format_timestamp, Timestamp};
use std::io::BufRead;
use ustr::Ustr;

#[derive(Debug, Clone, PartialEq)]
pub struct RpcLogEntry {
    pub timestamp: Timestamp,
    pub request_id: String,
    pub server: Ustr,
    pub function: Ustr,

    // Milliseconds.
    pub latency: f64,
}

pub const RPC_LOG_HEADER: [&str; 5] = ["timestamp", "request_id", "server", "function", "latency"];

impl ToColumns for RpcLogEntry {
    fn columns(&self) -> Vec<String> {
        vec![
            format_timestamp(&self.timestamp),
            self.request_id.clone(),
            self.server.to_string(),
            self.function.to_string(),
            self.latency.to_string(),
        ]
    }
}

pub struct RpcLogParser {
    line: Regex,
}

impl RpcLogParser {
    pub fn new() -> Result<RpcLogParser> {
        Ok(RpcLogParser {
            line: Regex::new(
                r"^\[([^\]]+)\] pid=(\S+) tid=(\S+) request_id=(\S+) server=(\S+) function=(\S+) latency=(\S+)$",
            )?,
        })
    }

    pub fn parse_line(&self, l: &str) -> LineResult<RpcLogEntry> {
        let Some(caps) = self.line.captures(l) else {
            return Err(LineError::NoMatch("rpc"));
        };
        Ok(RpcLogEntry {
            timestamp: timestamp_field("timestamp", &caps[1])?,
            request_id: caps[4].to_string(),
            server: Ustr::from(&caps[5]),
            function: Ustr::from(&caps[6]),
            latency: millis_field("latency", &caps[7])?,
        })
    }
}

pub fn parse_rpc_log<R: BufRead>(reader: R) -> Result<Parsed<RpcLogEntry>> {
    let parser = RpcLogParser::new()?;
    assembler::parse_lines("rpc", reader, |l| parser.parse_line(l).map(Some))
}

#[test]
fn test_rpc_line() {
    let p = RpcLogParser::new().unwrap();
    let r = p
        .parse_line("[2021-01-01 00:00:00.123456789] pid=12 tid=13 request_id=ab12 server=post:9000 function=retrieve_post latency=0.25")
        .unwrap();
    assert!(format_timestamp(&r.timestamp) == "2021-01-01 00:00:00.123456");
    assert!(r.request_id == "ab12");
    assert!(r.server.as_str() == "post:9000");
    assert!(r.function.as_str() == "retrieve_post");
    assert!(r.latency == 250.0);

    assert!(p.parse_line("pid=12 tid=13").err() == Some(LineError::NoMatch("rpc")));
    assert!(p
        .parse_line("[2021-01-01 00:00:00.1] pid=1 tid=1 request_id=x server=s function=f latency=fast")
        .err()
        == Some(LineError::bad_field("latency", "fast")));
}

#[test]
fn test_rpc_log_file() {
    let file = std::fs::File::open("../tests/buzzlog/calls.log").unwrap();
    let p = parse_rpc_log(std::io::BufReader::new(file)).unwrap();
    assert!(p.records.len() == 4);
    assert!(p.diagnostics.len() == 1);
    assert!(p.records[3].function.as_str() == "retrieve_account");
}
