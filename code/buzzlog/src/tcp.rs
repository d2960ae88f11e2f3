/// TCP logs captured with bpftrace on the server nodes.
///
/// tcplistenbl prints the accept backlog of a listening socket whenever a SYN arrives:
///
///   Attaching 2 probes...
///   TIME     PID    COMM             LEN/MAX
///   10:00:00 1234   nginx            3/511
///
/// tcpretrans prints every retransmitted segment:
///
///   Attaching 2 probes...
///   TIME     PID    LADDR:LPORT          RADDR:RPORT          STATE
///   10:00:00 1234   10.0.0.1:8080        10.0.0.2:53422       ESTABLISHED
///
/// The tool prints wall-clock time without a date, so timestamps are kept as text.  The banner and
/// column header lines carry no data and are passed over.
use crate::assembler;
use crate::tokens::u32_field;
use crate::{LineError, LineResult, Parsed, ToColumns};

use anyhow::Result;
use regex::Regex;
use std::io::BufRead;
use ustr::Ustr;

#[derive(Debug, Clone, PartialEq)]
pub struct TcpListenBacklogEntry {
    pub timestamp: String,
    pub pid: u32,
    pub command: Ustr,
    pub len: u32,
    pub max: u32,
}

pub const TCP_LISTEN_BACKLOG_HEADER: [&str; 5] = ["timestamp", "pid", "command", "len", "max"];

impl ToColumns for TcpListenBacklogEntry {
    fn columns(&self) -> Vec<String> {
        vec![
            self.timestamp.clone(),
            self.pid.to_string(),
            self.command.to_string(),
            self.len.to_string(),
            self.max.to_string(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TcpRetransmitEntry {
    pub timestamp: String,
    pub pid: u32,

    // The remote end.
    pub addr: String,
    pub port: u16,
    pub state: Ustr,
}

pub const TCP_RETRANSMIT_HEADER: [&str; 5] = ["timestamp", "pid", "addr", "port", "state"];

impl ToColumns for TcpRetransmitEntry {
    fn columns(&self) -> Vec<String> {
        vec![
            self.timestamp.clone(),
            self.pid.to_string(),
            self.addr.clone(),
            self.port.to_string(),
            self.state.to_string(),
        ]
    }
}

fn is_banner(l: &str) -> bool {
    l.starts_with("Attaching ") || l.starts_with("TIME ")
}

pub struct TcpLogParser {
    backlog: Regex,
    retransmit: Regex,
}

impl TcpLogParser {
    pub fn new() -> Result<TcpLogParser> {
        Ok(TcpLogParser {
            backlog: Regex::new(r"^([0-9.\-:]+)\s+(\d+)\s+(\S+)\s+(\d+)/(\d+)$")?,
            retransmit: Regex::new(
                r"^([0-9.\-:]+)\s+(\d+)\s+([^:\s]+):(\S+)\s+([^:\s]+):(\S+)\s+(.+)$",
            )?,
        })
    }

    pub fn parse_backlog_line(&self, l: &str) -> LineResult<Option<TcpListenBacklogEntry>> {
        let l = l.trim();
        if is_banner(l) {
            return Ok(None);
        }
        let Some(caps) = self.backlog.captures(l) else {
            return Err(LineError::NoMatch("tcplistenbl"));
        };
        Ok(Some(TcpListenBacklogEntry {
            timestamp: caps[1].to_string(),
            pid: u32_field("pid", &caps[2])?,
            command: Ustr::from(&caps[3]),
            len: u32_field("len", &caps[4])?,
            max: u32_field("max", &caps[5])?,
        }))
    }

    pub fn parse_retransmit_line(&self, l: &str) -> LineResult<Option<TcpRetransmitEntry>> {
        let l = l.trim();
        if is_banner(l) {
            return Ok(None);
        }
        let Some(caps) = self.retransmit.captures(l) else {
            return Err(LineError::NoMatch("tcpretrans"));
        };
        let Ok(port) = caps[6].parse::<u16>() else {
            return Err(LineError::bad_field("port", &caps[6]));
        };
        Ok(Some(TcpRetransmitEntry {
            timestamp: caps[1].to_string(),
            pid: u32_field("pid", &caps[2])?,
            addr: caps[5].to_string(),
            port,
            state: Ustr::from(&caps[7]),
        }))
    }
}

pub fn parse_tcp_listen_backlog_log<R: BufRead>(
    reader: R,
) -> Result<Parsed<TcpListenBacklogEntry>> {
    let parser = TcpLogParser::new()?;
    assembler::parse_lines("tcplistenbl", reader, |l| parser.parse_backlog_line(l))
}

pub fn parse_tcp_retransmit_log<R: BufRead>(reader: R) -> Result<Parsed<TcpRetransmitEntry>> {
    let parser = TcpLogParser::new()?;
    assembler::parse_lines("tcpretrans", reader, |l| parser.parse_retransmit_line(l))
}

#[test]
fn test_backlog() {
    let input = "Attaching 2 probes...\n\
                 TIME     PID    COMM             LEN/MAX\n\
                 10:00:00 1234   nginx            3/511\n\
                 10:00:01 1234   nginx\n\
                 10:00:02 99     post_server      0/128\n";
    let p = parse_tcp_listen_backlog_log(input.as_bytes()).unwrap();
    assert!(p.records.len() == 2);
    assert!(p.records[0].timestamp == "10:00:00");
    assert!(p.records[0].pid == 1234);
    assert!(p.records[0].command.as_str() == "nginx");
    assert!(p.records[0].len == 3);
    assert!(p.records[0].max == 511);
    assert!(p.records[1].command.as_str() == "post_server");
    assert!(p.diagnostics.len() == 1);
    assert!(p.diagnostics[0].line_no == 4);
}

#[test]
fn test_retransmit() {
    let parser = TcpLogParser::new().unwrap();
    let r = parser
        .parse_retransmit_line("10:00:00 1234   10.0.0.1:8080        10.0.0.2:53422       ESTABLISHED  ")
        .unwrap()
        .unwrap();
    assert!(r.timestamp == "10:00:00");
    assert!(r.pid == 1234);
    assert!(r.addr == "10.0.0.2");
    assert!(r.port == 53422);
    assert!(r.state.as_str() == "ESTABLISHED");

    assert!(parser.parse_retransmit_line("TIME     PID    LADDR:LPORT").unwrap().is_none());
    assert!(parser
        .parse_retransmit_line("10:00:00 1234 10.0.0.1:8080 10.0.0.2:99999 SYN_SENT")
        .err()
        == Some(LineError::bad_field("port", "99999")));
    assert!(parser.parse_retransmit_line("10:00:00 1234 nonsense").err()
        == Some(LineError::NoMatch("tcpretrans")));
}
