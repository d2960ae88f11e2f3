/// The load generator's request log.  One line per HTTP request issued against the API gateway:
///
///   [2021-01-01 00:00:00.000000] GET http://gateway:8080/post/5?request_id=ab12&limit=1 200 - latency=0.015
///
/// The URL is normalized by removing the pagination and tracing parameters, and the request is
/// then classified by matching method and normalized URL against an ordered table of request
/// types.  The table is assumed to cover the whole API surface, so a request that cannot be
/// classified is a fatal error.
use crate::assembler;
use crate::{LineError, LineResult, Parsed, ToColumns};

use anyhow::{bail, Context, Result};
use regex::Regex;
use rustutils::{format_timestamp, get_f64, get_u32, grab_string, grab_string_opt, parse_timestamp};
use rustutils::{read_json_file, Timestamp};
use serde_json::Value;
use std::io::BufRead;
use std::sync::OnceLock;
use ustr::Ustr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Successful,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Successful => "successful",
            RequestStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadWrite {
    Read,
    Write,
}

impl ReadWrite {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadWrite::Read => "read",
            ReadWrite::Write => "write",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestLogEntry {
    pub timestamp: Timestamp,
    pub method: Ustr,

    // Normalized: without limit, offset and request_id.
    pub url: String,

    // Empty if the URL has no request_id.
    pub request_id: String,
    pub status_code: u32,

    // Seconds.
    pub latency: f64,

    pub status: RequestStatus,
    pub request_type: Ustr,
    pub rw: ReadWrite,
}

pub const REQUEST_LOG_HEADER: [&str; 9] = [
    "timestamp",
    "method",
    "url",
    "request_id",
    "status_code",
    "latency",
    "status",
    "type",
    "rw",
];

impl ToColumns for RequestLogEntry {
    fn columns(&self) -> Vec<String> {
        vec![
            format_timestamp(&self.timestamp),
            self.method.to_string(),
            self.url.clone(),
            self.request_id.clone(),
            self.status_code.to_string(),
            self.latency.to_string(),
            self.status.as_str().to_string(),
            self.request_type.to_string(),
            self.rw.as_str().to_string(),
        ]
    }
}

// (path, query string, method, type).  The path and query string are regex fragments that are
// spliced into a URL pattern by `RequestTypeTable::new`.  Order matters: the first match wins.

const BUILTIN_REQUEST_TYPES: [(&str, &str, &str, &str); 17] = [
    (r"account/\d+", "", "GET", "retrieve_account"),
    ("account", "", "POST", "create_account"),
    (r"account/\d+", "", "PUT", "update_account"),
    ("follow", r"followee_id=\d+", "GET", "retrieve_account_followers"),
    ("follow", r"follower_id=\d+", "GET", "retrieve_account_followees"),
    ("follow", "", "POST", "follow_account"),
    (r"follow/\d+", "", "DELETE", "delete_follow"),
    ("like", r"account_id=\d+", "GET", "retrieve_account_likes"),
    ("like", r"post_id=\d+", "GET", "retrieve_post_likes"),
    ("like", "", "POST", "like_post"),
    (r"like/\d+", "", "DELETE", "delete_like"),
    ("post", "", "GET", "retrieve_recent_posts"),
    ("post", r"author_id=\d+", "GET", "retrieve_account_posts"),
    (r"post/\d+", "", "GET", "retrieve_post"),
    ("post", "", "POST", "create_post"),
    (r"post/\d+", "", "DELETE", "delete_post"),
    ("trending", "", "GET", "list_trending_hashtags"),
];

struct RequestTypeRule {
    pattern: Regex,
    method: String,
    label: Ustr,
}

/// An ordered table of (URL pattern, method) -> request type.  Immutable once built.

pub struct RequestTypeTable {
    rules: Vec<RequestTypeRule>,
}

impl RequestTypeTable {
    /// Build a table from (path, query string, method, type) tuples.
    pub fn new<'a, I>(entries: I) -> Result<RequestTypeTable>
    where
        I: IntoIterator<Item = (&'a str, &'a str, &'a str, &'a str)>,
    {
        let mut rules = vec![];
        for (path, qs, method, label) in entries {
            let source = format!(r"^http://[\w.\-]+:\d+/{path}/?\??{qs}$");
            let pattern = Regex::new(&source)
                .with_context(|| format!("Bad pattern for request type '{label}'"))?;
            rules.push(RequestTypeRule {
                pattern,
                method: method.to_string(),
                label: Ustr::from(label),
            });
        }
        Ok(RequestTypeTable { rules })
    }

    /// The table for the benchmark's API gateway.
    pub fn builtin() -> Result<RequestTypeTable> {
        RequestTypeTable::new(BUILTIN_REQUEST_TYPES)
    }

    /// Read a replacement table from a JSON file holding an array of objects with string fields
    /// "path", "method", "type", and optionally "query".
    pub fn from_json_file(filename: &str) -> Result<RequestTypeTable> {
        let value = read_json_file(filename)
            .with_context(|| format!("Could not read request types from {filename}"))?;
        RequestTypeTable::from_json(&value)
    }

    pub fn from_json(value: &Value) -> Result<RequestTypeTable> {
        let Value::Array(entries) = value else {
            bail!("Request type table must be an array")
        };
        let mut tuples = vec![];
        for (ix, entry) in entries.iter().enumerate() {
            let Value::Object(fields) = entry else {
                bail!("Request type entry {ix} must be an object")
            };
            let path = grab_string(fields, "path")?;
            let query = grab_string_opt(fields, "query")?;
            let method = grab_string(fields, "method")?;
            let label = grab_string(fields, "type")?;
            tuples.push((path, query, method, label));
        }
        RequestTypeTable::new(
            tuples
                .iter()
                .map(|(p, q, m, l)| (p.as_str(), q.as_str(), m.as_str(), l.as_str())),
        )
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The label of the first rule whose method is `method` and whose pattern matches the
    /// normalized `url`.
    pub fn classify(&self, method: &str, url: &str) -> Option<Ustr> {
        self.rules
            .iter()
            .find(|r| r.method == method && r.pattern.is_match(url))
            .map(|r| r.label)
    }
}

/// Tokenizer for request log lines.  Compiles its patterns once and classifies through a borrowed
/// table.

pub struct RequestLogParser<'a> {
    table: &'a RequestTypeTable,
    line: Regex,
    request_id: Regex,
    strip: Vec<Regex>,
}

impl<'a> RequestLogParser<'a> {
    pub fn new(table: &'a RequestTypeTable) -> Result<RequestLogParser<'a>> {
        Ok(RequestLogParser {
            table,
            line: Regex::new(
                r"^\[(\d+-\d+-\d+ \d+:\d+:\d+\.\d+)\] (\S+) (\S+) (\d+) - latency=(\d+(?:\.\d+)?)$",
            )?,
            request_id: Regex::new(r"request_id=([a-zA-Z0-9]+)&?")?,
            // Applied in order.
            strip: vec![
                Regex::new(r"limit=\d+&?")?,
                Regex::new(r"offset=\d+&?")?,
                Regex::new(r"request_id=[a-zA-Z0-9]+&?")?,
                Regex::new(r"&$")?,
                Regex::new(r"\?$")?,
            ],
        })
    }

    pub fn parse_line(&self, l: &str) -> LineResult<RequestLogEntry> {
        let Some(caps) = self.line.captures(l) else {
            return Err(LineError::NoMatch("request"));
        };
        let timestamp = match parse_timestamp(&caps[1]) {
            Ok(t) => t,
            Err(_) => return Err(LineError::bad_field("timestamp", &caps[1])),
        };
        let method = &caps[2];
        let raw_url = &caps[3];
        let Some(status_code) = get_u32(&caps[4]) else {
            return Err(LineError::bad_field("status_code", &caps[4]));
        };
        let Some(latency) = get_f64(&caps[5], 1.0) else {
            return Err(LineError::bad_field("latency", &caps[5]));
        };

        let request_id = match self.request_id.captures(raw_url) {
            Some(c) => c[1].to_string(),
            None => "".to_string(),
        };
        let mut url = raw_url.to_string();
        for re in &self.strip {
            url = re.replace_all(&url, "").into_owned();
        }

        let Some(request_type) = self.table.classify(method, &url) else {
            return Err(LineError::Unclassified {
                what: "request",
                input: format!("{method} {url}"),
            });
        };

        Ok(RequestLogEntry {
            timestamp,
            method: Ustr::from(method),
            url,
            request_id,
            status_code,
            latency,
            status: if status_code == 200 {
                RequestStatus::Successful
            } else {
                RequestStatus::Failed
            },
            request_type,
            rw: if method.eq_ignore_ascii_case("GET") {
                ReadWrite::Read
            } else {
                ReadWrite::Write
            },
        })
    }
}

/// The built-in table, compiled on first use.

pub fn builtin_request_types() -> Result<&'static RequestTypeTable> {
    static TABLE: OnceLock<RequestTypeTable> = OnceLock::new();
    if let Some(t) = TABLE.get() {
        return Ok(t);
    }
    let table = RequestTypeTable::builtin()?;
    Ok(TABLE.get_or_init(|| table))
}

pub fn parse_request_log<R: BufRead>(
    reader: R,
    table: &RequestTypeTable,
) -> Result<Parsed<RequestLogEntry>> {
    let parser = RequestLogParser::new(table)?;
    assembler::parse_lines("request", reader, |l| parser.parse_line(l).map(Some))
}

/// The time span covered by a set of request logs, from the earliest to the latest request.  This
/// is taken to be the duration of the experiment.

pub fn request_time_span<'a, I>(logs: I) -> Option<(Timestamp, Timestamp)>
where
    I: IntoIterator<Item = &'a Parsed<RequestLogEntry>>,
{
    let mut span: Option<(Timestamp, Timestamp)> = None;
    for log in logs {
        for r in &log.records {
            span = match span {
                None => Some((r.timestamp, r.timestamp)),
                Some((lo, hi)) => Some((lo.min(r.timestamp), hi.max(r.timestamp))),
            };
        }
    }
    span
}

#[cfg(test)]
fn test_parser_line(l: &str) -> LineResult<RequestLogEntry> {
    let table = builtin_request_types().unwrap();
    RequestLogParser::new(table).unwrap().parse_line(l)
}

#[test]
fn test_retrieve_post() {
    let r = test_parser_line(
        "[2021-01-01 00:00:00.000] GET http://h:80/post/5?request_id=ab12&limit=1 200 - latency=0.015",
    )
    .unwrap();
    assert!(r.method.as_str() == "GET");
    assert!(r.url == "http://h:80/post/5");
    assert!(r.request_id == "ab12");
    assert!(r.status_code == 200);
    assert!(r.latency == 0.015);
    assert!(r.status == RequestStatus::Successful);
    assert!(r.request_type.as_str() == "retrieve_post");
    assert!(r.rw == ReadWrite::Read);
    assert!(format_timestamp(&r.timestamp) == "2021-01-01 00:00:00.000000");
}

#[test]
fn test_status_and_rw() {
    let r = test_parser_line(
        "[2021-01-01 00:00:01.250] POST http://gateway-1.local:8080/post?request_id=Zz9 500 - latency=1.5",
    )
    .unwrap();
    assert!(r.status == RequestStatus::Failed);
    assert!(r.rw == ReadWrite::Write);
    assert!(r.request_type.as_str() == "create_post");
    assert!(r.url == "http://gateway-1.local:8080/post");

    let r = test_parser_line(
        "[2021-01-01 00:00:02.000] DELETE http://h:80/follow/12 204 - latency=0.2",
    )
    .unwrap();
    assert!(r.status == RequestStatus::Failed);
    assert!(r.rw == ReadWrite::Write);
    assert!(r.request_type.as_str() == "delete_follow");
    assert!(r.request_id == "");
}

#[test]
fn test_query_string_types() {
    let r = test_parser_line(
        "[2021-01-01 00:00:03.000] GET http://h:80/follow?followee_id=7&limit=10&offset=20&request_id=q1 200 - latency=0.010",
    )
    .unwrap();
    assert!(r.url == "http://h:80/follow?followee_id=7");
    assert!(r.request_type.as_str() == "retrieve_account_followers");

    let r = test_parser_line(
        "[2021-01-01 00:00:04.000] GET http://h:80/post?limit=10&request_id=q2 200 - latency=0.010",
    )
    .unwrap();
    assert!(r.url == "http://h:80/post");
    assert!(r.request_type.as_str() == "retrieve_recent_posts");

    let r = test_parser_line("[2021-01-01 00:00:05.000] GET http://h:80/trending 200 - latency=0.5")
        .unwrap();
    assert!(r.request_type.as_str() == "list_trending_hashtags");
}

#[test]
fn test_bad_lines() {
    assert!(test_parser_line("").err() == Some(LineError::NoMatch("request")));
    assert!(
        test_parser_line("[2021-01-01 00:00:05.000] GET http://h:80/trending 200 - latency=")
            .err()
            == Some(LineError::NoMatch("request"))
    );
    let e = test_parser_line("[2021-01-01 00:00:05.000] GET http://h:80/nowhere 200 - latency=0.5")
        .err()
        .unwrap();
    assert!(e.is_fatal());
}

#[test]
fn test_request_log_file() {
    let table = builtin_request_types().unwrap();
    let file = std::fs::File::open("../tests/buzzlog/loadgen.log").unwrap();
    let p = parse_request_log(std::io::BufReader::new(file), table).unwrap();
    assert!(p.records.len() == 6);
    assert!(p.diagnostics.len() == 1);
    assert!(p.diagnostics[0].line_no == 4);
    let (lo, hi) = request_time_span([&p]).unwrap();
    assert!(format_timestamp(&lo) == "2021-03-02 10:00:00.100000");
    assert!(format_timestamp(&hi) == "2021-03-02 10:00:02.900000");

    // Parsing is repeatable.
    let file = std::fs::File::open("../tests/buzzlog/loadgen.log").unwrap();
    let q = parse_request_log(std::io::BufReader::new(file), table).unwrap();
    assert!(p.records == q.records);
}

#[test]
fn test_request_types_from_json() {
    let table = RequestTypeTable::from_json_file("../tests/buzzlog/request-types.json").unwrap();
    assert!(table.len() == 2);
    assert!(table.classify("GET", "http://h:80/health").unwrap().as_str() == "health_check");
    assert!(table.classify("GET", "http://h:80/search?q=abc").unwrap().as_str() == "search");
    assert!(table.classify("POST", "http://h:80/health").is_none());

    let bad: Value = serde_json::from_str(r#"[{"path": "x", "method": "GET"}]"#).unwrap();
    let msg = RequestTypeTable::from_json(&bad).err().unwrap().to_string();
    assert!(msg.contains("'type'"));
}
