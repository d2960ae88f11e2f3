/// Database query logs, written by the services around every SQL statement:
///
///   [2021-01-01 00:00:00.123456789] pid=12 tid=13 request_id=ab12 dbname=posts latency=0.0021 query="SELECT * FROM Posts WHERE id = 5"
///
/// Older services do not write `dbname=`.  For those lines the table name is inferred from the
/// statement: the identifier after FROM for SELECT and DELETE, after INTO for INSERT, and after
/// UPDATE for UPDATE.  Other statements have no table.  A SELECT, INSERT, UPDATE or DELETE whose
/// table cannot be found is not something the benchmark issues, and is fatal.
use crate::assembler;
use crate::tokens::{micros_timestamp_field, millis_field};
use crate::{LineError, LineResult, Parsed, ToColumns};

use anyhow::Result;
use regex::Regex;
use rustutils::{format_timestamp, Timestamp};
use std::io::BufRead;
use ustr::Ustr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    // The upper-cased leading keyword.
    Other(Ustr),
}

impl QueryType {
    pub fn from_keyword(keyword: &str) -> QueryType {
        let keyword = keyword.to_uppercase();
        match keyword.as_str() {
            "SELECT" => QueryType::Select,
            "INSERT" => QueryType::Insert,
            "UPDATE" => QueryType::Update,
            "DELETE" => QueryType::Delete,
            _ => QueryType::Other(Ustr::from(keyword.as_str())),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            QueryType::Select => "SELECT",
            QueryType::Insert => "INSERT",
            QueryType::Update => "UPDATE",
            QueryType::Delete => "DELETE",
            QueryType::Other(k) => k.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryLogEntry {
    // Truncated to microseconds.
    pub timestamp: Timestamp,
    pub request_id: String,

    // The logged dbname, or else the inferred table name.
    pub dbname: Option<Ustr>,
    pub query_type: QueryType,

    // Milliseconds.
    pub latency: f64,
}

pub const QUERY_LOG_HEADER: [&str; 5] = ["timestamp", "request_id", "dbname", "type", "latency"];

impl ToColumns for QueryLogEntry {
    fn columns(&self) -> Vec<String> {
        vec![
            format_timestamp(&self.timestamp),
            self.request_id.clone(),
            self.dbname.map(|d| d.to_string()).unwrap_or_default(),
            self.query_type.as_str().to_string(),
            self.latency.to_string(),
        ]
    }
}

pub struct QueryLogParser {
    line: Regex,
    from_table: Regex,
    into_table: Regex,
    update_table: Regex,
}

impl QueryLogParser {
    pub fn new() -> Result<QueryLogParser> {
        Ok(QueryLogParser {
            line: Regex::new(
                r#"^\[([^\]]+)\] pid=(\S+) tid=(\S+) request_id=(\S+)(?: dbname=(\S+))? latency=(\S+) query="(.+)"$"#,
            )?,
            from_table: Regex::new(r#"(?i)\bFROM\s+["`]?([A-Za-z_][\w.]*)"#)?,
            into_table: Regex::new(r#"(?i)\bINTO\s+["`]?([A-Za-z_][\w.]*)"#)?,
            update_table: Regex::new(r#"(?i)^\s*UPDATE\s+["`]?([A-Za-z_][\w.]*)"#)?,
        })
    }

    pub fn parse_line(&self, l: &str) -> LineResult<QueryLogEntry> {
        let Some(caps) = self.line.captures(l) else {
            return Err(LineError::NoMatch("query"));
        };
        let query = &caps[7];
        let Some(keyword) = query.split_whitespace().next() else {
            return Err(LineError::bad_field("query", query));
        };
        let query_type = QueryType::from_keyword(keyword);
        let dbname = match caps.get(5) {
            Some(d) => Some(Ustr::from(d.as_str())),
            None => self.infer_table(&query_type, query)?,
        };
        Ok(QueryLogEntry {
            timestamp: micros_timestamp_field("timestamp", &caps[1])?,
            request_id: caps[4].to_string(),
            dbname,
            query_type,
            latency: millis_field("latency", &caps[6])?,
        })
    }

    /// The table a statement operates on, None for statements other than the four DML verbs.
    pub fn infer_table(&self, query_type: &QueryType, query: &str) -> LineResult<Option<Ustr>> {
        let re = match query_type {
            QueryType::Select | QueryType::Delete => &self.from_table,
            QueryType::Insert => &self.into_table,
            QueryType::Update => &self.update_table,
            QueryType::Other(_) => return Ok(None),
        };
        match re.captures(query) {
            Some(c) => Ok(Some(Ustr::from(&c[1]))),
            None => Err(LineError::Unclassified {
                what: "query",
                input: query.to_string(),
            }),
        }
    }
}

pub fn parse_query_log<R: BufRead>(reader: R) -> Result<Parsed<QueryLogEntry>> {
    let parser = QueryLogParser::new()?;
    assembler::parse_lines("query", reader, |l| parser.parse_line(l).map(Some))
}

#[test]
fn test_query_line() {
    let p = QueryLogParser::new().unwrap();
    let r = p
        .parse_line(r#"[2021-01-01 00:00:00.123456789] pid=12 tid=13 request_id=ab12 dbname=posts latency=0.5 query="select * from Posts where id = 5""#)
        .unwrap();
    assert!(format_timestamp(&r.timestamp) == "2021-01-01 00:00:00.123456");
    assert!(chrono::Timelike::nanosecond(&r.timestamp) == 123456000);
    assert!(r.request_id == "ab12");
    assert!(r.dbname.unwrap().as_str() == "posts");
    assert!(r.query_type == QueryType::Select);
    assert!(r.latency == 500.0);
}

#[test]
fn test_table_inference() {
    let p = QueryLogParser::new().unwrap();
    let line = |q: &str| {
        format!("[2021-01-01 00:00:00.000000001] pid=1 tid=2 request_id=r latency=0.25 query=\"{q}\"")
    };
    let r = p.parse_line(&line("SELECT id FROM Accounts WHERE x = 1")).unwrap();
    assert!(r.dbname.unwrap().as_str() == "Accounts");
    let r = p.parse_line(&line("INSERT INTO Likes (a, b) VALUES (1, 2)")).unwrap();
    assert!(r.dbname.unwrap().as_str() == "Likes");
    assert!(r.query_type == QueryType::Insert);
    let r = p.parse_line(&line("update Follows SET x = 2")).unwrap();
    assert!(r.dbname.unwrap().as_str() == "Follows");
    assert!(r.query_type == QueryType::Update);
    let r = p.parse_line(&line("DELETE FROM \"Posts\" WHERE id = 3")).unwrap();
    assert!(r.dbname.unwrap().as_str() == "Posts");
    assert!(r.query_type == QueryType::Delete);

    let r = p.parse_line(&line("begin transaction")).unwrap();
    assert!(r.dbname.is_none());
    assert!(r.query_type == QueryType::Other(Ustr::from("BEGIN")));
    assert!(r.query_type.as_str() == "BEGIN");

    let e = p.parse_line(&line("SELECT 1")).err().unwrap();
    assert!(e.is_fatal());
}

#[test]
fn test_query_log_file() {
    let file = std::fs::File::open("../tests/buzzlog/queries.log").unwrap();
    let p = parse_query_log(std::io::BufReader::new(file)).unwrap();
    assert!(p.records.len() == 3);
    assert!(p.diagnostics.is_empty());
    assert!(p.records[2].query_type == QueryType::Insert);
}
