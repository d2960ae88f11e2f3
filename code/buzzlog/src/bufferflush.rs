/// Buffer flush logs, written by the rAdvisor agent each time it writes a batch of accounting data
/// for a target to disk.  A plain CSV table:
///
///   timestamp,target_id,written,success
///   1614679200123,4f2a9c1e,40960,true
///
/// Entries are keyed by timestamp.  If the same timestamp appears twice, the later entry replaces
/// the earlier one but keeps its position.
use crate::assembler::{self, Row};
use crate::{LineError, LineResult, Parsed, ToColumns};

use anyhow::Result;
use rustutils::{get_i64, get_u64};
use std::collections::HashMap;
use std::io::Read;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferFlushLogEntry {
    pub timestamp: i64,
    pub target_id: String,

    // Bytes.
    pub written: u64,
    pub success: bool,
}

pub const BUFFER_FLUSH_HEADER: [&str; 4] = ["timestamp", "target_id", "written", "success"];

impl ToColumns for BufferFlushLogEntry {
    fn columns(&self) -> Vec<String> {
        vec![
            self.timestamp.to_string(),
            self.target_id.clone(),
            self.written.to_string(),
            self.success.to_string(),
        ]
    }
}

fn required<'a>(row: &Row<'a>, name: &'static str) -> LineResult<&'a str> {
    match row.get(name) {
        Some(v) => Ok(v.trim()),
        None => Err(LineError::MissingField(name)),
    }
}

impl BufferFlushLogEntry {
    pub fn from_row(row: &Row) -> LineResult<BufferFlushLogEntry> {
        let timestamp = required(row, "timestamp")?;
        let written = required(row, "written")?;
        Ok(BufferFlushLogEntry {
            timestamp: get_i64(timestamp).ok_or_else(|| LineError::bad_field("timestamp", timestamp))?,
            target_id: required(row, "target_id")?.to_string(),
            written: get_u64(written).ok_or_else(|| LineError::bad_field("written", written))?,
            success: required(row, "success")?.eq_ignore_ascii_case("true"),
        })
    }
}

/// Parse a buffer flush log.  The records are in logging order with duplicate timestamps merged.

pub fn parse_buffer_flush_log<R: Read>(reader: R) -> Result<Parsed<BufferFlushLogEntry>> {
    let parsed = assembler::parse_rows("buffer flush", reader, BufferFlushLogEntry::from_row)?;
    let mut merged = Parsed {
        records: Vec::<BufferFlushLogEntry>::with_capacity(parsed.records.len()),
        diagnostics: parsed.diagnostics,
    };
    let mut index = HashMap::new();
    for entry in parsed.records {
        match index.get(&entry.timestamp) {
            Some(ix) => {
                debug!("buffer flush log: replacing entry for timestamp {}", entry.timestamp);
                merged.records[*ix] = entry;
            }
            None => {
                index.insert(entry.timestamp, merged.records.len());
                merged.records.push(entry);
            }
        }
    }
    Ok(merged)
}

#[test]
fn test_buffer_flush_log() {
    let input = "timestamp,target_id,written,success\n\
                 100,a,4096,true\n\
                 200,b,0,False\n\
                 oops,c,1,true\n\
                 100,a,8192,TRUE\n\
                 300,c,12,no\n";
    let p = parse_buffer_flush_log(input.as_bytes()).unwrap();
    assert!(p.records.len() == 3);
    assert!(
        p.records[0]
            == BufferFlushLogEntry {
                timestamp: 100,
                target_id: "a".to_string(),
                written: 8192,
                success: true
            }
    );
    assert!(p.records[1].timestamp == 200);
    assert!(!p.records[1].success);
    assert!(p.records[2].timestamp == 300);
    assert!(!p.records[2].success);
    assert!(p.diagnostics.len() == 1);
    assert!(p.diagnostics[0].line_no == 3);
    assert!(p.diagnostics[0].reason == LineError::bad_field("timestamp", "oops"));
}

#[test]
fn test_missing_column() {
    let input = "timestamp,target_id,written\n100,a,4096\n";
    let p = parse_buffer_flush_log(input.as_bytes()).unwrap();
    assert!(p.records.is_empty());
    assert!(p.diagnostics[0].reason == LineError::MissingField("success"));
}

#[test]
fn test_round_trip() {
    let original = vec![
        BufferFlushLogEntry {
            timestamp: 1614679200123,
            target_id: "4f2a9c1e".to_string(),
            written: 40960,
            success: true,
        },
        BufferFlushLogEntry {
            timestamp: 1614679201123,
            target_id: "id, with comma".to_string(),
            written: 0,
            success: false,
        },
    ];
    let mut w = csv::Writer::from_writer(vec![]);
    w.write_record(BUFFER_FLUSH_HEADER).unwrap();
    for e in &original {
        w.write_record(e.columns()).unwrap();
    }
    let text = w.into_inner().unwrap();

    let p = parse_buffer_flush_log(text.as_slice()).unwrap();
    assert!(p.diagnostics.is_empty());
    assert!(p.records == original);
}
