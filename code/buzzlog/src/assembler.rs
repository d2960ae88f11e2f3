/// The record stream assembler drives a tokenizer across a whole log and collects the records in
/// file order.
///
/// For line-oriented logs the tokenizer is called once per physical line and may produce any number
/// of records (usually zero or one; collectl fans one line out into several).  A line that fails
/// recoverably becomes a `Diagnostic` and is logged.  The very last line of a log is frequently
/// partial, because the logs are copied off the nodes while the benchmark is still writing them or
/// because the writer left an empty line behind; if the last line fails, it is dropped quietly.
///
/// For CSV logs the tokenizer is called once per data row with a `Row` that allows lookup by
/// column name.
///
/// A fatal `LineError` aborts the parse and is returned as an error naming the line.
use crate::source::LossyLines;
use crate::{Diagnostic, LineResult, Parsed};

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::io::{self, BufRead, Read};
use tracing::{debug, info, warn};

pub fn parse_lines<R, F, C, T>(kind: &'static str, reader: R, tokenize: F) -> Result<Parsed<T>>
where
    R: BufRead,
    F: FnMut(&str) -> LineResult<C>,
    C: IntoIterator<Item = T>,
{
    assemble_lines(kind, LossyLines::new(reader), 0, true, tokenize)
}

/// The engine under `parse_lines`, for lines that have already been split out of a source.  Line
/// numbers in diagnostics start at `line_offset + 1`.  If `drop_failed_last` is set, a failure on
/// the last line is taken to be a partially written line and is not reported; set it only when the
/// lines run to the end of the source.

pub fn assemble_lines<I, S, F, C, T>(
    kind: &'static str,
    lines: I,
    line_offset: usize,
    drop_failed_last: bool,
    mut tokenize: F,
) -> Result<Parsed<T>>
where
    I: IntoIterator<Item = io::Result<S>>,
    S: AsRef<str>,
    F: FnMut(&str) -> LineResult<C>,
    C: IntoIterator<Item = T>,
{
    let mut parsed = Parsed::new();
    // A failure is held back until we know whether it was on the last line.
    let mut pending: Option<Diagnostic> = None;
    let mut line_no = line_offset;
    for line in lines {
        let line = line?;
        line_no += 1;
        if let Some(d) = pending.take() {
            report(kind, &d);
            parsed.diagnostics.push(d);
        }
        match tokenize(line.as_ref()) {
            Ok(records) => parsed.records.extend(records),
            Err(e) if e.is_fatal() => bail!("{kind} log, line {line_no}: {e}"),
            Err(reason) => pending = Some(Diagnostic { line_no, reason }),
        }
    }
    if let Some(d) = pending {
        if drop_failed_last {
            debug!("{kind} log: dropping partial last line {}", d.line_no);
        } else {
            report(kind, &d);
            parsed.diagnostics.push(d);
        }
    }
    info!(
        "{kind} log: {} records, {} lines skipped",
        parsed.records.len(),
        parsed.skipped()
    );
    Ok(parsed)
}

/// Parse a CSV log with a header row.

pub fn parse_rows<R, F, T>(kind: &'static str, reader: R, mut tokenize: F) -> Result<Parsed<T>>
where
    R: Read,
    F: FnMut(&Row) -> LineResult<T>,
{
    let mut rows = CsvRows::new(kind, reader)?;
    let mut parsed = Parsed::new();
    while let Some(outcome) = rows.next_row(&mut tokenize)? {
        match outcome {
            Ok(record) => parsed.records.push(record),
            Err(d) => parsed.diagnostics.push(d),
        }
    }
    info!(
        "{kind} log: {} records, {} rows skipped",
        parsed.records.len(),
        parsed.skipped()
    );
    Ok(parsed)
}

/// One CSV data row, addressable by column name.

pub struct Row<'a> {
    columns: &'a HashMap<String, usize>,
    record: &'a csv::StringRecord,
}

impl<'a> Row<'a> {
    /// The raw text of the column, or None if the log has no such column.
    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.columns.get(name).and_then(|ix| self.record.get(*ix))
    }

    /// The text of the column, treating an absent column as empty.
    pub fn get_or_empty(&self, name: &str) -> &'a str {
        self.get(name).unwrap_or("")
    }
}

/// Single-pass reader of CSV data rows.  This is the engine under both `parse_rows` and the lazy
/// target-log iterator.

pub struct CsvRows<R: Read> {
    kind: &'static str,
    reader: csv::Reader<R>,
    columns: HashMap<String, usize>,
    record: csv::StringRecord,
    row_no: usize,
}

impl<R: Read> CsvRows<R> {
    pub fn new(kind: &'static str, reader: R) -> Result<CsvRows<R>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let columns = match reader.headers() {
            Ok(headers) => headers
                .iter()
                .enumerate()
                .map(|(ix, name)| (name.trim().to_string(), ix))
                .collect::<HashMap<String, usize>>(),
            Err(e) => bail!("{kind} log: could not read the column header: {e}"),
        };
        Ok(CsvRows {
            kind,
            reader,
            columns,
            record: csv::StringRecord::new(),
            row_no: 0,
        })
    }

    /// Read and tokenize the next row.  Ok(None) at end of input; Ok(Some(Err(_))) for a row that
    /// was skipped, which has already been logged; Err for I/O errors and fatal row errors.
    pub fn next_row<F, T>(&mut self, tokenize: &mut F) -> Result<Option<Result<T, Diagnostic>>>
    where
        F: FnMut(&Row) -> LineResult<T>,
    {
        let more = match self.reader.read_record(&mut self.record) {
            Ok(more) => more,
            Err(e) => {
                if let csv::ErrorKind::Io(_) = e.kind() {
                    return Err(e.into());
                }
                self.row_no += 1;
                let d = Diagnostic {
                    line_no: self.row_no,
                    reason: crate::LineError::Malformed(e.to_string()),
                };
                report(self.kind, &d);
                return Ok(Some(Err(d)));
            }
        };
        if !more {
            return Ok(None);
        }
        self.row_no += 1;
        let row = Row {
            columns: &self.columns,
            record: &self.record,
        };
        match tokenize(&row) {
            Ok(record) => Ok(Some(Ok(record))),
            Err(e) if e.is_fatal() => bail!("{} log, row {}: {e}", self.kind, self.row_no),
            Err(reason) => {
                let d = Diagnostic {
                    line_no: self.row_no,
                    reason,
                };
                report(self.kind, &d);
                Ok(Some(Err(d)))
            }
        }
    }
}

fn report(kind: &str, d: &Diagnostic) {
    warn!("{kind} log, line {}: skipped: {}", d.line_no, d.reason);
}

#[cfg(test)]
fn tokenize_number(l: &str) -> LineResult<Option<u32>> {
    match rustutils::get_u32(l) {
        Some(n) => Ok(Some(n)),
        None => Err(crate::LineError::NoMatch("number")),
    }
}

#[test]
fn test_tail_elision() {
    // A trailing empty line is dropped without a diagnostic.
    let p = parse_lines("number", "1\n2\n\n".as_bytes(), tokenize_number).unwrap();
    assert!(p.records == vec![1, 2]);
    assert!(p.diagnostics.is_empty());

    // A partial last line likewise.
    let p = parse_lines("number", "1\n2\n3x".as_bytes(), tokenize_number).unwrap();
    assert!(p.records == vec![1, 2]);
    assert!(p.diagnostics.is_empty());

    // A bad line in the body is reported and skipped.
    let p = parse_lines("number", "1\nzappa\n3\n".as_bytes(), tokenize_number).unwrap();
    assert!(p.records == vec![1, 3]);
    assert!(p.diagnostics.len() == 1);
    assert!(p.diagnostics[0].line_no == 2);
    assert!(p.diagnostics[0].reason == crate::LineError::NoMatch("number"));
}

#[test]
fn test_no_tail_elision() {
    let lines = ["1", "2", "3x"].map(|l| Ok::<&str, io::Error>(l));
    let p = assemble_lines("number", lines, 10, false, tokenize_number).unwrap();
    assert!(p.records == vec![1, 2]);
    assert!(p.diagnostics.len() == 1);
    assert!(p.diagnostics[0].line_no == 13);
}

#[test]
fn test_fatal_line() {
    let r = parse_lines("number", "1\n2\n3\n".as_bytes(), |l| {
        if l == "2" {
            Err(crate::LineError::Unclassified {
                what: "number",
                input: l.to_string(),
            })
        } else {
            tokenize_number(l)
        }
    });
    let msg = r.err().unwrap().to_string();
    assert!(msg.contains("line 2"));
}

#[test]
fn test_fan_out() {
    let p = parse_lines("pairs", "1\n2\n".as_bytes(), |l| {
        let n = tokenize_number(l)?.unwrap_or(0);
        Ok(vec![n, n * 10])
    })
    .unwrap();
    assert!(p.records == vec![1, 10, 2, 20]);
}

#[test]
fn test_rows() {
    let input = "a,b\n1,2\nx,3\n4\n";
    let p = parse_rows("pairs", input.as_bytes(), |row| {
        let a = row.get_or_empty("a");
        let b = row.get_or_empty("b");
        match (rustutils::get_u32(a), rustutils::get_u64_or_zero(b)) {
            (Some(a), Some(b)) => Ok((a, b)),
            (None, _) => Err(crate::LineError::bad_field("a", a)),
            (_, None) => Err(crate::LineError::bad_field("b", b)),
        }
    })
    .unwrap();
    assert!(p.records == vec![(1, 2), (4, 0)]);
    assert!(p.diagnostics.len() == 1);
    assert!(p.diagnostics[0].line_no == 2);
}
