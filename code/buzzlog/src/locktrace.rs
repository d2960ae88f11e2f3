/// Lock contention traces.  One file holds four sections, each introduced by a header line:
///
///   Caller               Comm            PID    Count  Max(ns)  Total(ns)     <- spin time by process
///   [do_sys_open+0x1c]   'post_server'   4321   10     500      2000
///   ...
///   Caller               Comm            PID    Count  Max(ns)  Total(ns)     <- hold time by process
///   ...
///   Start    End                                                             <- held intervals
///   100      200
///   ...
///   Start    End                                                             <- spin intervals
///   150      -1
///
/// The by-process sections are summed per pid.  The interval sections are turned into a curve of
/// the number of concurrent events over time.  An interval whose end is negative was already in
/// progress when tracing began: it counts from the start of the trace and ends at its start tick.
///
/// All four headers must be present.
use crate::assembler::assemble_lines;
use crate::source::LossyLines;
use crate::{Diagnostic, LineError, LineResult};

use anyhow::{bail, Result};
use std::collections::{BTreeMap, HashMap};
use std::io::{self, BufRead};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTraceEntry {
    pub pid: u32,
    pub name: String,

    // Nanoseconds spinning or holding, summed over all lines for the pid.
    pub total_ns: u64,
    pub count: u64,
}

impl LockTraceEntry {
    /// Mean time per event, 0 if there were no events.
    pub fn average_ns(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_ns / self.count
        }
    }
}

/// Entries ordered by ascending average time; ties keep their order.

pub fn by_average(entries: &[LockTraceEntry]) -> Vec<&LockTraceEntry> {
    let mut sorted = entries.iter().collect::<Vec<&LockTraceEntry>>();
    sorted.sort_by_key(|e| e.average_ns());
    sorted
}

/// A step function: `initial` before the first step, and after each step (tick, level) the level
/// holds until the next step.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConcurrencyCurve {
    pub initial: i64,
    pub steps: Vec<(i64, i64)>,
}

impl ConcurrencyCurve {
    pub fn from_intervals(intervals: &[(i64, i64)]) -> ConcurrencyCurve {
        let mut initial = 0;
        let mut deltas = BTreeMap::<i64, i64>::new();
        for &(start, end) in intervals {
            if end < 0 {
                initial += 1;
                *deltas.entry(start).or_insert(0) -= 1;
            } else {
                *deltas.entry(start).or_insert(0) += 1;
                *deltas.entry(end).or_insert(0) -= 1;
            }
        }
        let mut level = initial;
        let steps = deltas
            .into_iter()
            .map(|(tick, delta)| {
                level += delta;
                (tick, level)
            })
            .collect::<Vec<(i64, i64)>>();
        ConcurrencyCurve { initial, steps }
    }

    pub fn level_at(&self, tick: i64) -> i64 {
        match self.steps.partition_point(|(t, _)| *t <= tick) {
            0 => self.initial,
            n => self.steps[n - 1].1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LockTrace {
    pub spin: Vec<LockTraceEntry>,
    pub hold: Vec<LockTraceEntry>,
    pub held_time: ConcurrencyCurve,
    pub spin_time: ConcurrencyCurve,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    SeekingSpinHeader,
    SeekingHoldHeader,
    SeekingHeldTimeHeader,
    SeekingSpinTimeHeader,
    Done,
}

impl ScanState {
    fn marker(self) -> Option<&'static str> {
        match self {
            ScanState::SeekingSpinHeader | ScanState::SeekingHoldHeader => Some("Caller"),
            ScanState::SeekingHeldTimeHeader | ScanState::SeekingSpinTimeHeader => Some("Start"),
            ScanState::Done => None,
        }
    }

    fn next(self) -> ScanState {
        match self {
            ScanState::SeekingSpinHeader => ScanState::SeekingHoldHeader,
            ScanState::SeekingHoldHeader => ScanState::SeekingHeldTimeHeader,
            ScanState::SeekingHeldTimeHeader => ScanState::SeekingSpinTimeHeader,
            ScanState::SeekingSpinTimeHeader | ScanState::Done => ScanState::Done,
        }
    }

    fn section(self) -> &'static str {
        match self {
            ScanState::SeekingSpinHeader => "spin-by-process",
            ScanState::SeekingHoldHeader => "hold-by-process",
            ScanState::SeekingHeldTimeHeader => "held-time",
            ScanState::SeekingSpinTimeHeader => "spin-time",
            ScanState::Done => "end",
        }
    }
}

// Indices of the four header lines.

fn find_headers(lines: &[String]) -> Result<[usize; 4]> {
    let mut headers = [0; 4];
    let mut found = 0;
    let mut state = ScanState::SeekingSpinHeader;
    for (ix, l) in lines.iter().enumerate() {
        let Some(marker) = state.marker() else {
            break;
        };
        if l.split_whitespace().next() == Some(marker) {
            debug!("lock trace: {} section at line {}", state.section(), ix + 1);
            headers[found] = ix;
            found += 1;
            state = state.next();
        }
    }
    if state != ScanState::Done {
        bail!("Lock trace: end of file before the {} section", state.section());
    }
    Ok(headers)
}

fn is_number(w: &str) -> bool {
    !w.is_empty() && w.bytes().all(|b| b.is_ascii_digit())
}

// Split a by-process line into words, gluing together a quoted or bracketed field that contains
// spaces.  Gluing stops at the first number after the caller and name fields.

fn by_process_words(l: &str) -> Vec<String> {
    let mut words = l.split_whitespace().map(|w| w.to_string()).collect::<Vec<String>>();
    let mut ix = 0;
    while ix < words.len() {
        if is_number(&words[ix]) {
            if ix >= 2 {
                break;
            }
            ix += 1;
        } else if words[ix].ends_with('\'') || words[ix].ends_with(']') || ix + 1 == words.len() {
            ix += 1;
        } else {
            let next = words.remove(ix + 1);
            words[ix].push(' ');
            words[ix].push_str(&next);
        }
    }
    words
}

fn parse_by_process_line(l: &str) -> LineResult<Option<LockTraceEntry>> {
    if l.trim().is_empty() {
        return Ok(None);
    }
    let words = by_process_words(l);
    if words.len() < 5 {
        return Err(LineError::NoMatch("lock trace"));
    }
    let number = |field: &str, w: &str| w.parse::<u64>().map_err(|_| LineError::bad_field(field, w));
    let pid = words[2]
        .parse::<u32>()
        .map_err(|_| LineError::bad_field("pid", &words[2]))?;
    Ok(Some(LockTraceEntry {
        pid,
        name: words[1].trim_matches('\'').to_string(),
        total_ns: number("total", &words[words.len() - 1])?,
        count: number("count", &words[words.len() - 3])?,
    }))
}

fn parse_interval_line(l: &str) -> LineResult<Option<(i64, i64)>> {
    let mut words = l.split_whitespace();
    let Some(start) = words.next() else {
        return Ok(None);
    };
    let Some(end) = words.next() else {
        return Err(LineError::MissingField("end"));
    };
    let start = start
        .parse::<i64>()
        .map_err(|_| LineError::bad_field("start", start))?;
    let end = end.parse::<i64>().map_err(|_| LineError::bad_field("end", end))?;
    if start < 0 {
        return Err(LineError::bad_field("start", &start.to_string()));
    }
    if end >= 0 && end < start {
        return Err(LineError::bad_field("end", &end.to_string()));
    }
    Ok(Some((start, end)))
}

// Sum the entries for each pid, keeping the order of first appearance and the latest name.

fn merge_by_pid(entries: Vec<LockTraceEntry>) -> Vec<LockTraceEntry> {
    let mut merged = Vec::<LockTraceEntry>::new();
    let mut index = HashMap::<u32, usize>::new();
    for e in entries {
        match index.get(&e.pid) {
            Some(ix) => {
                let m = &mut merged[*ix];
                m.total_ns += e.total_ns;
                m.count += e.count;
                m.name = e.name;
            }
            None => {
                index.insert(e.pid, merged.len());
                merged.push(e);
            }
        }
    }
    merged
}

fn section_lines(lines: &[String]) -> impl Iterator<Item = io::Result<&str>> {
    lines.iter().map(|l| Ok(l.as_str()))
}

pub fn parse_lock_trace<R: BufRead>(reader: R) -> Result<LockTrace> {
    let lines = LossyLines::new(reader).collect::<io::Result<Vec<String>>>()?;
    let [spin, hold, held_time, spin_time] = find_headers(&lines)?;

    let spin_entries = assemble_lines(
        "lock trace",
        section_lines(&lines[spin + 1..hold]),
        spin + 1,
        false,
        parse_by_process_line,
    )?;
    let hold_entries = assemble_lines(
        "lock trace",
        section_lines(&lines[hold + 1..held_time]),
        hold + 1,
        false,
        parse_by_process_line,
    )?;
    let held_intervals = assemble_lines(
        "lock trace",
        section_lines(&lines[held_time + 1..spin_time]),
        held_time + 1,
        false,
        parse_interval_line,
    )?;
    let spin_intervals = assemble_lines(
        "lock trace",
        section_lines(&lines[spin_time + 1..]),
        spin_time + 1,
        true,
        parse_interval_line,
    )?;

    let mut diagnostics = vec![];
    diagnostics.extend(spin_entries.diagnostics);
    diagnostics.extend(hold_entries.diagnostics);
    diagnostics.extend(held_intervals.diagnostics);
    diagnostics.extend(spin_intervals.diagnostics);

    Ok(LockTrace {
        spin: merge_by_pid(spin_entries.records),
        hold: merge_by_pid(hold_entries.records),
        held_time: ConcurrencyCurve::from_intervals(&held_intervals.records),
        spin_time: ConcurrencyCurve::from_intervals(&spin_intervals.records),
        diagnostics,
    })
}

#[test]
fn test_curve_with_in_progress_event() {
    let c = ConcurrencyCurve::from_intervals(&[(100, 200), (150, -1)]);
    assert!(c.initial == 1);
    assert!(c.steps == vec![(100, 2), (150, 1), (200, 0)]);
    assert!(c.level_at(50) == 1);
    assert!(c.level_at(100) == 2);
    assert!(c.level_at(149) == 2);
    assert!(c.level_at(150) == 1);
    assert!(c.level_at(199) == 1);
    assert!(c.level_at(200) == 0);
    assert!(c.level_at(10_000) == 0);
}

#[test]
fn test_curve_overlaps() {
    let c = ConcurrencyCurve::from_intervals(&[(10, 30), (20, 30), (30, 40)]);
    assert!(c.initial == 0);
    assert!(c.steps == vec![(10, 1), (20, 2), (30, 1), (40, 0)]);
    assert!(ConcurrencyCurve::from_intervals(&[]) == ConcurrencyCurve::default());
}

#[test]
fn test_by_process_words() {
    let w = by_process_words("[do_sys_open+0x1c]   'nginx: worker'   1234   4   90   300");
    assert!(w == vec!["[do_sys_open+0x1c]", "'nginx: worker'", "1234", "4", "90", "300"]);
    let w = by_process_words("[mutex_lock] 'a b c' 7 1 2 3");
    assert!(w[1] == "'a b c'");
    assert!(w[2] == "7");
}

#[test]
fn test_by_process_line() {
    let e = parse_by_process_line("[do_sys_open+0x1c]   'post_server'   4321   10   500   2000")
        .unwrap()
        .unwrap();
    assert!(e.pid == 4321);
    assert!(e.name == "post_server");
    assert!(e.count == 10);
    assert!(e.total_ns == 2000);
    assert!(e.average_ns() == 200);
    assert!(parse_by_process_line("   ").unwrap().is_none());
    assert!(parse_by_process_line("[x] 'y' pid 1 2 3").is_err());
}

#[test]
fn test_lock_trace_file() {
    let file = std::fs::File::open("../tests/buzzlog/locktrace.log").unwrap();
    let t = parse_lock_trace(std::io::BufReader::new(file)).unwrap();

    assert!(t.spin.len() == 3);
    // pid 4321 appears twice and is summed.
    assert!(t.spin[0].pid == 4321);
    assert!(t.spin[0].count == 15);
    assert!(t.spin[0].total_ns == 3000);
    assert!(t.spin[1].name == "nginx: worker");

    assert!(t.hold.len() == 2);
    assert!(t.hold[1].pid == 99);
    assert!(t.hold[1].average_ns() == 0);

    let sorted = by_average(&t.spin);
    assert!(sorted[0].average_ns() <= sorted[1].average_ns());
    assert!(sorted[1].average_ns() <= sorted[2].average_ns());

    assert!(t.held_time.steps == vec![(100, 1), (200, 0)]);
    assert!(t.spin_time.initial == 1);
    assert!(t.spin_time.steps == vec![(100, 2), (150, 1), (200, 0)]);

    assert!(t.diagnostics.len() == 1);
    assert!(t.diagnostics[0].line_no == 5);
}

#[test]
fn test_missing_section() {
    let input = "Caller Comm PID Count Max Total\n\
                 [x] 'a' 1 1 1 1\n\
                 Caller Comm PID Count Max Total\n\
                 [x] 'a' 1 1 1 1\n\
                 Start End\n\
                 1 2\n";
    let msg = parse_lock_trace(input.as_bytes()).err().unwrap().to_string();
    assert!(msg.contains("spin-time"));
}

#[test]
fn test_failed_section_tails() {
    // Only the last line of the file may be a partial line; a bad last line in an earlier section
    // is reported.
    let input = "Caller Comm PID Count Max Total\n\
                 [x] 'a' 1 1 1 1\n\
                 [x] 'a' bad 1 1 1\n\
                 Caller Comm PID Count Max Total\n\
                 [x] 'a' 1 1 1 1\n\
                 Start End\n\
                 1 2\n\
                 Start End\n\
                 1 2\n\
                 3";
    let t = parse_lock_trace(input.as_bytes()).unwrap();
    assert!(t.spin.len() == 1);
    assert!(t.diagnostics.len() == 1);
    assert!(t.diagnostics[0].line_no == 3);
}
