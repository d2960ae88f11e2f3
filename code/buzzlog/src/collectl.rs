/// Hardware monitor logs written by collectl in "plot" format, one file per subsystem:
///
///   ################################################################################
///   # Collectl:   V4.3.1-1  HiRes: 1  Options: -scdm -P -f /tmp/log ...
///   # Date:       20210302-100000  Secs: 1614679200 TZ: -0500
///   ...
///   #Date Time [CPU:0]User% [CPU:0]Nice% ... [CPU:1]User% ...
///   20210302 10:00:00.001 3 0 1 0 0 0 0 96 4 0 0 310 2 0 1 0 0 0 0 97 3 0 0 280
///
/// After the date and time, each data line holds one group of values per hardware unit (core, NUMA
/// node, disk), with a fixed set of metrics per group.  A data line thus yields one record per
/// unit.  Timestamps are in the monitored node's local time; the offset from the TZ comment moves
/// them to UTC.
use crate::assembler;
use crate::{LineError, LineResult, Parsed, ToColumns};

use anyhow::Result;
use chrono::FixedOffset;
use regex::Regex;
use rustutils::{
    format_timestamp, get_f64, local_to_utc, parse_compact_timestamp, parse_tz_offset, Timestamp,
};
use std::io::BufRead;
use tracing::warn;
use ustr::Ustr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareType {
    Cpu,
    Mem,
    Dsk,
}

const CPU_METRICS: [&str; 12] = [
    "user", "nice", "system", "wait", "irq", "soft", "steal", "idle", "total", "guest", "guest_n",
    "intrpt",
];

const MEM_METRICS: [&str; 8] = [
    "used", "free", "slab", "mapped", "anon", "anonh", "inactive", "hits",
];

const DSK_METRICS: [&str; 14] = [
    "name", "reads", "rmerge", "rkbytes", "waitr", "writes", "wmerge", "wkbytes", "waitw",
    "request", "quelen", "wait", "svctim", "util",
];

impl HardwareType {
    pub fn metrics(&self) -> &'static [&'static str] {
        match self {
            HardwareType::Cpu => &CPU_METRICS,
            HardwareType::Mem => &MEM_METRICS,
            HardwareType::Dsk => &DSK_METRICS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HardwareType::Cpu => "cpu",
            HardwareType::Mem => "mem",
            HardwareType::Dsk => "dsk",
        }
    }

    /// Collectl names its files by subsystem: `.cpu`, `.numa`, `.dsk`.
    pub fn from_file_extension(ext: &str) -> Option<HardwareType> {
        match ext {
            "cpu" => Some(HardwareType::Cpu),
            "numa" => Some(HardwareType::Mem),
            "dsk" => Some(HardwareType::Dsk),
            _ => None,
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            HardwareType::Cpu => "cpu",
            HardwareType::Mem => "numa",
            HardwareType::Dsk => "dsk",
        }
    }

    /// The type of a file named like `node1-20210302-100000.cpu.gz` or `node0.dsk`, from the last
    /// dotted component or, if the file was compressed or converted, the one before it.
    pub fn from_filename(name: &str) -> Option<HardwareType> {
        let (stem, ext) = name.rsplit_once('.')?;
        if let Some(hw_type) = HardwareType::from_file_extension(ext) {
            return Some(hw_type);
        }
        let (_, ext) = stem.rsplit_once('.')?;
        HardwareType::from_file_extension(ext)
    }

    /// Text metrics; everything else is numeric.
    fn is_text_metric(&self, name: &str) -> bool {
        *self == HardwareType::Dsk && name == "name"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Number(f64),
    Text(Ustr),
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Number(n) => write!(f, "{n}"),
            MetricValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// The values for one hardware unit at one point in time.  `values` is parallel to
/// `hw_type.metrics()`.

#[derive(Debug, Clone, PartialEq)]
pub struct HardwareMonitorEntry {
    // UTC.
    pub timestamp: Timestamp,
    pub hw_type: HardwareType,
    pub hw_no: usize,
    pub values: Vec<MetricValue>,
}

/// A single metric for a single unit.

#[derive(Debug, Clone, PartialEq)]
pub struct HardwareSample {
    pub timestamp: Timestamp,
    pub hw_no: usize,
    pub metric: &'static str,
    pub value: MetricValue,
}

impl HardwareMonitorEntry {
    pub fn metrics(&self) -> impl Iterator<Item = (&'static str, &MetricValue)> + '_ {
        self.hw_type.metrics().iter().copied().zip(self.values.iter())
    }

    pub fn get(&self, metric: &str) -> Option<&MetricValue> {
        self.metrics().find(|(m, _)| *m == metric).map(|(_, v)| v)
    }

    pub fn samples(&self) -> impl Iterator<Item = HardwareSample> + '_ {
        self.metrics().map(|(metric, value)| HardwareSample {
            timestamp: self.timestamp,
            hw_no: self.hw_no,
            metric,
            value: value.clone(),
        })
    }
}

pub fn collectl_header(hw_type: HardwareType) -> Vec<String> {
    let mut header = vec!["timestamp".to_string(), "hw_no".to_string()];
    header.extend(hw_type.metrics().iter().map(|m| m.to_string()));
    header
}

impl ToColumns for HardwareMonitorEntry {
    fn columns(&self) -> Vec<String> {
        let mut columns = vec![format_timestamp(&self.timestamp), self.hw_no.to_string()];
        columns.extend(self.values.iter().map(|v| v.to_string()));
        columns
    }
}

/// Tokenizer for one collectl file.  It is stateful: the timezone is picked up from the comment
/// header and applied to the data lines that follow.

pub struct CollectlParser {
    hw_type: HardwareType,
    tz: Regex,
    offset: Option<FixedOffset>,
    warned_no_tz: bool,
}

impl CollectlParser {
    pub fn new(hw_type: HardwareType) -> Result<CollectlParser> {
        Ok(CollectlParser {
            hw_type,
            tz: Regex::new(r"TZ: ([-+]\d{4})")?,
            offset: None,
            warned_no_tz: false,
        })
    }

    pub fn parse_line(&mut self, l: &str) -> LineResult<Vec<HardwareMonitorEntry>> {
        if l.starts_with('#') {
            if let Some(caps) = self.tz.captures(l) {
                match parse_tz_offset(&caps[1]) {
                    Ok(offset) => self.offset = Some(offset),
                    Err(_) => return Err(LineError::bad_field("TZ", &caps[1])),
                }
            }
            return Ok(vec![]);
        }

        let fields = l.split_whitespace().collect::<Vec<&str>>();
        if fields.len() < 2 {
            return Err(LineError::NoMatch("collectl"));
        }
        let when = format!("{} {}", fields[0], fields[1]);
        let Ok(local) = parse_compact_timestamp(&when) else {
            return Err(LineError::bad_field("timestamp", &when));
        };
        let timestamp = match self.offset {
            Some(offset) => local_to_utc(local, offset),
            None => {
                if !self.warned_no_tz {
                    warn!("collectl log: no TZ in header, assuming UTC");
                    self.warned_no_tz = true;
                }
                local
            }
        };

        let metrics = self.hw_type.metrics();
        let values = &fields[2..];
        let groups = values.chunks_exact(metrics.len());
        if !groups.remainder().is_empty() {
            warn!(
                "collectl log: {} values left over after {} groups of {} metrics, ignored",
                groups.remainder().len(),
                values.len() / metrics.len(),
                metrics.len()
            );
        }
        let mut entries = vec![];
        for (hw_no, group) in groups.enumerate() {
            let mut unit_values = Vec::with_capacity(metrics.len());
            for (metric, v) in metrics.iter().copied().zip(group.iter().copied()) {
                if self.hw_type.is_text_metric(metric) {
                    unit_values.push(MetricValue::Text(Ustr::from(v)));
                } else {
                    match get_f64(v, 1.0) {
                        Some(n) => unit_values.push(MetricValue::Number(n)),
                        None => return Err(LineError::bad_field(metric, v)),
                    }
                }
            }
            entries.push(HardwareMonitorEntry {
                timestamp,
                hw_type: self.hw_type,
                hw_no,
                values: unit_values,
            });
        }
        Ok(entries)
    }
}

pub fn parse_collectl_log<R: BufRead>(
    reader: R,
    hw_type: HardwareType,
) -> Result<Parsed<HardwareMonitorEntry>> {
    let mut parser = CollectlParser::new(hw_type)?;
    assembler::parse_lines("collectl", reader, |l| parser.parse_line(l))
}

#[test]
fn test_hw_type_from_filename() {
    assert!(HardwareType::from_filename("node-20210302-100000.cpu.gz") == Some(HardwareType::Cpu));
    assert!(HardwareType::from_filename("node-20210302-100000.numa.gz") == Some(HardwareType::Mem));
    assert!(HardwareType::from_filename("x.dsk.csv") == Some(HardwareType::Dsk));
    assert!(HardwareType::from_filename("node0.dsk") == Some(HardwareType::Dsk));
    assert!(HardwareType::from_filename("x.tab.gz").is_none());
    assert!(HardwareType::from_filename("cpu").is_none());
}

#[test]
fn test_cpu_fan_out() {
    let mut p = CollectlParser::new(HardwareType::Cpu).unwrap();
    assert!(p.parse_line("# Date: 20210302-100000  Secs: 1614679200 TZ: -0500").unwrap().is_empty());
    let mut line = "20210302 10:00:00.001".to_string();
    for v in 0..24 {
        line += &format!(" {v}");
    }
    let entries = p.parse_line(&line).unwrap();
    assert!(entries.len() == 2);
    assert!(entries[0].hw_no == 0);
    assert!(entries[1].hw_no == 1);
    for e in &entries {
        assert!(e.metrics().count() == 12);
        assert!(format_timestamp(&e.timestamp) == "2021-03-02 15:00:00.001000");
    }
    assert!(entries[0].get("user") == Some(&MetricValue::Number(0.0)));
    assert!(entries[1].get("user") == Some(&MetricValue::Number(12.0)));
    assert!(entries[1].get("intrpt") == Some(&MetricValue::Number(23.0)));

    let samples = entries[1].samples().collect::<Vec<HardwareSample>>();
    assert!(samples.len() == 12);
    assert!(samples[2].metric == "system");
    assert!(samples[2].hw_no == 1);
    assert!(samples[2].value == MetricValue::Number(14.0));

    assert!(entries[0].columns()[0..4] == ["2021-03-02 15:00:00.001000", "0", "0", "1"]);
}

#[test]
fn test_partial_group_dropped() {
    let mut p = CollectlParser::new(HardwareType::Cpu).unwrap();
    let mut line = "20210302 10:00:00.001".to_string();
    for v in 0..25 {
        line += &format!(" {v}");
    }
    let entries = p.parse_line(&line).unwrap();
    assert!(entries.len() == 2);
    assert!(entries[1].hw_no == 1);
    assert!(entries[1].get("intrpt") == Some(&MetricValue::Number(23.0)));
}

#[test]
fn test_bad_data_lines() {
    let mut p = CollectlParser::new(HardwareType::Mem).unwrap();
    // Without a TZ the time is taken as UTC.
    let e = p.parse_line("20210302 10:00:00.000 1 2 3 4 5 6 7 8").unwrap();
    assert!(e.len() == 1);
    assert!(format_timestamp(&e[0].timestamp) == "2021-03-02 10:00:00.000000");
    // Too few values for a whole unit.
    assert!(p.parse_line("20210302 10:00:00.000 1 2 3").unwrap().is_empty());
    assert!(p.parse_line("20210302 10:00:00.000 1 2 3 4 x 6 7 8").err()
        == Some(LineError::bad_field("anon", "x")));
    assert!(p.parse_line("").err() == Some(LineError::NoMatch("collectl")));
}

#[test]
fn test_dsk_log_file() {
    let file = std::fs::File::open("../tests/buzzlog/node0.dsk").unwrap();
    let p = parse_collectl_log(std::io::BufReader::new(file), HardwareType::Dsk).unwrap();
    assert!(p.diagnostics.is_empty());
    assert!(p.records.len() == 4);
    assert!(p.records[1].get("name") == Some(&MetricValue::Text(Ustr::from("sdb"))));
    assert!(p.records[1].get("util") == Some(&MetricValue::Number(2.5)));
    assert!(format_timestamp(&p.records[3].timestamp) == "2021-03-02 09:30:01.000000");
}
