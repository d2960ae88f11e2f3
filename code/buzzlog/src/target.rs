/// Target logs, written per container by the rAdvisor resource-accounting agent.
///
/// A target log starts with a YAML metadata block between two `---` lines, followed by a CSV table
/// with one row per collection tick:
///
///   ---
///   Version: 1.3.1
///   Provider: docker
///   Metadata:
///     Id: 4f2a9c1e
///     Image: buzzblog/post_service
///   ---
///   read,pids.current,pids.max,cpu.usage.total,...
///   1614679200000000000,12,max,90000123,...
///
/// The metadata is read eagerly.  The rows are read lazily by `TargetLogEntries`, a single-pass
/// iterator that owns the reader.  Every counter column is optional and an absent or empty value is
/// zero; `read` (the collection time) is required.  A value that is present but not a number
/// rejects the row.
use crate::assembler::{CsvRows, Row};
use crate::{Diagnostic, LineError, LineResult, ToColumns};

use anyhow::{bail, Result};
use itertools::Itertools;
use rustutils::{get_u64, get_u64_or_zero, Version};
use serde::Deserialize;
use std::io::{BufRead, Read};
use std::str::FromStr;
use tracing::warn;

/// Logs older than this may lack columns; they are parsed anyway.

pub const MIN_TARGET_LOG_VERSION: Version = Version::new(1, 3, 0);

#[derive(Debug, Clone)]
pub struct TargetLogMetadata {
    // 0.0.0 if the block has no Version.
    pub version: Version,

    // The container id, if the block has one.
    pub target_id: Option<String>,

    // The whole block.
    pub document: serde_yaml::Value,

    // Problems with the block that did not stop the parse, in the order found.
    pub warnings: Vec<String>,
}

#[derive(Deserialize)]
struct MetadataBlock {
    #[serde(rename = "Version", default)]
    version: Option<serde_yaml::Value>,
    #[serde(rename = "Metadata", default)]
    metadata: Option<serde_yaml::Value>,
}

impl TargetLogMetadata {
    pub fn from_yaml(text: &str) -> Result<TargetLogMetadata> {
        let document: serde_yaml::Value = if text.trim().is_empty() {
            serde_yaml::Value::Mapping(serde_yaml::Mapping::new())
        } else {
            serde_yaml::from_str(text)?
        };
        let block: MetadataBlock = serde_yaml::from_value(document.clone())?;
        let mut warnings = vec![];

        let version = match &block.version {
            None => Version::default(),
            Some(v) => {
                let text = match v {
                    serde_yaml::Value::String(s) => s.clone(),
                    serde_yaml::Value::Number(n) => n.to_string(),
                    _ => bail!("Target log metadata: Version must be a string"),
                };
                match Version::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        warnings.push(format!("Target log metadata: {e}, taking it as 0.0.0"));
                        Version::default()
                    }
                }
            }
        };

        let mapping = match &block.metadata {
            None => None,
            Some(m) => {
                if m.as_mapping().is_none() {
                    warnings.push("Target log metadata: Metadata is not a mapping".to_string());
                }
                m.as_mapping()
            }
        };
        let target_id = mapping.and_then(|m| {
            ["Id", "ID", "id"]
                .iter()
                .find_map(|k| m.get(*k).and_then(|v| v.as_str()))
                .map(|s| s.to_string())
        });

        Ok(TargetLogMetadata {
            version,
            target_id,
            document,
            warnings,
        })
    }

    pub fn is_supported_version(&self) -> bool {
        self.version >= MIN_TARGET_LOG_VERSION
    }
}

/// The PID limit of a cgroup is either a number or "max", meaning no limit.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidLimit {
    Max,
    Limit(u64),
}

impl std::fmt::Display for PidLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PidLimit::Max => write!(f, "max"),
            PidLimit::Limit(n) => write!(f, "{n}"),
        }
    }
}

/// Block-IO counters broken down by operation class.

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IoStats {
    pub read: u64,
    pub write: u64,
    pub sync: u64,
    pub asynchronous: u64,
}

const IO_STAT_SUFFIXES: [&str; 4] = ["read", "write", "sync", "async"];

const IO_STAT_PREFIXES: [&str; 10] = [
    "blkio.service.bytes",
    "blkio.service.ios",
    "blkio.service.time",
    "blkio.queued",
    "blkio.wait",
    "blkio.merged",
    "blkio.throttle.service.bytes",
    "blkio.throttle.service.ios",
    "blkio.bfq.service.bytes",
    "blkio.bfq.service.ios",
];

// The non-IoStats columns, in output order.

const SCALAR_COLUMNS: [&str; 35] = [
    "read",
    "pids.current",
    "pids.max",
    "cpu.usage.total",
    "cpu.usage.system",
    "cpu.usage.user",
    "cpu.usage.percpu",
    "cpu.stat.user",
    "cpu.stat.system",
    "cpu.throttling.periods",
    "cpu.throttling.throttled.count",
    "cpu.throttling.throttled.time",
    "memory.usage.current",
    "memory.usage.max",
    "memory.limit.hard",
    "memory.limit.soft",
    "memory.failcnt",
    "memory.hierarchical.limit.memory",
    "memory.hierarchical.limit.memoryswap",
    "memory.cache",
    "memory.rss.all",
    "memory.rss.huge",
    "memory.mapped",
    "memory.swap",
    "memory.paged.in",
    "memory.paged.out",
    "memory.fault.total",
    "memory.fault.major",
    "memory.anon.inactive",
    "memory.anon.active",
    "memory.file.inactive",
    "memory.file.active",
    "memory.unevictable",
    "blkio.time",
    "blkio.sectors",
];

/// The column header of a target log table.

pub fn target_log_header() -> Vec<String> {
    let mut header = SCALAR_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<String>>();
    for prefix in IO_STAT_PREFIXES {
        for suffix in IO_STAT_SUFFIXES {
            header.push(format!("{prefix}.{suffix}"));
        }
    }
    header
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetLogEntry {
    // Collection time, nanoseconds since the epoch.
    pub read: u64,

    pub pids_current: u64,
    pub pids_max: PidLimit,

    pub cpu_usage_total: u64,
    pub cpu_usage_system: u64,
    pub cpu_usage_user: u64,
    pub cpu_usage_percpu: Vec<u64>,
    pub cpu_stat_user: u64,
    pub cpu_stat_system: u64,
    pub cpu_throttling_periods: u64,
    pub cpu_throttling_throttled_count: u64,
    pub cpu_throttling_throttled_time: u64,

    pub memory_usage_current: u64,
    pub memory_usage_max: u64,
    pub memory_limit_hard: u64,
    pub memory_limit_soft: u64,
    pub memory_failcnt: u64,
    pub memory_hierarchical_limit_memory: u64,
    pub memory_hierarchical_limit_memoryswap: u64,
    pub memory_cache: u64,
    pub memory_rss_all: u64,
    pub memory_rss_huge: u64,
    pub memory_mapped: u64,
    pub memory_swap: u64,
    pub memory_paged_in: u64,
    pub memory_paged_out: u64,
    pub memory_fault_total: u64,
    pub memory_fault_major: u64,
    pub memory_anon_inactive: u64,
    pub memory_anon_active: u64,
    pub memory_file_inactive: u64,
    pub memory_file_active: u64,
    pub memory_unevictable: u64,

    pub blkio_time: u64,
    pub blkio_sectors: u64,
    pub blkio_service_bytes: IoStats,
    pub blkio_service_ios: IoStats,
    pub blkio_service_time: IoStats,
    pub blkio_queued: IoStats,
    pub blkio_wait: IoStats,
    pub blkio_merged: IoStats,
    pub blkio_throttle_service_bytes: IoStats,
    pub blkio_throttle_service_ios: IoStats,
    pub blkio_bfq_service_bytes: IoStats,
    pub blkio_bfq_service_ios: IoStats,
}

// Counter column: absent or empty is zero.

fn counter(row: &Row, name: &str) -> LineResult<u64> {
    let v = row.get_or_empty(name);
    get_u64_or_zero(v).ok_or_else(|| LineError::bad_field(name, v))
}

fn io_stats(row: &Row, prefix: &str) -> LineResult<IoStats> {
    Ok(IoStats {
        read: counter(row, &format!("{prefix}.read"))?,
        write: counter(row, &format!("{prefix}.write"))?,
        sync: counter(row, &format!("{prefix}.sync"))?,
        asynchronous: counter(row, &format!("{prefix}.async"))?,
    })
}

impl TargetLogEntry {
    pub fn from_row(row: &Row) -> LineResult<TargetLogEntry> {
        let read = match row.get("read").map(str::trim) {
            None | Some("") => return Err(LineError::MissingField("read")),
            Some(v) => get_u64(v).ok_or_else(|| LineError::bad_field("read", v))?,
        };

        let pids_max = match row.get_or_empty("pids.max").trim() {
            "max" => PidLimit::Max,
            _ => PidLimit::Limit(counter(row, "pids.max")?),
        };

        let percpu = row.get_or_empty("cpu.usage.percpu").trim();
        let cpu_usage_percpu = if percpu.is_empty() {
            vec![]
        } else {
            percpu
                .split_whitespace()
                .map(|v| get_u64(v).ok_or_else(|| LineError::bad_field("cpu.usage.percpu", v)))
                .collect::<LineResult<Vec<u64>>>()?
        };

        // Some versions of the agent wrote the failure count with an underscore.
        let memory_failcnt = if row.get("memory.failcnt").is_some() {
            counter(row, "memory.failcnt")?
        } else {
            counter(row, "memory_failcnt")?
        };

        Ok(TargetLogEntry {
            read,
            pids_current: counter(row, "pids.current")?,
            pids_max,
            cpu_usage_total: counter(row, "cpu.usage.total")?,
            cpu_usage_system: counter(row, "cpu.usage.system")?,
            cpu_usage_user: counter(row, "cpu.usage.user")?,
            cpu_usage_percpu,
            cpu_stat_user: counter(row, "cpu.stat.user")?,
            cpu_stat_system: counter(row, "cpu.stat.system")?,
            cpu_throttling_periods: counter(row, "cpu.throttling.periods")?,
            cpu_throttling_throttled_count: counter(row, "cpu.throttling.throttled.count")?,
            cpu_throttling_throttled_time: counter(row, "cpu.throttling.throttled.time")?,
            memory_usage_current: counter(row, "memory.usage.current")?,
            memory_usage_max: counter(row, "memory.usage.max")?,
            memory_limit_hard: counter(row, "memory.limit.hard")?,
            memory_limit_soft: counter(row, "memory.limit.soft")?,
            memory_failcnt,
            memory_hierarchical_limit_memory: counter(row, "memory.hierarchical.limit.memory")?,
            memory_hierarchical_limit_memoryswap: counter(
                row,
                "memory.hierarchical.limit.memoryswap",
            )?,
            memory_cache: counter(row, "memory.cache")?,
            memory_rss_all: counter(row, "memory.rss.all")?,
            memory_rss_huge: counter(row, "memory.rss.huge")?,
            memory_mapped: counter(row, "memory.mapped")?,
            memory_swap: counter(row, "memory.swap")?,
            memory_paged_in: counter(row, "memory.paged.in")?,
            memory_paged_out: counter(row, "memory.paged.out")?,
            memory_fault_total: counter(row, "memory.fault.total")?,
            memory_fault_major: counter(row, "memory.fault.major")?,
            memory_anon_inactive: counter(row, "memory.anon.inactive")?,
            memory_anon_active: counter(row, "memory.anon.active")?,
            memory_file_inactive: counter(row, "memory.file.inactive")?,
            memory_file_active: counter(row, "memory.file.active")?,
            memory_unevictable: counter(row, "memory.unevictable")?,
            blkio_time: counter(row, "blkio.time")?,
            blkio_sectors: counter(row, "blkio.sectors")?,
            blkio_service_bytes: io_stats(row, "blkio.service.bytes")?,
            blkio_service_ios: io_stats(row, "blkio.service.ios")?,
            blkio_service_time: io_stats(row, "blkio.service.time")?,
            blkio_queued: io_stats(row, "blkio.queued")?,
            blkio_wait: io_stats(row, "blkio.wait")?,
            blkio_merged: io_stats(row, "blkio.merged")?,
            blkio_throttle_service_bytes: io_stats(row, "blkio.throttle.service.bytes")?,
            blkio_throttle_service_ios: io_stats(row, "blkio.throttle.service.ios")?,
            blkio_bfq_service_bytes: io_stats(row, "blkio.bfq.service.bytes")?,
            blkio_bfq_service_ios: io_stats(row, "blkio.bfq.service.ios")?,
        })
    }

    // Parallel to IO_STAT_PREFIXES.
    fn io_stats(&self) -> [&IoStats; 10] {
        [
            &self.blkio_service_bytes,
            &self.blkio_service_ios,
            &self.blkio_service_time,
            &self.blkio_queued,
            &self.blkio_wait,
            &self.blkio_merged,
            &self.blkio_throttle_service_bytes,
            &self.blkio_throttle_service_ios,
            &self.blkio_bfq_service_bytes,
            &self.blkio_bfq_service_ios,
        ]
    }
}

/// Columns in the order of `target_log_header()`.

impl ToColumns for TargetLogEntry {
    fn columns(&self) -> Vec<String> {
        let mut columns = vec![
            self.read.to_string(),
            self.pids_current.to_string(),
            self.pids_max.to_string(),
            self.cpu_usage_total.to_string(),
            self.cpu_usage_system.to_string(),
            self.cpu_usage_user.to_string(),
            self.cpu_usage_percpu.iter().join(" "),
            self.cpu_stat_user.to_string(),
            self.cpu_stat_system.to_string(),
            self.cpu_throttling_periods.to_string(),
            self.cpu_throttling_throttled_count.to_string(),
            self.cpu_throttling_throttled_time.to_string(),
            self.memory_usage_current.to_string(),
            self.memory_usage_max.to_string(),
            self.memory_limit_hard.to_string(),
            self.memory_limit_soft.to_string(),
            self.memory_failcnt.to_string(),
            self.memory_hierarchical_limit_memory.to_string(),
            self.memory_hierarchical_limit_memoryswap.to_string(),
            self.memory_cache.to_string(),
            self.memory_rss_all.to_string(),
            self.memory_rss_huge.to_string(),
            self.memory_mapped.to_string(),
            self.memory_swap.to_string(),
            self.memory_paged_in.to_string(),
            self.memory_paged_out.to_string(),
            self.memory_fault_total.to_string(),
            self.memory_fault_major.to_string(),
            self.memory_anon_inactive.to_string(),
            self.memory_anon_active.to_string(),
            self.memory_file_inactive.to_string(),
            self.memory_file_active.to_string(),
            self.memory_unevictable.to_string(),
            self.blkio_time.to_string(),
            self.blkio_sectors.to_string(),
        ];
        for s in self.io_stats() {
            columns.push(s.read.to_string());
            columns.push(s.write.to_string());
            columns.push(s.sync.to_string());
            columns.push(s.asynchronous.to_string());
        }
        columns
    }
}

/// The data rows of a target log, parsed one at a time as the iterator is advanced.  Rows that
/// cannot be parsed are logged, collected in `diagnostics()`, and passed over.  An I/O error is
/// yielded once and ends the iteration.

pub struct TargetLogEntries<R: Read> {
    rows: CsvRows<R>,
    diagnostics: Vec<Diagnostic>,
    done: bool,
}

impl<R: Read> TargetLogEntries<R> {
    /// The rows skipped so far.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

impl<R: Read> Iterator for TargetLogEntries<R> {
    type Item = Result<TargetLogEntry>;

    fn next(&mut self) -> Option<Result<TargetLogEntry>> {
        if self.done {
            return None;
        }
        let mut tokenize = TargetLogEntry::from_row;
        loop {
            match self.rows.next_row(&mut tokenize) {
                Ok(Some(Ok(entry))) => return Some(Ok(entry)),
                Ok(Some(Err(d))) => self.diagnostics.push(d),
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Read the metadata block of a target log and return it along with the lazy sequence of entries.
/// A missing or unterminated metadata block is an error; an old version is only a warning.

pub fn read_target_log<R: BufRead>(
    mut reader: R,
) -> Result<(TargetLogMetadata, TargetLogEntries<R>)> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        bail!("Target log is empty");
    }
    if !line.starts_with("---") {
        bail!("Target log does not start with a metadata block");
    }
    let mut yaml = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            bail!("Target log metadata block is not terminated");
        }
        if line.starts_with("---") {
            break;
        }
        yaml.push_str(&line);
    }

    let mut metadata = TargetLogMetadata::from_yaml(&yaml)?;
    if !metadata.is_supported_version() {
        metadata.warnings.push(format!(
            "Target log version {} is older than the minimum supported version {}",
            metadata.version, MIN_TARGET_LOG_VERSION
        ));
    }
    for w in &metadata.warnings {
        warn!("{w}");
    }

    let entries = TargetLogEntries {
        rows: CsvRows::new("target", reader)?,
        diagnostics: vec![],
        done: false,
    };
    Ok((metadata, entries))
}

#[test]
fn test_target_log_file() {
    let file = std::fs::File::open("../tests/buzzlog/target.log").unwrap();
    let (metadata, mut entries) = read_target_log(std::io::BufReader::new(file)).unwrap();
    assert!(metadata.version == Version::new(1, 3, 1));
    assert!(metadata.is_supported_version());
    assert!(metadata.warnings.is_empty());
    assert!(metadata.target_id.as_deref() == Some("4f2a9c1e"));

    let all = entries.by_ref().collect::<Result<Vec<TargetLogEntry>>>().unwrap();
    assert!(all.len() == 2);
    assert!(entries.diagnostics().len() == 1);
    assert!(entries.diagnostics()[0].line_no == 2);

    assert!(all[0].read == 1614679200000000000);
    assert!(all[0].pids_current == 12);
    assert!(all[0].pids_max == PidLimit::Max);
    assert!(all[0].cpu_usage_percpu == vec![100, 200]);
    assert!(all[0].memory_limit_hard == 1073741824);
    assert!(all[0].blkio_service_bytes.read == 4096);
    assert!(all[0].blkio_service_bytes.asynchronous == 8192);
    // Absent column
    assert!(all[0].blkio_bfq_service_ios == IoStats::default());

    assert!(all[1].pids_max == PidLimit::Limit(512));
    assert!(all[1].cpu_usage_percpu.is_empty());
    // Empty field
    assert!(all[1].memory_cache == 0);

    // Single pass: once exhausted, it stays exhausted.
    assert!(entries.next().is_none());
}

#[test]
fn test_old_version_warns_but_parses() {
    let input = "---\nVersion: 1.2.0\n---\nread,pids.current\n5,1\n";
    let (metadata, entries) = read_target_log(input.as_bytes()).unwrap();
    assert!(metadata.version == Version::new(1, 2, 0));
    assert!(!metadata.is_supported_version());
    assert!(metadata.warnings.len() == 1);
    assert!(metadata.warnings[0].contains("1.2.0 is older than"));
    assert!(metadata.target_id.is_none());
    let all = entries.collect::<Result<Vec<TargetLogEntry>>>().unwrap();
    assert!(all.len() == 1);
    assert!(all[0].read == 5);
    assert!(all[0].pids_max == PidLimit::Limit(0));
}

#[test]
fn test_missing_version() {
    let input = "---\nProvider: docker\n---\nread\n7\n";
    let (metadata, _) = read_target_log(input.as_bytes()).unwrap();
    assert!(metadata.version == Version::new(0, 0, 0));
}

#[test]
fn test_metadata_not_a_mapping() {
    let input = "---\nVersion: 1.3.0\nMetadata: just-a-string\n---\nread\n7\n";
    let (metadata, entries) = read_target_log(input.as_bytes()).unwrap();
    assert!(metadata.target_id.is_none());
    assert!(metadata.warnings.len() == 1);
    let all = entries.collect::<Result<Vec<TargetLogEntry>>>().unwrap();
    assert!(all.len() == 1);
}

#[test]
fn test_structural_errors() {
    assert!(read_target_log("".as_bytes()).is_err());
    assert!(read_target_log("read,pids.current\n1,2\n".as_bytes()).is_err());
    assert!(read_target_log("---\nVersion: 1.3.0\nread,pids.current\n".as_bytes()).is_err());
}

#[test]
fn test_round_trip() {
    let file = std::fs::File::open("../tests/buzzlog/target.log").unwrap();
    let (_, entries) = read_target_log(std::io::BufReader::new(file)).unwrap();
    let original = entries.collect::<Result<Vec<TargetLogEntry>>>().unwrap();

    let mut text = "---\nVersion: 1.3.0\n---\n".to_string();
    let mut w = csv::Writer::from_writer(vec![]);
    w.write_record(target_log_header()).unwrap();
    for e in &original {
        w.write_record(e.columns()).unwrap();
    }
    text += &String::from_utf8(w.into_inner().unwrap()).unwrap();

    let (_, entries) = read_target_log(text.as_bytes()).unwrap();
    let reparsed = entries.collect::<Result<Vec<TargetLogEntry>>>().unwrap();
    assert!(original == reparsed);
}
