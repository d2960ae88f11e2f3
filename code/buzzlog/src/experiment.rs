/// An experiment directory as left behind by a benchmark run:
///
///   <experiment>/logs/<node>/<component>.tar.gz
///
/// Each node directory holds one gzipped tarball per monitored component (the load generator, each
/// service, collectl, the bpftrace tools, ...).  Inside a tarball the log is found by its name, as
/// `LogKind::from_filename` recognizes it: `loadgen.log`, `calls.log`, `queries.log`, `redis.log`,
/// or for collectl `<...>.cpu.gz` (or `.numa`, `.dsk`, gzipped or not).  The bpftrace bundles are
/// recognized by the tarball name and hold a single member `log`.
///
/// Nodes and bundles are visited in name order.  Entries whose names start with `.` are ignored.
use crate::{parse_request_log, request_time_span, LogKind, RequestTypeTable};

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use rustutils::Timestamp;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The result of parsing one log found in an experiment.

#[derive(Debug, Clone)]
pub struct NodeLog<T> {
    pub node: String,
    pub bundle: String,
    pub member: String,
    pub data: T,
}

pub struct Experiment {
    logs_dir: PathBuf,
}

fn sorted_entries(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut entries = vec![];
    for entry in fs::read_dir(dir).with_context(|| format!("Could not read {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        entries.push((name, entry.path()));
    }
    entries.sort();
    Ok(entries)
}

// Does the tarball member hold the log of this kind?

fn wants_member(kind: LogKind, bundle: &str, member: &str) -> bool {
    LogKind::from_filename(&format!("{bundle}/{member}")) == Some(kind)
}

impl Experiment {
    pub fn open(dir: &Path) -> Result<Experiment> {
        let logs_dir = dir.join("logs");
        if !logs_dir.is_dir() {
            bail!("{} is not an experiment directory (no logs/)", dir.display());
        }
        Ok(Experiment { logs_dir })
    }

    pub fn nodes(&self) -> Result<Vec<String>> {
        Ok(sorted_entries(&self.logs_dir)?
            .into_iter()
            .filter(|(_, path)| path.is_dir())
            .map(|(name, _)| name)
            .collect())
    }

    /// Find the logs of the given kind in all bundles on all nodes and run `parse` on each.  The
    /// reader passed to `parse` is already decompressed.
    pub fn parse_logs<T, F>(&self, kind: LogKind, mut parse: F) -> Result<Vec<NodeLog<T>>>
    where
        F: FnMut(&mut dyn BufRead) -> Result<T>,
    {
        let mut logs = vec![];
        for node in self.nodes()? {
            for (bundle, path) in sorted_entries(&self.logs_dir.join(&node))? {
                if !bundle.ends_with(".tar.gz") {
                    continue;
                }
                let found = parse_bundle(&path, &bundle, kind, &mut parse)
                    .with_context(|| format!("In {}", path.display()))?;
                if let Some((member, data)) = found {
                    debug!("{}: {node}/{bundle}/{member}", kind.name());
                    logs.push(NodeLog {
                        node: node.clone(),
                        bundle,
                        member,
                        data,
                    });
                }
            }
        }
        info!("{} logs found: {}", kind.name(), logs.len());
        Ok(logs)
    }

    /// The experiment runs from the first to the last request issued by any load generator.
    pub fn time_span(&self, table: &RequestTypeTable) -> Result<Option<(Timestamp, Timestamp)>> {
        let logs = self.parse_logs(LogKind::Request, |r| parse_request_log(r, table))?;
        Ok(request_time_span(logs.iter().map(|l| &l.data)))
    }
}

// Parse the first member of the bundle that holds a log of the kind, if any.

fn parse_bundle<T, F>(
    path: &Path,
    bundle: &str,
    kind: LogKind,
    parse: &mut F,
) -> Result<Option<(String, T)>>
where
    F: FnMut(&mut dyn BufRead) -> Result<T>,
{
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(path)?));
    for entry in archive.entries()? {
        let entry = entry?;
        let member = entry.path()?.to_string_lossy().into_owned();
        if !wants_member(kind, bundle, &member) {
            continue;
        }
        let data = if member.ends_with(".gz") {
            parse(&mut BufReader::new(GzDecoder::new(entry)))?
        } else {
            parse(&mut BufReader::new(entry))?
        };
        return Ok(Some((member, data)));
    }
    Ok(None)
}

#[cfg(test)]
fn add_member(builder: &mut tar::Builder<impl std::io::Write>, name: &str, contents: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, contents).unwrap();
}

#[cfg(test)]
fn write_bundle(path: &Path, members: &[(&str, Vec<u8>)]) {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let enc = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(enc);
    for (name, contents) in members {
        add_member(&mut builder, name, contents);
    }
    builder.into_inner().unwrap().finish().unwrap();
}

#[cfg(test)]
fn gzipped(contents: &[u8]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut enc = GzEncoder::new(vec![], Compression::default());
    enc.write_all(contents).unwrap();
    enc.finish().unwrap()
}

#[test]
fn test_experiment_discovery() {
    let dir = tempfile::tempdir().unwrap();
    let logs = dir.path().join("logs");
    for node in ["node1", "node0", ".hidden"] {
        fs::create_dir_all(logs.join(node)).unwrap();
    }

    write_bundle(
        &logs.join("node0").join("loadgen.tar.gz"),
        &[
            ("./README", b"nothing".to_vec()),
            (
                "./loadgen.log",
                b"[2021-03-02 10:00:01.000] GET http://h:80/trending 200 - latency=0.1\n".to_vec(),
            ),
        ],
    );
    write_bundle(
        &logs.join("node1").join("loadgen.tar.gz"),
        &[(
            "./loadgen.log",
            b"[2021-03-02 10:00:00.500] GET http://h:80/post/1 200 - latency=0.1\n\
              [2021-03-02 10:00:05.500] POST http://h:80/post 200 - latency=0.1\n"
                .to_vec(),
        )],
    );
    write_bundle(
        &logs.join("node1").join("collectl.tar.gz"),
        &[(
            "./tmp/node1-20210302-100000.numa.gz",
            gzipped(b"# TZ: +0000\n20210302 10:00:00.000 1 2 3 4 5 6 7 8\n"),
        )],
    );
    write_bundle(
        &logs.join("node1").join("tcplistenbl-bpftrace.tar.gz"),
        &[("./log", b"10:00:00 1234 nginx 3/511\n".to_vec())],
    );
    fs::write(logs.join("node1").join("notes.txt"), "not a bundle").unwrap();

    let x = Experiment::open(dir.path()).unwrap();
    assert!(x.nodes().unwrap() == vec!["node0".to_string(), "node1".to_string()]);

    let table = crate::builtin_request_types().unwrap();
    let requests = x
        .parse_logs(LogKind::Request, |r| crate::parse_request_log(r, table))
        .unwrap();
    assert!(requests.len() == 2);
    assert!(requests[0].node == "node0");
    assert!(requests[0].bundle == "loadgen.tar.gz");
    // tar drops the leading "./"
    assert!(requests[0].member == "loadgen.log");
    assert!(requests[1].data.records.len() == 2);

    let (lo, hi) = x.time_span(table).unwrap().unwrap();
    assert!(rustutils::format_timestamp(&lo) == "2021-03-02 10:00:00.500000");
    assert!(rustutils::format_timestamp(&hi) == "2021-03-02 10:00:05.500000");

    let mem = x
        .parse_logs(LogKind::Collectl(crate::HardwareType::Mem), |r| {
            crate::parse_collectl_log(r, crate::HardwareType::Mem)
        })
        .unwrap();
    assert!(mem.len() == 1);
    assert!(mem[0].data.records.len() == 1);

    let backlog = x
        .parse_logs(LogKind::TcpListenBacklog, |r| crate::parse_tcp_listen_backlog_log(r))
        .unwrap();
    assert!(backlog.len() == 1);
    assert!(backlog[0].data.records[0].max == 511);

    assert!(x
        .parse_logs(LogKind::Query, |r| crate::parse_query_log(r))
        .unwrap()
        .is_empty());
}

#[test]
fn test_wants_member() {
    assert!(wants_member(LogKind::Request, "loadgen.tar.gz", "loadgen.log"));
    assert!(!wants_member(LogKind::Request, "loadgen.tar.gz", "README"));
    assert!(wants_member(
        LogKind::Collectl(crate::HardwareType::Cpu),
        "collectl.tar.gz",
        "tmp/node1-20210302-100000.cpu.gz"
    ));
    assert!(!wants_member(
        LogKind::Collectl(crate::HardwareType::Dsk),
        "collectl.tar.gz",
        "tmp/node1-20210302-100000.cpu.gz"
    ));
    assert!(wants_member(LogKind::TcpRetransmit, "tcpretrans-bpftrace.tar.gz", "log"));
    assert!(!wants_member(LogKind::TcpListenBacklog, "tcpretrans-bpftrace.tar.gz", "log"));
}

#[test]
fn test_not_an_experiment() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Experiment::open(dir.path()).is_err());
}
