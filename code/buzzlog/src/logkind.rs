/// The kinds of log the benchmark produces, and how to recognize them by file name.
use crate::HardwareType;

use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Request,
    Rpc,
    Query,
    Cache,
    Collectl(HardwareType),
    TcpListenBacklog,
    TcpRetransmit,
    Target,
    BufferFlush,
    LockTrace,
}

// The fixed names the services and the load generator write to.

const LOG_FILENAMES: [(&str, LogKind); 4] = [
    ("loadgen.log", LogKind::Request),
    ("queries.log", LogKind::Query),
    ("redis.log", LogKind::Cache),
    ("calls.log", LogKind::Rpc),
];

impl LogKind {
    pub fn name(&self) -> &'static str {
        match self {
            LogKind::Request => "request",
            LogKind::Rpc => "rpc",
            LogKind::Query => "query",
            LogKind::Cache => "cache",
            LogKind::Collectl(_) => "collectl",
            LogKind::TcpListenBacklog => "tcplistenbl",
            LogKind::TcpRetransmit => "tcpretrans",
            LogKind::Target => "target",
            LogKind::BufferFlush => "buffer flush",
            LogKind::LockTrace => "lock trace",
        }
    }

    /// The kind of log a file holds, judging by its name.  Target, buffer flush and lock trace
    /// logs have no fixed names and are never recognized.
    pub fn from_filename(path: &str) -> Option<LogKind> {
        let name = Path::new(path).file_name()?.to_str()?;
        for (suffix, kind) in LOG_FILENAMES {
            if name.ends_with(suffix) {
                return Some(kind);
            }
        }
        if let Some(hw_type) = HardwareType::from_filename(name) {
            return Some(LogKind::Collectl(hw_type));
        }
        if path.contains("tcplistenbl") {
            return Some(LogKind::TcpListenBacklog);
        }
        if path.contains("tcpretrans") {
            return Some(LogKind::TcpRetransmit);
        }
        None
    }
}

#[test]
fn test_from_filename() {
    assert!(LogKind::from_filename("logs/node0/loadgen.log") == Some(LogKind::Request));
    assert!(LogKind::from_filename("./queries.log") == Some(LogKind::Query));
    assert!(LogKind::from_filename("redis.log") == Some(LogKind::Cache));
    assert!(LogKind::from_filename("calls.log") == Some(LogKind::Rpc));
    assert!(
        LogKind::from_filename("node0-20210302.numa.gz")
            == Some(LogKind::Collectl(HardwareType::Mem))
    );
    assert!(LogKind::from_filename("tcplistenbl-bpftrace/log") == Some(LogKind::TcpListenBacklog));
    assert!(LogKind::from_filename("tcpretrans-bpftrace/log") == Some(LogKind::TcpRetransmit));
    assert!(LogKind::from_filename("out.log").is_none());
    assert!(LogKind::Collectl(HardwareType::Dsk).name() == "collectl");
}
