/// Log sources.  A log is read as a sequence of text lines, transparently gunzipped when the file
/// name ends in `.gz`.  Lines are decoded lossily: a bad byte turns into U+FFFD and spoils only the
/// line it is on, which will then typically fail to tokenize and be reported.
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Open `path` for line reading.

pub fn open_log(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).with_context(|| format!("Could not open {}", path.display()))?;
    if is_gzipped(path) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

pub fn is_gzipped(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Iterator over the lines of a reader without their line terminators.  Unlike `BufRead::lines`
/// this does not fail on invalid UTF-8.

pub struct LossyLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> LossyLines<R> {
    pub fn new(reader: R) -> LossyLines<R> {
        LossyLines {
            reader,
            buf: vec![],
        }
    }
}

impl<R: BufRead> Iterator for LossyLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<io::Result<String>> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                    if self.buf.last() == Some(&b'\r') {
                        self.buf.pop();
                    }
                }
                Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

#[test]
fn test_lossy_lines() {
    let input: &[u8] = b"first\r\nsec\xffond\nlast";
    let lines = LossyLines::new(input)
        .collect::<io::Result<Vec<String>>>()
        .unwrap();
    assert!(lines.len() == 3);
    assert!(lines[0] == "first");
    assert!(lines[1] == "sec\u{FFFD}ond");
    assert!(lines[2] == "last");
}

#[test]
fn test_open_gzipped() {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calls.log.gz");
    let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    enc.write_all(b"one\ntwo\n").unwrap();
    enc.finish().unwrap();

    let lines = LossyLines::new(open_log(&path).unwrap())
        .collect::<io::Result<Vec<String>>>()
        .unwrap();
    assert!(lines == vec!["one".to_string(), "two".to_string()]);
    assert!(open_log(&dir.path().join("nonexistent.log")).is_err());
}
