/// CSV output of parsed records: the header row for the record kind, then one row per record.
use anyhow::{Context, Result};
use buzzlog::ToColumns;
use std::fs::File;
use std::io;
use std::path::Path;

pub struct CsvSink<W: io::Write> {
    writer: csv::Writer<W>,
    rows: usize,
}

impl CsvSink<File> {
    pub fn create<H: AsRef<str>>(path: &Path, header: &[H]) -> Result<CsvSink<File>> {
        let file =
            File::create(path).with_context(|| format!("Could not create {}", path.display()))?;
        CsvSink::new(file, header)
    }
}

impl<W: io::Write> CsvSink<W> {
    pub fn new<H: AsRef<str>>(output: W, header: &[H]) -> Result<CsvSink<W>> {
        let mut writer = csv::WriterBuilder::new().from_writer(output);
        writer.write_record(header.iter().map(|h| h.as_ref()))?;
        Ok(CsvSink { writer, rows: 0 })
    }

    pub fn write<T: ToColumns>(&mut self, record: &T) -> Result<()> {
        self.writer.write_record(record.columns())?;
        self.rows += 1;
        Ok(())
    }

    /// Flush the output and return the number of data rows written.
    pub fn finish(mut self) -> Result<usize> {
        self.writer.flush()?;
        Ok(self.rows)
    }
}

/// Write all the records to a new CSV file at `path`.

pub fn write_records<H, T>(path: &Path, header: &[H], records: &[T]) -> Result<usize>
where
    H: AsRef<str>,
    T: ToColumns,
{
    let mut sink = CsvSink::create(path, header)?;
    for r in records {
        sink.write(r)?;
    }
    sink.finish()
}

#[cfg(test)]
struct Pair(u32, &'static str);

#[cfg(test)]
impl ToColumns for Pair {
    fn columns(&self) -> Vec<String> {
        vec![self.0.to_string(), self.1.to_string()]
    }
}

#[test]
fn test_sink() {
    let mut out = vec![];
    let mut sink = CsvSink::new(&mut out, &["n", "name"]).unwrap();
    sink.write(&Pair(1, "a")).unwrap();
    sink.write(&Pair(2, "b, c")).unwrap();
    assert!(sink.finish().unwrap() == 2);
    assert!(String::from_utf8(out).unwrap() == "n,name\n1,a\n2,\"b, c\"\n");
}

#[test]
fn test_write_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.csv");
    let n = write_records(&path, &["n", "name"], &[Pair(7, "x")]).unwrap();
    assert!(n == 1);
    assert!(std::fs::read_to_string(&path).unwrap() == "n,name\n7,x\n");
    assert!(write_records(&dir.path().join("no/such/dir.csv"), &["n"], &[Pair(1, "y")]).is_err());
}
