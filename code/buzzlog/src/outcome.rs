/// The outcome of tokenizing a single line or row.  Most failures only cost the line they occur
/// on; the stream assembler turns them into diagnostics and keeps going.  A classification failure
/// means the lookup tables are out of date with respect to the benchmark, and it aborts the parse.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LineError {
    #[error("line does not match the {0} log format")]
    NoMatch(&'static str),

    #[error("field '{field}' has bad value '{value}'")]
    BadField { field: String, value: String },

    #[error("required field '{0}' is missing")]
    MissingField(&'static str),

    #[error("malformed row: {0}")]
    Malformed(String),

    #[error("cannot classify {what} '{input}'")]
    Unclassified { what: &'static str, input: String },
}

impl LineError {
    pub fn bad_field(field: &str, value: &str) -> LineError {
        LineError::BadField {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, LineError::Unclassified { .. })
    }
}

pub type LineResult<T> = std::result::Result<T, LineError>;

/// A skipped line.  `line_no` is 1-based and counts physical lines of the source, or data rows
/// (not counting the header) for CSV sources.

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub line_no: usize,
    pub reason: LineError,
}

/// Every record that could be parsed, in file order, along with the lines that were skipped.

#[derive(Debug, Clone)]
pub struct Parsed<T> {
    pub records: Vec<T>,
    pub diagnostics: Vec<Diagnostic>,
}

impl<T> Parsed<T> {
    pub fn new() -> Parsed<T> {
        Parsed {
            records: vec![],
            diagnostics: vec![],
        }
    }

    pub fn skipped(&self) -> usize {
        self.diagnostics.len()
    }
}

impl<T> Default for Parsed<T> {
    fn default() -> Self {
        Parsed::new()
    }
}

#[test]
fn test_fatality() {
    assert!(!LineError::NoMatch("rpc").is_fatal());
    assert!(!LineError::bad_field("latency", "x").is_fatal());
    assert!(!LineError::MissingField("read").is_fatal());
    assert!(!LineError::Malformed("short row".to_string()).is_fatal());
    assert!(LineError::Unclassified {
        what: "request",
        input: "GET http://h:80/nope".to_string()
    }
    .is_fatal());
}

#[test]
fn test_messages() {
    let e = LineError::bad_field("status_code", "2x0");
    assert!(e.to_string() == "field 'status_code' has bad value '2x0'");
    let p = Parsed::<u32>::new();
    assert!(p.skipped() == 0);
}
