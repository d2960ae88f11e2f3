/// Helpers for reading hand-written JSON configuration.
///
/// Since the input is human-generated and has optional fields, the files are read with the generic
/// JSON parser followed by explicit decoding of the fields, rather than a (derived) strongly-typed
/// parser.  That way the error message can name the offending field.
use anyhow::{bail, Result};
use serde_json::Value;
use std::fs::File;
use std::io::BufReader;
use std::path;

pub fn read_json_file(filename: &str) -> Result<Value> {
    let file = File::open(path::Path::new(filename))?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

pub fn grab_string(fields: &serde_json::Map<String, Value>, name: &str) -> Result<String> {
    if let Some(Value::String(s)) = fields.get(name) {
        Ok(s.to_string())
    } else {
        bail!("Field '{name}' must be present and have a string value");
    }
}

pub fn grab_string_opt(fields: &serde_json::Map<String, Value>, name: &str) -> Result<String> {
    match fields.get(name) {
        Some(Value::String(s)) => Ok(s.to_string()),
        Some(_) => bail!("Field '{name}' must have a string value"),
        None => Ok("".to_string()),
    }
}

#[test]
fn test_grab() {
    let v: Value = serde_json::from_str(r#"{"a": "x", "b": 3}"#).unwrap();
    let fields = v.as_object().unwrap();
    assert!(grab_string(fields, "a").unwrap() == "x");
    assert!(grab_string(fields, "b").is_err());
    assert!(grab_string(fields, "c").is_err());
    assert!(grab_string_opt(fields, "c").unwrap() == "");
    assert!(grab_string_opt(fields, "b").is_err());
}
