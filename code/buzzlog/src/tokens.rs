// Field conversions shared by the line tokenizers.  Each failure names the field.

use crate::{LineError, LineResult};

use rustutils::{get_f64, get_u32, parse_timestamp, truncate_to_micros, Timestamp};

pub fn timestamp_field(name: &'static str, s: &str) -> LineResult<Timestamp> {
    parse_timestamp(s).map_err(|_| LineError::bad_field(name, s))
}

/// The service logs write nanosecond timestamps; keep microseconds.

pub fn micros_timestamp_field(name: &'static str, s: &str) -> LineResult<Timestamp> {
    Ok(truncate_to_micros(timestamp_field(name, s)?))
}

/// The service logs write latencies in seconds.

pub fn millis_field(name: &'static str, s: &str) -> LineResult<f64> {
    get_f64(s, 1000.0).ok_or_else(|| LineError::bad_field(name, s))
}

pub fn u32_field(name: &'static str, s: &str) -> LineResult<u32> {
    get_u32(s).ok_or_else(|| LineError::bad_field(name, s))
}

#[test]
fn test_fields() {
    let t = micros_timestamp_field("timestamp", "2021-01-01 00:00:00.123456789").unwrap();
    assert!(rustutils::format_timestamp(&t) == "2021-01-01 00:00:00.123456");
    assert!(timestamp_field("timestamp", "yesterday") == Err(LineError::bad_field("timestamp", "yesterday")));
    assert!(millis_field("latency", "0.5") == Ok(500.0));
    assert!(millis_field("latency", "").is_err());
    assert!(u32_field("pid", "77") == Ok(77));
    assert!(u32_field("pid", "-1").is_err());
}
