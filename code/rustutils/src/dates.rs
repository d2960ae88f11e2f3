/// Timestamps in the benchmark logs carry no timezone.  The request, RPC, query and cache logs are
/// written in the container's local time with microsecond or finer precision; collectl writes a
/// compact date and announces its timezone in a comment header.  Everything is represented as a
/// naive date-time, and collectl times are moved to UTC by the caller.
use anyhow::{bail, Result};
use chrono::{Duration, FixedOffset, NaiveDateTime, SubsecRound};

pub type Timestamp = NaiveDateTime;

pub fn parse_timestamp(s: &str) -> Result<Timestamp> {
    match NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S%.f") {
        Ok(t) => Ok(t),
        Err(e) => bail!("Bad timestamp '{s}': {e}"),
    }
}

pub fn parse_compact_timestamp(s: &str) -> Result<Timestamp> {
    match NaiveDateTime::parse_from_str(s.trim(), "%Y%m%d %H:%M:%S%.f") {
        Ok(t) => Ok(t),
        Err(e) => bail!("Bad timestamp '{s}': {e}"),
    }
}

// The syntax is exactly [+-]HHMM.

pub fn parse_tz_offset(s: &str) -> Result<FixedOffset> {
    let bytes = s.as_bytes();
    if bytes.len() != 5 || !bytes[1..].iter().all(|b| b.is_ascii_digit()) {
        bail!("Bad timezone offset '{s}'");
    }
    let sign = match bytes[0] {
        b'+' => 1,
        b'-' => -1,
        _ => bail!("Bad timezone offset '{s}'"),
    };
    let hours: i32 = s[1..3].parse()?;
    let minutes: i32 = s[3..5].parse()?;
    if minutes >= 60 {
        bail!("Bad timezone offset '{s}'");
    }
    match FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)) {
        Some(offset) => Ok(offset),
        None => bail!("Timezone offset '{s}' out of range"),
    }
}

pub fn local_to_utc(t: Timestamp, offset: FixedOffset) -> Timestamp {
    t - Duration::seconds(offset.local_minus_utc() as i64)
}

pub fn truncate_to_micros(t: Timestamp) -> Timestamp {
    t.trunc_subsecs(6)
}

pub fn format_timestamp(t: &Timestamp) -> String {
    t.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

#[test]
fn test_parse_timestamp() {
    let t = parse_timestamp("2021-01-01 00:00:00.015").unwrap();
    assert!(format_timestamp(&t) == "2021-01-01 00:00:00.015000");
    let t = parse_timestamp("2021-03-04 05:06:07").unwrap();
    assert!(format_timestamp(&t) == "2021-03-04 05:06:07.000000");
    assert!(parse_timestamp("2021-03-04T05:06:07").is_err());
    assert!(parse_timestamp("").is_err());
}

#[test]
fn test_truncate_to_micros() {
    let t = parse_timestamp("2021-01-01 10:00:00.123456789").unwrap();
    assert!(truncate_to_micros(t) == parse_timestamp("2021-01-01 10:00:00.123456").unwrap());
}

#[test]
fn test_parse_compact_timestamp() {
    let t = parse_compact_timestamp("20210101 12:30:00.250").unwrap();
    assert!(t == parse_timestamp("2021-01-01 12:30:00.25").unwrap());
}

#[test]
fn test_timezones() {
    let t = parse_timestamp("2021-01-01 12:00:00").unwrap();
    let east = parse_tz_offset("+0200").unwrap();
    assert!(local_to_utc(t, east) == parse_timestamp("2021-01-01 10:00:00").unwrap());
    let west = parse_tz_offset("-0530").unwrap();
    assert!(local_to_utc(t, west) == parse_timestamp("2021-01-01 17:30:00").unwrap());
    let utc = parse_tz_offset("+0000").unwrap();
    assert!(local_to_utc(t, utc) == t);
    assert!(parse_tz_offset("0500").is_err());
    assert!(parse_tz_offset("+05").is_err());
    assert!(parse_tz_offset("+0575").is_err());
}
