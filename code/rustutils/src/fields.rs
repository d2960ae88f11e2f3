// Coercion of text fields.  These return None when the text is not a well-formed value of the
// type, and the caller decides whether that rejects the record.

use std::str::FromStr;

pub fn get_u32(s: &str) -> Option<u32> {
    u32::from_str(s.trim()).ok()
}

pub fn get_u64(s: &str) -> Option<u64> {
    u64::from_str(s.trim()).ok()
}

pub fn get_i64(s: &str) -> Option<i64> {
    i64::from_str(s.trim()).ok()
}

/// An empty (or all-blank) field is zero, anything else must be a u64.

pub fn get_u64_or_zero(s: &str) -> Option<u64> {
    if s.trim().is_empty() {
        Some(0)
    } else {
        get_u64(s)
    }
}

/// Parse a float and multiply by `scale`.  Infinities and NaN are rejected.

pub fn get_f64(s: &str, scale: f64) -> Option<f64> {
    match f64::from_str(s.trim()) {
        Ok(n) if n.is_finite() => Some(n * scale),
        _ => None,
    }
}

#[test]
fn test_get_numbers() {
    assert!(get_u32("17") == Some(17));
    assert!(get_u32("-1").is_none());
    assert!(get_u64(" 12 ") == Some(12));
    assert!(get_u64("").is_none());
    assert!(get_i64("-150") == Some(-150));
    assert!(get_u64_or_zero("") == Some(0));
    assert!(get_u64_or_zero("5") == Some(5));
    assert!(get_u64_or_zero("x").is_none());
    assert!(get_f64("0.015", 1000.0) == Some(15.0));
    assert!(get_f64("inf", 1.0).is_none());
    assert!(get_f64("NaN", 1.0).is_none());
    assert!(get_f64("abc", 1.0).is_none());
}
