// Misc utilities useful to both buzzlog and buzzparse.

mod configs;
mod dates;
mod fields;
mod version;

// Read a JSON document from a file, for hand-written configuration.

pub use configs::read_json_file;

// Decode named fields of a JSON object, with errors that name the field.

pub use configs::grab_string;
pub use configs::grab_string_opt;

// Types and utilities for manipulating timestamps.

pub use dates::Timestamp;

// Parse "YYYY-MM-DD HH:MM:SS.ffffff" (any number of fraction digits, or none).

pub use dates::parse_timestamp;

// Parse collectl's "YYYYMMDD HH:MM:SS.fff".

pub use dates::parse_compact_timestamp;

// Parse a "+HHMM" / "-HHMM" timezone offset.

pub use dates::parse_tz_offset;

// Shift a wall-clock time in the given offset to UTC.

pub use dates::local_to_utc;

// Drop sub-microsecond digits.

pub use dates::truncate_to_micros;

// The canonical output format for timestamps.

pub use dates::format_timestamp;

// Numeric coercion of text fields.

pub use fields::get_f64;
pub use fields::get_i64;
pub use fields::get_u32;
pub use fields::get_u64;
pub use fields::get_u64_or_zero;

// Dotted "major.minor.bugfix" version numbers.

pub use version::Version;
