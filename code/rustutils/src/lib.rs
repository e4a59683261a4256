// Misc utilities useful to both chlog and chstat.

mod dates;
mod fields;
mod labels;
mod numbers;
mod sort;

// Types and utilities for manipulating timestamps.

pub use dates::Timestamp;
pub use dates::NANOS_PER_SEC;
pub use dates::SECS_PER_DAY;

// Parse the `timestamp` field of a log record into a Timestamp.

pub use dates::parse_log_timestamp;

// Parse YYYY-MM-DDTHH:MM:SS (UTC) as used on the command line.

pub use dates::parse_utc_time;

// Parse YYYY-MM-DD.

pub use dates::parse_date;

// Whole days between two dates.

pub use dates::days_between;

// Convert a Timestamp to nanoseconds since the epoch, and back to a printable UTC string.

pub use dates::format_utc_nanos;
pub use dates::timestamp_nanos;

// Truncate nanoseconds since the epoch to a multiple of some number of seconds.

pub use dates::truncate_nanos;

// Parse a duration on the form HhMmSs, all parts optional.

pub use dates::parse_duration;

// Readers for loosely typed fields of decoded JSON objects.

pub use fields::grab_bool;
pub use fields::grab_f64;
pub use fields::grab_i64;
pub use fields::grab_str;
pub use fields::JsonObject;

// Bucketed labels for time spans (grouping keys), and rounded labels for display.

pub use labels::format_duration;
pub use labels::format_trunc_seconds;

// Number formatting with k/M/G suffixes.

pub use numbers::format_float;
pub use numbers::format_nonzero;
pub use numbers::format_number;
pub use numbers::format_pcnt;

// Percentile over a sorted sample, and the ways it can fail.

pub use numbers::percentile;
pub use numbers::PercentileError;

// Stable merge sort driven by a less-than predicate that need not be a total order.

pub use sort::stable_sort_by_less;
