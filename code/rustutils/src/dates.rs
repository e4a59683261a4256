/// Time handling for the log tools.
///
/// Log records carry timestamps with millisecond precision and a numeric zone offset, on the form
/// `2023-01-21T13:05:43.290+0500`.  Internally an instant in a request record is an i64 count of
/// nanoseconds since the Unix epoch, while values that come from the command line are Timestamps
/// (UTC).  Day arithmetic on the `Date` clauses of queries is done on NaiveDate.
use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::str::FromStr;

pub type Timestamp = DateTime<Utc>;

pub const NANOS_PER_SEC: i64 = 1_000_000_000;
pub const SECS_PER_DAY: i64 = 86400;

// %.f rather than %.3f: be lenient about the number of fraction digits.
const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%z";

const CMDLINE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const REPORT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a timestamp as it appears in the `timestamp` field of a log record.

pub fn parse_log_timestamp(s: &str) -> Result<Timestamp> {
    Ok(DateTime::parse_from_str(s, LOG_TIMESTAMP_FORMAT)?.with_timezone(&Utc))
}

/// Parse YYYY-MM-DDTHH:MM:SS as UTC.  This is the format for --from and --until.

pub fn parse_utc_time(s: &str) -> Result<Timestamp> {
    let t = Utc.from_utc_datetime(&NaiveDateTime::parse_from_str(s, CMDLINE_TIME_FORMAT)?);
    if t.timestamp_nanos_opt().is_none() {
        bail!("Time out of range")
    }
    Ok(t)
}

/// Parse a YYYY-MM-DD date.

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(s, "%Y-%m-%d")?)
}

/// Nanoseconds since the epoch, None if the time is outside what an i64 can hold (about 1677-2262).

pub fn timestamp_nanos(t: &Timestamp) -> Option<i64> {
    t.timestamp_nanos_opt()
}

/// Whole days from `start` to `end`, truncated toward zero.

pub fn days_between(start: NaiveDate, end: NaiveDate) -> i64 {
    end.signed_duration_since(start).num_days()
}

/// Format nanoseconds since the epoch as "YYYY-MM-DD HH:MM:SS" in UTC, dropping the subsecond
/// part.

pub fn format_utc_nanos(nanos: i64) -> String {
    match Utc.timestamp_opt(nanos.div_euclid(NANOS_PER_SEC), 0).single() {
        Some(t) => t.format(REPORT_TIME_FORMAT).to_string(),
        None => "".to_string(),
    }
}

/// Truncate nanoseconds since the epoch to a multiple of `interval` seconds.

pub fn truncate_nanos(nanos: i64, interval: i64) -> i64 {
    let step = interval * NANOS_PER_SEC;
    if step <= 0 {
        return nanos;
    }
    nanos - nanos.rem_euclid(step)
}

/// Parse a duration on the form HhMmSs, all parts optional but at least one present, eg `10s`,
/// `1m30s`, `2h`.

pub fn parse_duration(s: &str) -> Result<chrono::Duration> {
    let re = Regex::new(r"^(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?$")?;
    let Some(caps) = re.captures(s) else {
        bail!("Bad duration")
    };
    if s.is_empty() {
        bail!("Empty duration")
    }
    let mut seconds = 0i64;
    for (ix, scale) in [(1, 3600), (2, 60), (3, 1)] {
        if let Some(m) = caps.get(ix) {
            seconds += i64::from_str(m.as_str())? * scale;
        }
    }
    Ok(chrono::Duration::seconds(seconds))
}

#[test]
fn test_parse_log_timestamp() {
    let t = parse_log_timestamp("2023-01-21T13:05:43.773+0500").unwrap();
    assert!(timestamp_nanos(&t) == Some(1674288343773000000));
    let t = parse_log_timestamp("2300-01-21T13:05:43.773+0500").unwrap();
    assert!(timestamp_nanos(&t).is_none());
    assert!(parse_log_timestamp("2023-01-21 13:05:43").is_err());
    assert!(parse_log_timestamp("").is_err());
}

#[test]
fn test_parse_utc_time() {
    let t = parse_utc_time("2023-01-28T06:23:00").unwrap();
    assert!(t.timestamp() == 1674886980);
    assert!(parse_utc_time("2023-01-28").is_err());
    assert!(parse_utc_time("2300-01-28T06:23:00").is_err());
}

#[test]
fn test_days_between() {
    let a = parse_date("2023-01-21").unwrap();
    let b = parse_date("2023-01-23").unwrap();
    assert!(days_between(a, b) == 2);
    assert!(days_between(a, a) == 0);
    assert!(parse_date("2023-21-01").is_err());
}

#[test]
fn test_format_utc_nanos() {
    assert!(format_utc_nanos(1674288343773000000) == "2023-01-21 08:05:43");
}

#[test]
fn test_truncate_nanos() {
    assert!(truncate_nanos(1674288343773000000, 10) == 1674288340000000000);
    assert!(truncate_nanos(1674288343773000000, 60) == 1674288300000000000);
}

#[test]
fn test_parse_duration() {
    assert!(parse_duration("10s").unwrap().num_seconds() == 10);
    assert!(parse_duration("1m30s").unwrap().num_seconds() == 90);
    assert!(parse_duration("2h").unwrap().num_seconds() == 7200);
    assert!(parse_duration("1h1m1s").unwrap().num_seconds() == 3661);
    assert!(parse_duration("").is_err());
    assert!(parse_duration("10").is_err());
    assert!(parse_duration("s").is_err());
    assert!(parse_duration("1d").is_err());
}
