/// Number formatting and order statistics.
///
/// Large counts (rows, bytes, points) are shown scaled to k/M/G with 1024-based units, but only
/// once the value exceeds 20 of the unit, so that small multiples keep their precision.
use thiserror::Error;

const KB: i64 = 1024;
const MB: i64 = 1024 * 1024;
const GB: i64 = 1024 * 1024 * 1024;

pub fn format_number(n: i64) -> String {
    if n > 20 * GB {
        format!("{}G", n / GB)
    } else if n > 20 * MB {
        format!("{}M", n / MB)
    } else if n > 20 * KB {
        format!("{}k", n / KB)
    } else {
        n.to_string()
    }
}

pub fn format_float(n: f64, prec: usize) -> String {
    if n > 20.0 * GB as f64 {
        format!("{:.prec$}G", n / GB as f64)
    } else if n > 20.0 * MB as f64 {
        format!("{:.prec$}M", n / MB as f64)
    } else if n > 20.0 * KB as f64 {
        format!("{:.prec$}k", n / KB as f64)
    } else {
        format!("{:.prec$}", n)
    }
}

pub fn format_pcnt(n: f64) -> String {
    format!("{:.2}", n)
}

// Used for day counts, where zero means "not known".
pub fn format_nonzero(n: i64) -> String {
    if n == 0 {
        "".to_string()
    } else {
        n.to_string()
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PercentileError {
    #[error("Input must not be empty")]
    EmptyInput,

    #[error("Input is outside of range")]
    Bounds,
}

/// Compute a percentile over an already sorted (ascending) slice.  `fraction` is in (0,1].
///
/// This is the nearest-rank flavor that averages the two neighbors when the rank is not whole; for
/// small samples the low fractions have no rank and produce Bounds.

pub fn percentile(input: &[f64], fraction: f64) -> Result<f64, PercentileError> {
    let len = input.len();
    if len == 0 {
        return Err(PercentileError::EmptyInput);
    }
    if len == 1 {
        return Ok(input[0]);
    }
    if fraction <= 0.0 || fraction > 1.0 {
        return Err(PercentileError::Bounds);
    }
    let index = fraction * len as f64;
    if index == index.trunc() {
        Ok(input[index as usize - 1])
    } else if index > 1.0 {
        let i = index as usize;
        Ok((input[i - 1] + input[i]) / 2.0)
    } else {
        Err(PercentileError::Bounds)
    }
}

#[test]
fn test_format_number() {
    assert!(format_number(0) == "0");
    assert!(format_number(20 * 1024) == "20480");
    assert!(format_number(20 * 1024 + 1) == "20k");
    assert!(format_number(1228804) == "1200k");
    assert!(format_number(164970948) == "157M");
    assert!(format_number(30 * 1024 * 1024 * 1024) == "30G");
}

#[test]
fn test_format_float() {
    assert!(format_float(0.5, 3) == "0.500");
    assert!(format_float(1228804.0, 1) == "1200.0k");
    assert!(format_pcnt(33.33333) == "33.33");
    assert!(format_nonzero(0) == "");
    assert!(format_nonzero(7) == "7");
}

#[test]
fn test_percentile() {
    assert!(percentile(&[], 0.5) == Err(PercentileError::EmptyInput));
    assert!(percentile(&[], 0.99) == Err(PercentileError::EmptyInput));
    assert!(percentile(&[0.1], 0.5) == Ok(0.1));
    assert!(percentile(&[0.1], 0.99) == Ok(0.1));
    assert!(percentile(&[0.1, 0.3], 0.5) == Ok(0.1));
    assert!(percentile(&[0.1, 0.3], 0.9) == Ok(0.2));
    assert!(percentile(&[0.1, 0.3], 0.0) == Err(PercentileError::Bounds));
    assert!(percentile(&[0.1, 0.3], 1.5) == Err(PercentileError::Bounds));
    assert!(percentile(&[1.0, 2.0, 3.0], 0.2) == Err(PercentileError::Bounds));
    assert!(percentile(&[9000.0, 10000.0], 0.95) == Ok(9500.0));
    assert!(percentile(&[9000.0, 10000.0], 1.0) == Ok(10000.0));
}
