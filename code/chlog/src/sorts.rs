/// Ranking orders for aggregate groups.
use anyhow::{bail, Result};
use std::fmt;
use std::str::FromStr;

/// Which order statistic of a buffer to rank by.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggSortKey {
    #[default]
    Max,
    P99,
    P95,
    P90,
    P50,
}

impl AggSortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggSortKey::Max => "max",
            AggSortKey::P99 => "p99",
            AggSortKey::P95 => "p95",
            AggSortKey::P90 => "p90",
            AggSortKey::P50 => "p50",
        }
    }

    pub fn strings() -> &'static [&'static str] {
        &["max", "p99", "p95", "p90", "p50"]
    }
}

impl FromStr for AggSortKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<AggSortKey> {
        Ok(match s {
            "max" => AggSortKey::Max,
            "p99" => AggSortKey::P99,
            "p95" => AggSortKey::P95,
            "p90" => AggSortKey::P90,
            "p50" => AggSortKey::P50,
            _ => bail!("invalid agg sort key {s}"),
        })
    }
}

impl fmt::Display for AggSortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orders for index groups.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexSort {
    #[default]
    Time,
    ReadRows,
    Queries,
    Errors,
}

impl IndexSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexSort::Time => "time",
            IndexSort::ReadRows => "read_rows",
            IndexSort::Queries => "queries",
            IndexSort::Errors => "errors",
        }
    }

    pub fn strings() -> &'static [&'static str] {
        &["time", "read_rows", "queries", "errors"]
    }
}

impl FromStr for IndexSort {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<IndexSort> {
        Ok(match s {
            "time" => IndexSort::Time,
            "read_rows" => IndexSort::ReadRows,
            "queries" => IndexSort::Queries,
            "errors" => IndexSort::Errors,
            _ => bail!("invalid sort {s}"),
        })
    }
}

impl fmt::Display for IndexSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orders for request groups.  The time orders pick the timing buffer to rank by, the rows orders
/// the rows buffer.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestSort {
    #[default]
    QTime,
    RTime,
    DataTime,
    ReadRows,
    IndexReadRows,
    DataReadRows,
    Queries,
    Errors,
}

impl RequestSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestSort::QTime => "qtime",
            RequestSort::RTime => "rtime",
            RequestSort::DataTime => "data_time",
            RequestSort::ReadRows => "read_rows",
            RequestSort::IndexReadRows => "index_read_rows",
            RequestSort::DataReadRows => "data_read_rows",
            RequestSort::Queries => "queries",
            RequestSort::Errors => "errors",
        }
    }

    pub fn strings() -> &'static [&'static str] {
        &[
            "qtime",
            "rtime",
            "data_time",
            "read_rows",
            "index_read_rows",
            "data_read_rows",
            "queries",
            "errors",
        ]
    }

    /// The index order that goes with this request order, for reports that show both.

    pub fn index_sort(&self) -> IndexSort {
        match self {
            RequestSort::QTime | RequestSort::RTime | RequestSort::DataTime => IndexSort::Time,
            RequestSort::ReadRows | RequestSort::IndexReadRows | RequestSort::DataReadRows => {
                IndexSort::ReadRows
            }
            RequestSort::Queries => IndexSort::Queries,
            RequestSort::Errors => IndexSort::Errors,
        }
    }
}

impl FromStr for RequestSort {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<RequestSort> {
        Ok(match s {
            "qtime" => RequestSort::QTime,
            "rtime" => RequestSort::RTime,
            "data_time" => RequestSort::DataTime,
            "read_rows" => RequestSort::ReadRows,
            "index_read_rows" => RequestSort::IndexReadRows,
            "data_read_rows" => RequestSort::DataReadRows,
            "queries" => RequestSort::Queries,
            "errors" => RequestSort::Errors,
            _ => bail!("invalid sort {s}"),
        })
    }
}

impl fmt::Display for RequestSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[test]
fn test_sort_labels() {
    for name in AggSortKey::strings() {
        assert!(AggSortKey::from_str(name).unwrap().to_string() == *name);
    }
    for name in IndexSort::strings() {
        assert!(IndexSort::from_str(name).unwrap().to_string() == *name);
    }
    for name in RequestSort::strings() {
        assert!(RequestSort::from_str(name).unwrap().to_string() == *name);
    }
    assert!(AggSortKey::from_str("p75").is_err());
    assert!(IndexSort::from_str("qtime").is_err());
    assert!(RequestSort::from_str("time").is_err());
    assert!(AggSortKey::default() == AggSortKey::Max);
    assert!(RequestSort::default() == RequestSort::QTime);
}

#[test]
fn test_index_sort() {
    assert!(RequestSort::RTime.index_sort() == IndexSort::Time);
    assert!(RequestSort::DataTime.index_sort() == IndexSort::Time);
    assert!(RequestSort::IndexReadRows.index_sort() == IndexSort::ReadRows);
    assert!(RequestSort::Queries.index_sort() == IndexSort::Queries);
    assert!(RequestSort::Errors.index_sort() == IndexSort::Errors);
}
