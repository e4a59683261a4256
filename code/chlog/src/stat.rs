/// The per-request record assembled from the log, and the orderings used to rank such records.
use anyhow::{bail, Result};
use std::fmt;
use std::str::FromStr;
use ustr::Ustr;

/// Status of one sub-query, or of the wait for a query slot.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    None,
    Success,
    Cached,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::None => " ",
            Status::Success => "S",
            Status::Cached => "C",
            Status::Error => "E",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One render target or find query of a request.  `days` is the number of calendar days touched by
/// [from, until], zero when unknown.

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub days: i64,
    pub query: String,
    pub from: i64,
    pub until: i64,
}

/// One query against an index table (paths, tags), or a cached index lookup.

#[derive(Debug, Clone, PartialEq)]
pub struct IndexStat {
    pub status: Status,
    pub read_rows: i64,
    pub read_bytes: i64,
    pub time: f64,
    pub table: Ustr,
    pub query_id: String,
    pub days: i64,
    pub error: String,
}

impl Default for IndexStat {
    fn default() -> IndexStat {
        IndexStat {
            status: Status::None,
            read_rows: 0,
            read_bytes: 0,
            time: 0.0,
            table: Ustr::from(""),
            query_id: "".to_string(),
            days: 0,
            error: "".to_string(),
        }
    }
}

/// One query against a data (points) table.  `from` and `until` are the bounds of the `Time`
/// condition of the query, in epoch seconds.

#[derive(Debug, Clone, PartialEq)]
pub struct DataStat {
    pub status: Status,
    pub read_rows: i64,
    pub read_bytes: i64,
    pub time: f64,
    pub table: Ustr,
    pub query_id: String,
    pub days: i64,
    pub from: i64,
    pub until: i64,
    pub error: String,
}

impl Default for DataStat {
    fn default() -> DataStat {
        DataStat {
            status: Status::None,
            read_rows: 0,
            read_bytes: 0,
            time: 0.0,
            table: Ustr::from(""),
            query_id: "".to_string(),
            days: 0,
            from: 0,
            until: 0,
            error: "".to_string(),
        }
    }
}

/// Everything known about one request.  The record is complete once the access line has been seen,
/// which is when `request_status` becomes nonzero.
///
/// The counters `read_rows` and `read_bytes` are the sums over both phases, ie `read_rows ==
/// index_read_rows + data_read_rows` once all sub-queries have been added.

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stat {
    pub id: String,

    /// Nanoseconds since the epoch of the last log line seen for the request.
    pub timestamp: i64,

    pub queries: Vec<Query>,

    pub metrics: i64,
    pub points: i64,
    pub bytes: i64,

    /// "render", "metrics_find", "tag_values", "tag_names", or "" if not known.
    pub request_type: &'static str,
    pub request_time: f64,
    pub request_status: i64,
    pub wait_time: f64,
    pub wait_status: Status,

    /// request_time - wait_time
    pub query_time: f64,

    pub read_rows: i64,
    pub read_bytes: i64,

    pub index_read_rows: i64,
    pub index_read_bytes: i64,
    pub index: Vec<IndexStat>,

    pub data_read_rows: i64,
    pub data_read_bytes: i64,
    pub data: Vec<DataStat>,
}

impl Stat {
    pub fn new(id: &str, timestamp: i64) -> Stat {
        Stat {
            id: id.to_string(),
            timestamp,
            ..Default::default()
        }
    }

    /// Forget everything but the id, and restart at `timestamp`.  The record is cleared in place.

    pub fn reset(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
        self.queries.clear();

        self.metrics = 0;
        self.points = 0;
        self.bytes = 0;

        self.request_type = "";
        self.request_time = 0.0;
        self.request_status = 0;
        self.wait_time = 0.0;
        self.wait_status = Status::None;
        self.query_time = 0.0;

        self.read_rows = 0;
        self.read_bytes = 0;

        self.index_read_rows = 0;
        self.index_read_bytes = 0;
        self.index.clear();

        self.data_read_rows = 0;
        self.data_read_bytes = 0;
        self.data.clear();
    }

    pub fn is_complete(&self) -> bool {
        self.request_status > 0
    }

    pub fn add_index(&mut self, q: IndexStat) {
        self.index_read_rows += q.read_rows;
        self.index_read_bytes += q.read_bytes;
        self.read_rows += q.read_rows;
        self.read_bytes += q.read_bytes;
        self.index.push(q);
    }

    pub fn add_data(&mut self, q: DataStat) {
        self.data_read_rows += q.read_rows;
        self.data_read_bytes += q.read_bytes;
        self.read_rows += q.read_rows;
        self.read_bytes += q.read_bytes;
        self.data.push(q);
    }

    // Summed elapsed time of the sub-queries of each phase.

    pub fn index_time(&self) -> f64 {
        self.index.iter().map(|q| q.time).sum()
    }

    pub fn data_time(&self) -> f64 {
        self.data.iter().map(|q| q.time).sum()
    }

    pub fn index_errors(&self) -> usize {
        self.index.iter().filter(|q| q.status == Status::Error).count()
    }

    pub fn data_errors(&self) -> usize {
        self.data.iter().filter(|q| q.status == Status::Error).count()
    }
}

/// Orderings for individual requests.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sort {
    #[default]
    QTime,
    RTime,
    ReadRows,
    IndexReadRows,
    DataReadRows,
    Queries,
}

impl Sort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sort::QTime => "qtime",
            Sort::RTime => "rtime",
            Sort::ReadRows => "read_rows",
            Sort::IndexReadRows => "index_read_rows",
            Sort::DataReadRows => "data_read_rows",
            Sort::Queries => "queries",
        }
    }

    pub fn strings() -> &'static [&'static str] {
        &[
            "qtime",
            "rtime",
            "read_rows",
            "index_read_rows",
            "data_read_rows",
            "queries",
        ]
    }
}

impl FromStr for Sort {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Sort> {
        Ok(match s {
            "qtime" => Sort::QTime,
            "rtime" => Sort::RTime,
            "read_rows" => Sort::ReadRows,
            "index_read_rows" => Sort::IndexReadRows,
            "data_read_rows" => Sort::DataReadRows,
            "queries" => Sort::Queries,
            _ => bail!("invalid sort {s}"),
        })
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// 502 and above are gateway-class failures; row counts of such requests are meaningless.
const STATUS_BAD_GATEWAY: i64 = 502;

fn any_failed(a: &Stat, b: &Stat) -> bool {
    a.request_status >= STATUS_BAD_GATEWAY || b.request_status >= STATUS_BAD_GATEWAY
}

// Points, then metrics, then query time.
fn less_by_points(a: &Stat, b: &Stat) -> bool {
    if a.points != b.points {
        return a.points < b.points;
    }
    if a.metrics != b.metrics {
        return a.metrics < b.metrics;
    }
    a.query_time < b.query_time
}

// Total rows, then data rows, then as less_by_points.
fn less_by_rows(a: &Stat, b: &Stat) -> bool {
    if a.read_rows != b.read_rows {
        return a.read_rows < b.read_rows;
    }
    if a.data_read_rows != b.data_read_rows {
        return a.data_read_rows < b.data_read_rows;
    }
    less_by_points(a, b)
}

fn less_by_phase_rows(a: &Stat, b: &Stat, rows: fn(&Stat) -> i64) -> bool {
    if rows(a) != rows(b) {
        return rows(a) < rows(b);
    }
    if a.read_rows != b.read_rows {
        return a.read_rows < b.read_rows;
    }
    less_by_points(a, b)
}

/// The "less than" predicate for ranking requests by `sort`.  This is not a total order: when
/// either request failed with a gateway error the rows-based orderings compare query time only.

pub fn less_stat(a: &Stat, b: &Stat, sort: Sort) -> bool {
    match sort {
        Sort::QTime => {
            if a.query_time == b.query_time {
                less_by_rows(a, b)
            } else {
                a.query_time < b.query_time
            }
        }
        Sort::RTime => {
            if a.request_time == b.request_time {
                less_by_rows(a, b)
            } else {
                a.request_time < b.request_time
            }
        }
        Sort::Queries => {
            if a.queries.len() != b.queries.len() {
                a.queries.len() < b.queries.len()
            } else if any_failed(a, b) {
                a.query_time < b.query_time
            } else {
                less_by_rows(a, b)
            }
        }
        Sort::IndexReadRows => {
            if any_failed(a, b) {
                a.query_time < b.query_time
            } else {
                less_by_phase_rows(a, b, |s| s.index_read_rows)
            }
        }
        Sort::DataReadRows => {
            if any_failed(a, b) {
                a.query_time < b.query_time
            } else {
                less_by_phase_rows(a, b, |s| s.data_read_rows)
            }
        }
        Sort::ReadRows => {
            if any_failed(a, b) {
                a.query_time < b.query_time
            } else {
                less_by_rows(a, b)
            }
        }
    }
}

#[cfg(test)]
fn completed(id: &str, status: i64, query_time: f64, index_rows: i64, data_rows: i64) -> Stat {
    Stat {
        id: id.to_string(),
        request_status: status,
        request_time: query_time,
        query_time,
        index_read_rows: index_rows,
        data_read_rows: data_rows,
        read_rows: index_rows + data_rows,
        ..Default::default()
    }
}

#[test]
fn test_reset() {
    let mut s = completed("x", 200, 1.5, 10, 20);
    s.metrics = 4;
    s.request_type = "render";
    s.wait_status = Status::Success;
    s.queries.push(Query {
        query: "test.a".to_string(),
        ..Default::default()
    });
    s.add_index(IndexStat {
        read_rows: 5,
        ..Default::default()
    });
    s.reset(17);
    assert!(s == Stat::new("x", 17));
    assert!(!s.is_complete());
}

#[test]
fn test_add_phases() {
    let mut s = Stat::new("x", 0);
    s.add_index(IndexStat {
        read_rows: 241436,
        read_bytes: 31416887,
        time: 0.25,
        ..Default::default()
    });
    s.add_data(DataStat {
        read_rows: 1228804,
        read_bytes: 164970948,
        time: 0.5,
        status: Status::Error,
        ..Default::default()
    });
    assert!(s.read_rows == s.index_read_rows + s.data_read_rows);
    assert!(s.read_bytes == 31416887 + 164970948);
    assert!(s.index_time() == 0.25);
    assert!(s.data_time() == 0.5);
    assert!(s.index_errors() == 0);
    assert!(s.data_errors() == 1);
}

#[test]
fn test_sort_names() {
    for name in Sort::strings() {
        let s = Sort::from_str(name).unwrap();
        assert!(s.to_string() == *name);
    }
    assert!(Sort::from_str("errors").is_err());
    assert!(Sort::default() == Sort::QTime);
    assert!(Status::Cached.to_string() == "C");
    assert!(Status::None.as_str() == " ");
}

#[test]
fn test_less_stat() {
    let a = completed("a", 200, 1.0, 1, 2);
    let b = completed("b", 200, 1.0, 2, 2);
    // Equal query time falls through to read rows
    assert!(less_stat(&a, &b, Sort::QTime));
    assert!(!less_stat(&b, &a, Sort::QTime));
    assert!(less_stat(&a, &b, Sort::IndexReadRows));
    // Equal data rows fall through to total rows
    assert!(less_stat(&a, &b, Sort::DataReadRows));

    // A gateway failure compares on query time only
    let c = completed("c", 504, 0.5, 100, 100);
    assert!(less_stat(&c, &a, Sort::ReadRows));
    assert!(!less_stat(&a, &c, Sort::ReadRows));
    assert!(less_stat(&c, &a, Sort::Queries));

    // The query count is the primary key for Queries
    let mut d = completed("d", 504, 0.1, 0, 0);
    d.queries.push(Query::default());
    assert!(less_stat(&a, &d, Sort::Queries));
}
