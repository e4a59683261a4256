/// `print`: stream the log and list every completed request that passes the filters.
///
/// All filters must pass for a request to be listed.  Completed requests are removed from the table
/// whether they are listed or not, so memory use is bounded by the number of requests in flight.
use crate::records;
use crate::{in_window, InputArgs, PrintArgs, PrintFilterArgs};

use anyhow::{bail, Result};
use chlog::{for_each_log_entry, open_log, Stat};
use std::collections::{HashMap, HashSet};
use std::io;
use tracing::debug;

pub fn print_requests(
    output: &mut dyn io::Write,
    input_args: &InputArgs,
    filter_args: &PrintFilterArgs,
    print_args: &PrintArgs,
) -> Result<()> {
    let filter = RequestFilter::new(filter_args)?;
    records::check_fmt(&print_args.fmt)?;
    let (from, until) = input_args.window();

    let mut input = open_log(input_args.input.as_deref())?;
    let mut queries = HashMap::new();
    let mut selected = vec![];
    for_each_log_entry(&mut input, &mut queries, |queries, id| {
        if let Some(s) = queries.remove(id) {
            if in_window(s.timestamp, from, until) && filter.accepts(&s) {
                selected.push(s);
            }
        }
        Ok(())
    })?;
    debug!(selected = selected.len(), incomplete = queries.len(), "Printing");

    records::print_records(output, &print_args.fmt, selected)
}

/// The record filters of `print`.  Absent thresholds do not filter.

#[derive(Debug, Default)]
pub struct RequestFilter {
    min_time: Option<f64>,
    min_read_rows: Option<i64>,
    min_index_read_rows: Option<i64>,
    min_data_read_rows: Option<i64>,
    status: HashSet<i64>,
    status_skip: HashSet<i64>,
}

impl RequestFilter {
    pub fn new(args: &PrintFilterArgs) -> Result<RequestFilter> {
        if !args.status.is_empty() && !args.status_skip.is_empty() {
            bail!("--status and --status-skip can't be used together")
        }
        Ok(RequestFilter {
            min_time: args.time,
            min_read_rows: args.read_rows,
            min_index_read_rows: args.i_read_rows,
            min_data_read_rows: args.d_read_rows,
            status: args.status.iter().copied().collect(),
            status_skip: args.status_skip.iter().copied().collect(),
        })
    }

    pub fn accepts(&self, s: &Stat) -> bool {
        if let Some(t) = self.min_time {
            if s.request_time <= t {
                return false;
            }
        }
        if let Some(n) = self.min_read_rows {
            if s.read_rows <= n {
                return false;
            }
        }
        if let Some(n) = self.min_index_read_rows {
            if s.index_read_rows < n {
                return false;
            }
        }
        if let Some(n) = self.min_data_read_rows {
            if s.data_read_rows < n {
                return false;
            }
        }
        if !self.status.is_empty() && !self.status.contains(&s.request_status) {
            return false;
        }
        !self.status_skip.contains(&s.request_status)
    }
}

#[cfg(test)]
fn request(status: i64, request_time: f64, index_read_rows: i64, data_read_rows: i64) -> Stat {
    Stat {
        request_status: status,
        request_time,
        index_read_rows,
        data_read_rows,
        read_rows: index_read_rows + data_read_rows,
        ..Default::default()
    }
}

#[test]
fn test_filter_validation() {
    let args = PrintFilterArgs {
        status: vec![200],
        status_skip: vec![500],
        ..Default::default()
    };
    assert!(RequestFilter::new(&args).is_err());

    // The conflict is reported before the input is opened
    let input_args = InputArgs {
        input: Some("../tests/chlog/no-such-file.log".to_string()),
        ..Default::default()
    };
    let err = print_requests(&mut Vec::new(), &input_args, &args, &PrintArgs::default())
        .unwrap_err()
        .to_string();
    assert!(err.contains("--status-skip"));
}

#[test]
fn test_filter_thresholds() {
    let filter = RequestFilter::new(&PrintFilterArgs {
        time: Some(1.0),
        ..Default::default()
    })
    .unwrap();
    assert!(!filter.accepts(&request(200, 1.0, 0, 0)));
    assert!(filter.accepts(&request(200, 1.5, 0, 0)));

    let filter = RequestFilter::new(&PrintFilterArgs {
        read_rows: Some(10),
        i_read_rows: Some(4),
        d_read_rows: Some(6),
        ..Default::default()
    })
    .unwrap();
    // read_rows is strict, the per-phase thresholds are not
    assert!(!filter.accepts(&request(200, 0.0, 4, 6)));
    assert!(filter.accepts(&request(200, 0.0, 5, 6)));
    assert!(!filter.accepts(&request(200, 0.0, 3, 10)));
    assert!(!filter.accepts(&request(200, 0.0, 10, 5)));

    assert!(RequestFilter::default().accepts(&request(200, 0.0, 0, 0)));
}

#[test]
fn test_filter_status() {
    let filter = RequestFilter::new(&PrintFilterArgs {
        status: vec![200, 404],
        ..Default::default()
    })
    .unwrap();
    assert!(filter.accepts(&request(404, 0.0, 0, 0)));
    assert!(!filter.accepts(&request(502, 0.0, 0, 0)));

    let filter = RequestFilter::new(&PrintFilterArgs {
        status_skip: vec![200],
        ..Default::default()
    })
    .unwrap();
    assert!(!filter.accepts(&request(200, 0.0, 0, 0)));
    assert!(filter.accepts(&request(502, 0.0, 0, 0)));
}

#[test]
fn test_print_requests() {
    let input_args = InputArgs {
        input: Some("../tests/chlog/render.log".to_string()),
        ..Default::default()
    };
    let print_args = PrintArgs {
        fmt: Some("id,status,read_rows,csv".to_string()),
    };
    let mut out = Vec::new();
    print_requests(&mut out, &input_args, &PrintFilterArgs::default(), &print_args).unwrap();
    assert!(String::from_utf8(out).unwrap() == "1f72e822bed05bebd97a9bdcc4654f1a,200,1435k\n");

    // The request took 0.48s
    let slow = PrintFilterArgs {
        time: Some(1.0),
        ..Default::default()
    };
    let mut out = Vec::new();
    print_requests(&mut out, &input_args, &slow, &print_args).unwrap();
    assert!(out.is_empty());

    // Outside the window: the request completed at 2023-01-21T08:05:43.773Z
    let late = InputArgs {
        input: input_args.input.clone(),
        from: Some(rustutils::parse_utc_time("2023-01-21T08:05:44").unwrap()),
        ..Default::default()
    };
    let mut out = Vec::new();
    print_requests(&mut out, &late, &PrintFilterArgs::default(), &print_args).unwrap();
    assert!(out.is_empty());
}
