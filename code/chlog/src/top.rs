/// Selection of the heaviest requests from the table of in-flight and completed records.
use crate::stat::{less_stat, Sort, Stat};

use rustutils::stable_sort_by_less;
use std::collections::HashMap;
use tracing::debug;

/// Return the `n` largest requests according to `sort`, in ascending order (the largest last).
///
/// Only completed requests are considered unless `include_incomplete` is set.  A nonzero `from`
/// excludes requests whose timestamp is earlier, a nonzero `until` excludes requests whose timestamp
/// is not earlier; both are nanoseconds since the epoch.
///
/// With `cleanup` set, every completed request is removed from the table whether it was in the
/// window or not, and the selected records are moved out rather than copied.  Incomplete records
/// are never removed.

pub fn get_top(
    queries: &mut HashMap<String, Stat>,
    n: usize,
    sort: Sort,
    from: i64,
    until: i64,
    include_incomplete: bool,
    cleanup: bool,
) -> Vec<Stat> {
    let in_window =
        |s: &Stat| !(from > 0 && s.timestamp < from) && !(until > 0 && s.timestamp >= until);

    let before = queries.len();
    let mut stats = Vec::with_capacity(queries.len());
    queries.retain(|_, s| {
        if !s.is_complete() {
            if include_incomplete && in_window(s) {
                stats.push(s.clone());
            }
            return true;
        }
        if in_window(s) {
            stats.push(if cleanup { std::mem::take(s) } else { s.clone() });
        }
        !cleanup
    });
    if cleanup {
        debug!(removed = before - queries.len(), remaining = queries.len(), "Cleaned up");
    }

    // Table order is arbitrary, records that tie on `sort` stay in id order
    stats.sort_by(|a, b| a.id.cmp(&b.id));
    stable_sort_by_less(&mut stats, |a, b| less_stat(a, b, sort));
    if n < stats.len() {
        stats.drain(..stats.len() - n);
    }
    stats
}

#[cfg(test)]
fn mk(
    id: &str,
    status: i64,
    request_time: f64,
    query_time: f64,
    index_read_rows: i64,
    data_read_rows: i64,
) -> Stat {
    Stat {
        id: id.to_string(),
        request_status: status,
        request_time,
        query_time,
        index_read_rows,
        data_read_rows,
        read_rows: index_read_rows + data_read_rows,
        ..Default::default()
    }
}

#[cfg(test)]
fn table(stats: Vec<Stat>) -> HashMap<String, Stat> {
    stats.into_iter().map(|s| (s.id.clone(), s)).collect()
}

#[cfg(test)]
fn ids(stats: &[Stat]) -> Vec<&str> {
    stats.iter().map(|s| s.id.as_str()).collect()
}

#[cfg(test)]
fn sample_table() -> HashMap<String, Stat> {
    table(vec![
        mk("1", 200, 1.0, 1.0, 2, 3),
        mk("_2", 200, 2.0, 2.0, 1, 2),
        mk("3", 200, 2.0, 2.0, 2, 2),
        mk("4", 200, 3.0, 3.0, 2, 2),
        mk("5", 504, 30.0, 30.0, 0, 0),
        // Not complete
        mk("6", 0, 0.0, 0.0, 2, 0),
    ])
}

#[test]
fn test_top_by_time() {
    let mut queries = sample_table();
    let top = get_top(&mut queries, 4, Sort::QTime, 0, 0, false, false);
    assert!(ids(&top) == vec!["_2", "3", "4", "5"]);
    assert!(top[0] == mk("_2", 200, 2.0, 2.0, 1, 2));
    assert!(queries.len() == 6);
}

#[test]
fn test_top_by_read_rows() {
    let mut queries = sample_table();
    let top = get_top(&mut queries, 6, Sort::ReadRows, 0, 0, false, false);
    assert!(ids(&top) == vec!["_2", "3", "4", "1", "5"]);
}

#[test]
fn test_top_by_index_read_rows() {
    let mut s3 = mk("3", 200, 0.03, 0.0, 2, 1);
    s3.points = 1024;
    let mut s5 = mk("5", 200, 0.04, 0.0, 2, 1);
    s5.points = 1;
    let mut queries = table(vec![
        mk("1", 200, 1.0, 0.0, 3, 1),
        mk("_2", 200, 0.01, 0.0, 1, 1),
        s3,
        mk("4", 504, 30.0, 30.0, 0, 0),
        s5,
        mk("6", 0, 0.0, 0.0, 2, 0),
    ]);
    let top = get_top(&mut queries, 4, Sort::IndexReadRows, 0, 0, false, false);
    assert!(ids(&top) == vec!["5", "3", "1", "4"]);
}

#[test]
fn test_top_by_data_read_rows() {
    let with = |mut s: Stat, metrics: i64, points: i64| {
        s.metrics = metrics;
        s.points = points;
        s
    };
    let mut queries = table(vec![
        with(mk("1", 200, 1.0, 1.0, 3, 1), 2, 1),
        with(mk("_2", 200, 0.01, 0.01, 1, 1), 1, 1),
        with(mk("3", 200, 0.03, 0.03, 2, 2), 0, 1024),
        mk("4", 504, 30.0, 30.0, 0, 0),
        with(mk("5", 200, 0.04, 0.04, 2, 1), 1, 1),
        mk("6", 0, 0.0, 0.0, 2, 0),
    ]);
    let top = get_top(&mut queries, 4, Sort::DataReadRows, 0, 0, false, false);
    assert!(ids(&top) == vec!["5", "1", "3", "4"]);
}

#[test]
fn test_top_window() {
    let mut s1 = mk("1", 504, 30.0, 30.0, 0, 0);
    s1.timestamp = 1674886960 * 1_000_000_000;
    let mut s2 = mk("2", 504, 30.0, 30.0, 0, 0);
    s2.timestamp = 1674886980 * 1_000_000_000;
    let mut queries = table(vec![s1, s2]);
    let from = 1674886980 * 1_000_000_000;
    let until = 1674887060 * 1_000_000_000;
    let top = get_top(&mut queries, 4, Sort::DataReadRows, from, until, false, false);
    assert!(ids(&top) == vec!["2"]);

    // The upper bound is exclusive
    let top = get_top(&mut queries, 4, Sort::DataReadRows, 0, 1674886980 * 1_000_000_000, false, false);
    assert!(ids(&top) == vec!["1"]);
}

#[test]
fn test_top_include_incomplete() {
    let mut queries = sample_table();
    let top = get_top(&mut queries, 10, Sort::ReadRows, 0, 0, true, false);
    assert!(top.len() == 6);
    assert!(top.iter().any(|s| s.id == "6"));
    // Gateway failures still compare on query time, and 5 has the longest
    assert!(top[5].id == "5");
}

#[test]
fn test_top_cleanup() {
    let mut queries = sample_table();
    queries.get_mut("1").unwrap().timestamp = 100;
    let top = get_top(&mut queries, 2, Sort::QTime, 0, 50, false, true);
    // Out of the window but complete: removed all the same
    assert!(ids(&top) == vec!["4", "5"]);
    assert!(queries.len() == 1);
    assert!(queries.contains_key("6"));

    let top = get_top(&mut queries, 2, Sort::QTime, 0, 0, true, true);
    assert!(ids(&top) == vec!["6"]);
    assert!(queries.len() == 1);
}

#[test]
fn test_top_ties_in_id_order() {
    for _ in 0..5 {
        let mut queries = table(vec![
            mk("d", 200, 1.0, 1.0, 2, 2),
            mk("b", 200, 1.0, 1.0, 2, 2),
            mk("a", 200, 1.0, 1.0, 2, 2),
            mk("c", 200, 1.0, 1.0, 2, 2),
        ]);
        let stats = get_top(&mut queries, 3, Sort::QTime, 0, 0, false, false);
        assert!(ids(&stats) == vec!["b", "c", "d"]);
    }
}
