/// Reader for graphite-clickhouse log files.
///
/// A log file is newline-delimited JSON, one object per line.  Lines that are not JSON objects are
/// counted and dropped: the server writes other noise to the same stream on occasion and a log that
/// is being appended to may end in a partial line.  I/O errors are propagated.
use crate::logentry::process_log_entry;
use crate::stat::Stat;

use anyhow::Result;
use rustutils::JsonObject;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use tracing::{debug, trace};

/// Counters for one pass over the input.

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadStats {
    pub lines: usize,
    pub discarded: usize,
    pub completed: usize,
}

/// Open the named log file, or stdin if `file_name` is None or "-".

pub fn open_log(file_name: Option<&str>) -> Result<Box<dyn BufRead>> {
    match file_name {
        None | Some("-") => Ok(Box::new(BufReader::new(io::stdin()))),
        Some(name) => Ok(Box::new(BufReader::new(File::open(name)?))),
    }
}

/// Feed every record of `input` through the reducer into `queries`.  After each record that
/// completes a request, `on_complete` is called with the table and the id of the completed request;
/// it is free to remove the record from the table.

pub fn for_each_log_entry<R, F>(
    input: &mut R,
    queries: &mut HashMap<String, Stat>,
    mut on_complete: F,
) -> Result<ReadStats>
where
    R: BufRead + ?Sized,
    F: FnMut(&mut HashMap<String, Stat>, &str) -> Result<()>,
{
    let mut stats = ReadStats::default();
    let mut buf = Vec::with_capacity(4096);
    loop {
        buf.clear();
        if input.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = trim_line(&buf);
        if line.is_empty() {
            continue;
        }
        stats.lines += 1;
        let entry = match serde_json::from_slice::<JsonObject>(line) {
            Ok(e) => e,
            Err(e) => {
                trace!("Discarding line {}: {e}", stats.lines);
                stats.discarded += 1;
                continue;
            }
        };
        if let Some(id) = process_log_entry(&entry, queries) {
            stats.completed += 1;
            on_complete(queries, &id)?;
        }
    }
    debug!(
        lines = stats.lines,
        discarded = stats.discarded,
        completed = stats.completed,
        pending = queries.len(),
        "End of input"
    );
    Ok(stats)
}

fn trim_line(mut line: &[u8]) -> &[u8] {
    while let [rest @ .., b'\n' | b'\r'] = line {
        line = rest;
    }
    line
}

/// Read the named file to the end and return the table of records, complete and incomplete.

pub fn read_log_file(file_name: &str) -> Result<(HashMap<String, Stat>, ReadStats)> {
    let mut input = open_log(Some(file_name))?;
    let mut queries = HashMap::new();
    let stats = for_each_log_entry(&mut input, &mut queries, |_, _| Ok(()))?;
    Ok((queries, stats))
}

#[cfg(test)]
use crate::stat::{DataStat, IndexStat, Query, Status};
#[cfg(test)]
use ustr::Ustr;

#[cfg(test)]
fn read_one(name: &str) -> Stat {
    let (mut queries, stats) = read_log_file(&format!("../tests/chlog/{name}.log")).unwrap();
    assert!(stats.discarded == 0);
    assert!(stats.completed == 1);
    assert!(queries.len() == 1);
    let (_, s) = queries.drain().next().unwrap();
    s
}

#[test]
fn test_render() {
    let id = "1f72e822bed05bebd97a9bdcc4654f1a";
    let want = Stat {
        id: id.to_string(),
        timestamp: 1674288343773000000,
        queries: vec![Query {
            query: "test.a".to_string(),
            days: 1,
            from: 1674288223,
            until: 1674288343,
        }],
        metrics: 1,
        points: 4,
        bytes: 148,
        request_type: "render",
        request_time: 0.482252576,
        request_status: 200,
        wait_time: 0.0,
        wait_status: Status::Success,
        query_time: 0.482252576,
        read_rows: 241436 + 1228804,
        read_bytes: 31416887 + 164970948,
        index_read_rows: 241436,
        index_read_bytes: 31416887,
        index: vec![IndexStat {
            status: Status::Success,
            time: 0.219432977,
            read_rows: 241436,
            read_bytes: 31416887,
            table: Ustr::from("graphite_indexd"),
            query_id: format!("{id}::1390f060ca3d959d"),
            days: 1,
            error: "".to_string(),
        }],
        data_read_rows: 1228804,
        data_read_bytes: 164970948,
        data: vec![DataStat {
            status: Status::Success,
            time: 0.261669254,
            read_rows: 1228804,
            read_bytes: 164970948,
            table: Ustr::from("graphite_reversed"),
            query_id: format!("{id}::1b87069be1c53ee2"),
            days: 1,
            from: 1674288230,
            until: 1674288349,
            error: "".to_string(),
        }],
    };
    assert!(read_one("render") == want);
}

#[test]
fn test_render_cached() {
    let s = read_one("render_cached");
    assert!(s.timestamp == 1674288350374000000);
    assert!(s.metrics == 1);
    assert!(s.points == 5 && s.bytes == 160);
    assert!(s.request_type == "render");
    assert!(s.queries.len() == 1 && s.queries[0].days == 1);
    assert!(
        s.index
            == vec![IndexStat {
                status: Status::Cached,
                days: 1,
                ..Default::default()
            }]
    );
    assert!(s.index_read_rows == 0);
    assert!(s.data.len() == 1);
    assert!(s.data[0].until == 1674288359);
    assert!(s.read_rows == 1228804 && s.data_read_bytes == 164245923);
}

#[test]
fn test_render_cached_mixed() {
    let s = read_one("render_cached_mixed");
    assert!(s.timestamp == 1674293950263000000);
    assert!(s.metrics == 2);
    assert!(s.points == 1 && s.bytes == 112);
    assert!(s.queries.iter().map(|q| q.query.as_str()).collect::<Vec<&str>>() == vec!["test.a", "test.b"]);
    assert!(s.index.len() == 2);
    assert!(s.index[0].status == Status::Cached && s.index[0].days == 1);
    assert!(s.index[1].status == Status::Success);
    assert!(s.index[1].table == "graphite_indexd");
    assert!(s.index[1].read_rows == 40960 && s.index[1].days == 1);
    assert!(s.index_read_rows == 40960);
    assert!(s.read_rows == 40960 + 884740);
    assert!(s.read_bytes == 3442149 + 120051188);
    assert!(s.data[0].from == 1674293830 && s.data[0].days == 1);
}

#[test]
fn test_metrics_find() {
    let s = read_one("metrics_find");
    assert!(s.request_type == "metrics_find");
    assert!(s.timestamp == 1674288380528000000);
    assert!(
        s.queries
            == vec![Query {
                query: "test.c*".to_string(),
                ..Default::default()
            }]
    );
    assert!(s.metrics == 6);
    assert!(s.wait_status == Status::Success);
    assert!(s.index.len() == 1);
    assert!(s.index[0].table == "graphite_indexd");
    assert!(s.index[0].days == 0);
    assert!(s.index[0].read_rows == 413049 && s.index[0].read_bytes == 24262486);
    assert!(s.index[0].time == 0.174105795);
    assert!(s.data.is_empty() && s.data_read_rows == 0);
    assert!(s.query_time == 0.174497662);
}

#[test]
fn test_metrics_find_cached() {
    let s = read_one("metrics_find_cached");
    assert!(s.request_type == "metrics_find");
    assert!(s.timestamp == 1674288385761000000);
    assert!(s.queries.len() == 1 && s.queries[0].query == "test.c*");
    assert!(s.metrics == 6);
    assert!(
        s.index
            == vec![IndexStat {
                status: Status::Cached,
                ..Default::default()
            }]
    );
    assert!(s.read_rows == 0);
}

#[test]
fn test_tag_names() {
    let s = read_one("tag_names");
    assert!(s.request_type == "tag_names");
    assert!(s.timestamp == 1674288424355000000);
    assert!(s.queries.len() == 1 && s.queries[0].query == "tagPrefix='c' expr='app=chproxy'");
    // The cache line of a tag request is not a finder line
    assert!(s.metrics == 0);
    assert!(s.index.len() == 1);
    assert!(s.index[0].table == "graphite_tagsd");
    assert!(s.index[0].days == 0);
    assert!(s.index_read_rows == 404694 && s.index_read_bytes == 160109507);
}

#[test]
fn test_tag_names_cached() {
    let s = read_one("tag_names_cached");
    assert!(s.timestamp == 1674288431665000000);
    assert!(s.queries[0].query == "tagPrefix='c' expr='app=chproxy'");
    assert!(s.metrics == 5);
    assert!(s.index.len() == 1 && s.index[0].status == Status::Cached);
}

#[test]
fn test_tag_values() {
    let s = read_one("tag_values");
    assert!(s.request_type == "tag_values");
    assert!(s.timestamp == 1674305969233000000);
    assert!(s.queries.len() == 1 && s.queries[0].query == "tag='c' expr='app=chproxy'");
    assert!(s.metrics == 71);
    assert!(s.index.len() == 1);
    assert!(s.index[0].table == "graphite_tagsd");
    assert!(s.index[0].query_id == "d7f506acefdc194c10a30cebabdfae06::da2dc89e6ac4b9ae");
    assert!(s.read_rows == 362995);
}

#[test]
fn test_tag_values_cached() {
    let s = read_one("tag_values_cached");
    assert!(s.timestamp == 1674288649693000000);
    assert!(s.queries[0].query == "tag='c' expr='app=chproxy'");
    assert!(s.metrics == 71);
    assert!(s.index.len() == 1 && s.index[0].status == Status::Cached);
}

#[test]
fn test_interleaved_and_garbage() {
    let input = [
        r#"{"level":"INFO","timestamp":"2023-01-21T13:06:25.761+0500","logger":"metrics-find","message":"finder","request_id":"a","get_cache":"1970-02-12;query=test.c*;ts=1674288000","metrics":6,"find_cached":true,"ttl":600}"#,
        "this is not json",
        r#"{"level":"INFO","timestamp":"2023-01-21T13:06:25.762+0500","logger":"metrics-find","message":"finder","request_id":"b","get_cache":"1970-02-12;query=test.d*;ts=1674288000","metrics":3,"find_cached":true,"ttl":600}"#,
        "",
        r#"{"level":"INFO","timestamp":"2023-01-21T13:06:25.763+0500","logger":"http","message":"access","request_id":"a","time":0.1,"wait_slot":0,"wait_fail":false,"url":"/metrics/find/?query=test.c%2A","status":200}"#,
        r#"[1,2,3]"#,
        r#"{"level":"INFO","timestamp":"2023-01-21T13:06:25.7"#,
    ]
    .join("\r\n");
    let mut queries = HashMap::new();
    let mut seen = vec![];
    let stats = for_each_log_entry(&mut input.as_bytes(), &mut queries, |q, id| {
        seen.push(id.to_string());
        q.remove(id);
        Ok(())
    })
    .unwrap();
    assert!(seen == vec!["a".to_string()]);
    assert!(stats.lines == 6);
    assert!(stats.discarded == 3);
    assert!(stats.completed == 1);
    assert!(queries.len() == 1);
    assert!(queries["b"].metrics == 3);
}

#[test]
fn test_missing_file() {
    assert!(read_log_file("../tests/chlog/no-such-file.log").is_err());
}
