/// Fold log records into per-request Stat records.
///
/// A graphite-clickhouse request produces a handful of log lines that share a `request_id`: the
/// parsed targets, one line per clickhouse query (index or data), finder cache lines, a data_parse
/// line, and finally the `http`/`access` line.  Lines for different requests are interleaved, and
/// the access line may never come.  The table maps request ids to partial records; it is owned by
/// the caller, who removes a record once it is reported complete.
///
/// Request ids are recycled by the server.  When a line arrives for an id more than LEAK_WINDOW
/// after the previous line for that id, or earlier than it, the old record was leaked and it is
/// reset before the line is applied.
///
/// Records are best-effort: a line without the correlation fields or with a bad timestamp is
/// dropped, and any other missing or mistyped field reads as zero or empty.
use crate::stat::{DataStat, IndexStat, Query, Stat, Status};

use chrono::NaiveDate;
use rustutils::{
    days_between, grab_bool, grab_f64, grab_i64, grab_str, parse_date, parse_log_timestamp,
    timestamp_nanos, JsonObject, NANOS_PER_SEC, SECS_PER_DAY,
};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, trace};
use ustr::Ustr;

pub const LEAK_WINDOW: i64 = 240 * NANOS_PER_SEC;

const INDEX_QUERY_PREFIX: &str = "SELECT Path FROM ";
const METRICS_FIND_CACHE_PREFIX: &str = "1970-02-12;query=";

/// Apply one decoded log record to the table.  Returns the request id if the record completed the
/// request (it was the access line), otherwise None.

pub fn process_log_entry(entry: &JsonObject, queries: &mut HashMap<String, Stat>) -> Option<String> {
    let (request_id, timestamp, level, logger, message) = match (
        grab_str(entry, "request_id"),
        grab_str(entry, "timestamp"),
        grab_str(entry, "level"),
        grab_str(entry, "logger"),
        grab_str(entry, "message"),
    ) {
        (Ok(a), Ok(b), Ok(c), Ok(d), Ok(e)) => (a, b, c, d, e),
        _ => {
            trace!("Dropping record without correlation fields");
            return None;
        }
    };

    let time = match parse_log_timestamp(timestamp) {
        Ok(t) => t,
        Err(e) => {
            debug!(request_id, timestamp, "Dropping record with bad timestamp: {e}");
            return None;
        }
    };
    let Some(ts) = timestamp_nanos(&time) else {
        debug!(request_id, timestamp, "Dropping record with bad timestamp: out of range");
        return None;
    };

    let stat = queries
        .entry(request_id.to_string())
        .or_insert_with(|| Stat::new(request_id, ts));
    if ts > stat.timestamp + LEAK_WINDOW || ts < stat.timestamp {
        debug!(request_id, "Leaked record, resetting");
        stat.reset(ts);
    } else {
        stat.timestamp = ts;
    }

    let mut completed = false;
    if message == "query" {
        if let Ok(query) = grab_str(entry, "query") {
            match logger {
                "metrics-find" => {
                    let mut q = index_stat(entry, level);
                    q.table = table_after_from(query);
                    stat.add_index(q);
                }
                "autocomplete" => {
                    let mut q = index_stat(entry, level);
                    q.table = table_after_from(query);
                    let start = query.find(" FROM ").unwrap_or(0);
                    match date_range(&query[start..]) {
                        Some((from, Some(until))) => q.days = days_between(from, until),
                        // Old query format, without an end date
                        Some((from, None)) => q.days = days_between(from, time.date_naive()),
                        None => {}
                    }
                    stat.add_index(q);
                }
                "render" => {
                    if let Some(rest) = query.strip_prefix(INDEX_QUERY_PREFIX) {
                        let mut q = index_stat(entry, level);
                        q.table = first_word(rest);
                        if let Some((from, Some(until))) = date_range(rest) {
                            q.days = days_between(from, until) + 1;
                        }
                        stat.add_index(q);
                    } else {
                        stat.add_data(data_stat(entry, level, query));
                    }
                }
                _ => {}
            }
        }
    } else if level == "INFO" {
        match (logger, message) {
            ("render.pb3parser", "pb3_target")
            | ("render.json_parser", "json_target")
            | ("render.form_parser", "target") => {
                if let Ok(target) = grab_str(entry, "target") {
                    let from = grab_i64(entry, "from").unwrap_or(0);
                    let until = grab_i64(entry, "until").unwrap_or(0);
                    stat.queries.push(Query {
                        days: span_days(from, until),
                        query: target.to_string(),
                        from,
                        until,
                    });
                }
            }
            ("render" | "metrics-find" | "autocomplete", "finder") => {
                if let (Ok(cached), true) =
                    (grab_bool(entry, "find_cached"), entry.contains_key("ttl"))
                {
                    stat.metrics += grab_i64(entry, "metrics").unwrap_or(0);
                    let cache_key = if cached { "get_cache" } else { "set_cache" };
                    if let Some(query) = grab_str(entry, cache_key)
                        .ok()
                        .and_then(metrics_find_cache_query)
                    {
                        stat.queries.push(Query {
                            query: query.to_string(),
                            ..Default::default()
                        });
                    }
                    if cached {
                        let from = grab_i64(entry, "from").unwrap_or(0);
                        let until = grab_i64(entry, "until").unwrap_or(0);
                        stat.add_index(IndexStat {
                            status: Status::Cached,
                            days: span_days(from, until),
                            ..Default::default()
                        });
                    }
                }
            }
            ("render", "data_parse") => {
                stat.points = grab_i64(entry, "read_points").unwrap_or(0);
                stat.bytes = grab_i64(entry, "read_bytes").unwrap_or(0);
            }
            ("http", "access") => {
                completed = true;
                apply_access(entry, stat);
            }
            _ => {}
        }
    }

    if completed {
        Some(request_id.to_string())
    } else {
        None
    }
}

fn apply_access(entry: &JsonObject, stat: &mut Stat) {
    stat.request_status = grab_i64(entry, "status").unwrap_or(0);
    stat.request_time = grab_f64(entry, "time").unwrap_or(0.0);
    stat.wait_time = grab_f64(entry, "wait_slot").unwrap_or(0.0);
    stat.query_time = stat.request_time - stat.wait_time;
    match grab_bool(entry, "wait_fail") {
        Ok(true) => stat.wait_status = Status::Error,
        Ok(false) => stat.wait_status = Status::Success,
        Err(_) => {}
    }

    let url = grab_str(entry, "url").unwrap_or("");
    if url.starts_with("/render/?") {
        stat.request_type = "render";
    } else if url.starts_with("/metrics/find/?") {
        stat.request_type = "metrics_find";
    } else if let Some(params) = url.strip_prefix("/tags/autoComplete/values?") {
        stat.request_type = "tag_values";
        stat.queries = vec![Query {
            query: tag_query(params.split('&')),
            ..Default::default()
        }];
    } else if let Some(params) = url.strip_prefix("/tags/autoComplete/tags?") {
        stat.request_type = "tag_names";
        stat.queries = vec![Query {
            query: tag_query(params.split('&')),
            ..Default::default()
        }];
    }
}

// Days touched by a [from, until] range of epoch seconds, zero if either bound is unknown.
fn span_days(from: i64, until: i64) -> i64 {
    if from > 0 && until > 0 {
        (until - from) / SECS_PER_DAY + 1
    } else {
        0
    }
}

// Status, identity and counters common to every clickhouse query line.
fn sub_query(entry: &JsonObject, level: &str) -> (Status, String, String, i64, i64, f64) {
    let (status, error) = if level == "ERROR" {
        (Status::Error, read_error(entry, "error"))
    } else {
        (Status::Success, "".to_string())
    };
    (
        status,
        error,
        grab_str(entry, "query_id").unwrap_or("").to_string(),
        grab_i64(entry, "read_rows").unwrap_or(0),
        grab_i64(entry, "read_bytes").unwrap_or(0),
        grab_f64(entry, "time").unwrap_or(0.0),
    )
}

fn index_stat(entry: &JsonObject, level: &str) -> IndexStat {
    let (status, error, query_id, read_rows, read_bytes, time) = sub_query(entry, level);
    IndexStat {
        status,
        read_rows,
        read_bytes,
        time,
        query_id,
        error,
        ..Default::default()
    }
}

// The time condition of a data query reads `AND (Time >= FROM AND Time <= UNTIL)`.
fn data_stat(entry: &JsonObject, level: &str, query: &str) -> DataStat {
    let (status, error, query_id, read_rows, read_bytes, time) = sub_query(entry, level);
    let mut q = DataStat {
        status,
        read_rows,
        read_bytes,
        time,
        table: table_after_from(query),
        query_id,
        error,
        ..Default::default()
    };
    if let Some(start) = query.find("AND (Time >= ").filter(|&p| p > 0) {
        let t = &query[start + 13..];
        if let Some(end) = t.find(' ').filter(|&p| p > 0) {
            q.from = i64::from_str(&t[..end]).unwrap_or(0);
            if let Some(start) = t.find("AND Time <= ").filter(|&p| p > 0) {
                let t = &t[start + 12..];
                if let Some(end) = t.find(')').filter(|&p| p > 0) {
                    q.until = i64::from_str(&t[..end]).unwrap_or(0);
                    if q.from > 0 && q.until > 0 {
                        q.days = (q.until - q.from)
                            .checked_add(1)
                            .map_or(0, |span| span / SECS_PER_DAY + 1);
                    }
                }
            }
        }
    }
    q
}

fn first_word(t: &str) -> Ustr {
    match t.find(' ') {
        Some(end) if end > 0 => Ustr::from(&t[..end]),
        _ => Ustr::from(""),
    }
}

fn table_after_from(query: &str) -> Ustr {
    match query.find(" FROM ") {
        Some(start) if start > 0 => first_word(&query[start + 6..]),
        _ => Ustr::from(""),
    }
}

// A date on the form 'YYYY-MM-DD', including the quotes, at the start of `t` after blanks.
fn quoted_date(t: &str) -> Option<(NaiveDate, &str)> {
    let t = t.trim_start_matches(' ');
    let b = t.as_bytes();
    if b.len() >= 12 && b[0] == b'\'' && b[11] == b'\'' {
        let date = parse_date(t.get(1..11)?).ok()?;
        Some((date, &t[11..]))
    } else {
        None
    }
}

// The dates of `) AND (Date >='FROM' AND Date <= 'UNTIL'`.  The until date is None if the query
// has no upper bound on the date; the result is None if the clause is missing or malformed.
fn date_range(query: &str) -> Option<(NaiveDate, Option<NaiveDate>)> {
    let start = query.find(") AND (Date >=").filter(|&p| p > 0)?;
    let (from, rest) = quoted_date(&query[start + 14..])?;
    match rest.find(" AND Date <=") {
        Some(end) if end > 0 => {
            let (until, _) = quoted_date(&rest[end + 12..])?;
            Some((from, Some(until)))
        }
        _ => Some((from, None)),
    }
}

/// Collapse transport error messages into a small set of classes; anything else is cut to 20
/// characters.

pub fn strip_error(err: &str) -> String {
    if err.contains(" lookup ") {
        return "address lookup error".to_string();
    }
    if err.ends_with(": connection refused") {
        return "connection refused".to_string();
    }
    if err.ends_with(": broken pipe")
        || err.ends_with(": connection reset by peer")
        || err.ends_with("EOF")
    {
        return "connection reset".to_string();
    }
    if err.contains(": context canceled") {
        return "context canceled".to_string();
    }
    err.chars().take(20).collect::<String>()
}

/// The error text of a record.  A "cannot reach" message keeps the text from that phrase up to the
/// first `;`.

pub fn read_error(entry: &JsonObject, key: &str) -> String {
    match grab_str(entry, key) {
        Ok(v) => {
            if let Some(start) = v.find(" cannot reach ") {
                let err = &v[start + 1..];
                match err.find(';') {
                    Some(end) if end > 0 => err[..end].to_string(),
                    _ => err.to_string(),
                }
            } else {
                strip_error(v)
            }
        }
        Err(_) => "".to_string(),
    }
}

// None if `v` has a `%` that does not start a two-digit hex escape, or does not decode to UTF-8.
fn decode_param(v: &str) -> Option<String> {
    let b = v.as_bytes();
    let hex = |i: usize| b.get(i).is_some_and(u8::is_ascii_hexdigit);
    if b.iter().enumerate().any(|(i, &c)| c == b'%' && !(hex(i + 1) && hex(i + 2))) {
        return None;
    }
    urlencoding::decode(&v.replace('+', " "))
        .ok()
        .map(|s| s.into_owned())
}

/// Canonical text for the parameters of a tag autocomplete request, so that equivalent requests
/// group together: `limit` is kept as is, `expr`, `tag`, `tagPrefix` and `valuePrefix` become
/// `name='value'` with the value decoded and a `key = value` inside it tightened to `key=value`.
/// Other parameters, and parameters with an empty name or value, are dropped.

pub fn tag_query<'a>(params: impl Iterator<Item = &'a str>) -> String {
    let mut sb = String::with_capacity(128);
    for param in params {
        let (k, v) = param.split_once('=').unwrap_or((param, ""));
        if k.is_empty() || v.is_empty() {
            continue;
        }
        match k {
            "limit" => {
                if !sb.is_empty() {
                    sb.push(' ');
                }
                sb.push_str(param);
            }
            "expr" | "tag" | "tagPrefix" | "valuePrefix" => {
                if !sb.is_empty() {
                    sb.push(' ');
                }
                if let Some(p) = decode_param(v) {
                    sb.push_str(k);
                    sb.push_str("='");
                    if let Some((ek, ev)) = p.split_once('=') {
                        sb.push_str(ek.trim());
                        sb.push('=');
                        sb.push_str(ev.trim());
                    } else {
                        sb.push_str(&p);
                    }
                    sb.push('\'');
                } else {
                    sb.push_str(param);
                }
            }
            _ => {}
        }
    }
    sb
}

/// The query of a metrics-find cache key `1970-02-12;query=QUERY;ts=N`.

pub fn metrics_find_cache_query(cache_key: &str) -> Option<&str> {
    cache_key
        .strip_prefix(METRICS_FIND_CACHE_PREFIX)?
        .split_once(";ts=")
        .map(|(query, _)| query)
}

#[cfg(test)]
fn parse_entry(line: &str) -> JsonObject {
    match serde_json::from_str::<serde_json::Value>(line).unwrap() {
        serde_json::Value::Object(m) => m,
        _ => panic!("Not an object"),
    }
}

#[cfg(test)]
fn feed(lines: &[&str]) -> (HashMap<String, Stat>, Vec<String>) {
    let mut queries = HashMap::new();
    let mut completed = vec![];
    for line in lines {
        if let Some(id) = process_log_entry(&parse_entry(line), &mut queries) {
            completed.push(id);
        }
    }
    (queries, completed)
}

#[test]
fn test_strip_error() {
    assert!(strip_error("dial tcp: lookup ch1 on 127.0.0.1:53: no such host") == "address lookup error");
    assert!(strip_error("dial tcp 10.0.0.1:9000: connection refused") == "connection refused");
    assert!(strip_error("write tcp 10.0.0.1:9000: broken pipe") == "connection reset");
    assert!(strip_error("read: connection reset by peer") == "connection reset");
    assert!(strip_error("unexpected EOF") == "connection reset");
    assert!(strip_error("Post \"http://ch\": context canceled") == "context canceled");
    let long = "Code: 241. DB::Exception: Memory";
    assert!(long.len() > 20);
    assert!(strip_error(long) == "Code: 241. DB::Excep");
    assert!(strip_error("short") == "short");
}

#[test]
fn test_read_error() {
    let e = parse_entry(
        r#"{"error":"clickhouse response status 502: ch cannot reach ch2:9000; try again","x":1}"#,
    );
    assert!(read_error(&e, "error") == "cannot reach ch2:9000");
    assert!(read_error(&e, "x") == "");
    assert!(read_error(&e, "missing") == "");
}

#[test]
fn test_tag_query() {
    assert!(tag_query("format=json&tagPrefix=c&expr=app%3Dchproxy".split('&')) == "tagPrefix='c' expr='app=chproxy'");
    assert!(tag_query("format=json&tag=c&expr=app+%3D+chproxy".split('&')) == "tag='c' expr='app=chproxy'");
    assert!(tag_query("limit=100&valuePrefix=&tag=name".split('&')) == "limit=100 tag='name'");
    assert!(tag_query("noise&=x".split('&')) == "");
    // Malformed escapes keep the raw parameter
    assert!(tag_query("expr=%zz&tag=a%2".split('&')) == "expr=%zz tag=a%2");
    assert!(tag_query("expr=%E2%82%AC".split('&')) == "expr='\u{20ac}'");
}

#[test]
fn test_metrics_find_cache_query() {
    assert!(metrics_find_cache_query("1970-02-12;query=test.c*;ts=1674288000") == Some("test.c*"));
    assert!(metrics_find_cache_query("2023-01-21;2023-01-21;test.a;ttl=60").is_none());
    assert!(metrics_find_cache_query("1970-02-12;query=test.c*").is_none());
}

#[test]
fn test_date_range() {
    let (from, until) = date_range("x) AND (Date >='2023-01-21' AND Date <= '2023-01-23') GROUP BY").unwrap();
    assert!(days_between(from, until.unwrap()) == 2);
    let (_, until) = date_range("x) AND (Date >= '2023-01-21') GROUP BY").unwrap();
    assert!(until.is_none());
    assert!(date_range("x) AND (Date >='2023-01-21' AND Date <= 'bad-date-xx')").is_none());
    assert!(date_range("x) AND (Date >='21'").is_none());
    assert!(date_range("no dates here").is_none());
}

#[test]
fn test_data_time_range() {
    let entry = parse_entry(r#"{"read_rows":"10","time":0.25}"#);
    let q = data_stat(
        &entry,
        "INFO",
        "SELECT Path FROM graphite_reversed WHERE (Path in m) AND (Time >= 1674288230 AND Time <= 1674288349) GROUP BY Path",
    );
    assert!(q.table == Ustr::from("graphite_reversed"));
    assert!(q.from == 1674288230 && q.until == 1674288349);
    assert!(q.days == 1);

    let q = data_stat(
        &entry,
        "INFO",
        "SELECT Path FROM graphite_reversed WHERE (Path in m) AND (Time >= 1674288230 AND Time <= 9223372036854775807) GROUP BY Path",
    );
    assert!(q.until == i64::MAX);
    assert!(q.days == (i64::MAX - 1674288230 + 1) / SECS_PER_DAY + 1);
}

#[test]
fn test_malformed_records() {
    let (queries, completed) = feed(&[
        r#"{"level":"INFO","logger":"http","message":"access","request_id":"a","status":200}"#,
        r#"{"level":"INFO","timestamp":"yesterday","logger":"http","message":"access","request_id":"b","status":200}"#,
        r#"{"level":"INFO","timestamp":"2023-01-21T13:05:43.290+0500","logger":"http","message":"access","request_id":7,"status":200}"#,
        // Well-formed, but too far in the future for a nanosecond timestamp
        r#"{"level":"INFO","timestamp":"2300-01-21T13:05:43.290+0500","logger":"http","message":"access","request_id":"far","status":200,"time":0.5,"url":"/render/?format=json"}"#,
    ]);
    assert!(queries.is_empty());
    assert!(completed.is_empty());
}

#[test]
fn test_completion() {
    let (queries, completed) = feed(&[
        r#"{"level":"INFO","timestamp":"2023-01-21T13:05:43.290+0500","logger":"render.pb3parser","message":"pb3_target","request_id":"r1","from":1674288223,"until":1674288343,"target":"test.a"}"#,
        r#"{"level":"INFO","timestamp":"2023-01-21T13:05:43.300+0500","logger":"render","message":"data_parse","request_id":"r1","read_bytes":148,"read_points":4}"#,
        r#"{"level":"INFO","timestamp":"2023-01-21T13:05:43.300+0500","logger":"http","message":"request","request_id":"r1"}"#,
        r#"{"level":"DEBUG","timestamp":"2023-01-21T13:05:43.310+0500","logger":"http","message":"access","request_id":"r2","status":200}"#,
    ]);
    assert!(completed.is_empty());
    assert!(queries.len() == 2);
    assert!(!queries["r1"].is_complete());
    assert!(queries["r1"].points == 4);

    let (queries, completed) = feed(&[
        r#"{"level":"INFO","timestamp":"2023-01-21T13:05:43.310+0500","logger":"http","message":"access","request_id":"r3","time":0.5,"wait_slot":0.25,"wait_fail":true,"url":"/render/?format=json","status":504}"#,
    ]);
    assert!(completed == vec!["r3".to_string()]);
    let s = &queries["r3"];
    assert!(s.is_complete());
    assert!(s.query_time == 0.25);
    assert!(s.wait_status == Status::Error);
    assert!(s.request_type == "render");
}

#[test]
fn test_leak_reset() {
    let first = r#"{"level":"INFO","timestamp":"2023-01-21T13:05:43.290+0500","logger":"render.pb3parser","message":"pb3_target","request_id":"r","from":1674288223,"until":1674288343,"target":"test.a"}"#;

    // Too late: more than 240s after the previous line
    let (queries, _) = feed(&[
        first,
        r#"{"level":"INFO","timestamp":"2023-01-21T13:09:43.291+0500","logger":"render","message":"data_parse","request_id":"r","read_bytes":1,"read_points":2}"#,
    ]);
    let mut want = Stat::new("r", 1674288583291000000);
    want.points = 2;
    want.bytes = 1;
    assert!(queries["r"] == want);

    // Exactly 240s is still the same request
    let (queries, _) = feed(&[
        first,
        r#"{"level":"INFO","timestamp":"2023-01-21T13:09:43.290+0500","logger":"render","message":"data_parse","request_id":"r","read_bytes":1,"read_points":2}"#,
    ]);
    assert!(queries["r"].queries.len() == 1);

    // Clock went backward
    let (queries, _) = feed(&[
        first,
        r#"{"level":"INFO","timestamp":"2023-01-21T13:05:43.289+0500","logger":"render","message":"data_parse","request_id":"r","read_bytes":1,"read_points":2}"#,
    ]);
    assert!(queries["r"].queries.is_empty());
    assert!(queries["r"].timestamp == 1674288343289000000);
}

#[test]
fn test_error_query() {
    let (queries, _) = feed(&[
        r#"{"level":"ERROR","timestamp":"2023-01-21T13:05:43.510+0500","logger":"render","message":"query","request_id":"e","query":"SELECT Path FROM graphite_indexd WHERE ((Level=8) AND (Path IN ('test.a'))) AND (Date >='2023-01-20' AND Date <= '2023-01-21') GROUP BY Path","read_rows":"10","error":"dial tcp 10.0.0.1:9000: connection refused","time":0.1}"#,
    ]);
    let s = &queries["e"];
    assert!(s.index.len() == 1);
    assert!(s.index[0].status == Status::Error);
    assert!(s.index[0].error == "connection refused");
    assert!(s.index[0].days == 2);
    assert!(s.index[0].table == "graphite_indexd");
    assert!(s.index_read_rows == 10 && s.read_rows == 10);
}
