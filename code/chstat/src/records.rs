/// Listing of individual request records, shared by `print` and `top`.
use crate::format;

use anyhow::Result;
use chlog::Stat;
use itertools::Itertools;
use rustutils::{format_nonzero, format_number, format_trunc_seconds, format_utc_nanos, NANOS_PER_SEC};
use std::collections::{HashMap, HashSet};
use std::io;
use ustr::Ustr;

/// Format `stats` according to the `--fmt` spec.

pub fn print_records(
    output: &mut dyn io::Write,
    fmt: &Option<String>,
    stats: Vec<Stat>,
) -> Result<()> {
    let (formatters, aliases) = my_formatters();
    let spec = fmt.as_deref().unwrap_or(FMT_DEFAULTS);
    let (fields, others) = format::parse_fields(spec, &formatters, &aliases)?;
    let opts = format::standard_options(&others);
    format::format_data(output, &fields, &formatters, &opts, stats, ())
}

/// Check the `--fmt` spec without printing anything, so that errors surface before input is read.

pub fn check_fmt(fmt: &Option<String>) -> Result<()> {
    let (formatters, aliases) = my_formatters();
    let spec = fmt.as_deref().unwrap_or(FMT_DEFAULTS);
    format::parse_fields(spec, &formatters, &aliases)?;
    Ok(())
}

pub fn fmt_help() -> format::Help {
    let (formatters, aliases) = my_formatters();
    format::Help {
        fields: formatters.keys().cloned().collect::<Vec<String>>(),
        aliases: aliases
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Vec<(String, Vec<String>)>>(),
        defaults: FMT_DEFAULTS.to_string(),
    }
}

const FMT_DEFAULTS: &str = "time,status,rtime,wtime,qtime,wait,read_rows,read_bytes,type,id,metrics,points,bytes,iread_rows,dread_rows";

type StatDatum<'a> = &'a Stat;
type StatCtx = ();

type Formatters = HashMap<String, &'static dyn Fn(StatDatum, StatCtx) -> String>;

fn my_formatters() -> (Formatters, HashMap<String, Vec<String>>) {
    let mut formatters: Formatters = HashMap::new();
    let mut aliases: HashMap<String, Vec<String>> = HashMap::new();

    formatters.insert("time".to_string(), &format_time);
    formatters.insert("status".to_string(), &format_status);
    formatters.insert("rtime".to_string(), &format_rtime);
    formatters.insert("wtime".to_string(), &format_wtime);
    formatters.insert("qtime".to_string(), &format_qtime);
    formatters.insert("wait".to_string(), &format_wait);
    formatters.insert("read_rows".to_string(), &format_read_rows);
    formatters.insert("read_bytes".to_string(), &format_read_bytes);
    formatters.insert("type".to_string(), &format_type);
    formatters.insert("id".to_string(), &format_id);
    formatters.insert("metrics".to_string(), &format_metrics);
    formatters.insert("points".to_string(), &format_points);
    formatters.insert("bytes".to_string(), &format_bytes);
    formatters.insert("iread_rows".to_string(), &format_iread_rows);
    formatters.insert("iread_bytes".to_string(), &format_iread_bytes);
    formatters.insert("dread_rows".to_string(), &format_dread_rows);
    formatters.insert("dread_bytes".to_string(), &format_dread_bytes);
    formatters.insert("itime".to_string(), &format_itime);
    formatters.insert("dtime".to_string(), &format_dtime);
    formatters.insert("ierrors".to_string(), &format_ierrors);
    formatters.insert("derrors".to_string(), &format_derrors);
    formatters.insert("days".to_string(), &format_days);
    formatters.insert("duration".to_string(), &format_duration);
    formatters.insert("offset".to_string(), &format_offset);
    formatters.insert("queries".to_string(), &format_queries);
    formatters.insert("tables".to_string(), &format_tables);
    formatters.insert("errors".to_string(), &format_errors);

    aliases.insert(
        "default".to_string(),
        FMT_DEFAULTS.split(',').map(|s| s.to_string()).collect(),
    );
    aliases.insert(
        "times".to_string(),
        vec![
            "rtime".to_string(),
            "wtime".to_string(),
            "qtime".to_string(),
            "itime".to_string(),
            "dtime".to_string(),
        ],
    );
    aliases.insert(
        "rows".to_string(),
        vec![
            "read_rows".to_string(),
            "iread_rows".to_string(),
            "dread_rows".to_string(),
        ],
    );
    aliases.insert(
        "all".to_string(),
        vec![
            "time".to_string(),
            "status".to_string(),
            "rtime".to_string(),
            "wtime".to_string(),
            "qtime".to_string(),
            "wait".to_string(),
            "read_rows".to_string(),
            "read_bytes".to_string(),
            "type".to_string(),
            "id".to_string(),
            "metrics".to_string(),
            "points".to_string(),
            "bytes".to_string(),
            "iread_rows".to_string(),
            "iread_bytes".to_string(),
            "dread_rows".to_string(),
            "dread_bytes".to_string(),
            "itime".to_string(),
            "dtime".to_string(),
            "ierrors".to_string(),
            "derrors".to_string(),
            "days".to_string(),
            "duration".to_string(),
            "offset".to_string(),
            "queries".to_string(),
            "tables".to_string(),
            "errors".to_string(),
        ],
    );

    (formatters, aliases)
}

fn format_time(d: StatDatum, _: StatCtx) -> String {
    format_utc_nanos(d.timestamp)
}

fn format_status(d: StatDatum, _: StatCtx) -> String {
    d.request_status.to_string()
}

fn format_rtime(d: StatDatum, _: StatCtx) -> String {
    format!("{:.2}", d.request_time)
}

fn format_wtime(d: StatDatum, _: StatCtx) -> String {
    format!("{:.2}", d.wait_time)
}

fn format_qtime(d: StatDatum, _: StatCtx) -> String {
    format!("{:.2}", d.query_time)
}

fn format_wait(d: StatDatum, _: StatCtx) -> String {
    d.wait_status.as_str().to_string()
}

fn format_read_rows(d: StatDatum, _: StatCtx) -> String {
    format_number(d.read_rows)
}

fn format_read_bytes(d: StatDatum, _: StatCtx) -> String {
    format_number(d.read_bytes)
}

fn format_type(d: StatDatum, _: StatCtx) -> String {
    d.request_type.to_string()
}

fn format_id(d: StatDatum, _: StatCtx) -> String {
    d.id.clone()
}

fn format_metrics(d: StatDatum, _: StatCtx) -> String {
    format_number(d.metrics)
}

fn format_points(d: StatDatum, _: StatCtx) -> String {
    format_number(d.points)
}

fn format_bytes(d: StatDatum, _: StatCtx) -> String {
    format_number(d.bytes)
}

fn format_iread_rows(d: StatDatum, _: StatCtx) -> String {
    format_number(d.index_read_rows)
}

fn format_iread_bytes(d: StatDatum, _: StatCtx) -> String {
    format_number(d.index_read_bytes)
}

fn format_dread_rows(d: StatDatum, _: StatCtx) -> String {
    format_number(d.data_read_rows)
}

fn format_dread_bytes(d: StatDatum, _: StatCtx) -> String {
    format_number(d.data_read_bytes)
}

fn format_itime(d: StatDatum, _: StatCtx) -> String {
    format!("{:.2}", d.index_time())
}

fn format_dtime(d: StatDatum, _: StatCtx) -> String {
    format!("{:.2}", d.data_time())
}

fn format_ierrors(d: StatDatum, _: StatCtx) -> String {
    d.index_errors().to_string()
}

fn format_derrors(d: StatDatum, _: StatCtx) -> String {
    d.data_errors().to_string()
}

// The per-target fields list one value per target, in order.

fn format_days(d: StatDatum, _: StatCtx) -> String {
    d.queries.iter().map(|q| format_nonzero(q.days)).join(",")
}

fn format_duration(d: StatDatum, _: StatCtx) -> String {
    d.queries
        .iter()
        .map(|q| {
            if q.from > 0 && q.until > 0 {
                format_trunc_seconds(q.until.saturating_sub(q.from))
            } else {
                "".to_string()
            }
        })
        .join(",")
}

fn format_offset(d: StatDatum, _: StatCtx) -> String {
    d.queries
        .iter()
        .map(|q| {
            if q.from > 0 && q.until > 0 {
                format_trunc_seconds((d.timestamp / NANOS_PER_SEC).saturating_sub(q.until))
            } else {
                "".to_string()
            }
        })
        .join(",")
}

fn format_queries(d: StatDatum, _: StatCtx) -> String {
    d.queries.iter().map(|q| q.query.as_str()).join("; ")
}

fn format_tables(d: StatDatum, _: StatCtx) -> String {
    let mut seen = HashSet::new();
    d.index
        .iter()
        .map(|q| q.table)
        .chain(d.data.iter().map(|q| q.table))
        .filter(|t: &Ustr| !t.is_empty() && seen.insert(*t))
        .join(",")
}

fn format_errors(d: StatDatum, _: StatCtx) -> String {
    d.index
        .iter()
        .map(|q| q.error.as_str())
        .chain(d.data.iter().map(|q| q.error.as_str()))
        .filter(|e| !e.is_empty())
        .unique()
        .join("; ")
}

#[cfg(test)]
use chlog::{DataStat, IndexStat, Query, Status};

#[cfg(test)]
fn sample() -> Stat {
    let mut s = Stat::new("abc", 1674288343773000000);
    s.request_type = "render";
    s.request_status = 200;
    s.request_time = 0.482252576;
    s.query_time = 0.482252576;
    s.wait_status = Status::Success;
    s.queries.push(Query {
        query: "test.a".to_string(),
        days: 1,
        from: 1674288223,
        until: 1674288343,
    });
    s.queries.push(Query {
        query: "test.b".to_string(),
        ..Default::default()
    });
    s.add_index(IndexStat {
        status: Status::Success,
        read_rows: 241436,
        table: Ustr::from("graphite_indexd"),
        ..Default::default()
    });
    s.add_data(DataStat {
        status: Status::Error,
        table: Ustr::from("graphite_reversed"),
        error: "timeout".to_string(),
        ..Default::default()
    });
    s.add_data(DataStat {
        status: Status::Error,
        table: Ustr::from("graphite_reversed"),
        error: "timeout".to_string(),
        ..Default::default()
    });
    s
}

#[test]
fn test_record_fields() {
    let s = sample();
    assert!(format_time(&s, ()) == "2023-01-21 08:05:43");
    assert!(format_rtime(&s, ()) == "0.48");
    assert!(format_wait(&s, ()) == "S");
    assert!(format_read_rows(&s, ()) == "235k");
    assert!(format_days(&s, ()) == "1,");
    assert!(format_duration(&s, ()) == "2m,");
    assert!(format_queries(&s, ()) == "test.a; test.b");
    assert!(format_tables(&s, ()) == "graphite_indexd,graphite_reversed");
    assert!(format_errors(&s, ()) == "timeout");
    assert!(format_derrors(&s, ()) == "2");
}

#[test]
fn test_print_records() {
    let mut out = Vec::new();
    print_records(&mut out, &Some("id,status,type,csv".to_string()), vec![sample()]).unwrap();
    assert!(String::from_utf8(out).unwrap() == "abc,200,render\n");

    let mut out = Vec::new();
    print_records(&mut out, &Some("id,rows".to_string()), vec![sample()]).unwrap();
    assert!(String::from_utf8(out).unwrap() == "id   read_rows  iread_rows  dread_rows\nabc  235k       235k        0\n");

    assert!(check_fmt(&None).is_ok());
    assert!(check_fmt(&Some("csv,nosuchfield".to_string())).is_err());
}
