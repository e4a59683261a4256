/// `aggregate`: group requests by the shape of their queries and report on the groups.
///
/// There are two reports.  The index report has one row per index key (the index queries of a
/// request and the number of days they touch), the request report one row per request key (the
/// targets, the length of their time ranges and how far back they reach).  Rows are filed in
/// sections by request type, duration label and offset label; within a section the rows are ranked
/// by `--sort` and `--key` and the last `--top` rows are printed, heaviest last.
///
/// The fields that summarize a sample buffer (times, rows, bytes, ...) show the statistic selected
/// by `--key`, and are blank if the group has no samples for the buffer.  A `--fmt` field list
/// applies to both reports; fields that one report does not know are ignored by it.
use crate::format;
use crate::{in_window, AggregateArgs, InputArgs, PrintArgs};

use anyhow::{bail, Result};
use chlog::{
    for_each_log_entry, open_log, sort_index_agg, sort_request_agg, take_top, AggNode, AggSortKey,
    StatAggSum, StatAggSumSlice, StatIndexAggNode, StatQuery, StatRequestAggNode, StatSummary,
};
use itertools::Itertools;
use rustutils::{format_float, format_pcnt};
use std::collections::HashMap;
use std::io::{self, Write};
use tracing::{debug, info, warn};

pub fn aggregate_requests(
    output: &mut dyn io::Write,
    input_args: &InputArgs,
    agg_args: &AggregateArgs,
    print_args: &PrintArgs,
) -> Result<()> {
    if agg_args.output.is_none() {
        check_fmt(&print_args.fmt)?;
    }

    let sum = load_summary(input_args)?;

    if let Some(ref name) = agg_args.output {
        let slice = sum.to_slice();
        slice.save(name)?;
        info!(
            index_groups = slice.index.len(),
            request_groups = slice.requests.len(),
            file = name.as_str(),
            "Saved"
        );
        return Ok(());
    }

    print_report(output, &sum, agg_args, &print_args.fmt)
}

// A saved document if the name says so, otherwise a log to be reduced.
fn load_summary(input_args: &InputArgs) -> Result<StatAggSum> {
    if let Some(ref name) = input_args.input {
        if name.ends_with(".json") {
            if input_args.from.is_some() || input_args.until.is_some() {
                warn!("--from and --until do not apply to a saved aggregate document");
            }
            let slice = StatAggSumSlice::load(name)?;
            debug!(
                index_groups = slice.index.len(),
                request_groups = slice.requests.len(),
                "Loaded {name}"
            );
            return Ok(StatAggSum::from_slice(slice));
        }
    }

    let (from, until) = input_args.window();
    let mut input = open_log(input_args.input.as_deref())?;
    let mut queries = HashMap::new();
    let mut summary = StatSummary::new();
    let mut appended = 0usize;
    for_each_log_entry(&mut input, &mut queries, |queries, id| {
        if let Some(s) = queries.remove(id) {
            if in_window(s.timestamp, from, until) {
                summary.append(&s);
                appended += 1;
            }
        }
        Ok(())
    })?;
    debug!(appended, incomplete = queries.len(), "Aggregating");
    Ok(summary.aggregate())
}

fn print_report(
    output: &mut dyn io::Write,
    sum: &StatAggSum,
    agg_args: &AggregateArgs,
    fmt: &Option<String>,
) -> Result<()> {
    let n = agg_args.top;
    let key = agg_args.key;
    let index_sort = agg_args.sort.index_sort();

    let mut index_rows = vec![];
    for nodes in sum.index.values() {
        let mut nodes = nodes.clone();
        sort_index_agg(&mut nodes, index_sort, key);
        index_rows.extend(take_top(nodes, n));
    }
    let mut request_rows = vec![];
    for nodes in sum.requests.values() {
        let mut nodes = nodes.clone();
        sort_request_agg(&mut nodes, agg_args.sort, key);
        request_rows.extend(take_top(nodes, n));
    }

    let (index_formatters, index_aliases) = index_formatters();
    let index_spec = fmt.as_deref().unwrap_or(INDEX_FMT_DEFAULTS);
    if let Ok((fields, others)) = format::parse_fields(index_spec, &index_formatters, &index_aliases) {
        let opts = format::standard_options(&others);
        if opts.header {
            writeln!(output, "Top {n} index queries (sort by {index_sort} {key})\n")?;
        }
        format::format_data(output, &fields, &index_formatters, &opts, index_rows, key)?;
        if opts.header {
            writeln!(output)?;
        }
    }

    let (request_formatters, request_aliases) = request_formatters();
    let request_spec = fmt.as_deref().unwrap_or(REQUEST_FMT_DEFAULTS);
    if let Ok((fields, others)) =
        format::parse_fields(request_spec, &request_formatters, &request_aliases)
    {
        let opts = format::standard_options(&others);
        if opts.header {
            writeln!(output, "Top {n} queries (sort by {} {key})\n", agg_args.sort)?;
        }
        format::format_data(output, &fields, &request_formatters, &opts, request_rows, key)?;
    }
    Ok(())
}

// Both reports must be printable with the same spec unless a report has no field at all in it.
fn check_fmt(fmt: &Option<String>) -> Result<()> {
    let Some(spec) = fmt else {
        return Ok(());
    };
    let (index_formatters, index_aliases) = index_formatters();
    let (request_formatters, request_aliases) = request_formatters();
    let index = format::parse_fields(spec, &index_formatters, &index_aliases);
    let requests = format::parse_fields(spec, &request_formatters, &request_aliases);
    if index.is_err() && requests.is_err() {
        bail!("No output fields were selected")
    }
    Ok(())
}

pub fn fmt_help() -> format::Help {
    let (index_formatters, index_aliases) = index_formatters();
    let (request_formatters, _) = request_formatters();
    let mut fields = index_formatters.keys().cloned().collect::<Vec<String>>();
    fields.extend(request_formatters.keys().cloned());
    format::Help {
        fields,
        aliases: index_aliases
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Vec<(String, Vec<String>)>>(),
        defaults: format!("index: {INDEX_FMT_DEFAULTS}\n  requests: {REQUEST_FMT_DEFAULTS}"),
    }
}

const INDEX_FMT_DEFAULTS: &str =
    "type,duration,offset,n,errors,cache_hit,times,metrics,read_rows,read_bytes,sample_id,error_id,queries";

const REQUEST_FMT_DEFAULTS: &str =
    "type,duration,offset,n,errors,ierrors,derrors,cache_hit,status,qtimes,rtimes,metrics,points,read_rows,iread_rows,dread_rows,sample_id,error_id,queries";

type IndexDatum<'a> = &'a StatIndexAggNode;
type RequestDatum<'a> = &'a StatRequestAggNode;
type AggCtx = AggSortKey;

type IndexFormatters = HashMap<String, &'static dyn Fn(IndexDatum, AggCtx) -> String>;
type RequestFormatters = HashMap<String, &'static dyn Fn(RequestDatum, AggCtx) -> String>;

// The alias "all" is resolved per report, against that report's own fields.
fn all_alias(names: impl Iterator<Item = String>) -> Vec<String> {
    names.sorted().collect()
}

fn index_formatters() -> (IndexFormatters, HashMap<String, Vec<String>>) {
    let mut formatters: IndexFormatters = HashMap::new();
    let mut aliases: HashMap<String, Vec<String>> = HashMap::new();

    formatters.insert("type".to_string(), &format_index_type);
    formatters.insert("duration".to_string(), &format_index_duration);
    formatters.insert("offset".to_string(), &format_index_offset);
    formatters.insert("key".to_string(), &format_index_key);
    formatters.insert("queries".to_string(), &format_index_queries);
    formatters.insert("n".to_string(), &format_index_n);
    formatters.insert("errors".to_string(), &format_index_errors);
    formatters.insert("cache_hit".to_string(), &format_index_cache_hit);
    formatters.insert("sample_id".to_string(), &format_index_sample_id);
    formatters.insert("error_id".to_string(), &format_index_error_id);
    formatters.insert("times".to_string(), &format_index_times);
    formatters.insert("metrics".to_string(), &format_index_metrics);
    formatters.insert("read_rows".to_string(), &format_index_read_rows);
    formatters.insert("read_bytes".to_string(), &format_index_read_bytes);

    aliases.insert("all".to_string(), all_alias(formatters.keys().cloned()));
    aliases.insert(
        "default".to_string(),
        INDEX_FMT_DEFAULTS.split(',').map(|s| s.to_string()).collect(),
    );

    (formatters, aliases)
}

fn request_formatters() -> (RequestFormatters, HashMap<String, Vec<String>>) {
    let mut formatters: RequestFormatters = HashMap::new();
    let mut aliases: HashMap<String, Vec<String>> = HashMap::new();

    formatters.insert("type".to_string(), &format_request_type);
    formatters.insert("duration".to_string(), &format_request_duration);
    formatters.insert("offset".to_string(), &format_request_offset);
    formatters.insert("key".to_string(), &format_request_key);
    formatters.insert("index_key".to_string(), &format_request_index_key);
    formatters.insert("queries".to_string(), &format_request_queries);
    formatters.insert("n".to_string(), &format_request_n);
    formatters.insert("errors".to_string(), &format_request_errors);
    formatters.insert("ierrors".to_string(), &format_request_ierrors);
    formatters.insert("derrors".to_string(), &format_request_derrors);
    formatters.insert("cache_hit".to_string(), &format_request_cache_hit);
    formatters.insert("status".to_string(), &format_request_status);
    formatters.insert("sample_id".to_string(), &format_request_sample_id);
    formatters.insert("error_id".to_string(), &format_request_error_id);
    formatters.insert("qtimes".to_string(), &format_request_qtimes);
    formatters.insert("rtimes".to_string(), &format_request_rtimes);
    formatters.insert("itimes".to_string(), &format_request_itimes);
    formatters.insert("dtimes".to_string(), &format_request_dtimes);
    formatters.insert("metrics".to_string(), &format_request_metrics);
    formatters.insert("points".to_string(), &format_request_points);
    formatters.insert("bytes".to_string(), &format_request_bytes);
    formatters.insert("read_rows".to_string(), &format_request_read_rows);
    formatters.insert("read_bytes".to_string(), &format_request_read_bytes);
    formatters.insert("iread_rows".to_string(), &format_request_iread_rows);
    formatters.insert("iread_bytes".to_string(), &format_request_iread_bytes);
    formatters.insert("dread_rows".to_string(), &format_request_dread_rows);
    formatters.insert("dread_bytes".to_string(), &format_request_dread_bytes);

    aliases.insert("all".to_string(), all_alias(formatters.keys().cloned()));
    aliases.insert(
        "default".to_string(),
        REQUEST_FMT_DEFAULTS.split(',').map(|s| s.to_string()).collect(),
    );

    (formatters, aliases)
}

fn format_queries(queries: &[StatQuery]) -> String {
    if queries.is_empty() {
        return "(incomplete log: no queries)".to_string();
    }
    queries.iter().map(|q| q.query.as_str()).join("; ")
}

fn format_time(node: &AggNode, key: AggSortKey) -> String {
    if node.init {
        format!("{:.2}", node.by_key(key))
    } else {
        "".to_string()
    }
}

fn format_count(node: &AggNode, key: AggSortKey) -> String {
    if node.init {
        format_float(node.by_key(key), 0)
    } else {
        "".to_string()
    }
}

fn format_index_type(d: IndexDatum, _: AggCtx) -> String {
    d.index_key.request_type.clone()
}

fn format_index_duration(d: IndexDatum, _: AggCtx) -> String {
    d.index_key.duration_label.clone()
}

fn format_index_offset(d: IndexDatum, _: AggCtx) -> String {
    d.index_key.offset_label.clone()
}

fn format_index_key(d: IndexDatum, _: AggCtx) -> String {
    d.index_key.queries.clone()
}

fn format_index_queries(d: IndexDatum, _: AggCtx) -> String {
    format_queries(&d.queries)
}

fn format_index_n(d: IndexDatum, _: AggCtx) -> String {
    d.n.to_string()
}

fn format_index_errors(d: IndexDatum, _: AggCtx) -> String {
    format_pcnt(d.errors_pcnt)
}

fn format_index_cache_hit(d: IndexDatum, _: AggCtx) -> String {
    format_pcnt(d.index_cache_hit_pcnt)
}

fn format_index_sample_id(d: IndexDatum, _: AggCtx) -> String {
    d.sample_id.clone()
}

fn format_index_error_id(d: IndexDatum, _: AggCtx) -> String {
    d.error_id.clone()
}

fn format_index_times(d: IndexDatum, key: AggCtx) -> String {
    format_time(&d.times, key)
}

fn format_index_metrics(d: IndexDatum, key: AggCtx) -> String {
    format_count(&d.metrics, key)
}

fn format_index_read_rows(d: IndexDatum, key: AggCtx) -> String {
    format_count(&d.read_rows, key)
}

fn format_index_read_bytes(d: IndexDatum, key: AggCtx) -> String {
    format_count(&d.read_bytes, key)
}

fn format_request_type(d: RequestDatum, _: AggCtx) -> String {
    d.data_key.request_type.clone()
}

fn format_request_duration(d: RequestDatum, _: AggCtx) -> String {
    d.data_key.duration_label.clone()
}

fn format_request_offset(d: RequestDatum, _: AggCtx) -> String {
    d.data_key.offset_label.clone()
}

fn format_request_key(d: RequestDatum, _: AggCtx) -> String {
    d.data_key.queries.clone()
}

fn format_request_index_key(d: RequestDatum, _: AggCtx) -> String {
    d.index_key.queries.clone()
}

fn format_request_queries(d: RequestDatum, _: AggCtx) -> String {
    format_queries(&d.queries)
}

fn format_request_n(d: RequestDatum, _: AggCtx) -> String {
    d.n.to_string()
}

fn format_request_errors(d: RequestDatum, _: AggCtx) -> String {
    format_pcnt(d.errors_pcnt)
}

fn format_request_ierrors(d: RequestDatum, _: AggCtx) -> String {
    format_pcnt(d.index_errors_pcnt)
}

fn format_request_derrors(d: RequestDatum, _: AggCtx) -> String {
    format_pcnt(d.data_errors_pcnt)
}

fn format_request_cache_hit(d: RequestDatum, _: AggCtx) -> String {
    format_pcnt(d.index_cache_hit_pcnt)
}

fn format_request_sample_id(d: RequestDatum, _: AggCtx) -> String {
    d.sample_id.clone()
}

fn format_request_error_id(d: RequestDatum, _: AggCtx) -> String {
    d.error_id.clone()
}

fn format_request_qtimes(d: RequestDatum, key: AggCtx) -> String {
    format_time(&d.query_times, key)
}

fn format_request_rtimes(d: RequestDatum, key: AggCtx) -> String {
    format_time(&d.request_times, key)
}

fn format_request_itimes(d: RequestDatum, key: AggCtx) -> String {
    format_time(&d.index_times, key)
}

fn format_request_dtimes(d: RequestDatum, key: AggCtx) -> String {
    format_time(&d.data_times, key)
}

fn format_request_metrics(d: RequestDatum, key: AggCtx) -> String {
    format_count(&d.metrics, key)
}

fn format_request_points(d: RequestDatum, key: AggCtx) -> String {
    format_count(&d.points, key)
}

fn format_request_bytes(d: RequestDatum, key: AggCtx) -> String {
    format_count(&d.bytes, key)
}

fn format_request_read_rows(d: RequestDatum, key: AggCtx) -> String {
    format_count(&d.read_rows, key)
}

fn format_request_read_bytes(d: RequestDatum, key: AggCtx) -> String {
    format_count(&d.read_bytes, key)
}

fn format_request_iread_rows(d: RequestDatum, key: AggCtx) -> String {
    format_count(&d.index_read_rows, key)
}

fn format_request_iread_bytes(d: RequestDatum, key: AggCtx) -> String {
    format_count(&d.index_read_bytes, key)
}

fn format_request_dread_rows(d: RequestDatum, key: AggCtx) -> String {
    format_count(&d.data_read_rows, key)
}

fn format_request_dread_bytes(d: RequestDatum, key: AggCtx) -> String {
    format_count(&d.data_read_bytes, key)
}

fn format_request_status(d: RequestDatum, _: AggCtx) -> String {
    d.request_status
        .iter()
        .map(|(status, n)| format!("{status}:{n}"))
        .join(",")
}

#[cfg(test)]
use chlog::RequestSort;

#[cfg(test)]
fn agg_args(output: Option<String>) -> AggregateArgs {
    AggregateArgs {
        top: 10,
        sort: RequestSort::QTime,
        key: AggSortKey::Max,
        output,
    }
}

#[cfg(test)]
fn input(name: &str) -> InputArgs {
    InputArgs {
        input: Some(name.to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
fn run_aggregate(input_args: &InputArgs, args: &AggregateArgs, fmt: &str) -> String {
    let print_args = PrintArgs {
        fmt: Some(fmt.to_string()),
    };
    let mut out = Vec::new();
    aggregate_requests(&mut out, input_args, args, &print_args).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn test_aggregate_render() {
    let out = run_aggregate(
        &input("../tests/chlog/render.log"),
        &agg_args(None),
        "type,n,queries,sample_id,read_rows,csv",
    );
    // Once for the index report and once for the request report
    let line = "render,1,test.a,1f72e822bed05bebd97a9bdcc4654f1a,";
    let lines = out.lines().collect::<Vec<&str>>();
    assert!(lines.len() == 2);
    assert!(lines[0] == format!("{line}236k"));
    assert!(lines[1] == format!("{line}1436k"));
}

#[test]
fn test_aggregate_report_only_fields() {
    // qtimes and status are only known to the request report
    let out = run_aggregate(
        &input("../tests/chlog/render.log"),
        &agg_args(None),
        "status,qtimes,csv",
    );
    assert!(out == "200:1,0.48\n");
}

#[test]
fn test_aggregate_save_load() {
    let name = std::env::temp_dir()
        .join(format!("chstat-agg-{}.json", std::process::id()))
        .to_string_lossy()
        .to_string();
    let out = run_aggregate(
        &input("../tests/chlog/render.log"),
        &agg_args(Some(name.clone())),
        "n,csv",
    );
    assert!(out.is_empty());

    let out = run_aggregate(&input(&name), &agg_args(None), "type,n,sample_id,csv");
    std::fs::remove_file(&name).unwrap();
    assert!(out.lines().count() == 2);
    assert!(out
        .lines()
        .all(|l| l == "render,1,1f72e822bed05bebd97a9bdcc4654f1a"));
}

#[test]
fn test_aggregate_fmt() {
    assert!(check_fmt(&None).is_ok());
    assert!(check_fmt(&Some("qtimes,csv".to_string())).is_ok());
    assert!(check_fmt(&Some("nosuchfield".to_string())).is_err());

    let help = fmt_help();
    assert!(help.fields.contains(&"qtimes".to_string()));
    assert!(help.fields.contains(&"times".to_string()));
}

#[test]
fn test_aggregate_fixed_titles() {
    let out = run_aggregate(&input("../tests/chlog/render.log"), &agg_args(None), "type,n");
    let lines = out.lines().collect::<Vec<&str>>();
    assert!(lines[0] == "Top 10 index queries (sort by time max)");
    assert!(lines[2] == "type    n");
    assert!(lines[3] == "render  1");
    assert!(out.contains("Top 10 queries (sort by qtime max)"));
}
