/// `top`: stream the log and, for every interval of `--duration`, print the heaviest requests that
/// completed in that interval.
use crate::records;
use crate::{in_window, InputArgs, PrintArgs, TopArgs};

use anyhow::Result;
use chlog::{for_each_log_entry, get_top, open_log};
use rustutils::{format_utc_nanos, truncate_nanos};
use std::collections::HashMap;
use std::io;
use tracing::debug;

pub fn top_requests(
    output: &mut dyn io::Write,
    input_args: &InputArgs,
    top_args: &TopArgs,
    print_args: &PrintArgs,
) -> Result<()> {
    records::check_fmt(&print_args.fmt)?;
    let (from, until) = input_args.window();
    let interval = top_args.duration.num_seconds();

    let mut input = open_log(input_args.input.as_deref())?;
    let mut queries = HashMap::new();
    let mut bucket: Option<i64> = None;
    for_each_log_entry(&mut input, &mut queries, |queries, id| {
        let Some(timestamp) = queries.get(id).map(|s| s.timestamp) else {
            return Ok(());
        };
        if !in_window(timestamp, from, until) {
            queries.remove(id);
            return Ok(());
        }
        let t = truncate_nanos(timestamp, interval);
        match bucket {
            Some(b) if b != t => {
                // The request that opened the new interval is not part of the report for the old one.
                let held = queries.remove(id);
                let stats = get_top(queries, top_args.top, top_args.sort, from, until, false, true);
                debug!(interval = %format_utc_nanos(b), printed = stats.len(), "Flushing");
                if !stats.is_empty() {
                    records::print_records(output, &print_args.fmt, stats)?;
                }
                if let Some(s) = held {
                    queries.insert(id.to_string(), s);
                }
                bucket = Some(t);
            }
            Some(_) => {}
            None => bucket = Some(t),
        }
        Ok(())
    })?;

    let stats = get_top(
        &mut queries,
        top_args.top,
        top_args.sort,
        from,
        until,
        top_args.incomplete,
        true,
    );
    debug!(printed = stats.len(), remaining = queries.len(), "Final flush");
    if !stats.is_empty() {
        records::print_records(output, &print_args.fmt, stats)?;
    }
    Ok(())
}

#[cfg(test)]
use chlog::Sort;

#[cfg(test)]
fn top_args(top: usize, incomplete: bool) -> TopArgs {
    TopArgs {
        top,
        sort: Sort::QTime,
        duration: chrono::Duration::seconds(10),
        incomplete,
    }
}

// Concatenate fixtures into one log file.
#[cfg(test)]
fn concat_fixtures(name: &str, fixtures: &[&str]) -> String {
    let mut text = String::new();
    for f in fixtures {
        text += &std::fs::read_to_string(format!("../tests/chlog/{f}.log")).unwrap();
        if !text.ends_with('\n') {
            text.push('\n');
        }
    }
    let path = std::env::temp_dir().join(format!("chstat-top-{}-{name}.log", std::process::id()));
    std::fs::write(&path, text).unwrap();
    path.to_string_lossy().to_string()
}

#[cfg(test)]
fn run_top(input: &str, args: &TopArgs, fmt: &str) -> String {
    let input_args = InputArgs {
        input: Some(input.to_string()),
        ..Default::default()
    };
    let print_args = PrintArgs {
        fmt: Some(fmt.to_string()),
    };
    let mut out = Vec::new();
    top_requests(&mut out, &input_args, args, &print_args).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn test_top_intervals() {
    // Completed at 08:05:43, 08:05:50 and 08:06:20, so every request is in its own interval
    let input = concat_fixtures("intervals", &["render", "render_cached", "metrics_find"]);
    let out = run_top(&input, &top_args(10, false), "id,type,csv,header");
    std::fs::remove_file(&input).unwrap();
    assert!(
        out == "id,type\n\
                1f72e822bed05bebd97a9bdcc4654f1a,render\n\
                id,type\n\
                3dba74b5575b2bc262bab3029c1b34fd,render\n\
                id,type\n\
                fd3e9fd09a92bc3b7fb0d597f901e953,metrics_find\n"
    );
}

#[test]
fn test_top_incomplete() {
    // Drop the access line of the last request so that it never completes
    let input = concat_fixtures("incomplete", &["render", "tag_values"]);
    let text = std::fs::read_to_string(&input).unwrap();
    let truncated = text
        .lines()
        .filter(|l| !(l.contains("d7f506acefdc194c10a30cebabdfae06") && l.contains("\"status\":")))
        .collect::<Vec<&str>>()
        .join("\n");
    std::fs::write(&input, truncated).unwrap();

    let out = run_top(&input, &top_args(10, false), "id,awk");
    assert!(out == "1f72e822bed05bebd97a9bdcc4654f1a\n");
    let out = run_top(&input, &top_args(10, true), "id,awk");
    std::fs::remove_file(&input).unwrap();
    assert!(out.lines().count() == 2);
    assert!(out.contains("d7f506acefdc194c10a30cebabdfae06"));
}
