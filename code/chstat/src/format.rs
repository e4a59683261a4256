/// Generic formatting code for a set of data extracted from a data structure to be presented
/// columnar, as csv, as json, or as space-separated awk input, and (except for json and awk) with or
/// without a header and with or without named fields.
use anyhow::{bail, Result};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::io;

pub struct Help {
    pub fields: Vec<String>,
    pub aliases: Vec<(String, Vec<String>)>,
    pub defaults: String,
}

pub fn maybe_help<F>(fmt: &Option<String>, f: F) -> bool
where
    F: Fn() -> Help,
{
    if let Some(ref s) = fmt {
        if s.starts_with("help") {
            let mut help = f();
            println!("Syntax:\n  --fmt=(field|alias|control),...");
            println!("\nFields:");
            help.fields.sort();
            help.fields.dedup();
            for f in help.fields {
                println!("  {f}");
            }
            if !help.aliases.is_empty() {
                println!("\nAliases:");
                help.aliases.sort();
                for (name, mut fields) in help.aliases {
                    fields.sort();
                    let explication = fields.join(",");
                    println!("  {name} --> {explication}");
                }
            }
            println!("\nDefaults:\n  {}", help.defaults);
            println!("\nControl:\n  awk\n  csv\n  csvnamed\n  fixed\n  json\n  header\n  noheader\n  tag:<tagvalue>");
            return true;
        }
    }
    false
}

/// Return a vector of the known fields in `spec` wrt the formatters, and a HashSet of any other
/// strings found in `spec`.  It returns an error if zero output fields were selected.

pub fn parse_fields<'a, DataT, FmtT, CtxT>(
    spec: &'a str,
    formatters: &HashMap<String, FmtT>,
    aliases: &'a HashMap<String, Vec<String>>,
) -> Result<(Vec<&'a str>, HashSet<&'a str>)>
where
    FmtT: Fn(&DataT, CtxT) -> String,
    CtxT: Copy,
{
    let mut others = HashSet::new();
    let mut fields = vec![];
    for x in spec.split(',') {
        if formatters.contains_key(x) {
            fields.push(x);
        } else if let Some(aliases) = aliases.get(x) {
            for alias in aliases {
                if formatters.contains_key(alias) {
                    fields.push(alias.as_ref());
                } else {
                    others.insert(alias.as_ref());
                }
            }
        } else {
            others.insert(x);
        }
    }
    if fields.is_empty() {
        bail!("No output fields were selected")
    }
    Ok((fields, others))
}

pub struct FormatOptions {
    pub tag: Option<String>,
    pub json: bool,   // json explicitly requested
    pub csv: bool,    // csv or csvnamed explicitly requested
    pub awk: bool,    // awk explicitly requested
    pub fixed: bool,  // fixed output explicitly requested
    pub named: bool,  // csvnamed explicitly requested
    pub header: bool, // true if nothing requested b/c fixed+header is default
}

pub fn standard_options(others: &HashSet<&str>) -> FormatOptions {
    let csvnamed = others.contains("csvnamed");
    let csv = others.contains("csv") || csvnamed;
    let json = others.contains("json") && !csv;
    let awk = others.contains("awk") && !csv && !json;
    let fixed = others.contains("fixed") && !csv && !json && !awk;
    // json and awk get no header, even if one is requested
    let header =
        (!csv && !json && !awk && !others.contains("noheader")) || (csv && others.contains("header"));
    let tag = others
        .iter()
        .find_map(|x| x.strip_prefix("tag:"))
        .map(|t| t.to_string());
    FormatOptions {
        csv,
        json,
        awk,
        header,
        tag,
        fixed,
        named: csvnamed,
    }
}

/// The `fields` are the names of formatting functions to get from the `formatters`, these are
/// applied to the `data`.  Set `opts.header` to true to print a first row with field names as a
/// header (independent of csv).  Set `opts.csv` to true to get CSV output instead of fixed-format.
/// Set `opts.tag` to Some(s) to print a tag=s field in the output.

pub fn format_data<'a, DataT, FmtT, CtxT>(
    output: &mut dyn io::Write,
    fields: &[&'a str],
    formatters: &HashMap<String, FmtT>,
    opts: &FormatOptions,
    data: Vec<DataT>,
    ctx: CtxT,
) -> Result<()>
where
    FmtT: Fn(&DataT, CtxT) -> String,
    CtxT: Copy,
{
    // Resolve the formatters once; parse_fields has already vetted the names.
    let mut fmts = Vec::with_capacity(fields.len());
    for kwd in fields {
        match formatters.get(*kwd) {
            Some(f) => fmts.push(f),
            None => bail!("Unknown field {kwd}"),
        }
    }

    let mut cols = Vec::<Vec<String>>::new();
    cols.resize(fields.len(), vec![]);
    for x in &data {
        for (i, f) in fmts.iter().enumerate() {
            cols[i].push(f(x, ctx));
        }
    }

    if opts.csv {
        format_csv(output, fields, opts, cols)
    } else if opts.json {
        format_json(output, fields, opts, cols)
    } else if opts.awk {
        format_awk(output, fields, opts, cols);
        Ok(())
    } else {
        format_fixed_width(output, fields, opts, cols);
        Ok(())
    }
}

fn num_rows(cols: &[Vec<String>]) -> usize {
    cols.first().map(|c| c.len()).unwrap_or(0)
}

fn format_fixed_width(
    output: &mut dyn io::Write,
    fields: &[&str],
    opts: &FormatOptions,
    cols: Vec<Vec<String>>,
) {
    // The column width is the max across all the entries in the column (including header,
    // if present).  If there's a tag, it is printed in the last column.
    let mut widths = vec![];
    widths.resize(fields.len() + if opts.tag.is_some() { 1 } else { 0 }, 0);

    if opts.header {
        for (i, kwd) in fields.iter().enumerate() {
            widths[i] = usize::max(widths[i], kwd.len());
        }
        if opts.tag.is_some() {
            widths[fields.len()] = usize::max(widths[fields.len()], "tag".len());
        }
    }

    for row in 0..num_rows(&cols) {
        for col in 0..fields.len() {
            widths[col] = usize::max(widths[col], cols[col][row].chars().count());
        }
        if let Some(ref tag) = opts.tag {
            widths[fields.len()] = usize::max(widths[fields.len()], tag.len());
        }
    }

    // Header
    if opts.header {
        let mut s = "".to_string();
        for (i, kwd) in fields.iter().enumerate() {
            let w = widths[i];
            s += format!("{:w$}  ", kwd).as_str();
        }
        if opts.tag.is_some() {
            let w = widths[fields.len()];
            s += format!("{:w$}  ", "tag").as_str();
        }
        // Ignore errors here, they are common for broken pipelines
        let _ = output.write_all(s.trim_end().as_bytes());
        let _ = output.write_all(b"\n");
    }

    // Body
    for row in 0..num_rows(&cols) {
        let mut s = "".to_string();
        for col in 0..fields.len() {
            let w = widths[col];
            s += format!("{:w$}  ", cols[col][row]).as_str();
        }
        if let Some(ref tag) = opts.tag {
            let w = widths[fields.len()];
            s += format!("{:w$}  ", tag).as_str();
        }
        // Ignore errors here, they are common for broken pipelines
        let _ = output.write_all(s.trim_end().as_bytes());
        let _ = output.write_all(b"\n");
    }
}

fn format_csv(
    output: &mut dyn io::Write,
    fields: &[&str],
    opts: &FormatOptions,
    cols: Vec<Vec<String>>,
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(output);

    if opts.header {
        let mut out_fields = fields.iter().map(|kwd| kwd.to_string()).collect::<Vec<String>>();
        if opts.tag.is_some() {
            out_fields.push("tag".to_string());
        }
        writer.write_record(out_fields)?;
    }

    for row in 0..num_rows(&cols) {
        let mut out_fields = Vec::new();
        for col in 0..fields.len() {
            let val = &cols[col][row];
            if opts.named {
                out_fields.push(format!("{}={}", fields[col], val));
            } else {
                out_fields.push(val.clone());
            }
        }
        if let Some(ref tag) = opts.tag {
            if opts.named {
                out_fields.push(format!("tag={tag}"));
            } else {
                out_fields.push(tag.clone());
            }
        }
        writer.write_record(out_fields)?;
    }

    writer.flush()?;
    Ok(())
}

fn format_json(
    output: &mut dyn io::Write,
    fields: &[&str],
    opts: &FormatOptions,
    cols: Vec<Vec<String>>,
) -> Result<()> {
    let mut objects = vec![];
    for row in 0..num_rows(&cols) {
        let mut obj = Map::new();
        for col in 0..fields.len() {
            obj.insert(fields[col].to_string(), Value::String(cols[col][row].clone()));
        }
        if let Some(ref tag) = opts.tag {
            obj.insert("tag".to_string(), Value::String(tag.clone()));
        }
        objects.push(Value::Object(obj));
    }
    serde_json::to_writer(&mut *output, &objects)?;
    output.write_all(b"\n")?;
    Ok(())
}

// awk output: fields are space-separated and spaces are not allowed within fields, they
// are replaced by `_`.

fn format_awk(
    output: &mut dyn io::Write,
    fields: &[&str],
    opts: &FormatOptions,
    cols: Vec<Vec<String>>,
) {
    for row in 0..num_rows(&cols) {
        let mut line = "".to_string();
        for col in 0..fields.len() {
            if !line.is_empty() {
                line += " ";
            }
            line += cols[col][row].replace(' ', "_").as_str();
        }
        if let Some(ref tag) = opts.tag {
            if !line.is_empty() {
                line += " ";
            }
            line += tag;
        }
        line += "\n";
        let _ = output.write_all(line.as_bytes());
    }
}

#[cfg(test)]
type TestDatum<'a> = &'a (i64, &'static str);

#[cfg(test)]
type TestFormatters = HashMap<String, &'static dyn Fn(TestDatum, ()) -> String>;

#[cfg(test)]
fn format_num(d: TestDatum, _: ()) -> String {
    d.0.to_string()
}

#[cfg(test)]
fn format_name(d: TestDatum, _: ()) -> String {
    d.1.to_string()
}

#[cfg(test)]
fn test_formatters() -> (TestFormatters, HashMap<String, Vec<String>>) {
    let mut formatters: TestFormatters = HashMap::new();
    formatters.insert("num".to_string(), &format_num);
    formatters.insert("name".to_string(), &format_name);
    let mut aliases = HashMap::new();
    aliases.insert(
        "both".to_string(),
        vec!["num".to_string(), "name".to_string(), "csv".to_string()],
    );
    (formatters, aliases)
}

#[cfg(test)]
fn render(spec: &str, data: Vec<(i64, &'static str)>) -> String {
    let (formatters, aliases) = test_formatters();
    let (fields, others) = parse_fields(spec, &formatters, &aliases).unwrap();
    let opts = standard_options(&others);
    let mut out = Vec::new();
    format_data(&mut out, &fields, &formatters, &opts, data, ()).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn test_parse_fields() {
    let (formatters, aliases) = test_formatters();
    let (fields, others) = parse_fields("name,both,fixed", &formatters, &aliases).unwrap();
    assert!(fields == vec!["name", "num", "name"]);
    assert!(others.contains("csv") && others.contains("fixed"));
    assert!(parse_fields("csv,noheader", &formatters, &aliases).is_err());
}

#[test]
fn test_standard_options() {
    let opts = standard_options(&HashSet::new());
    assert!(opts.header && !opts.csv && !opts.json && !opts.awk && !opts.fixed);

    let opts = standard_options(&["csvnamed", "json", "tag:x"].into_iter().collect());
    assert!(opts.csv && opts.named && !opts.json && !opts.header);
    assert!(opts.tag == Some("x".to_string()));

    let opts = standard_options(&["awk", "header"].into_iter().collect());
    assert!(opts.awk && !opts.header);
}

#[test]
fn test_format_fixed() {
    let out = render("num,name", vec![(1, "a"), (1000, "hello")]);
    assert!(out == "num   name\n1     a\n1000  hello\n");
}

#[test]
fn test_format_csv() {
    let out = render("both", vec![(1, "a b"), (2, "c,d")]);
    assert!(out == "1,a b\n2,\"c,d\"\n");
    let out = render("num,csvnamed,tag:t", vec![(7, "")]);
    assert!(out == "num=7,tag=t\n");
    let out = render("num,csv,header", vec![(7, "")]);
    assert!(out == "num\n7\n");
}

#[test]
fn test_format_json_and_awk() {
    let out = render("num,name,json", vec![(1, "a")]);
    assert!(out == "[{\"name\":\"a\",\"num\":\"1\"}]\n");
    let out = render("num,name,awk", vec![(1, "a b")]);
    assert!(out == "1 a_b\n");
}
