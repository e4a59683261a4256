/// Aggregation of completed requests into groups, and ranking of the groups.
///
/// Every completed request is appended twice: to the index track, keyed by its index key, and to
/// the request track, keyed by its data key.  Each group accumulates raw sample buffers; reducing a
/// summary turns the buffers into order statistics (`AggNode`) and files the reduced groups under
/// their report section (`LabelKey`).
///
/// Samples from a phase that had a failed sub-query are left out of the row and byte buffers, but
/// the phase time is always recorded so that failures show up in the time percentiles.
use crate::aggnode::AggNode;
use crate::keys::{build_stat_key, LabelKey, StatKey, StatQuery};
use crate::sorts::{AggSortKey, IndexSort, RequestSort};
use crate::stat::{Stat, Status};

use anyhow::Result;
use rustutils::stable_sort_by_less;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use tracing::debug;

const STATUS_OK: i64 = 200;
const STATUS_NOT_FOUND: i64 = 404;

// Percentage, for counts where `total` is known to be nonzero.
fn pcnt(part: i64, total: i64) -> f64 {
    part as f64 / total as f64 * 100.0
}

fn cache_hit_pcnt(hit: i64, miss: i64) -> f64 {
    if hit + miss > 0 {
        pcnt(hit, hit + miss)
    } else {
        0.0
    }
}

// The sample is the request with the most rows; the first one seen wins ties.
fn update_sample(sample_id: &mut String, max_rows: &mut i64, id: &str, rows: i64) {
    if rows > *max_rows || sample_id.is_empty() {
        *max_rows = rows;
        *sample_id = id.to_string();
    }
}

// The error sample is the failed request with the longest query time.
fn update_error_sample(error_id: &mut String, max_time: &mut f64, id: &str, time: f64) {
    if time > *max_time || error_id.is_empty() {
        *max_time = time;
        *error_id = id.to_string();
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatIndexNode {
    pub index_key: StatKey,
    pub queries: Vec<StatQuery>,

    pub sample_id: String,
    max_read_rows: i64,
    pub error_id: String,
    max_error_time: f64,

    pub n: i64,
    pub errors: i64,
    pub cache_hit: i64,
    pub cache_miss: i64,

    pub metrics: Vec<f64>,
    pub read_rows: Vec<f64>,
    pub read_bytes: Vec<f64>,
    pub times: Vec<f64>,
}

impl StatIndexNode {
    fn new(index_key: StatKey, queries: Vec<StatQuery>) -> StatIndexNode {
        StatIndexNode {
            index_key,
            queries,
            ..Default::default()
        }
    }

    fn append(&mut self, s: &Stat) {
        let mut errs = 0;
        let mut times = 0.0;
        for q in &s.index {
            times += q.time;
            match q.status {
                Status::Success => self.cache_miss += 1,
                Status::Cached => self.cache_hit += 1,
                Status::Error => errs += 1,
                Status::None => {}
            }
        }
        self.n += 1;
        if errs == 0 {
            self.read_rows.push(s.index_read_rows as f64);
            self.read_bytes.push(s.index_read_bytes as f64);
            self.metrics.push(s.metrics as f64);
        } else {
            self.errors += 1;
            update_error_sample(&mut self.error_id, &mut self.max_error_time, &s.id, s.query_time);
        }
        self.times.push(times);
        update_sample(&mut self.sample_id, &mut self.max_read_rows, &s.id, s.index_read_rows);
    }

    fn reduce(&self) -> StatIndexAggNode {
        StatIndexAggNode {
            index_key: self.index_key.clone(),
            queries: self.queries.clone(),
            sample_id: self.sample_id.clone(),
            error_id: self.error_id.clone(),
            n: self.n,
            errors_pcnt: pcnt(self.errors, self.n),
            metrics: AggNode::from_samples(&self.metrics),
            index_cache_hit_pcnt: cache_hit_pcnt(self.cache_hit, self.cache_miss),
            read_rows: AggNode::from_samples(&self.read_rows),
            read_bytes: AggNode::from_samples(&self.read_bytes),
            times: AggNode::from_samples(&self.times),
        }
    }
}

/// Reduced index group.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StatIndexAggNode {
    pub index_key: StatKey,
    pub queries: Vec<StatQuery>,
    pub sample_id: String,
    pub error_id: String,
    pub n: i64,
    pub errors_pcnt: f64,
    pub metrics: AggNode,
    pub index_cache_hit_pcnt: f64,
    pub read_rows: AggNode,
    pub read_bytes: AggNode,
    pub times: AggNode,
}

/// Index groups in order of first appearance.

#[derive(Debug, Default)]
pub struct StatIndexSummary {
    nodes: Vec<StatIndexNode>,
    lookup: HashMap<StatKey, usize>,
}

impl StatIndexSummary {
    pub fn new() -> StatIndexSummary {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, key: &StatKey) -> Option<&StatIndexNode> {
        self.lookup.get(key).map(|ix| &self.nodes[*ix])
    }

    /// Add the index phase of `s` to the group for `key`.  A request without index sub-queries is
    /// not added.

    pub fn append(&mut self, key: &StatKey, queries: &[StatQuery], s: &Stat) {
        if s.index.is_empty() {
            return;
        }
        let ix = match self.lookup.get(key) {
            Some(ix) => *ix,
            None => {
                self.nodes
                    .push(StatIndexNode::new(key.clone(), queries.to_vec()));
                self.lookup.insert(key.clone(), self.nodes.len() - 1);
                self.nodes.len() - 1
            }
        };
        self.nodes[ix].append(s);
    }

    pub fn aggregate(&self) -> BTreeMap<LabelKey, Vec<StatIndexAggNode>> {
        let mut sections: BTreeMap<LabelKey, Vec<StatIndexAggNode>> = BTreeMap::new();
        for node in &self.nodes {
            sections
                .entry(node.index_key.label())
                .or_default()
                .push(node.reduce());
        }
        sections
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatRequestNode {
    pub index_key: StatKey,
    pub data_key: StatKey,
    pub queries: Vec<StatQuery>,

    pub sample_id: String,
    max_read_rows: i64,
    pub error_id: String,
    max_error_time: f64,

    pub n: i64,
    pub errors: i64,
    pub index_errors: i64,
    pub data_errors: i64,
    pub cache_hit: i64,
    pub cache_miss: i64,

    pub request_status: BTreeMap<i64, i64>,
    pub request_times: Vec<f64>,
    pub query_times: Vec<f64>,

    pub metrics: Vec<f64>,
    pub points: Vec<f64>,
    pub bytes: Vec<f64>,

    pub read_rows: Vec<f64>,
    pub read_bytes: Vec<f64>,

    pub data_read_rows: Vec<f64>,
    pub data_read_bytes: Vec<f64>,
    pub data_times: Vec<f64>,

    pub index_read_rows: Vec<f64>,
    pub index_read_bytes: Vec<f64>,
    pub index_times: Vec<f64>,
}

impl StatRequestNode {
    fn new(index_key: StatKey, data_key: StatKey, queries: Vec<StatQuery>) -> StatRequestNode {
        StatRequestNode {
            index_key,
            data_key,
            queries,
            ..Default::default()
        }
    }

    fn append(&mut self, s: &Stat) {
        self.n += 1;
        *self.request_status.entry(s.request_status).or_insert(0) += 1;
        if s.request_status == STATUS_OK || s.request_status == STATUS_NOT_FOUND {
            self.read_rows.push(s.read_rows as f64);
            self.read_bytes.push(s.read_bytes as f64);
        } else {
            self.errors += 1;
            update_error_sample(&mut self.error_id, &mut self.max_error_time, &s.id, s.query_time);
        }
        self.request_times.push(s.request_time);
        self.query_times.push(s.query_time);

        if !s.index.is_empty() {
            let mut errs = 0;
            let mut times = 0.0;
            for q in &s.index {
                times += q.time;
                match q.status {
                    Status::Success => self.cache_miss += 1,
                    Status::Cached => self.cache_hit += 1,
                    Status::Error => errs += 1,
                    Status::None => {}
                }
            }
            self.index_times.push(times);
            if errs == 0 {
                self.metrics.push(s.metrics as f64);
                self.index_read_rows.push(s.index_read_rows as f64);
                self.index_read_bytes.push(s.index_read_bytes as f64);
            } else {
                self.index_errors += 1;
            }
        }

        if !s.data.is_empty() {
            self.data_times.push(s.data_time());
            if s.data_errors() == 0 {
                self.points.push(s.points as f64);
                self.bytes.push(s.bytes as f64);
                self.data_read_rows.push(s.data_read_rows as f64);
                self.data_read_bytes.push(s.data_read_bytes as f64);
            } else {
                self.data_errors += 1;
            }
        }

        update_sample(&mut self.sample_id, &mut self.max_read_rows, &s.id, s.read_rows);
    }

    fn reduce(&self) -> StatRequestAggNode {
        StatRequestAggNode {
            index_key: self.index_key.clone(),
            data_key: self.data_key.clone(),
            queries: self.queries.clone(),
            sample_id: self.sample_id.clone(),
            error_id: self.error_id.clone(),
            n: self.n,
            errors_pcnt: pcnt(self.errors, self.n),
            index_errors_pcnt: pcnt(self.index_errors, self.n),
            index_cache_hit_pcnt: cache_hit_pcnt(self.cache_hit, self.cache_miss),
            data_errors_pcnt: pcnt(self.data_errors, self.n),
            request_status: self.request_status.clone(),
            metrics: AggNode::from_samples(&self.metrics),
            points: AggNode::from_samples(&self.points),
            bytes: AggNode::from_samples(&self.bytes),
            read_rows: AggNode::from_samples(&self.read_rows),
            read_bytes: AggNode::from_samples(&self.read_bytes),
            request_times: AggNode::from_samples(&self.request_times),
            query_times: AggNode::from_samples(&self.query_times),
            data_read_rows: AggNode::from_samples(&self.data_read_rows),
            data_read_bytes: AggNode::from_samples(&self.data_read_bytes),
            data_times: AggNode::from_samples(&self.data_times),
            index_read_rows: AggNode::from_samples(&self.index_read_rows),
            index_read_bytes: AggNode::from_samples(&self.index_read_bytes),
            index_times: AggNode::from_samples(&self.index_times),
        }
    }
}

/// Reduced request group.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StatRequestAggNode {
    pub index_key: StatKey,
    pub data_key: StatKey,
    pub queries: Vec<StatQuery>,
    pub sample_id: String,
    pub error_id: String,
    pub n: i64,
    pub errors_pcnt: f64,
    pub index_errors_pcnt: f64,
    pub index_cache_hit_pcnt: f64,
    pub data_errors_pcnt: f64,
    pub request_status: BTreeMap<i64, i64>,
    pub metrics: AggNode,
    pub points: AggNode,
    pub bytes: AggNode,
    pub read_rows: AggNode,
    pub read_bytes: AggNode,
    pub request_times: AggNode,
    pub query_times: AggNode,
    pub data_read_rows: AggNode,
    pub data_read_bytes: AggNode,
    pub data_times: AggNode,
    pub index_read_rows: AggNode,
    pub index_read_bytes: AggNode,
    pub index_times: AggNode,
}

/// Request groups in order of first appearance.

#[derive(Debug, Default)]
pub struct StatRequestSummary {
    nodes: Vec<StatRequestNode>,
    lookup: HashMap<StatKey, usize>,
}

impl StatRequestSummary {
    pub fn new() -> StatRequestSummary {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, key: &StatKey) -> Option<&StatRequestNode> {
        self.lookup.get(key).map(|ix| &self.nodes[*ix])
    }

    pub fn append(&mut self, index_key: &StatKey, data_key: &StatKey, queries: &[StatQuery], s: &Stat) {
        let ix = match self.lookup.get(data_key) {
            Some(ix) => *ix,
            None => {
                self.nodes.push(StatRequestNode::new(
                    index_key.clone(),
                    data_key.clone(),
                    queries.to_vec(),
                ));
                self.lookup.insert(data_key.clone(), self.nodes.len() - 1);
                self.nodes.len() - 1
            }
        };
        self.nodes[ix].append(s);
    }

    pub fn aggregate(&self) -> BTreeMap<LabelKey, Vec<StatRequestAggNode>> {
        let mut sections: BTreeMap<LabelKey, Vec<StatRequestAggNode>> = BTreeMap::new();
        for node in &self.nodes {
            sections
                .entry(node.data_key.label())
                .or_default()
                .push(node.reduce());
        }
        sections
    }
}

/// Both tracks.

#[derive(Debug, Default)]
pub struct StatSummary {
    pub index: StatIndexSummary,
    pub requests: StatRequestSummary,
}

impl StatSummary {
    pub fn new() -> StatSummary {
        Default::default()
    }

    pub fn append(&mut self, s: &Stat) {
        let keys = build_stat_key(s);
        self.index.append(&keys.index_key, &keys.index_queries, s);
        self.requests
            .append(&keys.index_key, &keys.data_key, &keys.data_queries, s);
    }

    pub fn aggregate(&self) -> StatAggSum {
        debug!(
            index_groups = self.index.len(),
            request_groups = self.requests.len(),
            "Reducing summary"
        );
        StatAggSum {
            index: self.index.aggregate(),
            requests: self.requests.aggregate(),
        }
    }
}

/// Reduced groups filed by report section.

#[derive(Debug, Default, Clone, PartialEq)]
pub struct StatAggSum {
    pub index: BTreeMap<LabelKey, Vec<StatIndexAggNode>>,
    pub requests: BTreeMap<LabelKey, Vec<StatRequestAggNode>>,
}

impl StatAggSum {
    pub fn new() -> StatAggSum {
        Default::default()
    }

    pub fn index_labels(&self) -> Vec<&LabelKey> {
        self.index.keys().collect()
    }

    pub fn request_labels(&self) -> Vec<&LabelKey> {
        self.requests.keys().collect()
    }

    /// Flatten to the persisted form, section by section.

    pub fn to_slice(&self) -> StatAggSumSlice {
        StatAggSumSlice {
            index: self.index.values().flatten().cloned().collect(),
            requests: self.requests.values().flatten().cloned().collect(),
        }
    }

    /// Refile persisted groups under their sections, after any groups already present.

    pub fn append_slice(&mut self, slice: StatAggSumSlice) {
        for node in slice.index {
            self.index.entry(node.index_key.label()).or_default().push(node);
        }
        for node in slice.requests {
            self.requests.entry(node.data_key.label()).or_default().push(node);
        }
    }

    pub fn from_slice(slice: StatAggSumSlice) -> StatAggSum {
        let mut sum = StatAggSum::new();
        sum.append_slice(slice);
        sum
    }
}

/// The persisted aggregate document.

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StatAggSumSlice {
    pub index: Vec<StatIndexAggNode>,
    pub requests: Vec<StatRequestAggNode>,
}

impl StatAggSumSlice {
    pub fn read<R: Read>(input: R) -> Result<StatAggSumSlice> {
        Ok(serde_json::from_reader(input)?)
    }

    pub fn write<W: Write>(&self, output: W) -> Result<()> {
        serde_json::to_writer(output, self)?;
        Ok(())
    }

    pub fn load(file_name: &str) -> Result<StatAggSumSlice> {
        StatAggSumSlice::read(BufReader::new(File::open(file_name)?))
    }

    pub fn save(&self, file_name: &str) -> Result<()> {
        let mut output = BufWriter::new(File::create(file_name)?);
        self.write(&mut output)?;
        output.flush()?;
        Ok(())
    }
}

// Ascending on the primary value, then on the tie-breaker.
fn less_pair(a: (f64, f64), b: (f64, f64)) -> bool {
    if a.0 == b.0 {
        a.1 < b.1
    } else {
        a.0 < b.0
    }
}

fn rows_pair(rows: &AggNode, key: AggSortKey) -> (f64, f64) {
    match key {
        AggSortKey::Max => (rows.max, rows.p95),
        _ => (rows.by_key(key), rows.max),
    }
}

fn index_rank(node: &StatIndexAggNode, sort: IndexSort, key: AggSortKey) -> (f64, f64) {
    match sort {
        IndexSort::Time => (node.times.by_key(key), node.read_rows.max),
        IndexSort::ReadRows => rows_pair(&node.read_rows, key),
        IndexSort::Queries => (node.n as f64, node.read_rows.max),
        IndexSort::Errors => (node.errors_pcnt, node.read_rows.max),
    }
}

fn request_rank(node: &StatRequestAggNode, sort: RequestSort, key: AggSortKey) -> (f64, f64) {
    match sort {
        RequestSort::QTime => (node.query_times.by_key(key), node.read_rows.max),
        RequestSort::RTime => (node.request_times.by_key(key), node.read_rows.max),
        RequestSort::DataTime => (node.data_times.by_key(key), node.read_rows.max),
        RequestSort::ReadRows => rows_pair(&node.read_rows, key),
        RequestSort::IndexReadRows => rows_pair(&node.index_read_rows, key),
        RequestSort::DataReadRows => rows_pair(&node.data_read_rows, key),
        RequestSort::Queries => (node.n as f64, node.read_rows.max),
        RequestSort::Errors => (node.errors_pcnt, node.read_rows.max),
    }
}

/// Stable ascending sort of index groups; the heaviest group is last.

pub fn sort_index_agg(nodes: &mut Vec<StatIndexAggNode>, sort: IndexSort, key: AggSortKey) {
    stable_sort_by_less(nodes, |a, b| {
        less_pair(index_rank(a, sort, key), index_rank(b, sort, key))
    });
}

/// Stable ascending sort of request groups; the heaviest group is last.

pub fn sort_request_agg(nodes: &mut Vec<StatRequestAggNode>, sort: RequestSort, key: AggSortKey) {
    stable_sort_by_less(nodes, |a, b| {
        less_pair(request_rank(a, sort, key), request_rank(b, sort, key))
    });
}

/// The last `n` elements of `v`, or all of them if there are not that many.

pub fn take_top<T>(mut v: Vec<T>, n: usize) -> Vec<T> {
    if n < v.len() {
        v.drain(..v.len() - n);
    }
    v
}

#[cfg(test)]
use crate::stat::{DataStat, IndexStat, Query};

#[cfg(test)]
fn request(
    id: &str,
    target: &str,
    status: i64,
    query_time: f64,
    index: &[(Status, i64, f64)],
    data: &[(Status, i64, f64)],
) -> Stat {
    let mut s = Stat::new(id, 1674288343773000000);
    s.request_type = "render";
    s.request_status = status;
    s.request_time = query_time;
    s.query_time = query_time;
    s.metrics = 2;
    s.points = 10;
    s.bytes = 100;
    s.queries.push(Query {
        query: target.to_string(),
        days: 1,
        from: 1674288223,
        until: 1674288343,
    });
    for (status, rows, time) in index {
        s.add_index(IndexStat {
            status: *status,
            read_rows: *rows,
            read_bytes: *rows * 10,
            time: *time,
            ..Default::default()
        });
    }
    for (status, rows, time) in data {
        s.add_data(DataStat {
            status: *status,
            read_rows: *rows,
            read_bytes: *rows * 10,
            time: *time,
            ..Default::default()
        });
    }
    s
}

#[cfg(test)]
fn sample_summary() -> StatSummary {
    let mut sum = StatSummary::new();
    sum.append(&request("1", "test.a", 200, 0.5, &[(Status::Success, 1000, 0.1)], &[(Status::Success, 9000, 0.3)]));
    sum.append(&request("2", "test.a", 200, 0.25, &[(Status::Cached, 0, 0.0)], &[(Status::Success, 10000, 0.2)]));
    sum.append(&request("3", "test.a", 502, 2.0, &[(Status::Error, 0, 1.5)], &[]));
    sum.append(&request("4", "test.b", 200, 0.1, &[(Status::Success, 500, 0.05)], &[]));
    sum.append(&request("5", "test.c", 200, 0.1, &[], &[]));
    sum
}

#[test]
fn test_summary_append() {
    let sum = sample_summary();

    // test.c has no index phase
    assert!(sum.index.len() == 2);
    assert!(sum.requests.len() == 3);

    let keys = build_stat_key(&request("x", "test.a", 200, 0.0, &[], &[]));
    let idx = sum.index.get(&keys.index_key).unwrap();
    assert!(idx.n == 3);
    assert!(idx.errors == 1);
    assert!(idx.cache_hit == 1 && idx.cache_miss == 1);
    assert!(idx.read_rows == vec![1000.0, 0.0]);
    assert!(idx.metrics == vec![2.0, 2.0]);
    assert!(idx.times == vec![0.1, 0.0, 1.5]);
    assert!(idx.sample_id == "1");
    assert!(idx.error_id == "3");

    let req = sum.requests.get(&keys.data_key).unwrap();
    assert!(req.n == 3);
    assert!(req.errors == 1 && req.index_errors == 1 && req.data_errors == 0);
    assert!(req.request_status.get(&200) == Some(&2));
    assert!(req.request_status.get(&502) == Some(&1));
    assert!(req.read_rows == vec![10000.0, 10000.0]);
    assert!(req.query_times == vec![0.5, 0.25, 2.0]);
    assert!(req.index_times == vec![0.1, 0.0, 1.5]);
    assert!(req.index_read_rows == vec![1000.0, 0.0]);
    assert!(req.data_times == vec![0.3, 0.2]);
    assert!(req.data_read_rows == vec![9000.0, 10000.0]);
    assert!(req.points == vec![10.0, 10.0]);
    assert!(req.bytes == vec![100.0, 100.0]);
    // Equal read rows: the first one seen is the sample
    assert!(req.sample_id == "1");
    assert!(req.error_id == "3");
}

#[test]
fn test_summary_aggregate() {
    let agg = sample_summary().aggregate();
    assert!(agg.index.len() == 1);
    let label = agg.index_labels()[0].clone();
    assert!(label.request_type == "render" && label.duration_label == "1d");

    let nodes = &agg.index[&label];
    assert!(nodes.len() == 2);
    let a = &nodes[0];
    assert!(a.index_key.queries == "[{query='test.a',index=1d}]");
    assert!((a.errors_pcnt - 100.0 / 3.0).abs() < 1e-9);
    assert!(a.index_cache_hit_pcnt == 50.0);
    assert!(a.read_rows.init && a.read_rows.max == 1000.0 && a.read_rows.min == 0.0);
    assert!(a.times.max == 1.5);

    let reqs = &agg.requests[agg.request_labels()[0]];
    assert!(reqs.len() == 3);
    let a = &reqs[0];
    assert!(a.data_errors_pcnt == 0.0);
    assert!(a.read_rows.max == 10000.0);
    assert!(a.data_times.init);
    // test.b had no data phase
    assert!(!reqs[1].data_times.init);
    assert!(!reqs[1].points.init);
    assert!(reqs[2].index_cache_hit_pcnt == 0.0);
}

#[cfg(test)]
fn index_node(id: &str, n: i64, time_max: f64, rows_max: f64, rows_p95: f64) -> StatIndexAggNode {
    StatIndexAggNode {
        sample_id: id.to_string(),
        n,
        times: AggNode {
            init: true,
            max: time_max,
            ..Default::default()
        },
        read_rows: AggNode {
            init: true,
            max: rows_max,
            p95: rows_p95,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn test_sort_index_agg() {
    let ids = |v: &Vec<StatIndexAggNode>| v.iter().map(|x| x.sample_id.clone()).collect::<Vec<String>>();
    let mut v = vec![
        index_node("a", 3, 0.5, 100.0, 90.0),
        index_node("b", 1, 0.5, 200.0, 80.0),
        index_node("c", 2, 0.1, 200.0, 95.0),
        index_node("d", 3, 0.9, 50.0, 50.0),
    ];
    sort_index_agg(&mut v, IndexSort::Time, AggSortKey::Max);
    assert!(ids(&v) == vec!["c", "a", "b", "d"]);
    sort_index_agg(&mut v, IndexSort::ReadRows, AggSortKey::Max);
    assert!(ids(&v) == vec!["d", "a", "b", "c"]);
    sort_index_agg(&mut v, IndexSort::ReadRows, AggSortKey::P95);
    assert!(ids(&v) == vec!["d", "b", "a", "c"]);
    sort_index_agg(&mut v, IndexSort::Queries, AggSortKey::Max);
    assert!(ids(&v) == vec!["b", "c", "d", "a"]);
    assert!(ids(&take_top(v, 2)) == vec!["d", "a"]);
}

#[test]
fn test_sort_request_agg() {
    let node = |id: &str, qtime: f64, data_rows: f64, rows: f64, errors: f64| StatRequestAggNode {
        sample_id: id.to_string(),
        errors_pcnt: errors,
        query_times: AggNode {
            init: true,
            max: qtime,
            p99: qtime,
            ..Default::default()
        },
        data_read_rows: AggNode {
            init: true,
            max: data_rows,
            p95: data_rows / 2.0,
            ..Default::default()
        },
        read_rows: AggNode {
            init: true,
            max: rows,
            ..Default::default()
        },
        ..Default::default()
    };
    let ids = |v: &Vec<StatRequestAggNode>| v.iter().map(|x| x.sample_id.clone()).collect::<Vec<String>>();
    let mut v = vec![
        node("a", 0.3, 10.0, 100.0, 0.0),
        node("b", 0.1, 30.0, 300.0, 50.0),
        node("c", 0.3, 20.0, 50.0, 0.0),
    ];
    sort_request_agg(&mut v, RequestSort::QTime, AggSortKey::P99);
    assert!(ids(&v) == vec!["b", "c", "a"]);
    sort_request_agg(&mut v, RequestSort::DataReadRows, AggSortKey::P95);
    assert!(ids(&v) == vec!["a", "c", "b"]);
    sort_request_agg(&mut v, RequestSort::Errors, AggSortKey::Max);
    assert!(ids(&v) == vec!["c", "a", "b"]);
}

#[test]
fn test_take_top() {
    assert!(take_top(vec![1, 2, 3, 4], 2) == vec![3, 4]);
    assert!(take_top(vec![1, 2], 5) == vec![1, 2]);
}

#[test]
fn test_document() {
    let agg = sample_summary().aggregate();
    let slice = agg.to_slice();
    assert!(slice.index.len() == 2 && slice.requests.len() == 3);

    let mut buf = vec![];
    slice.write(&mut buf).unwrap();
    let text = String::from_utf8(buf.clone()).unwrap();
    assert!(text.starts_with("{\"Index\":[{\"IndexKey\":{\"RequestType\":\"render\""));
    assert!(text.contains("\"RequestStatus\":{\"200\":2,\"502\":1}"));
    assert!(text.contains("\"P95\":"));

    let reloaded = StatAggSumSlice::read(buf.as_slice()).unwrap();
    assert!(reloaded == slice);
    assert!(StatAggSum::from_slice(reloaded) == agg);

    // Missing fields take default values
    let partial = StatAggSumSlice::read("{\"Requests\":[{\"N\":3}]}".as_bytes()).unwrap();
    assert!(partial.index.is_empty());
    assert!(partial.requests[0].n == 3);
    assert!(!partial.requests[0].query_times.init);
}

#[test]
fn test_save_load() {
    let slice = sample_summary().aggregate().to_slice();
    let name = std::env::temp_dir().join(format!("chlog-save-load-{}.json", std::process::id()));
    let name = name.to_str().unwrap();
    slice.save(name).unwrap();
    assert!(StatAggSumSlice::load(name).unwrap() == slice);
    std::fs::remove_file(name).unwrap();
    assert!(StatAggSumSlice::load(name).is_err());
}
