/// Grouping keys for completed requests.
///
/// Requests are grouped by the shape of their query load rather than by literal text: each query
/// contributes its text plus a bucketed label for how wide its range is and how far back it ends.
/// Two requests for the same targets over similar windows thus share a key.
use crate::stat::Stat;

use rustutils::{format_duration, NANOS_PER_SEC, SECS_PER_DAY};
use serde::{Deserialize, Serialize};

/// A grouping key: the request type, the canonical text of all the queries, and the labels that
/// determine which report section the group lands in.

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StatKey {
    pub request_type: String,
    pub queries: String,
    pub duration_label: String,
    pub offset_label: String,
}

impl StatKey {
    pub fn is_empty(&self) -> bool {
        self.request_type.is_empty()
    }

    pub fn label(&self) -> LabelKey {
        LabelKey {
            request_type: self.request_type.clone(),
            duration_label: self.duration_label.clone(),
            offset_label: self.offset_label.clone(),
        }
    }
}

/// A report section.  The derived order (type, then duration, then offset) is the order in which
/// sections are reported.

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelKey {
    pub request_type: String,
    pub duration_label: String,
    pub offset_label: String,
}

/// One query of a group, with its labels, for display.

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StatQuery {
    pub query: String,
    pub duration_label: String,
    pub offset: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatKeys {
    pub index_key: StatKey,
    pub data_key: StatKey,
    pub index_queries: Vec<StatQuery>,
    pub data_queries: Vec<StatQuery>,
}

/// Derive the index and data keys of a request.
///
/// The index key text is `[{query='Q',index=DAYS}...]` and its duration label is the label of the
/// widest day span.  The data key text is `[{query='Q',render=DURATION,offset=OFFSET}...]`, its
/// duration label is that of the widest range and its offset label is that of the most recent
/// range end.  Parts with no value are left out.  On equal spans the first query wins.

pub fn build_stat_key(s: &Stat) -> StatKeys {
    let mut index_text = String::with_capacity(128);
    let mut data_text = String::with_capacity(128);
    let mut index_queries = Vec::with_capacity(s.queries.len());
    let mut data_queries = Vec::with_capacity(s.queries.len());

    let mut max_days = 0;
    let mut max_days_label = "".to_string();
    let mut max_duration = 0;
    let mut max_duration_label = "".to_string();
    let mut min_offset: Option<(i64, String)> = None;

    let now = s.timestamp / NANOS_PER_SEC;

    index_text.push('[');
    data_text.push('[');
    for q in &s.queries {
        index_text.push_str("{query='");
        index_text.push_str(&q.query);
        index_text.push('\'');

        let mut days_label = "".to_string();
        if q.days != 0 {
            days_label = format_duration(q.days.saturating_mul(SECS_PER_DAY), false);
            if q.days > max_days {
                max_days = q.days;
                max_days_label = days_label.clone();
            }
            index_text.push_str(",index=");
            index_text.push_str(&days_label);
        }

        data_text.push_str("{query='");
        data_text.push_str(&q.query);
        data_text.push('\'');

        let mut duration_label = "".to_string();
        let mut offset_label = "".to_string();
        if q.from != 0 && q.until != 0 {
            // Bounds come straight from the log, an unrepresentable span has no label
            let duration = q.until.checked_sub(q.from).and_then(i64::checked_abs).unwrap_or(0);
            if duration != 0 {
                duration_label = format_duration(duration, false);
                if duration > max_duration {
                    max_duration = duration;
                    max_duration_label = duration_label.clone();
                }
                data_text.push_str(",render=");
                data_text.push_str(&duration_label);
            }
            let offset = now.checked_sub(q.until).unwrap_or(0);
            if offset > 0 {
                offset_label = format_duration(offset, true);
                if !offset_label.is_empty() {
                    if min_offset.as_ref().map_or(true, |(m, _)| offset < *m) {
                        min_offset = Some((offset, offset_label.clone()));
                    }
                    data_text.push_str(",offset=");
                    data_text.push_str(&offset_label);
                }
            }
        }

        index_text.push('}');
        data_text.push('}');

        index_queries.push(StatQuery {
            query: q.query.clone(),
            duration_label: days_label,
            offset: "".to_string(),
        });
        data_queries.push(StatQuery {
            query: q.query.clone(),
            duration_label,
            offset: offset_label,
        });
    }
    index_text.push(']');
    data_text.push(']');

    StatKeys {
        index_key: StatKey {
            request_type: s.request_type.to_string(),
            queries: index_text,
            duration_label: max_days_label,
            offset_label: "".to_string(),
        },
        data_key: StatKey {
            request_type: s.request_type.to_string(),
            queries: data_text,
            duration_label: max_duration_label,
            offset_label: min_offset.map(|(_, label)| label).unwrap_or_default(),
        },
        index_queries,
        data_queries,
    }
}

#[cfg(test)]
use crate::stat::Query;

#[cfg(test)]
fn render_of(timestamp_secs: i64, queries: &[(&str, i64, i64, i64)]) -> Stat {
    let mut s = Stat::new("r", timestamp_secs * NANOS_PER_SEC);
    s.request_type = "render";
    for (query, days, from, until) in queries {
        s.queries.push(Query {
            query: query.to_string(),
            days: *days,
            from: *from,
            until: *until,
        });
    }
    s
}

#[test]
fn test_build_stat_key() {
    let s = render_of(1674288343, &[("test.a", 1, 1674288223, 1674288343)]);
    let k = build_stat_key(&s);
    assert!(k.index_key.request_type == "render");
    assert!(k.index_key.queries == "[{query='test.a',index=1d}]");
    assert!(k.index_key.duration_label == "1d");
    assert!(k.data_key.queries == "[{query='test.a',render=10m}]");
    assert!(k.data_key.duration_label == "10m");
    assert!(k.data_key.offset_label == "");
    assert!(
        k.data_queries
            == vec![StatQuery {
                query: "test.a".to_string(),
                duration_label: "10m".to_string(),
                offset: "".to_string(),
            }]
    );
    assert!(k.index_queries[0].duration_label == "1d");
}

#[test]
fn test_build_stat_key_offsets() {
    let now = 1674288343;
    let s = render_of(
        now,
        &[
            ("a", 3, now - 3 * 86400, now - 2 * 86400),
            ("b", 8, now - 8 * 86400, now - 86400 - 60),
            ("c", 0, 0, 0),
        ],
    );
    let k = build_stat_key(&s);
    assert!(k.index_key.queries == "[{query='a',index=7d}{query='b',index=1M}{query='c'}]");
    assert!(k.index_key.duration_label == "1M");
    assert!(
        k.data_key.queries
            == "[{query='a',render=1d,offset=2d}{query='b',render=7d,offset=2d}{query='c'}]"
    );
    assert!(k.data_key.duration_label == "7d");
    assert!(k.data_key.offset_label == "2d");
    assert!(k.data_queries[2] == StatQuery {
        query: "c".to_string(),
        ..Default::default()
    });
}

#[test]
fn test_min_offset() {
    let now = 1674288343;
    let s = render_of(
        now,
        &[
            ("a", 0, now - 30 * 86400, now - 20 * 86400),
            ("b", 0, now - 3 * 86400, now - 2 * 86400),
        ],
    );
    let k = build_stat_key(&s);
    assert!(k.data_key.offset_label == "2d");
    assert!(k.data_key.duration_label == "1M");
}

#[test]
fn test_extreme_bounds() {
    let now = 1674288343;
    let s = render_of(
        now,
        &[("x", i64::MAX, i64::MIN, 1), ("y", 0, 1, i64::MIN)],
    );
    let k = build_stat_key(&s);
    // Spans that don't fit an i64 get no label
    assert!(k.data_key.queries == "[{query='x',offset=53Y}{query='y'}]");
    assert!(k.data_key.duration_label == "");
    assert!(k.data_key.offset_label == "53Y");
    assert!(k.index_key.duration_label.ends_with('Y'));
}

#[test]
fn test_equal_shapes_share_keys() {
    // Same queries and spans, different ids and times
    let a = render_of(1674288343, &[("test.a", 1, 1674288223, 1674288343)]);
    let mut b = render_of(1674288400, &[("test.a", 1, 1674288280, 1674288400)]);
    b.id = "other".to_string();
    let ka = build_stat_key(&a);
    let kb = build_stat_key(&b);
    assert!(ka.index_key == kb.index_key);
    assert!(ka.data_key == kb.data_key);
    assert!(ka.data_key.label() == kb.data_key.label());
    assert!(!ka.data_key.is_empty());
    assert!(StatKey::default().is_empty());
}

#[test]
fn test_label_order() {
    let mut labels = vec![
        LabelKey {
            request_type: "render".to_string(),
            duration_label: "1h".to_string(),
            offset_label: "".to_string(),
        },
        LabelKey {
            request_type: "metrics_find".to_string(),
            duration_label: "".to_string(),
            offset_label: "".to_string(),
        },
        LabelKey {
            request_type: "render".to_string(),
            duration_label: "10m".to_string(),
            offset_label: "1d".to_string(),
        },
        LabelKey {
            request_type: "render".to_string(),
            duration_label: "10m".to_string(),
            offset_label: "".to_string(),
        },
    ];
    labels.sort();
    let names = labels
        .iter()
        .map(|l| format!("{}/{}/{}", l.request_type, l.duration_label, l.offset_label))
        .collect::<Vec<String>>();
    assert!(names == vec!["metrics_find//", "render/10m/", "render/10m/1d", "render/1h/"]);
}
