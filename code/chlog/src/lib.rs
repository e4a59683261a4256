/// A graphite-clickhouse log is newline-delimited JSON where every line carries a `request_id`.  A
/// single HTTP request to the server produces several lines: the targets it was asked for, one line
/// per clickhouse query it ran (first against an index table to find the paths, then against a
/// data table for the points), lines for the finder cache, and a final access line with the status
/// and the elapsed time.  Lines for concurrent requests are interleaved.
///
/// This library has as its fundamental task to reassemble those lines into one record per request
/// and to provide the analyses on top of that:
///
/// - Read log files and fold their lines into per-request records (`Stat`), detecting completion
///   and request ids that were recycled before their request completed.
///
/// - Select the heaviest requests from a set of records by one of several orders.
///
/// - Group requests by the shape of their queries, compute order statistics per group, and rank
///   the groups.  The reduced groups can be saved and loaded again.
mod aggnode;
mod aggregate;
mod keys;
mod logentry;
mod logfile;
mod sorts;
mod stat;
mod top;

// The per-request record and its parts.

pub use stat::DataStat;
pub use stat::IndexStat;
pub use stat::Query;
pub use stat::Stat;
pub use stat::Status;

// Orders on records, and the less-than predicate implementing them.

pub use stat::less_stat;
pub use stat::Sort;

// Apply one decoded log line to the table of in-flight records.

pub use logentry::process_log_entry;
pub use logentry::LEAK_WINDOW;

// Text normalization used by the reducer, exposed for reports.

pub use logentry::metrics_find_cache_query;
pub use logentry::read_error;
pub use logentry::strip_error;
pub use logentry::tag_query;

// Read a log stream through the reducer.

pub use logfile::for_each_log_entry;
pub use logfile::open_log;
pub use logfile::read_log_file;
pub use logfile::ReadStats;

// Pick the top N records.

pub use top::get_top;

// Grouping keys.

pub use keys::build_stat_key;
pub use keys::LabelKey;
pub use keys::StatKey;
pub use keys::StatKeys;
pub use keys::StatQuery;

// Order statistics of a sample buffer.

pub use aggnode::AggNode;

// Orders on groups.

pub use sorts::AggSortKey;
pub use sorts::IndexSort;
pub use sorts::RequestSort;

// Accumulate groups, reduce them, rank them, and persist them.

pub use aggregate::sort_index_agg;
pub use aggregate::sort_request_agg;
pub use aggregate::take_top;
pub use aggregate::StatAggSum;
pub use aggregate::StatAggSumSlice;
pub use aggregate::StatIndexAggNode;
pub use aggregate::StatIndexNode;
pub use aggregate::StatIndexSummary;
pub use aggregate::StatRequestAggNode;
pub use aggregate::StatRequestNode;
pub use aggregate::StatRequestSummary;
pub use aggregate::StatSummary;
