/// Order statistics of one sample buffer.
use crate::sorts::AggSortKey;

use rustutils::{percentile, PercentileError};
use serde::{Deserialize, Serialize};

/// Min, max and the reported percentiles of a buffer.  `init` is false if the statistics could not
/// be computed (no samples, or too few for a percentile), in which case the quantity is not
/// reported.

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AggNode {
    pub init: bool,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl AggNode {
    /// Compute the statistics of `values`, which need not be sorted.

    pub fn calc(values: &[f64]) -> Result<AggNode, PercentileError> {
        if values.is_empty() {
            return Err(PercentileError::EmptyInput);
        }
        let mut input = values.to_vec();
        input.sort_by(|a, b| a.total_cmp(b));
        Ok(AggNode {
            init: true,
            min: input[0],
            max: input[input.len() - 1],
            p50: percentile(&input, 0.5)?,
            p90: percentile(&input, 0.9)?,
            p95: percentile(&input, 0.95)?,
            p99: percentile(&input, 0.99)?,
        })
    }

    /// As `calc`, but failure yields an uninitialized node.

    pub fn from_samples(values: &[f64]) -> AggNode {
        AggNode::calc(values).unwrap_or_default()
    }

    pub fn by_key(&self, key: AggSortKey) -> f64 {
        match key {
            AggSortKey::Max => self.max,
            AggSortKey::P99 => self.p99,
            AggSortKey::P95 => self.p95,
            AggSortKey::P90 => self.p90,
            AggSortKey::P50 => self.p50,
        }
    }
}

#[test]
fn test_calc() {
    let n = AggNode::calc(&[0.3, 0.1]).unwrap();
    assert!(n.init);
    assert!(n.min == 0.1 && n.max == 0.3);
    assert!(n.p50 == 0.1);
    assert!(n.p90 == 0.2);
    assert!(n.by_key(AggSortKey::Max) == 0.3);
    assert!(n.by_key(AggSortKey::P50) == 0.1);

    let n = AggNode::calc(&[5.0]).unwrap();
    assert!(n.min == 5.0 && n.max == 5.0 && n.p50 == 5.0 && n.p99 == 5.0);

    let samples = (1..=100).map(|x| x as f64).collect::<Vec<f64>>();
    let n = AggNode::calc(&samples).unwrap();
    assert!(n.p50 == 50.0 && n.p90 == 90.0 && n.p95 == 95.0 && n.p99 == 99.0);
}

#[test]
fn test_calc_errors() {
    assert!(AggNode::calc(&[]) == Err(PercentileError::EmptyInput));
    let n = AggNode::calc(&[3.0, 1.0, 2.0]).unwrap();
    assert!(n.p50 == 1.5);
    let n = AggNode::from_samples(&[]);
    assert!(!n.init);
    assert!(n == AggNode::default());
}
