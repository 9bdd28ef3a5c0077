//! Percentile and histogram helpers over latency samples
//!
//! All functions expect samples in milliseconds. `percentile` assumes its
//! input is already sorted ascending; use [`sorted`] to prepare raw samples.

use std::collections::BTreeMap;

/// Latency histogram bucket labels, in ascending order
pub const LATENCY_BUCKETS: &[&str] = &[
    "<1ms", "1-5ms", "5-10ms", "10-50ms", "50-100ms", "100-500ms", ">500ms",
];

/// Rank-based percentile over a sorted sample set.
///
/// Uses index = floor((n - 1) * p), clamped to the slice bounds.
/// Returns 0 for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let idx = ((sorted.len() - 1) as f64 * p).floor();
    let idx = if idx.is_nan() || idx < 0.0 {
        0
    } else {
        (idx as usize).min(sorted.len() - 1)
    };

    sorted[idx]
}

/// Return a sorted copy of the samples. NaN values are dropped.
pub fn sorted(samples: &[f64]) -> Vec<f64> {
    let mut values: Vec<f64> = samples.iter().copied().filter(|v| !v.is_nan()).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    values
}

/// p50/p95/p99 triple computed from one sample set
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Percentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Percentiles {
    /// Sort the samples and compute the three standard percentiles
    pub fn from_samples(samples: &[f64]) -> Self {
        let values = sorted(samples);
        Self {
            p50: percentile(&values, 0.50),
            p95: percentile(&values, 0.95),
            p99: percentile(&values, 0.99),
        }
    }
}

/// Bucket label for a latency value in milliseconds
pub fn latency_bucket(latency_ms: f64) -> &'static str {
    match latency_ms {
        l if l < 1.0 => LATENCY_BUCKETS[0],
        l if l < 5.0 => LATENCY_BUCKETS[1],
        l if l < 10.0 => LATENCY_BUCKETS[2],
        l if l < 50.0 => LATENCY_BUCKETS[3],
        l if l < 100.0 => LATENCY_BUCKETS[4],
        l if l < 500.0 => LATENCY_BUCKETS[5],
        _ => LATENCY_BUCKETS[6],
    }
}

/// Count samples per latency bucket. Empty buckets are omitted.
pub fn latency_histogram(samples: &[f64]) -> BTreeMap<&'static str, usize> {
    let mut histogram = BTreeMap::new();
    for &sample in samples {
        *histogram.entry(latency_bucket(sample)).or_insert(0) += 1;
    }
    histogram
}
