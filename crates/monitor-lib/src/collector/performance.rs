//! On-demand performance measurement

use super::{elapsed_ms, rate_per_sec, MetricsCollector};
use crate::error::Result;
use crate::models::PerformanceReport;
use crate::stats::{latency_histogram, Percentiles};
use chrono::Utc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Prefix of the keys written by [`MetricsCollector::measure_performance`]
pub const PERF_TEST_PREFIX: &str = "/perf-test/";

impl MetricsCollector {
    /// Run `operations` sequential reads, then as many sequential writes,
    /// and report latency percentiles and throughput. Keys written are
    /// removed afterwards.
    pub async fn measure_performance(&self, operations: usize) -> Result<PerformanceReport> {
        let start_time = Utc::now();
        let started = Instant::now();

        let mut reads = Vec::with_capacity(operations);
        let mut read_errors = 0;
        for i in 0..operations {
            let key = format!("{PERF_TEST_PREFIX}key-{i}");
            let start = Instant::now();
            match self.client.get(&key).await {
                Ok(_) => reads.push(elapsed_ms(start)),
                Err(_) => read_errors += 1,
            }
        }

        let mut writes = Vec::with_capacity(operations);
        let mut write_errors = 0;
        for i in 0..operations {
            let key = format!("{PERF_TEST_PREFIX}key-{i}");
            let start = Instant::now();
            match self.client.put(&key, "test-value").await {
                Ok(()) => writes.push(elapsed_ms(start)),
                Err(_) => write_errors += 1,
            }
        }

        let duration = started.elapsed();
        let end_time = Utc::now();

        if let Err(e) = self.client.delete_prefix(PERF_TEST_PREFIX).await {
            warn!(prefix = PERF_TEST_PREFIX, error = %e, "Failed to clean up performance test keys");
        }

        let read = Percentiles::from_samples(&reads);
        let write = Percentiles::from_samples(&writes);
        let throughput = rate_per_sec((operations * 2) as u64, duration);
        let histogram = latency_histogram(&[reads.as_slice(), writes.as_slice()].concat())
            .into_iter()
            .map(|(bucket, count)| (bucket.to_string(), count))
            .collect();

        info!(
            operations,
            throughput,
            read_errors,
            write_errors,
            duration_ms = duration.as_millis() as u64,
            "Performance measurement complete"
        );

        Ok(PerformanceReport {
            start_time,
            end_time,
            duration,
            operations,
            throughput,
            read_latency_p50: read.p50,
            read_latency_p95: read.p95,
            read_latency_p99: read.p99,
            write_latency_p50: write.p50,
            write_latency_p95: write.p95,
            write_latency_p99: write.p99,
            read_errors,
            write_errors,
            latency_histogram: histogram,
        })
    }

    /// Committed proposals per second over `window`. Leaves the
    /// per-cycle request-rate baseline and latency history untouched.
    pub async fn calculate_request_rate(&self, window: Duration) -> Result<f64> {
        let started = Instant::now();
        let initial = self.collect_consensus_metrics().await?;

        tokio::time::sleep(window).await;

        let last = self.collect_consensus_metrics().await?;
        let committed = last.committed.saturating_sub(initial.committed);

        Ok(rate_per_sec(committed, started.elapsed()))
    }
}
