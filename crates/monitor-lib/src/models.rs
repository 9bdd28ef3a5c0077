//! Core data models for the cluster monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Capacity of the leader-change history
pub const LEADER_HISTORY_CAPACITY: usize = 100;

/// Capacity of the latency measurement history
pub const LATENCY_HISTORY_CAPACITY: usize = 1000;

/// Minimum number of reachable members for a cluster of `member_count`
pub fn quorum_size(member_count: usize) -> usize {
    member_count / 2 + 1
}

/// Point-in-time health of the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub healthy: bool,
    pub leader_id: u64,
    pub member_count: usize,
    pub quorum_size: usize,
    pub has_leader: bool,
    /// Leader changes observed in the trailing hour
    pub leader_changes: usize,
    pub last_leader_change: Option<DateTime<Utc>>,
    pub network_partition: bool,
    pub alarms: Vec<AlarmInfo>,
    pub last_check: DateTime<Utc>,
}

impl Default for ClusterStatus {
    fn default() -> Self {
        Self {
            healthy: false,
            leader_id: 0,
            member_count: 0,
            quorum_size: 0,
            has_leader: false,
            leader_changes: 0,
            last_leader_change: None,
            network_partition: false,
            alarms: Vec::new(),
            last_check: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// An alarm raised by a cluster member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmInfo {
    pub alarm_type: String,
    pub member_id: u64,
    pub triggered: DateTime<Utc>,
}

/// A recorded leader transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderChange {
    pub timestamp: DateTime<Utc>,
    pub old_leader_id: u64,
    pub new_leader_id: u64,
}

/// Per-member view rebuilt on every health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub id: u64,
    pub name: String,
    pub peer_urls: Vec<String>,
    pub client_urls: Vec<String>,
    pub is_leader: bool,
    pub is_healthy: bool,
    pub db_size: i64,
    pub version: String,
}

/// Point-in-time performance metrics.
///
/// Every field stays at zero when the probe responsible for it fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,

    /// Operations per second
    pub request_rate: f64,
    pub read_latency_p50: f64,
    pub read_latency_p95: f64,
    pub read_latency_p99: f64,
    pub write_latency_p50: f64,
    pub write_latency_p95: f64,
    pub write_latency_p99: f64,

    /// Bytes
    pub db_size: i64,
    pub db_size_in_use: i64,

    pub proposal_committed: u64,
    pub proposal_applied: u64,
    pub proposal_pending: u64,
    pub proposal_failed: u64,

    pub memory_usage: u64,
    pub cpu_usage: f64,
    pub disk_usage: u64,
    pub network_in: u64,
    pub network_out: u64,

    pub active_connections: usize,
    pub watcher_count: usize,

    pub fsync_duration_p95: f64,
    pub commit_duration_p95: f64,
}

impl MetricsSnapshot {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            request_rate: 0.0,
            read_latency_p50: 0.0,
            read_latency_p95: 0.0,
            read_latency_p99: 0.0,
            write_latency_p50: 0.0,
            write_latency_p95: 0.0,
            write_latency_p99: 0.0,
            db_size: 0,
            db_size_in_use: 0,
            proposal_committed: 0,
            proposal_applied: 0,
            proposal_pending: 0,
            proposal_failed: 0,
            memory_usage: 0,
            cpu_usage: 0.0,
            disk_usage: 0,
            network_in: 0,
            network_out: 0,
            active_connections: 0,
            watcher_count: 0,
            fsync_duration_p95: 0.0,
            commit_duration_p95: 0.0,
        }
    }

    /// Database size in MiB
    pub fn db_size_mb(&self) -> f64 {
        self.db_size as f64 / (1024.0 * 1024.0)
    }
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }
}

/// One latency probe cycle, kept for historical inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyMeasurement {
    pub timestamp: DateTime<Utc>,
    pub read_latency: Duration,
    pub write_latency: Duration,
    pub operation: String,
}

/// Result of an on-demand performance measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: Duration,
    pub operations: usize,
    /// Successful and failed operations per second, reads plus writes
    pub throughput: f64,
    pub read_latency_p50: f64,
    pub read_latency_p95: f64,
    pub read_latency_p99: f64,
    pub write_latency_p50: f64,
    pub write_latency_p95: f64,
    pub write_latency_p99: f64,
    pub read_errors: usize,
    pub write_errors: usize,
    /// Successful read and write samples per latency bucket
    pub latency_histogram: BTreeMap<String, usize>,
}
