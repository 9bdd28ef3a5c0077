//! Metrics collection from the cluster
//!
//! This module provides:
//! - Four concurrent probes (database, latency, consensus, client) merged
//!   into one [`MetricsSnapshot`] per cycle
//! - A bounded history of latency measurements
//! - On-demand performance measurement and request-rate sampling

mod performance;


pub use performance::PERF_TEST_PREFIX;

use crate::cluster::{ClusterClient, ClusterError, ClusterResult};
use crate::error::{MonitorError, ProbeFailure, Result};
use crate::history::BoundedHistory;
use crate::models::{LatencyMeasurement, MetricsSnapshot, LATENCY_HISTORY_CAPACITY};
use crate::stats::Percentiles;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Key read by the latency probe
pub const HEALTH_CHECK_KEY: &str = "/etcd-monitor/health-check";

/// Prefix of the disposable keys written by the latency probe
pub const LATENCY_TEST_KEY_PREFIX: &str = "/etcd-monitor/latency-test-";

/// Reads and writes issued per latency probe
pub const LATENCY_SAMPLES: usize = 10;

const LATENCY_TEST_VALUE: &str = "test-value";

/// Proposal counters the status API does not expose
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProposalCounts {
    pub pending: u64,
    pub failed: u64,
}

/// External source of pending and failed proposal counts,
/// e.g. a scrape of the members' own metrics endpoints
#[async_trait]
pub trait ProposalSource: Send + Sync {
    async fn proposal_counts(&self) -> anyhow::Result<ProposalCounts>;
}

/// Snapshot plus the probes that failed while producing it
#[derive(Debug, Clone)]
pub struct CollectionOutcome {
    pub snapshot: MetricsSnapshot,
    pub failures: Vec<ProbeFailure>,
}

impl CollectionOutcome {
    /// True when every probe failed and the snapshot carries no data
    pub fn all_failed(&self) -> bool {
        self.failures.len() >= PROBE_COUNT
    }
}

const PROBE_COUNT: usize = 4;

#[derive(Debug, Default)]
struct DatabaseMetrics {
    db_size: i64,
    db_size_in_use: i64,
}

#[derive(Debug, Default)]
struct LatencyMetrics {
    read: Percentiles,
    write: Percentiles,
}

#[derive(Debug, Default)]
struct ConsensusMetrics {
    committed: u64,
    applied: u64,
    pending: u64,
    failed: u64,
}

struct CollectorState {
    latency_history: BoundedHistory<LatencyMeasurement>,
    /// Committed index and when it was sampled, for the request rate
    last_committed: Option<(Instant, u64)>,
}

/// Metrics collector for one cluster
pub struct MetricsCollector {
    client: Arc<dyn ClusterClient>,
    proposals: Option<Arc<dyn ProposalSource>>,
    state: Mutex<CollectorState>,
    /// Distinguishes the test keys of overlapping latency probes
    latency_probe_seq: AtomicU64,
}

impl MetricsCollector {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            client,
            proposals: None,
            state: Mutex::new(CollectorState {
                latency_history: BoundedHistory::new(LATENCY_HISTORY_CAPACITY),
                last_committed: None,
            }),
            latency_probe_seq: AtomicU64::new(0),
        }
    }

    /// Use `source` for pending and failed proposal counts
    pub fn with_proposal_source(mut self, source: Arc<dyn ProposalSource>) -> Self {
        self.proposals = Some(source);
        self
    }

    /// Collect one snapshot. Fails only when all probes fail.
    pub async fn collect_metrics(&self) -> Result<MetricsSnapshot> {
        let outcome = self.collect().await;
        if outcome.all_failed() {
            return Err(MonitorError::AllProbesFailed(outcome.failures));
        }
        Ok(outcome.snapshot)
    }

    /// Run all probes concurrently and merge their results
    pub async fn collect(&self) -> CollectionOutcome {
        let mut snapshot = MetricsSnapshot::new(Utc::now());
        let mut failures = Vec::new();

        let (database, latency, consensus, client) = tokio::join!(
            self.collect_database_metrics(),
            self.collect_latency_metrics(),
            self.collect_consensus_metrics(),
            self.collect_client_metrics(),
        );

        match database {
            Ok(db) => {
                snapshot.db_size = db.db_size;
                snapshot.db_size_in_use = db.db_size_in_use;
            }
            Err(e) => failures.push(probe_failure("database", e)),
        }

        match latency {
            Ok(latency) => {
                snapshot.read_latency_p50 = latency.read.p50;
                snapshot.read_latency_p95 = latency.read.p95;
                snapshot.read_latency_p99 = latency.read.p99;
                snapshot.write_latency_p50 = latency.write.p50;
                snapshot.write_latency_p95 = latency.write.p95;
                snapshot.write_latency_p99 = latency.write.p99;
            }
            Err(e) => failures.push(probe_failure("latency", e)),
        }

        match consensus {
            Ok(raft) => {
                snapshot.proposal_committed = raft.committed;
                snapshot.proposal_applied = raft.applied;
                snapshot.proposal_pending = raft.pending;
                snapshot.proposal_failed = raft.failed;
                snapshot.request_rate = self.update_request_rate(raft.committed);
            }
            Err(e) => failures.push(probe_failure("consensus", e)),
        }

        match client {
            Ok(connections) => snapshot.active_connections = connections,
            Err(e) => failures.push(probe_failure("client", e)),
        }

        if !failures.is_empty() {
            warn!(
                error_count = failures.len(),
                errors = ?failures.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "Some metrics collection failed"
            );
        }

        CollectionOutcome { snapshot, failures }
    }

    /// Copy of the latency measurement history, oldest first
    pub fn latency_history(&self) -> Vec<LatencyMeasurement> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latency_history
            .to_vec()
    }

    /// Database size from the member that reports itself as leader.
    /// Zero when no leader answers.
    async fn collect_database_metrics(&self) -> ClusterResult<DatabaseMetrics> {
        let members = self.client.member_list().await?;

        for member in &members {
            let Some(endpoint) = member.client_endpoint() else {
                continue;
            };

            match self.client.status(endpoint).await {
                Ok(status) if status.leader == member.id => {
                    return Ok(DatabaseMetrics {
                        db_size: status.db_size,
                        db_size_in_use: status.db_size_in_use,
                    });
                }
                Ok(_) => {}
                Err(e) => debug!(member_id = member.id, error = %e, "Status query failed"),
            }
        }

        debug!("No leader reported a database size");
        Ok(DatabaseMetrics::default())
    }

    /// Timed reads of the health key and writes to a throwaway key
    async fn collect_latency_metrics(&self) -> ClusterResult<LatencyMetrics> {
        let mut last_error = None;

        let mut reads = Vec::with_capacity(LATENCY_SAMPLES);
        for _ in 0..LATENCY_SAMPLES {
            let start = Instant::now();
            match self.client.get(HEALTH_CHECK_KEY).await {
                Ok(_) => reads.push(elapsed_ms(start)),
                Err(e) => last_error = Some(e),
            }
        }

        let test_key = self.latency_test_key();
        let mut writes = Vec::with_capacity(LATENCY_SAMPLES);
        for _ in 0..LATENCY_SAMPLES {
            let start = Instant::now();
            match self.client.put(&test_key, LATENCY_TEST_VALUE).await {
                Ok(()) => writes.push(elapsed_ms(start)),
                Err(e) => last_error = Some(e),
            }
        }

        if let Err(e) = self.client.delete(&test_key).await {
            debug!(key = %test_key, error = %e, "Failed to clean up latency test key");
        }

        if reads.is_empty() && writes.is_empty() {
            return Err(last_error.unwrap_or(ClusterError::Unavailable(
                "no latency samples".to_string(),
            )));
        }

        let latency = LatencyMetrics {
            read: Percentiles::from_samples(&reads),
            write: Percentiles::from_samples(&writes),
        };

        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latency_history
            .push(LatencyMeasurement {
                timestamp: Utc::now(),
                read_latency: ms_to_duration(latency.read.p50),
                write_latency: ms_to_duration(latency.write.p50),
                operation: "health-check".to_string(),
            });

        Ok(latency)
    }

    /// Unique disposable key for one latency probe
    fn latency_test_key(&self) -> String {
        let seq = self.latency_probe_seq.fetch_add(1, Ordering::Relaxed);
        format!("{LATENCY_TEST_KEY_PREFIX}{}-{seq}", Utc::now().timestamp())
    }

    /// Sum of applied indices across reachable members
    async fn collect_consensus_metrics(&self) -> ClusterResult<ConsensusMetrics> {
        let members = self.client.member_list().await?;
        let mut raft = ConsensusMetrics::default();

        for member in &members {
            let Some(endpoint) = member.client_endpoint() else {
                continue;
            };

            match self.client.status(endpoint).await {
                Ok(status) => {
                    raft.committed = raft.committed.saturating_add(status.raft_applied_index);
                    raft.applied = raft.applied.saturating_add(status.raft_applied_index);
                }
                Err(e) => {
                    warn!(member_id = member.id, error = %e, "Failed to get member status for consensus metrics");
                }
            }
        }

        if let Some(source) = &self.proposals {
            match source.proposal_counts().await {
                Ok(counts) => {
                    raft.pending = counts.pending;
                    raft.failed = counts.failed;
                }
                Err(e) => warn!(error = %e, "Failed to read proposal counts"),
            }
        }

        Ok(raft)
    }

    /// Member count stands in for client connections
    async fn collect_client_metrics(&self) -> ClusterResult<usize> {
        Ok(self.client.member_list().await?.len())
    }

    /// Committed-index delta per second since the previous sample
    fn update_request_rate(&self, committed: u64) -> f64 {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let rate = match state.last_committed {
            Some((at, previous)) => {
                rate_per_sec(committed.saturating_sub(previous), now.duration_since(at))
            }
            None => 0.0,
        };
        state.last_committed = Some((now, committed));
        rate
    }
}

fn probe_failure(probe: &'static str, error: ClusterError) -> ProbeFailure {
    ProbeFailure {
        probe,
        error: error.to_string(),
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn ms_to_duration(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::from_secs_f64(ms / 1000.0)
    } else {
        Duration::ZERO
    }
}

fn rate_per_sec(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}
