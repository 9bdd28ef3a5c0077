//! Observability infrastructure for the cluster monitor
//!
//! Provides:
//! - Prometheus metrics mirroring the latest cluster status and metrics snapshot
//! - Structured logging of lifecycle and alert events with tracing

use crate::alert::{Alert, AlertLevel};
use crate::models::{ClusterStatus, MetricsSnapshot};
use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter,
    register_int_counter_vec, register_int_gauge, register_int_gauge_vec, GaugeVec, HistogramVec,
    IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for cycle durations (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    cluster_healthy: IntGauge,
    cluster_has_leader: IntGauge,
    cluster_member_count: IntGauge,
    cluster_quorum_size: IntGauge,
    cluster_leader_changes: IntGauge,
    cluster_network_partition: IntGauge,
    cluster_alarms: IntGauge,
    latency_ms: GaugeVec,
    db_size_bytes: IntGaugeVec,
    proposals: IntGaugeVec,
    active_connections: IntGauge,
    cycle_duration_seconds: HistogramVec,
    health_check_failures: IntCounter,
    probe_failures: IntCounterVec,
    alerts_triggered: IntCounterVec,
    alerts_deduplicated: IntCounter,
    channel_failures: IntCounterVec,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            cluster_healthy: register_int_gauge!(
                "etcd_monitor_cluster_healthy",
                "Whether the cluster is healthy (1) or not (0)"
            )
            .expect("Failed to register cluster_healthy"),

            cluster_has_leader: register_int_gauge!(
                "etcd_monitor_cluster_has_leader",
                "Whether the cluster has a leader (1) or not (0)"
            )
            .expect("Failed to register cluster_has_leader"),

            cluster_member_count: register_int_gauge!(
                "etcd_monitor_cluster_member_count",
                "Number of members in the cluster"
            )
            .expect("Failed to register cluster_member_count"),

            cluster_quorum_size: register_int_gauge!(
                "etcd_monitor_cluster_quorum_size",
                "Members required for quorum"
            )
            .expect("Failed to register cluster_quorum_size"),

            cluster_leader_changes: register_int_gauge!(
                "etcd_monitor_cluster_leader_changes_last_hour",
                "Leader changes observed in the trailing hour"
            )
            .expect("Failed to register cluster_leader_changes"),

            cluster_network_partition: register_int_gauge!(
                "etcd_monitor_cluster_network_partition",
                "Whether fewer than quorum members are reachable"
            )
            .expect("Failed to register cluster_network_partition"),

            cluster_alarms: register_int_gauge!(
                "etcd_monitor_cluster_alarms",
                "Number of active cluster alarms"
            )
            .expect("Failed to register cluster_alarms"),

            latency_ms: register_gauge_vec!(
                "etcd_monitor_latency_milliseconds",
                "Synthetic probe latency percentiles",
                &["operation", "quantile"]
            )
            .expect("Failed to register latency_ms"),

            db_size_bytes: register_int_gauge_vec!(
                "etcd_monitor_db_size_bytes",
                "Leader database size",
                &["kind"]
            )
            .expect("Failed to register db_size_bytes"),

            proposals: register_int_gauge_vec!(
                "etcd_monitor_proposals",
                "Consensus proposal counters",
                &["state"]
            )
            .expect("Failed to register proposals"),

            active_connections: register_int_gauge!(
                "etcd_monitor_active_connections",
                "Approximate active client connections"
            )
            .expect("Failed to register active_connections"),

            cycle_duration_seconds: register_histogram_vec!(
                "etcd_monitor_cycle_duration_seconds",
                "Time spent in one monitoring cycle",
                &["loop"],
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            health_check_failures: register_int_counter!(
                "etcd_monitor_health_check_failures_total",
                "Health checks that could not list members"
            )
            .expect("Failed to register health_check_failures"),

            probe_failures: register_int_counter_vec!(
                "etcd_monitor_probe_failures_total",
                "Metrics probe failures",
                &["probe"]
            )
            .expect("Failed to register probe_failures"),

            alerts_triggered: register_int_counter_vec!(
                "etcd_monitor_alerts_triggered_total",
                "Alerts recorded after deduplication",
                &["level"]
            )
            .expect("Failed to register alerts_triggered"),

            alerts_deduplicated: register_int_counter!(
                "etcd_monitor_alerts_deduplicated_total",
                "Alerts suppressed by the dedup window"
            )
            .expect("Failed to register alerts_deduplicated"),

            channel_failures: register_int_counter_vec!(
                "etcd_monitor_channel_failures_total",
                "Failed alert channel deliveries",
                &["channel"]
            )
            .expect("Failed to register channel_failures"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    /// Mirror a cluster status into the gauges
    pub fn record_status(&self, status: &ClusterStatus) {
        let m = self.inner();
        m.cluster_healthy.set(status.healthy as i64);
        m.cluster_has_leader.set(status.has_leader as i64);
        m.cluster_member_count.set(status.member_count as i64);
        m.cluster_quorum_size.set(status.quorum_size as i64);
        m.cluster_leader_changes.set(status.leader_changes as i64);
        m.cluster_network_partition.set(status.network_partition as i64);
        m.cluster_alarms.set(status.alarms.len() as i64);
    }

    /// Mirror a metrics snapshot into the gauges
    pub fn record_snapshot(&self, snapshot: &MetricsSnapshot) {
        let m = self.inner();
        let latencies = [
            ("read", "p50", snapshot.read_latency_p50),
            ("read", "p95", snapshot.read_latency_p95),
            ("read", "p99", snapshot.read_latency_p99),
            ("write", "p50", snapshot.write_latency_p50),
            ("write", "p95", snapshot.write_latency_p95),
            ("write", "p99", snapshot.write_latency_p99),
        ];
        for (operation, quantile, value) in latencies {
            m.latency_ms.with_label_values(&[operation, quantile]).set(value);
        }

        m.db_size_bytes.with_label_values(&["total"]).set(snapshot.db_size);
        m.db_size_bytes
            .with_label_values(&["in_use"])
            .set(snapshot.db_size_in_use);

        let proposals = [
            ("committed", snapshot.proposal_committed),
            ("applied", snapshot.proposal_applied),
            ("pending", snapshot.proposal_pending),
            ("failed", snapshot.proposal_failed),
        ];
        for (state, value) in proposals {
            m.proposals
                .with_label_values(&[state])
                .set(i64::try_from(value).unwrap_or(i64::MAX));
        }

        m.active_connections.set(snapshot.active_connections as i64);
    }

    pub fn observe_cycle(&self, loop_name: &str, duration_secs: f64) {
        self.inner()
            .cycle_duration_seconds
            .with_label_values(&[loop_name])
            .observe(duration_secs);
    }

    pub fn inc_health_check_failures(&self) {
        self.inner().health_check_failures.inc();
    }

    pub fn inc_probe_failures(&self, probe: &str) {
        self.inner().probe_failures.with_label_values(&[probe]).inc();
    }

    pub fn inc_alerts_triggered(&self, level: AlertLevel) {
        self.inner()
            .alerts_triggered
            .with_label_values(&[level.as_str()])
            .inc();
    }

    pub fn inc_alerts_deduplicated(&self) {
        self.inner().alerts_deduplicated.inc();
    }

    pub fn inc_channel_failures(&self, channel: &str) {
        self.inner()
            .channel_failures
            .with_label_values(&[channel])
            .inc();
    }
}

/// Structured logger for monitor events
///
/// Emits consistent `event = ...` records for lifecycle transitions
/// and alerts, independent of which channels are configured.
#[derive(Clone)]
pub struct StructuredLogger {
    service_name: String,
}

impl StructuredLogger {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, endpoints: &[String]) {
        info!(
            event = "monitor_started",
            service = %self.service_name,
            version = %version,
            endpoints = ?endpoints,
            "Monitor service started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_stopped",
            service = %self.service_name,
            reason = %reason,
            "Monitor service stopped"
        );
    }

    /// Log an alert at a level matching its severity
    pub fn log_alert(&self, alert: &Alert) {
        let details = serde_json::to_string(&alert.details).unwrap_or_default();
        match alert.level {
            AlertLevel::Critical => error!(
                event = "alert",
                service = %self.service_name,
                level = %alert.level,
                alert_type = %alert.alert_type,
                details = %details,
                timestamp = %alert.timestamp.to_rfc3339(),
                "{}", alert.message
            ),
            AlertLevel::Warning => warn!(
                event = "alert",
                service = %self.service_name,
                level = %alert.level,
                alert_type = %alert.alert_type,
                details = %details,
                timestamp = %alert.timestamp.to_rfc3339(),
                "{}", alert.message
            ),
            AlertLevel::Info => info!(
                event = "alert",
                service = %self.service_name,
                level = %alert.level,
                alert_type = %alert.alert_type,
                details = %details,
                timestamp = %alert.timestamp.to_rfc3339(),
                "{}", alert.message
            ),
        }
    }

    pub fn log_leader_change(&self, old_leader: u64, new_leader: u64) {
        warn!(
            event = "leader_changed",
            service = %self.service_name,
            old_leader = old_leader,
            new_leader = new_leader,
            "Leader change detected"
        );
    }
}
