//! Threshold policy: turns snapshots into alerts
//!
//! Every check is independent; any combination can fire in one cycle.

use crate::alert::{Alert, AlertLevel, AlertType};
use crate::config::AlertThresholds;
use crate::models::{ClusterStatus, MetricsSnapshot};
use serde_json::json;

/// Pending proposals above this count raise a queue alert
pub const PENDING_PROPOSAL_CEILING: u64 = 100;

/// Alerts for a cluster health snapshot
pub fn health_alerts(status: &ClusterStatus, thresholds: &AlertThresholds) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if !status.healthy {
        alerts.push(
            Alert::new(
                AlertLevel::Critical,
                AlertType::ClusterHealth,
                "Cluster is unhealthy",
            )
            .with_detail("status", serde_json::to_value(status).unwrap_or_default()),
        );
    }

    if !status.has_leader {
        alerts.push(Alert::new(
            AlertLevel::Critical,
            AlertType::LeaderElection,
            "Cluster has no leader",
        ));
    }

    if status.network_partition {
        alerts.push(
            Alert::new(
                AlertLevel::Critical,
                AlertType::NetworkPartition,
                "Network partition detected",
            )
            .with_detail("member_count", status.member_count)
            .with_detail("quorum_size", status.quorum_size),
        );
    }

    for alarm in &status.alarms {
        alerts.push(
            Alert::new(
                AlertLevel::Warning,
                AlertType::EtcdAlarm,
                format!("etcd alarm: {} on member {}", alarm.alarm_type, alarm.member_id),
            )
            .with_detail("alarm", serde_json::to_value(alarm).unwrap_or_default()),
        );
    }

    let max_changes = thresholds.max_leader_changes_per_hour;
    if max_changes > 0 && status.leader_changes > max_changes {
        alerts.push(
            Alert::new(
                AlertLevel::Warning,
                AlertType::LeaderChurn,
                format!("More than {max_changes} leader changes in the last hour"),
            )
            .with_detail("leader_changes", status.leader_changes)
            .with_detail("threshold", max_changes),
        );
    }

    alerts
}

/// Alerts for a metrics snapshot
pub fn metric_alerts(snapshot: &MetricsSnapshot, thresholds: &AlertThresholds) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if snapshot.write_latency_p99 > thresholds.max_latency_ms as f64 {
        alerts.push(
            Alert::new(
                AlertLevel::Warning,
                AlertType::HighLatency,
                format!(
                    "Write latency p99 above {}ms threshold",
                    thresholds.max_latency_ms
                ),
            )
            .with_detail("p99_latency_ms", json!(snapshot.write_latency_p99))
            .with_detail("threshold_ms", thresholds.max_latency_ms),
        );
    }

    let db_size_mb = snapshot.db_size_mb();
    if db_size_mb > thresholds.max_database_size_mb as f64 {
        alerts.push(
            Alert::new(
                AlertLevel::Warning,
                AlertType::HighDiskUsage,
                format!(
                    "Database size exceeds {}MB threshold",
                    thresholds.max_database_size_mb
                ),
            )
            .with_detail("db_size_mb", json!(db_size_mb))
            .with_detail("threshold_mb", thresholds.max_database_size_mb),
        );
    }

    if snapshot.proposal_pending > PENDING_PROPOSAL_CEILING {
        alerts.push(
            Alert::new(
                AlertLevel::Warning,
                AlertType::HighProposalQueue,
                format!("More than {PENDING_PROPOSAL_CEILING} pending proposals"),
            )
            .with_detail("pending", snapshot.proposal_pending),
        );
    }

    alerts
}
