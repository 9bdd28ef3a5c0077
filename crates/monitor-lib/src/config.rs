//! Monitor service configuration

use crate::alert::{ChannelSpec, DEFAULT_DEDUP_WINDOW};
use crate::cluster::ClusterConfig;
use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Thresholds applied to health and metrics snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub max_latency_ms: u64,
    pub max_database_size_mb: u64,
    pub min_available_nodes: usize,
    /// Zero disables the leader churn check
    pub max_leader_changes_per_hour: usize,
    pub max_error_rate: f64,
    pub min_disk_space_percent: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_latency_ms: 100,
            max_database_size_mb: 8192,
            min_available_nodes: 2,
            max_leader_changes_per_hour: 3,
            max_error_rate: 0.05,
            min_disk_space_percent: 10.0,
        }
    }
}

/// Configuration consumed by [`crate::MonitorService`]
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub cluster: ClusterConfig,
    pub health_check_interval: Duration,
    pub metrics_interval: Duration,
    /// Delay before resubscribing after the key watch ends
    pub watch_interval: Duration,
    pub thresholds: AlertThresholds,
    pub dedup_window: Duration,
    pub channels: Vec<ChannelSpec>,
    /// Carried for the benchmark tool; the monitor itself does not use these
    pub benchmark_enabled: bool,
    pub benchmark_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            health_check_interval: Duration::from_secs(30),
            metrics_interval: Duration::from_secs(10),
            watch_interval: Duration::from_secs(5),
            thresholds: AlertThresholds::default(),
            dedup_window: DEFAULT_DEDUP_WINDOW,
            channels: Vec::new(),
            benchmark_enabled: false,
            benchmark_interval: Duration::from_secs(3600),
        }
    }
}

impl MonitorConfig {
    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.cluster.endpoints.is_empty() {
            return Err(MonitorError::Config("at least one endpoint is required".to_string()));
        }

        let intervals = [
            ("health_check_interval", self.health_check_interval),
            ("metrics_interval", self.metrics_interval),
            ("watch_interval", self.watch_interval),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(MonitorError::Config(format!("{name} must be greater than zero")));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.thresholds.max_latency_ms, 100);
        assert_eq!(config.dedup_window, Duration::from_secs(300));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = MonitorConfig {
            metrics_interval: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("metrics_interval"));
    }

    #[test]
    fn test_validate_rejects_missing_endpoints() {
        let mut config = MonitorConfig::default();
        config.cluster.endpoints.clear();
        assert!(matches!(config.validate(), Err(MonitorError::Config(_))));
    }

    #[test]
    fn test_thresholds_partial_deserialize() {
        let thresholds: AlertThresholds =
            serde_json::from_str(r#"{"max_latency_ms": 250}"#).unwrap();
        assert_eq!(thresholds.max_latency_ms, 250);
        assert_eq!(thresholds.max_database_size_mb, 8192);
    }
}
