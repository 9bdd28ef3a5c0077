//! Alert deduplication, history and channel fan-out

use super::channels::AlertChannel;
use crate::history::BoundedHistory;
use crate::observability::MonitorMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Default deduplication window (5 minutes)
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Capacity of the alert history
pub const ALERT_HISTORY_CAPACITY: usize = 1000;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    ClusterHealth,
    LeaderElection,
    NetworkPartition,
    HighLatency,
    HighDiskUsage,
    HighProposalQueue,
    EtcdAlarm,
    LeaderChurn,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::ClusterHealth => "cluster_health",
            AlertType::LeaderElection => "leader_election",
            AlertType::NetworkPartition => "network_partition",
            AlertType::HighLatency => "high_latency",
            AlertType::HighDiskUsage => "high_disk_usage",
            AlertType::HighProposalQueue => "high_proposal_queue",
            AlertType::EtcdAlarm => "etcd_alarm",
            AlertType::LeaderChurn => "leader_churn",
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alert to be recorded and delivered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub message: String,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(level: AlertLevel, alert_type: AlertType, message: impl Into<String>) -> Self {
        Self {
            level,
            alert_type,
            message: message.into(),
            details: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Deduplication key: `type:message`
    pub fn dedup_key(&self) -> String {
        dedup_key(self.alert_type, &self.message)
    }
}

fn dedup_key(alert_type: AlertType, message: &str) -> String {
    format!("{}:{}", alert_type, message)
}

/// An alert seen recently, with when it was first recorded and last triggered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAlert {
    #[serde(flatten)]
    pub alert: Alert,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct LastSeen {
    at: Instant,
    wall: DateTime<Utc>,
}

struct AlertState {
    history: BoundedHistory<Alert>,
    /// Dedup key -> last time the alert was recorded
    active: HashMap<String, LastSeen>,
    channels: Vec<Arc<dyn AlertChannel>>,
}

/// Alert manager with deduplication and multi-channel delivery
pub struct AlertManager {
    dedup_window: Duration,
    state: RwLock<AlertState>,
    deliveries: TaskTracker,
    metrics: MonitorMetrics,
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertManager {
    /// Create an alert manager with the default 5-minute dedup window
    pub fn new() -> Self {
        Self {
            dedup_window: DEFAULT_DEDUP_WINDOW,
            state: RwLock::new(AlertState {
                history: BoundedHistory::new(ALERT_HISTORY_CAPACITY),
                active: HashMap::new(),
                channels: Vec::new(),
            }),
            deliveries: TaskTracker::new(),
            metrics: MonitorMetrics::new(),
        }
    }

    /// Set custom deduplication window
    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    pub fn dedup_window(&self) -> Duration {
        self.dedup_window
    }

    pub fn add_channel(&self, channel: Arc<dyn AlertChannel>) {
        info!(channel = channel.name(), "Alert channel added");
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .channels
            .push(channel);
    }

    /// Names of the registered channels, in registration order
    pub fn channel_names(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .channels
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Record an alert and deliver it to every channel.
    ///
    /// Returns `false` when the alert was suppressed as a duplicate.
    pub fn trigger_alert(&self, alert: Alert) -> bool {
        let key = alert.dedup_key();
        let channels = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

            if let Some(last) = state.active.get(&key) {
                if last.at.elapsed() < self.dedup_window {
                    debug!(alert_type = %alert.alert_type, message = %alert.message, "Alert deduplicated");
                    self.metrics.inc_alerts_deduplicated();
                    return false;
                }
            }

            state.history.push(alert.clone());
            state.active.insert(
                key,
                LastSeen {
                    at: Instant::now(),
                    wall: Utc::now(),
                },
            );

            // Keys past the active window can no longer suppress or report
            let expiry = self.dedup_window.saturating_mul(2);
            state.active.retain(|_, seen| seen.at.elapsed() < expiry);

            state.channels.clone()
        };

        info!(
            level = %alert.level,
            alert_type = %alert.alert_type,
            message = %alert.message,
            "Triggering alert"
        );
        self.metrics.inc_alerts_triggered(alert.level);

        self.dispatch(alert, channels);
        true
    }

    fn dispatch(&self, alert: Alert, channels: Vec<Arc<dyn AlertChannel>>) {
        if channels.is_empty() {
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(alert_type = %alert.alert_type, "No async runtime, alert not delivered");
                return;
            }
        };

        let alert = Arc::new(alert);
        for channel in channels {
            let alert = Arc::clone(&alert);
            let metrics = self.metrics.clone();
            self.deliveries.spawn_on(
                async move {
                    if let Err(e) = channel.send(&alert).await {
                        error!(channel = channel.name(), error = %e, "Failed to send alert");
                        metrics.inc_channel_failures(channel.name());
                    }
                },
                &handle,
            );
        }
    }

    /// Wait until every delivery spawned so far has finished
    pub async fn flush(&self) {
        self.deliveries.close();
        self.deliveries.wait().await;
        self.deliveries.reopen();
    }

    /// Copy of the alert history, oldest first
    pub fn alert_history(&self) -> Vec<Alert> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .to_vec()
    }

    /// Alerts last triggered within twice the dedup window, oldest first.
    ///
    /// Each entry reports the most recent recorded alert for its key.
    pub fn active_alerts(&self) -> Vec<ActiveAlert> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let window = self.dedup_window.saturating_mul(2);

        let mut active: Vec<ActiveAlert> = state
            .active
            .iter()
            .filter(|(_, seen)| seen.at.elapsed() < window)
            .filter_map(|(key, seen)| {
                state
                    .history
                    .iter()
                    .rev()
                    .find(|alert| &alert.dedup_key() == key)
                    .map(|alert| ActiveAlert {
                        alert: alert.clone(),
                        first_seen: alert.timestamp,
                        last_seen: seen.wall,
                    })
            })
            .collect();

        active.sort_by(|a, b| a.first_seen.cmp(&b.first_seen));
        active
    }

    /// Remove an alert from the active set. History is left untouched.
    /// Returns whether the alert was active.
    pub fn clear_alert(&self, alert_type: AlertType, message: &str) -> bool {
        let key = dedup_key(alert_type, message);
        let removed = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .active
            .remove(&key)
            .is_some();

        info!(alert_type = %alert_type, message = %message, "Alert cleared");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::channels::ChannelError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        received: Mutex<Vec<Alert>>,
        fail: bool,
    }

    #[async_trait]
    impl AlertChannel for RecordingChannel {
        async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
            self.received.lock().unwrap().push(alert.clone());
            if self.fail {
                return Err(ChannelError::Rejected {
                    channel: "recording".to_string(),
                    status: 500,
                });
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn warning(message: &str) -> Alert {
        Alert::new(AlertLevel::Warning, AlertType::HighLatency, message)
    }

    #[test]
    fn test_alert_serialization() {
        let alert = warning("High write latency detected").with_detail("write_latency_p99", 150.0);
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["level"], "warning");
        assert_eq!(json["type"], "high_latency");
        assert_eq!(json["details"]["write_latency_p99"], 150.0);
        assert_eq!(alert.dedup_key(), "high_latency:High write latency detected");
    }

    #[test]
    fn test_dedup_within_window() {
        let manager = AlertManager::new();

        assert!(manager.trigger_alert(warning("slow")));
        assert!(!manager.trigger_alert(warning("slow")));
        assert_eq!(manager.alert_history().len(), 1);

        // Different message is a different key
        assert!(manager.trigger_alert(warning("slower")));
        assert_eq!(manager.alert_history().len(), 2);
    }

    #[test]
    fn test_dedup_expires_after_window() {
        let manager = AlertManager::new().with_dedup_window(Duration::from_millis(50));

        assert!(manager.trigger_alert(warning("slow")));
        std::thread::sleep(Duration::from_millis(80));
        assert!(manager.trigger_alert(warning("slow")));
        assert_eq!(manager.alert_history().len(), 2);
    }

    #[test]
    fn test_history_is_bounded() {
        let manager = AlertManager::new();
        for i in 0..1005 {
            manager.trigger_alert(warning(&format!("alert {i}")));
        }

        let history = manager.alert_history();
        assert_eq!(history.len(), ALERT_HISTORY_CAPACITY);
        assert_eq!(history[0].message, "alert 5");
        assert_eq!(history[999].message, "alert 1004");
    }

    #[test]
    fn test_active_alerts_report_latest_entry() {
        let manager = AlertManager::new().with_dedup_window(Duration::from_millis(100));

        let first = warning("slow").with_detail("cycle", 1);
        manager.trigger_alert(first);
        std::thread::sleep(Duration::from_millis(120));
        let second = warning("slow").with_detail("cycle", 2);
        manager.trigger_alert(second.clone());

        let active = manager.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].alert, second);
        assert_eq!(active[0].first_seen, second.timestamp);
        assert!(active[0].last_seen >= active[0].first_seen);
    }

    #[test]
    fn test_active_alerts_expire_after_twice_window() {
        let manager = AlertManager::new().with_dedup_window(Duration::from_millis(30));
        manager.trigger_alert(warning("slow"));
        assert_eq!(manager.active_alerts().len(), 1);

        std::thread::sleep(Duration::from_millis(70));
        assert!(manager.active_alerts().is_empty());
        assert_eq!(manager.alert_history().len(), 1);
    }

    #[test]
    fn test_clear_alert() {
        let manager = AlertManager::new();
        manager.trigger_alert(warning("slow"));

        assert!(manager.clear_alert(AlertType::HighLatency, "slow"));
        assert!(manager.active_alerts().is_empty());
        assert_eq!(manager.alert_history().len(), 1);

        // Cleared key no longer suppresses
        assert!(manager.trigger_alert(warning("slow")));
    }

    #[test]
    fn test_clear_unknown_alert_is_noop() {
        let manager = AlertManager::new();
        manager.trigger_alert(warning("slow"));

        assert!(!manager.clear_alert(AlertType::ClusterHealth, "unknown"));
        assert_eq!(manager.active_alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_to_all_channels() {
        let manager = AlertManager::new();
        let ok = Arc::new(RecordingChannel::default());
        let failing = Arc::new(RecordingChannel {
            fail: true,
            ..Default::default()
        });
        manager.add_channel(ok.clone());
        manager.add_channel(failing.clone());
        assert_eq!(manager.channel_names(), vec!["recording", "recording"]);

        manager.trigger_alert(warning("slow"));
        manager.trigger_alert(warning("slow"));
        manager.flush().await;

        assert_eq!(ok.received.lock().unwrap().len(), 1);
        assert_eq!(failing.received.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_trigger_without_runtime_still_records() {
        let manager = AlertManager::new();
        let channel = Arc::new(RecordingChannel::default());
        manager.add_channel(channel.clone());

        assert!(manager.trigger_alert(warning("slow")));
        assert_eq!(manager.alert_history().len(), 1);
        assert!(channel.received.lock().unwrap().is_empty());
    }
}
