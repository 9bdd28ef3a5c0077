//! Cluster health checking
//!
//! Produces a [`ClusterStatus`] snapshot from the member list, per-member
//! status queries and the alarm list, and keeps a bounded history of
//! leader transitions.

use crate::cluster::{ClusterClient, EndpointStatus};
use crate::error::{MonitorError, Result};
use crate::history::BoundedHistory;
use crate::models::{
    quorum_size, AlarmInfo, ClusterStatus, LeaderChange, MemberInfo, LEADER_HISTORY_CAPACITY,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Timeout for a single endpoint health probe
pub const ENDPOINT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Window over which leader changes are counted, in seconds
const LEADER_CHANGE_WINDOW_SECS: i64 = 3600;

/// A health check that could not complete
///
/// Carries the partial status (always unhealthy) alongside the cause.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct HealthCheckFailure {
    pub status: ClusterStatus,
    #[source]
    pub error: MonitorError,
}

struct HealthState {
    leader_history: BoundedHistory<LeaderChange>,
    /// Leader seen by the previous successful check
    last_leader_id: u64,
    members: Vec<MemberInfo>,
}

/// Health checker for one cluster
pub struct HealthChecker {
    client: Arc<dyn ClusterClient>,
    state: RwLock<HealthState>,
}

impl HealthChecker {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            client,
            state: RwLock::new(HealthState {
                leader_history: BoundedHistory::new(LEADER_HISTORY_CAPACITY),
                last_leader_id: 0,
                members: Vec::new(),
            }),
        }
    }

    /// Run one full health check
    pub async fn check_cluster_health(&self) -> std::result::Result<ClusterStatus, HealthCheckFailure> {
        let mut status = ClusterStatus {
            last_check: Utc::now(),
            ..Default::default()
        };

        let members = match self.client.member_list().await {
            Ok(members) => members,
            Err(e) => {
                return Err(HealthCheckFailure {
                    status,
                    error: MonitorError::MemberList(e),
                })
            }
        };

        status.member_count = members.len();
        status.quorum_size = quorum_size(members.len());

        let mut healthy_members = 0;
        let mut leaders = Vec::new();
        let mut member_infos = Vec::with_capacity(members.len());

        for member in &members {
            let mut info = MemberInfo {
                id: member.id,
                name: member.name.clone(),
                peer_urls: member.peer_urls.clone(),
                client_urls: member.client_urls.clone(),
                is_leader: false,
                is_healthy: false,
                db_size: 0,
                version: String::new(),
            };

            let Some(endpoint) = member.client_endpoint() else {
                debug!(member_id = member.id, "Member has no client URL, skipping");
                member_infos.push(info);
                continue;
            };

            match self.client.status(endpoint).await {
                Ok(member_status) => {
                    healthy_members += 1;
                    info.is_healthy = true;
                    info.is_leader = member_status.leader == member.id;
                    info.db_size = member_status.db_size;
                    info.version = member_status.version;
                    if info.is_leader {
                        leaders.push(member.id);
                    }
                }
                Err(e) => {
                    warn!(member_id = member.id, error = %e, "Failed to check member health");
                }
            }

            member_infos.push(info);
        }

        if healthy_members < status.quorum_size {
            status.network_partition = true;
        }

        if leaders.len() > 1 {
            warn!(leaders = ?leaders, "Multiple members report themselves as leader");
        }

        let current_leader = leaders.first().copied().unwrap_or(0);
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if current_leader != 0 {
                let previous = state.last_leader_id;
                Self::record_change(&mut state, previous, current_leader);
                state.last_leader_id = current_leader;
                status.leader_id = current_leader;
                status.has_leader = true;
            }

            let cutoff = Utc::now() - chrono::Duration::seconds(LEADER_CHANGE_WINDOW_SECS);
            let history = &state.leader_history;
            status.leader_changes = history.iter().filter(|c| c.timestamp > cutoff).count();
            status.last_leader_change = history.last().map(|c| c.timestamp);
            state.members = member_infos;
        }

        match self.client.alarm_list().await {
            Ok(alarms) => {
                let triggered = Utc::now();
                status.alarms = alarms
                    .into_iter()
                    .map(|alarm| AlarmInfo {
                        alarm_type: alarm.alarm,
                        member_id: alarm.member_id,
                        triggered,
                    })
                    .collect();
            }
            Err(e) => warn!(error = %e, "Failed to get alarm list"),
        }

        status.healthy = !status.network_partition
            && status.has_leader
            && leaders.len() == 1
            && status.alarms.is_empty();

        debug!(
            healthy = status.healthy,
            members = status.member_count,
            reachable = healthy_members,
            leader = status.leader_id,
            "Health check complete"
        );

        Ok(status)
    }

    /// Record a leader transition. Ignored when `old_leader` is zero or
    /// unchanged. Returns whether a change was recorded.
    pub fn record_leader_change(&self, old_leader: u64, new_leader: u64) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        Self::record_change(&mut state, old_leader, new_leader)
    }

    fn record_change(state: &mut HealthState, old_leader: u64, new_leader: u64) -> bool {
        if old_leader == 0 || old_leader == new_leader {
            return false;
        }

        state.leader_history.push(LeaderChange {
            timestamp: Utc::now(),
            old_leader_id: old_leader,
            new_leader_id: new_leader,
        });

        info!(old_leader, new_leader, "Leader change detected");
        true
    }

    /// Copy of the leader-change history, oldest first
    pub fn leader_history(&self) -> Vec<LeaderChange> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .leader_history
            .to_vec()
    }

    /// Members observed by the last health check
    pub fn members(&self) -> Vec<MemberInfo> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .members
            .clone()
    }

    /// True when more than one member reports itself as leader
    pub async fn detect_split_brain(&self) -> Result<bool> {
        let members = self
            .client
            .member_list()
            .await
            .map_err(MonitorError::MemberList)?;

        let mut leaders = Vec::new();
        for member in &members {
            let Some(endpoint) = member.client_endpoint() else {
                continue;
            };

            match self.client.status(endpoint).await {
                Ok(status) if status.leader == member.id => leaders.push(member.id),
                Ok(_) => {}
                Err(e) => {
                    warn!(member_id = member.id, error = %e, "Failed to get member status");
                }
            }
        }

        if leaders.len() > 1 {
            error!(leader_count = leaders.len(), leaders = ?leaders, "Split-brain detected");
            return Ok(true);
        }

        Ok(false)
    }

    /// Query one endpoint's status, bounded by [`ENDPOINT_HEALTH_TIMEOUT`]
    pub async fn check_endpoint_health(&self, endpoint: &str) -> Result<EndpointStatus> {
        let status = tokio::time::timeout(ENDPOINT_HEALTH_TIMEOUT, self.client.status(endpoint))
            .await
            .map_err(|_| crate::cluster::ClusterError::Timeout(ENDPOINT_HEALTH_TIMEOUT))??;
        Ok(status)
    }

    /// Round-trip time of a status query to each reachable member
    pub async fn check_network_latency(&self) -> Result<HashMap<u64, Duration>> {
        let members = self
            .client
            .member_list()
            .await
            .map_err(MonitorError::MemberList)?;

        let mut latencies = HashMap::with_capacity(members.len());
        for member in &members {
            let Some(endpoint) = member.client_endpoint() else {
                continue;
            };

            let start = Instant::now();
            match self.client.status(endpoint).await {
                Ok(_) => {
                    latencies.insert(member.id, start.elapsed());
                }
                Err(e) => {
                    warn!(member_id = member.id, error = %e, "Failed to measure latency");
                }
            }
        }

        Ok(latencies)
    }

    /// Quick check: true only when a full health check succeeds and is healthy
    pub async fn perform_health_check(&self) -> bool {
        match self.check_cluster_health().await {
            Ok(status) => status.healthy,
            Err(_) => false,
        }
    }

    /// Deactivate every active alarm. Returns how many were disarmed.
    pub async fn disarm_alarms(&self) -> Result<usize> {
        let alarms = self.client.alarm_list().await?;
        let mut disarmed = 0;
        for alarm in &alarms {
            match self.client.alarm_disarm(alarm).await {
                Ok(()) => {
                    info!(member_id = alarm.member_id, alarm = %alarm.alarm, "Alarm disarmed");
                    disarmed += 1;
                }
                Err(e) => {
                    warn!(member_id = alarm.member_id, alarm = %alarm.alarm, error = %e, "Failed to disarm alarm");
                }
            }
        }
        Ok(disarmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::MockCluster;
    use std::sync::atomic::Ordering;

    fn checker(cluster: &Arc<MockCluster>) -> HealthChecker {
        let client: Arc<dyn ClusterClient> = cluster.clone();
        HealthChecker::new(client)
    }

    #[tokio::test]
    async fn test_healthy_three_member_cluster() {
        let cluster = Arc::new(MockCluster::with_members(&[1, 2, 3], 1));
        let checker = checker(&cluster);

        let status = checker.check_cluster_health().await.unwrap();
        assert!(status.healthy);
        assert!(status.has_leader);
        assert_eq!(status.leader_id, 1);
        assert_eq!(status.member_count, 3);
        assert_eq!(status.quorum_size, 2);
        assert!(!status.network_partition);
        assert!(status.alarms.is_empty());
        assert_eq!(status.leader_changes, 0);

        let members = checker.members();
        assert_eq!(members.len(), 3);
        assert!(members.iter().all(|m| m.is_healthy));
        assert_eq!(members.iter().filter(|m| m.is_leader).count(), 1);
        assert_eq!(members[0].version, "3.5.9");
    }

    #[tokio::test]
    async fn test_leader_change_across_checks() {
        let cluster = Arc::new(MockCluster::with_members(&[1, 2, 3], 1));
        let checker = checker(&cluster);

        checker.check_cluster_health().await.unwrap();
        assert!(checker.leader_history().is_empty());

        cluster.set_all_leaders(2);
        let status = checker.check_cluster_health().await.unwrap();
        assert_eq!(status.leader_id, 2);
        assert_eq!(status.leader_changes, 1);
        assert!(status.last_leader_change.is_some());

        let history = checker.leader_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_leader_id, 1);
        assert_eq!(history[0].new_leader_id, 2);

        // Same leader again records nothing
        checker.check_cluster_health().await.unwrap();
        assert_eq!(checker.leader_history().len(), 1);
    }

    #[tokio::test]
    async fn test_partition_when_quorum_unreachable() {
        let cluster = Arc::new(MockCluster::with_members(&[1, 2, 3], 1));
        cluster.set_unreachable(2, true);
        cluster.set_unreachable(3, true);
        let checker = checker(&cluster);

        let status = checker.check_cluster_health().await.unwrap();
        assert!(status.network_partition);
        assert!(!status.healthy);
        assert!(status.has_leader);
        assert_eq!(status.leader_id, 1);
        assert_eq!(status.member_count, 3);
        assert_eq!(status.quorum_size, 2);
    }

    #[tokio::test]
    async fn test_single_unreachable_member_keeps_quorum() {
        let cluster = Arc::new(MockCluster::with_members(&[1, 2, 3], 1));
        cluster.set_unreachable(3, true);
        let checker = checker(&cluster);

        let status = checker.check_cluster_health().await.unwrap();
        assert!(!status.network_partition);
        assert!(status.healthy);
        assert!(!checker.members()[2].is_healthy);
    }

    #[tokio::test]
    async fn test_no_leader_is_unhealthy() {
        let cluster = Arc::new(MockCluster::with_members(&[1, 2, 3], 0));
        let checker = checker(&cluster);

        let status = checker.check_cluster_health().await.unwrap();
        assert!(!status.has_leader);
        assert_eq!(status.leader_id, 0);
        assert!(!status.healthy);
    }

    #[tokio::test]
    async fn test_alarm_makes_cluster_unhealthy() {
        let cluster = Arc::new(MockCluster::with_members(&[1, 2, 3], 1));
        cluster.add_alarm(2, "NOSPACE");
        let checker = checker(&cluster);

        let status = checker.check_cluster_health().await.unwrap();
        assert!(!status.healthy);
        assert_eq!(status.alarms.len(), 1);
        assert_eq!(status.alarms[0].alarm_type, "NOSPACE");
        assert_eq!(status.alarms[0].member_id, 2);
    }

    #[tokio::test]
    async fn test_alarm_list_failure_is_skipped() {
        let cluster = Arc::new(MockCluster::with_members(&[1, 2, 3], 1));
        cluster.fail_alarm_list.store(true, Ordering::SeqCst);
        let checker = checker(&cluster);

        let status = checker.check_cluster_health().await.unwrap();
        assert!(status.healthy);
        assert!(status.alarms.is_empty());
    }

    #[tokio::test]
    async fn test_member_list_failure_is_fatal() {
        let cluster = Arc::new(MockCluster::with_members(&[1, 2, 3], 1));
        cluster.fail_member_list.store(true, Ordering::SeqCst);
        let checker = checker(&cluster);

        let failure = checker.check_cluster_health().await.unwrap_err();
        assert!(!failure.status.healthy);
        assert!(matches!(failure.error, MonitorError::MemberList(_)));
        assert!(failure.to_string().contains("failed to get member list"));
        assert!(!checker.perform_health_check().await);
    }

    #[tokio::test]
    async fn test_member_without_client_url_is_skipped() {
        let cluster = Arc::new(MockCluster::with_members(&[1, 2], 1));
        cluster.add_member_without_urls(3);
        let checker = checker(&cluster);

        let status = checker.check_cluster_health().await.unwrap();
        assert_eq!(status.member_count, 3);
        assert!(!status.network_partition);
        assert_eq!(checker.members().len(), 3);
    }

    #[test]
    fn test_record_leader_change_rules() {
        let cluster = Arc::new(MockCluster::new());
        let checker = checker(&cluster);

        assert!(!checker.record_leader_change(0, 5));
        assert!(!checker.record_leader_change(5, 5));
        assert!(checker.record_leader_change(5, 6));
        assert_eq!(checker.leader_history().len(), 1);
    }

    #[test]
    fn test_leader_history_is_bounded() {
        let cluster = Arc::new(MockCluster::new());
        let checker = checker(&cluster);

        for i in 1..=150u64 {
            checker.record_leader_change(i, i + 1);
        }

        let history = checker.leader_history();
        assert_eq!(history.len(), LEADER_HISTORY_CAPACITY);
        assert_eq!(history[0].old_leader_id, 51);
        assert_eq!(history[99].old_leader_id, 150);
    }

    #[tokio::test]
    async fn test_detect_split_brain() {
        let cluster = Arc::new(MockCluster::with_members(&[1, 2, 3], 1));
        let checker = checker(&cluster);
        assert!(!checker.detect_split_brain().await.unwrap());

        cluster.set_leader_view(2, 2);
        assert!(checker.detect_split_brain().await.unwrap());

        let status = checker.check_cluster_health().await.unwrap();
        assert!(!status.healthy);
    }

    #[tokio::test]
    async fn test_check_endpoint_health() {
        let cluster = Arc::new(MockCluster::with_members(&[1], 1));
        let checker = checker(&cluster);

        let status = checker
            .check_endpoint_health(&crate::cluster::mock::endpoint(1))
            .await
            .unwrap();
        assert_eq!(status.member_id, 1);

        assert!(checker
            .check_endpoint_health("http://unknown:2379")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_check_network_latency() {
        let cluster = Arc::new(MockCluster::with_members(&[1, 2, 3], 1));
        cluster.set_unreachable(3, true);
        let checker = checker(&cluster);

        let latencies = checker.check_network_latency().await.unwrap();
        assert_eq!(latencies.len(), 2);
        assert!(latencies.contains_key(&1));
        assert!(!latencies.contains_key(&3));
    }

    #[tokio::test]
    async fn test_disarm_alarms() {
        let cluster = Arc::new(MockCluster::with_members(&[1, 2, 3], 1));
        cluster.add_alarm(1, "NOSPACE");
        cluster.add_alarm(3, "CORRUPT");
        let checker = checker(&cluster);

        assert_eq!(checker.disarm_alarms().await.unwrap(), 2);
        assert!(checker.perform_health_check().await);
    }
}
