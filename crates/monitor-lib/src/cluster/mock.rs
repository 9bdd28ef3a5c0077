//! In-memory cluster used by unit tests

use super::{
    Alarm, ClusterClient, ClusterConfig, ClusterConnector, ClusterError, ClusterResult,
    EndpointStatus, Member, WatchResponse, WatchStream,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Default)]
struct MockState {
    members: Vec<Member>,
    statuses: HashMap<String, EndpointStatus>,
    unreachable: HashSet<String>,
    alarms: Vec<Alarm>,
    kv: BTreeMap<String, String>,
    watchers: Vec<mpsc::Sender<ClusterResult<WatchResponse>>>,
}

/// Scriptable in-memory cluster
#[derive(Default)]
pub struct MockCluster {
    state: Mutex<MockState>,
    pub fail_member_list: AtomicBool,
    pub fail_alarm_list: AtomicBool,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    /// `watch_prefix` never resolves while set
    pub stall_watch: AtomicBool,
    pub watch_calls: AtomicUsize,
    pub member_list_calls: AtomicUsize,
    pub closed: AtomicBool,
}

pub fn endpoint(id: u64) -> String {
    format!("http://member-{id}:2379")
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cluster of `ids` where every member is reachable and agrees on `leader`
    pub fn with_members(ids: &[u64], leader: u64) -> Self {
        let cluster = Self::new();
        for &id in ids {
            cluster.add_member(id, leader);
        }
        cluster
    }

    pub fn add_member(&self, id: u64, leader: u64) {
        let mut state = self.state.lock().unwrap();
        state.members.push(Member {
            id,
            name: format!("etcd-{id}"),
            peer_urls: vec![format!("http://member-{id}:2380")],
            client_urls: vec![endpoint(id)],
            is_learner: false,
        });
        state.statuses.insert(
            endpoint(id),
            EndpointStatus {
                member_id: id,
                version: "3.5.9".to_string(),
                db_size: 4096,
                db_size_in_use: 2048,
                leader,
                raft_index: 100,
                raft_term: 2,
                raft_applied_index: 100,
                is_learner: false,
            },
        );
    }

    pub fn add_member_without_urls(&self, id: u64) {
        let mut state = self.state.lock().unwrap();
        state.members.push(Member {
            id,
            name: format!("etcd-{id}"),
            peer_urls: vec![],
            client_urls: vec![],
            is_learner: false,
        });
    }

    pub fn set_unreachable(&self, id: u64, unreachable: bool) {
        let mut state = self.state.lock().unwrap();
        if unreachable {
            state.unreachable.insert(endpoint(id));
        } else {
            state.unreachable.remove(&endpoint(id));
        }
    }

    /// Change which member `id` reports as leader
    pub fn set_leader_view(&self, id: u64, leader: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.statuses.get_mut(&endpoint(id)) {
            status.leader = leader;
        }
    }

    pub fn set_all_leaders(&self, leader: u64) {
        let mut state = self.state.lock().unwrap();
        for status in state.statuses.values_mut() {
            status.leader = leader;
        }
    }

    pub fn set_db_size(&self, id: u64, db_size: i64, in_use: i64) {
        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.statuses.get_mut(&endpoint(id)) {
            status.db_size = db_size;
            status.db_size_in_use = in_use;
        }
    }

    pub fn set_applied_index(&self, id: u64, index: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.statuses.get_mut(&endpoint(id)) {
            status.raft_applied_index = index;
        }
    }

    pub fn add_alarm(&self, member_id: u64, alarm: &str) {
        self.state.lock().unwrap().alarms.push(Alarm {
            member_id,
            alarm: alarm.to_string(),
        });
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().unwrap().kv.keys().cloned().collect()
    }

    /// Push a response to every open watcher
    pub fn emit_watch(&self, response: WatchResponse) {
        let state = self.state.lock().unwrap();
        for tx in &state.watchers {
            let _ = tx.try_send(Ok(response.clone()));
        }
    }

    /// Close every open watch stream
    pub fn end_watches(&self) {
        self.state.lock().unwrap().watchers.clear();
    }

    pub fn watcher_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.watchers.iter().filter(|tx| !tx.is_closed()).count()
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn member_list(&self) -> ClusterResult<Vec<Member>> {
        self.member_list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_member_list.load(Ordering::SeqCst) {
            return Err(ClusterError::Unavailable("member list failed".to_string()));
        }
        Ok(self.state.lock().unwrap().members.clone())
    }

    async fn status(&self, endpoint: &str) -> ClusterResult<EndpointStatus> {
        let state = self.state.lock().unwrap();
        if state.unreachable.contains(endpoint) {
            return Err(ClusterError::Request {
                endpoint: endpoint.to_string(),
                message: "connection refused".to_string(),
            });
        }
        state
            .statuses
            .get(endpoint)
            .cloned()
            .ok_or_else(|| ClusterError::Request {
                endpoint: endpoint.to_string(),
                message: "unknown endpoint".to_string(),
            })
    }

    async fn alarm_list(&self) -> ClusterResult<Vec<Alarm>> {
        if self.fail_alarm_list.load(Ordering::SeqCst) {
            return Err(ClusterError::Unavailable("alarm list failed".to_string()));
        }
        Ok(self.state.lock().unwrap().alarms.clone())
    }

    async fn alarm_disarm(&self, alarm: &Alarm) -> ClusterResult<()> {
        self.state.lock().unwrap().alarms.retain(|a| a != alarm);
        Ok(())
    }

    async fn get(&self, key: &str) -> ClusterResult<Option<Vec<u8>>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ClusterError::Unavailable("read failed".to_string()));
        }
        let state = self.state.lock().unwrap();
        Ok(state.kv.get(key).map(|v| v.as_bytes().to_vec()))
    }

    async fn put(&self, key: &str, value: &str) -> ClusterResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ClusterError::Unavailable("write failed".to_string()));
        }
        self.state
            .lock()
            .unwrap()
            .kv
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> ClusterResult<u64> {
        let removed = self.state.lock().unwrap().kv.remove(key);
        Ok(removed.map(|_| 1).unwrap_or(0))
    }

    async fn delete_prefix(&self, prefix: &str) -> ClusterResult<u64> {
        let mut state = self.state.lock().unwrap();
        let before = state.kv.len();
        state.kv.retain(|k, _| !k.starts_with(prefix));
        Ok((before - state.kv.len()) as u64)
    }

    async fn watch_prefix(&self, _prefix: &str) -> ClusterResult<WatchStream> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        if self.stall_watch.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let (tx, rx) = mpsc::channel(16);
        self.state.lock().unwrap().watchers.push(tx);
        Ok(rx)
    }

    async fn close(&self) -> ClusterResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.state.lock().unwrap().watchers.clear();
        Ok(())
    }
}

/// Connector handing out a shared [`MockCluster`]
pub struct MockConnector {
    pub cluster: Arc<MockCluster>,
    pub fail: AtomicBool,
    pub connects: AtomicUsize,
}

impl MockConnector {
    pub fn new(cluster: Arc<MockCluster>) -> Self {
        Self {
            cluster,
            fail: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ClusterConnector for MockConnector {
    async fn connect(&self, _config: &ClusterConfig) -> ClusterResult<Arc<dyn ClusterClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClusterError::Unavailable("connection refused".to_string()));
        }
        let client: Arc<dyn ClusterClient> = self.cluster.clone();
        Ok(client)
    }
}
