//! Cluster handle consumed by the monitor
//!
//! This module provides:
//! - The `ClusterClient` capability set (members, status, alarms, keys, watch)
//! - A `ClusterConnector` seam so the service can be wired to any backend
//! - A client for the etcd v3 JSON gateway

mod gateway;

#[cfg(test)]
pub(crate) mod mock;

pub use gateway::{GatewayClient, GatewayConnector};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Errors returned by cluster operations
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("no endpoints configured")]
    NoEndpoints,

    #[error("all endpoints unreachable: {0}")]
    Unavailable(String),

    #[error("request to {endpoint} failed: {message}")]
    Request { endpoint: String, message: String },

    #[error("invalid response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("client closed")]
    Closed,
}

pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Cluster member as reported by the member list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: u64,
    pub name: String,
    pub peer_urls: Vec<String>,
    pub client_urls: Vec<String>,
    pub is_learner: bool,
}

impl Member {
    /// First client URL, used as the member's status endpoint
    pub fn client_endpoint(&self) -> Option<&str> {
        self.client_urls.first().map(String::as_str)
    }
}

/// Self-reported status of one endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStatus {
    /// Member id of the endpoint answering the request
    pub member_id: u64,
    pub version: String,
    pub db_size: i64,
    pub db_size_in_use: i64,
    /// Leader id as seen by this endpoint
    pub leader: u64,
    pub raft_index: u64,
    pub raft_term: u64,
    pub raft_applied_index: u64,
    pub is_learner: bool,
}

/// An active alarm on a member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub member_id: u64,
    /// Alarm kind, e.g. "NOSPACE" or "CORRUPT"
    pub alarm: String,
}

/// Kind of change carried by a watch event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchEventKind {
    Put,
    Delete,
}

/// Single key change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub key: String,
    pub version: i64,
    pub mod_revision: i64,
}

/// One batch of events delivered by a watch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchResponse {
    pub revision: i64,
    pub events: Vec<WatchEvent>,
}

/// Stream of watch responses. Closes when the watch ends; dropping it
/// cancels the watch.
pub type WatchStream = mpsc::Receiver<ClusterResult<WatchResponse>>;

/// Capability set the monitor needs from the cluster
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List all cluster members
    async fn member_list(&self) -> ClusterResult<Vec<Member>>;

    /// Query the status of a single endpoint
    async fn status(&self, endpoint: &str) -> ClusterResult<EndpointStatus>;

    /// List active alarms
    async fn alarm_list(&self) -> ClusterResult<Vec<Alarm>>;

    /// Deactivate an alarm
    async fn alarm_disarm(&self, alarm: &Alarm) -> ClusterResult<()>;

    /// Read a key. Returns `None` when absent.
    async fn get(&self, key: &str) -> ClusterResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: &str) -> ClusterResult<()>;

    /// Delete a key, returning the number of keys removed
    async fn delete(&self, key: &str) -> ClusterResult<u64>;

    /// Delete every key under a prefix, returning the number removed
    async fn delete_prefix(&self, prefix: &str) -> ClusterResult<u64>;

    /// Subscribe to all changes under a prefix
    async fn watch_prefix(&self, prefix: &str) -> ClusterResult<WatchStream>;

    /// Release the connection
    async fn close(&self) -> ClusterResult<()>;
}

/// TLS material for the cluster connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// Connection settings for the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub endpoints: Vec<String>,
    pub dial_timeout: Duration,
    pub tls: Option<TlsConfig>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://localhost:2379".to_string()],
            dial_timeout: Duration::from_secs(5),
            tls: None,
        }
    }
}

/// Establishes cluster connections for the monitor service
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, config: &ClusterConfig) -> ClusterResult<Arc<dyn ClusterClient>>;
}

/// Exclusive upper bound for a prefix range query
pub(crate) fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    // Prefix of all 0xff bytes (or empty): range to the end of the keyspace
    vec![0]
}
