//! Error types for the monitor library

use crate::cluster::ClusterError;

/// A metrics probe that failed during one collection cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFailure {
    pub probe: &'static str,
    pub error: String,
}

impl std::fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} metrics: {}", self.probe, self.error)
    }
}

/// Errors surfaced by the monitor service and its components
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The service has never been started, so no component exists yet
    #[error("{0} not initialized")]
    NotInitialized(&'static str),

    #[error("monitor service already running")]
    AlreadyRunning,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to connect to cluster: {0}")]
    Connect(#[source] ClusterError),

    #[error("failed to get member list: {0}")]
    MemberList(#[source] ClusterError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("all metrics probes failed: {}", join_failures(.0))]
    AllProbesFailed(Vec<ProbeFailure>),

    #[error("failed to build alert channel '{name}': {message}")]
    Channel { name: String, message: String },
}

fn join_failures(failures: &[ProbeFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, MonitorError>;
