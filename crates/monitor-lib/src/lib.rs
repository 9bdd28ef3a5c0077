//! Monitoring engine for etcd clusters
//!
//! This crate provides the core functionality for:
//! - Cluster health checks with leader and partition tracking
//! - Performance metrics collection and benchmarking
//! - Deduplicated alerting over pluggable channels
//! - A monitor service driving the periodic loops
//! - Prometheus metrics and structured logging

pub mod alert;
pub mod cluster;
pub mod collector;
pub mod config;
pub mod error;
pub mod health;
pub mod history;
pub mod models;
pub mod observability;
pub mod service;
pub mod stats;

pub use alert::{
    ActiveAlert, Alert, AlertChannel, AlertLevel, AlertManager, AlertType, ChannelRegistry,
    ChannelSpec,
};
pub use cluster::{ClusterClient, ClusterConfig, ClusterConnector, ClusterError, TlsConfig};
pub use collector::{MetricsCollector, ProposalCounts, ProposalSource};
pub use config::{AlertThresholds, MonitorConfig};
pub use error::{MonitorError, Result};
pub use health::{HealthCheckFailure, HealthChecker};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
pub use service::MonitorService;
