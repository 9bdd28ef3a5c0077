//! Monitor service orchestration
//!
//! Owns the cluster connection and runs three independent loops:
//! - health checks, feeding the threshold policy
//! - metrics collection, feeding the threshold policy
//! - a key watch used for diagnostic logging

pub mod policy;


use crate::alert::{AlertManager, ChannelRegistry};
use crate::cluster::{ClusterClient, ClusterConnector, GatewayConnector, WatchEventKind};
use crate::collector::{MetricsCollector, ProposalSource};
use crate::config::{AlertThresholds, MonitorConfig};
use crate::error::{MonitorError, Result};
use crate::health::HealthChecker;
use crate::models::{ClusterStatus, MetricsSnapshot};
use crate::observability::{MonitorMetrics, StructuredLogger};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Prefix watched by the watch loop
const WATCH_PREFIX: &str = "/";

/// Components built on start, kept after stop for last-known reads
struct Components {
    health: Arc<HealthChecker>,
    collector: Arc<MetricsCollector>,
    alerts: Arc<AlertManager>,
    last_status: RwLock<ClusterStatus>,
    last_snapshot: RwLock<MetricsSnapshot>,
}

/// Handles for a running service
struct RunState {
    client: Arc<dyn ClusterClient>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Drop for RunState {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Cluster monitor with a start/stop lifecycle
pub struct MonitorService {
    config: MonitorConfig,
    connector: Arc<dyn ClusterConnector>,
    registry: ChannelRegistry,
    proposal_source: Option<Arc<dyn ProposalSource>>,
    components: RwLock<Option<Arc<Components>>>,
    lifecycle: Mutex<Option<RunState>>,
    running: AtomicBool,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl MonitorService {
    /// Service connecting through the JSON gateway with the built-in channels
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            connector: Arc::new(GatewayConnector),
            registry: ChannelRegistry::with_builtins(),
            proposal_source: None,
            components: RwLock::new(None),
            lifecycle: Mutex::new(None),
            running: AtomicBool::new(false),
            metrics: MonitorMetrics::new(),
            logger: StructuredLogger::new("etcd-monitor"),
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn ClusterConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_registry(mut self, registry: ChannelRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_proposal_source(mut self, source: Arc<dyn ProposalSource>) -> Self {
        self.proposal_source = Some(source);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Connect, build components, register channels and launch the loops
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }

        self.config.validate()?;

        let client = self
            .connector
            .connect(&self.config.cluster)
            .await
            .map_err(MonitorError::Connect)?;

        let mut collector = MetricsCollector::new(client.clone());
        if let Some(source) = &self.proposal_source {
            collector = collector.with_proposal_source(source.clone());
        }

        let components = Arc::new(Components {
            health: Arc::new(HealthChecker::new(client.clone())),
            collector: Arc::new(collector),
            alerts: Arc::new(AlertManager::new().with_dedup_window(self.config.dedup_window)),
            last_status: RwLock::new(ClusterStatus::default()),
            last_snapshot: RwLock::new(MetricsSnapshot::default()),
        });

        for spec in &self.config.channels {
            match self.registry.build(spec) {
                Ok(channel) => components.alerts.add_channel(channel),
                Err(e) => {
                    if let Err(close_err) = client.close().await {
                        warn!(error = %close_err, "Failed to close cluster client");
                    }
                    return Err(MonitorError::Channel {
                        name: spec.kind.clone(),
                        message: format!("{e:#}"),
                    });
                }
            }
        }

        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();

        tasks.spawn(run_health_checks(
            components.clone(),
            self.config.thresholds.clone(),
            self.config.health_check_interval,
            self.metrics.clone(),
            self.logger.clone(),
            shutdown.clone(),
        ));
        tasks.spawn(run_metrics_collection(
            components.clone(),
            self.config.thresholds.clone(),
            self.config.metrics_interval,
            self.metrics.clone(),
            shutdown.clone(),
        ));
        tasks.spawn(run_watcher(
            client.clone(),
            self.config.watch_interval,
            shutdown.clone(),
        ));
        tasks.close();

        *self
            .components
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(components);
        *lifecycle = Some(RunState {
            client,
            shutdown,
            tasks,
        });
        self.running.store(true, Ordering::SeqCst);

        self.logger
            .log_startup(env!("CARGO_PKG_VERSION"), &self.config.cluster.endpoints);
        Ok(())
    }

    /// Cancel the loops, wait for them to exit and close the connection.
    /// Does nothing when the service is not running.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(state) = lifecycle.take() else {
            return;
        };

        state.shutdown.cancel();
        state.tasks.wait().await;

        if let Err(e) = state.client.close().await {
            error!(error = %e, "Error closing cluster client");
        }

        self.running.store(false, Ordering::SeqCst);
        self.logger.log_shutdown("stop requested");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn components(&self, what: &'static str) -> Result<Arc<Components>> {
        self.components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(MonitorError::NotInitialized(what))
    }

    /// Status from the most recent health check
    pub fn cluster_status(&self) -> Result<ClusterStatus> {
        let components = self.components("health checker")?;
        let status = components
            .last_status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(status)
    }

    /// Snapshot from the most recent metrics collection
    pub fn current_metrics(&self) -> Result<MetricsSnapshot> {
        let components = self.components("metrics collector")?;
        let snapshot = components
            .last_snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(snapshot)
    }

    pub fn alert_manager(&self) -> Result<Arc<AlertManager>> {
        Ok(self.components("alert manager")?.alerts.clone())
    }

    pub fn health_checker(&self) -> Result<Arc<HealthChecker>> {
        Ok(self.components("health checker")?.health.clone())
    }

    pub fn metrics_collector(&self) -> Result<Arc<MetricsCollector>> {
        Ok(self.components("metrics collector")?.collector.clone())
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn run_health_checks(
    components: Arc<Components>,
    thresholds: AlertThresholds,
    period: Duration,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
    shutdown: CancellationToken,
) {
    info!(interval_ms = period.as_millis() as u64, "Starting health check loop");
    let mut ticker = ticker(period);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let start = Instant::now();
        let result = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = components.health.check_cluster_health() => result,
        };

        match result {
            Ok(status) => {
                let previous_leader = components
                    .last_status
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .leader_id;
                if previous_leader != 0 && status.leader_id != 0 && previous_leader != status.leader_id {
                    logger.log_leader_change(previous_leader, status.leader_id);
                }

                metrics.record_status(&status);
                for alert in policy::health_alerts(&status, &thresholds) {
                    components.alerts.trigger_alert(alert);
                }
                *components
                    .last_status
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = status;
            }
            Err(failure) => {
                error!(error = %failure, "Health check failed");
                metrics.inc_health_check_failures();
                metrics.record_status(&failure.status);
                *components
                    .last_status
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = failure.status;
            }
        }

        metrics.observe_cycle("health", start.elapsed().as_secs_f64());
    }

    info!("Shutting down health check loop");
}

async fn run_metrics_collection(
    components: Arc<Components>,
    thresholds: AlertThresholds,
    period: Duration,
    metrics: MonitorMetrics,
    shutdown: CancellationToken,
) {
    info!(interval_ms = period.as_millis() as u64, "Starting metrics collection loop");
    let mut ticker = ticker(period);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let start = Instant::now();
        let outcome = tokio::select! {
            _ = shutdown.cancelled() => break,
            outcome = components.collector.collect() => outcome,
        };

        for failure in &outcome.failures {
            metrics.inc_probe_failures(failure.probe);
        }

        if outcome.all_failed() {
            let err = MonitorError::AllProbesFailed(outcome.failures);
            error!(error = %err, "Metrics collection failed");
        } else {
            metrics.record_snapshot(&outcome.snapshot);
            for alert in policy::metric_alerts(&outcome.snapshot, &thresholds) {
                components.alerts.trigger_alert(alert);
            }
            *components
                .last_snapshot
                .write()
                .unwrap_or_else(PoisonError::into_inner) = outcome.snapshot;
        }

        metrics.observe_cycle("metrics", start.elapsed().as_secs_f64());
    }

    info!("Shutting down metrics collection loop");
}

async fn run_watcher(
    client: Arc<dyn ClusterClient>,
    resubscribe_after: Duration,
    shutdown: CancellationToken,
) {
    info!(prefix = WATCH_PREFIX, "Starting key watch loop");

    loop {
        let subscribed = tokio::select! {
            _ = shutdown.cancelled() => break,
            subscribed = client.watch_prefix(WATCH_PREFIX) => subscribed,
        };

        match subscribed {
            Ok(mut stream) => loop {
                let response = tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Shutting down key watch loop");
                        return;
                    }
                    response = stream.recv() => response,
                };

                match response {
                    Some(Ok(response)) => {
                        for event in &response.events {
                            match event.kind {
                                WatchEventKind::Put => debug!(
                                    key = %event.key,
                                    version = event.version,
                                    "Key created/updated"
                                ),
                                WatchEventKind::Delete => debug!(key = %event.key, "Key deleted"),
                            }
                        }
                    }
                    Some(Err(e)) => error!(error = %e, "Watch error"),
                    None => break,
                }
            },
            Err(e) => error!(error = %e, "Failed to start watch"),
        }

        warn!(
            retry_ms = resubscribe_after.as_millis() as u64,
            "Watch ended, resubscribing"
        );
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(resubscribe_after) => {}
        }
    }

    info!("Shutting down key watch loop");
}
