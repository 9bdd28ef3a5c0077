//! Monitor daemon configuration

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use monitor_lib::{AlertThresholds, ChannelSpec, ClusterConfig, MonitorConfig, TlsConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix, e.g. `ETCD_MONITOR_HEALTH_CHECK_INTERVAL_SECS`
const ENV_PREFIX: &str = "ETCD_MONITOR";

/// Daemon settings as read from file and environment
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Client URLs of the cluster, comma separated in the environment
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,

    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    #[serde(default)]
    pub insecure_skip_verify: bool,

    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,

    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    #[serde(default = "default_watch_interval")]
    pub watch_interval_secs: u64,

    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,

    #[serde(default)]
    pub thresholds: AlertThresholds,

    #[serde(default)]
    pub channels: Vec<ChannelSpec>,

    #[serde(default)]
    pub benchmark_enabled: bool,

    #[serde(default = "default_benchmark_interval")]
    pub benchmark_interval_secs: u64,
}

fn default_endpoints() -> Vec<String> {
    vec!["http://localhost:2379".to_string()]
}

fn default_dial_timeout() -> u64 {
    5
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_metrics_interval() -> u64 {
    10
}

fn default_watch_interval() -> u64 {
    5
}

fn default_dedup_window() -> u64 {
    300
}

fn default_benchmark_interval() -> u64 {
    3600
}

impl Settings {
    /// Load settings from an optional file, overridden by the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("endpoints"),
        );
        Self::build(builder)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        builder
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")
    }

    pub fn into_monitor_config(self) -> MonitorConfig {
        let tls = (self.cert_file.is_some() || self.ca_file.is_some() || self.insecure_skip_verify)
            .then(|| TlsConfig {
                cert_file: self.cert_file,
                key_file: self.key_file,
                ca_file: self.ca_file,
                insecure_skip_verify: self.insecure_skip_verify,
            });

        MonitorConfig {
            cluster: ClusterConfig {
                endpoints: self.endpoints,
                dial_timeout: Duration::from_secs(self.dial_timeout_secs),
                tls,
            },
            health_check_interval: Duration::from_secs(self.health_check_interval_secs),
            metrics_interval: Duration::from_secs(self.metrics_interval_secs),
            watch_interval: Duration::from_secs(self.watch_interval_secs),
            thresholds: self.thresholds,
            dedup_window: Duration::from_secs(self.dedup_window_secs),
            channels: self.channels,
            benchmark_enabled: self.benchmark_enabled,
            benchmark_interval: Duration::from_secs(self.benchmark_interval_secs),
        }
    }
}
