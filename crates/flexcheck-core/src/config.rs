//! Configuration management for the harness
//!
//! Sources, lowest precedence first:
//! - Hardcoded defaults
//! - `./config/flexcheck.{toml,yaml,json}`
//! - File named by the `FLEXCHECK_CONFIG` env var
//! - `FLEXCHECK_*` environment variables (`__` separates sections)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct HarnessConfig {
    #[serde(default)]
    pub cluster: ClusterSettings,

    #[serde(default)]
    pub workload: WorkloadSettings,

    #[serde(default)]
    pub timeouts: TimeoutSettings,

    #[serde(default)]
    pub metrics: MetricsSettings,
}

impl HarnessConfig {
    /// Load configuration from defaults, files and environment.
    ///
    /// Example override: `FLEXCHECK_TIMEOUTS__CLUSTER_MOVE_MS=600000`
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults(Config::builder())?
            .add_source(File::with_name("./config/flexcheck").required(false));

        if let Ok(config_path) = std::env::var("FLEXCHECK_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("FLEXCHECK")
                .separator("__")
                .try_parsing(true),
        );

        let config: HarnessConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file, on top of the defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: HarnessConfig = Self::set_defaults(Config::builder())?
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        let cluster = ClusterSettings::default();
        let workload = WorkloadSettings::default();
        let timeouts = TimeoutSettings::default();
        let metrics = MetricsSettings::default();

        builder
            .set_default("cluster.num_masters", cluster.num_masters as u64)?
            .set_default("cluster.num_tablet_servers", cluster.num_tablet_servers as u64)?
            .set_default("cluster.heartbeat_timeout_ms", cluster.heartbeat_timeout_ms)?
            .set_default("cluster.startup_timeout_ms", cluster.startup_timeout_ms)?
            .set_default("workload.name", workload.name)?
            .set_default("workload.verbose", workload.verbose)?
            .set_default("workload.ops_increment", workload.ops_increment)?
            .set_default("workload.join_timeout_ms", workload.join_timeout_ms)?
            .set_default("timeouts.poll_interval_ms", timeouts.poll_interval_ms)?
            .set_default("timeouts.wait_for_ops_ms", timeouts.wait_for_ops_ms)?
            .set_default("timeouts.load_balance_ms", timeouts.load_balance_ms)?
            .set_default("timeouts.cluster_move_ms", timeouts.cluster_move_ms)?
            .set_default("timeouts.metrics_check_ms", timeouts.metrics_check_ms)?
            .set_default("metrics.op_count_metric", metrics.op_count_metric)?
            .set_default("metrics.live_nodes_metric", metrics.live_nodes_metric)?
            .set_default("metrics.request_timeout_ms", metrics.request_timeout_ms)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.num_masters == 0 {
            return Err(ConfigError::Message(
                "cluster.num_masters must be > 0".to_string(),
            ));
        }

        if self.cluster.num_tablet_servers == 0 {
            return Err(ConfigError::Message(
                "cluster.num_tablet_servers must be > 0".to_string(),
            ));
        }

        if self.workload.ops_increment <= 0 {
            return Err(ConfigError::Message(
                "workload.ops_increment must be > 0".to_string(),
            ));
        }

        if self.timeouts.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "timeouts.poll_interval_ms must be > 0".to_string(),
            ));
        }

        let shortest_wait = self
            .timeouts
            .wait_for_ops_ms
            .min(self.timeouts.load_balance_ms)
            .min(self.timeouts.cluster_move_ms)
            .min(self.timeouts.metrics_check_ms);
        if self.timeouts.poll_interval_ms > shortest_wait {
            return Err(ConfigError::Message(
                "timeouts.poll_interval_ms must not exceed any wait timeout".to_string(),
            ));
        }

        if self.metrics.op_count_metric.is_empty() || self.metrics.live_nodes_metric.is_empty() {
            return Err(ConfigError::Message(
                "metrics names must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Shape of the cluster under test
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterSettings {
    /// Control-plane nodes
    pub num_masters: usize,

    /// Data-plane nodes before expansion; expansion doubles this
    pub num_tablet_servers: usize,

    /// Failure-detector timeout configured on the masters
    pub heartbeat_timeout_ms: u64,

    /// How long to wait for nodes to register after start
    pub startup_timeout_ms: u64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            num_masters: 3,
            num_tablet_servers: 3,
            heartbeat_timeout_ms: 5_000,
            startup_timeout_ms: 50_000,
        }
    }
}

impl ClusterSettings {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

/// Workload generator settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkloadSettings {
    /// Workload name passed to the generator
    pub name: String,

    pub verbose: bool,

    /// Ops required between significant events of the scenario
    pub ops_increment: i64,

    /// Bound on joining the workload task during teardown
    pub join_timeout_ms: u64,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            name: "CassandraStockTicker".to_string(),
            verbose: true,
            ops_increment: 10_000,
            join_timeout_ms: 30_000,
        }
    }
}

impl WorkloadSettings {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Convergence wait bounds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutSettings {
    /// Sleep between predicate evaluations
    pub poll_interval_ms: u64,

    /// Waiting for the workload to reach an op count
    pub wait_for_ops_ms: u64,

    /// Waiting for the load balancer after expansion
    pub load_balance_ms: u64,

    /// Waiting for blacklist evacuation to reach 100%
    pub cluster_move_ms: u64,

    /// Retrying a one-off metrics check while endpoints are unreachable
    pub metrics_check_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            wait_for_ops_ms: 30_000,
            load_balance_ms: 30_000,
            cluster_move_ms: 300_000,
            metrics_check_ms: 30_000,
        }
    }
}

impl TimeoutSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn wait_for_ops(&self) -> Duration {
        Duration::from_millis(self.wait_for_ops_ms)
    }

    pub fn load_balance(&self) -> Duration {
        Duration::from_millis(self.load_balance_ms)
    }

    pub fn cluster_move(&self) -> Duration {
        Duration::from_millis(self.cluster_move_ms)
    }

    pub fn metrics_check(&self) -> Duration {
        Duration::from_millis(self.metrics_check_ms)
    }
}

/// Names of the metrics the scenario asserts on
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsSettings {
    /// Per-node request counter (`total_count` on `server` entities)
    pub op_count_metric: String,

    /// Live data-plane nodes gauge (`value` on the `cluster` entity)
    pub live_nodes_metric: String,

    /// HTTP timeout for one metrics fetch
    pub request_timeout_ms: u64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            op_count_metric: "handler_latency_yb_cqlserver_SQLProcessor_ExecuteRequest".to_string(),
            live_nodes_metric: "num_tablet_servers_live".to_string(),
            request_timeout_ms: 5_000,
        }
    }
}

impl MetricsSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_configuration() {
        let config = HarnessConfig::default();

        assert_eq!(config.cluster.num_masters, 3);
        assert_eq!(config.cluster.num_tablet_servers, 3);
        assert_eq!(config.workload.ops_increment, 10_000);
        assert_eq!(config.timeouts.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.timeouts.wait_for_ops(), Duration::from_secs(30));
        assert_eq!(config.timeouts.load_balance(), Duration::from_secs(30));
        assert_eq!(config.timeouts.cluster_move(), Duration::from_secs(300));
        assert_eq!(config.metrics.live_nodes_metric, "num_tablet_servers_live");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = HarnessConfig::default();

        config.cluster.num_tablet_servers = 0;
        assert!(config.validate().is_err());
        config.cluster.num_tablet_servers = 3;

        config.timeouts.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        config.timeouts.poll_interval_ms = 60_000;
        assert!(config.validate().is_err());

        config.timeouts.poll_interval_ms = 1_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[timeouts]\ncluster_move_ms = 600000\n\n[workload]\nname = \"CassandraKeyValue\""
        )
        .unwrap();

        let config = HarnessConfig::from_file(file.path()).unwrap();

        assert_eq!(config.timeouts.cluster_move(), Duration::from_secs(600));
        assert_eq!(config.workload.name, "CassandraKeyValue");
        // Untouched keys keep their defaults
        assert_eq!(config.timeouts.load_balance_ms, 30_000);
        assert_eq!(config.timeouts.metrics_check(), Duration::from_secs(30));
        assert_eq!(config.cluster.num_masters, 3);
    }
}
