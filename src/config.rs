// Configuration File Support
//
// TOML configuration for the harness with environment variable overrides.
// Loaded from an explicit --config path or from the XDG config directory:
// ~/.config/faultline/config.toml. Every field has a default so the harness
// runs with no config file at all.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Cluster client configuration
    pub cluster: ClusterConfig,

    /// Suite-level run behavior
    pub run: RunConfig,

    /// Database primary fault scenario
    pub database: DatabaseFaultConfig,

    /// Cache primary fault scenario
    pub cache: CacheFaultConfig,

    /// Application replica fault scenario
    pub replicas: ReplicaFaultConfig,

    /// Optional second replica pool, typically the background worker tier.
    /// Same injector as `replicas`, different selector and bounds.
    pub workers: Option<ReplicaFaultConfig>,

    /// Node drain fault scenario (opt-in)
    pub node: NodeFaultConfig,

    /// Network partition fault scenario
    pub network: NetworkFaultConfig,

    /// Load generation and autoscale monitoring
    pub load: LoadTestConfig,

    /// Report output
    pub report: ReportConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Cluster client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusterConfig {
    /// Path to the kubectl binary
    pub kubectl_path: String,

    /// Optional kubeconfig context
    pub context: Option<String>,

    /// Namespace the application stack runs in
    pub namespace: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kubectl_path: "kubectl".to_string(),
            context: None,
            namespace: "default".to_string(),
        }
    }
}

/// Suite-level run behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Cooldown between scenarios so one fault does not bleed into the next
    /// scenario's baseline
    pub cooldown_secs: u64,

    /// Polling interval for recovery predicates
    pub poll_interval_secs: u64,

    /// Optional global deadline for the whole suite; in-flight scenarios are
    /// marked failed (not dropped) when it expires
    pub global_deadline_secs: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 10,
            poll_interval_secs: 2,
            global_deadline_secs: None,
        }
    }
}

impl RunConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn global_deadline(&self) -> Option<Duration> {
        self.global_deadline_secs.map(Duration::from_secs)
    }
}

/// Database primary fault scenario
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseFaultConfig {
    /// Label selector locating the current primary (roles rotate, names do
    /// not matter)
    pub primary_selector: String,

    /// Optional application-tier health endpoint that must succeed once a
    /// new primary is elected
    pub app_health_url: Option<String>,

    /// Recovery timeout in seconds
    pub timeout_secs: u64,

    /// SLA target in seconds
    pub sla_secs: u64,
}

impl Default for DatabaseFaultConfig {
    fn default() -> Self {
        Self {
            primary_selector: "application=spilo,spilo-role=master".to_string(),
            app_health_url: None,
            timeout_secs: 120,
            sla_secs: 30,
        }
    }
}

/// Cache primary fault scenario
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheFaultConfig {
    /// Label selector for the cache server pods
    pub pod_selector: String,

    /// Label selector for the sentinel pods
    pub sentinel_selector: String,

    /// Sentinel master-set name
    pub master_name: String,

    /// Cache server port
    pub port: u16,

    /// Sentinel port
    pub sentinel_port: u16,

    /// Recovery timeout in seconds
    pub timeout_secs: u64,

    /// SLA target in seconds
    pub sla_secs: u64,
}

impl Default for CacheFaultConfig {
    fn default() -> Self {
        Self {
            pod_selector: "app=redis".to_string(),
            sentinel_selector: "app=redis-sentinel".to_string(),
            master_name: "mymaster".to_string(),
            port: 6379,
            sentinel_port: 26379,
            timeout_secs: 90,
            sla_secs: 30,
        }
    }
}

/// Application replica fault scenario
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplicaFaultConfig {
    /// Label selector for the replica pool
    pub selector: String,

    /// Number of replicas deleted at random
    pub kill_count: usize,

    /// Recovery timeout in seconds (self-healing, not failover, so this is
    /// expected to be short)
    pub timeout_secs: u64,

    /// SLA target in seconds
    pub sla_secs: u64,
}

impl Default for ReplicaFaultConfig {
    fn default() -> Self {
        Self {
            selector: "app=web".to_string(),
            kill_count: 2,
            timeout_secs: 120,
            sla_secs: 60,
        }
    }
}

/// Node drain fault scenario (opt-in: disruptive enough to warrant it)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeFaultConfig {
    /// Whether node draining is included in the suite
    pub enabled: bool,

    /// Label selector for application pods used to pick a node worth
    /// draining
    pub app_selector: String,

    /// Recovery timeout in seconds (rescheduling involves image pull and
    /// startup, not just restart)
    pub timeout_secs: u64,

    /// SLA target in seconds
    pub sla_secs: u64,
}

impl Default for NodeFaultConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            app_selector: "app=web".to_string(),
            timeout_secs: 300,
            sla_secs: 120,
        }
    }
}

/// Network partition fault scenario
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkFaultConfig {
    /// Name given to the injected deny policy
    pub policy_name: String,

    /// Label key/value of the pods whose ingress the policy severs
    pub target_label: String,
    pub target_value: String,

    /// Label selector for a client pod used to probe the path
    pub client_selector: String,

    /// URL probed from inside the client pod
    pub probe_url: String,

    /// Recovery timeout in seconds after the policy is removed
    pub timeout_secs: u64,

    /// SLA target in seconds
    pub sla_secs: u64,
}

impl Default for NetworkFaultConfig {
    fn default() -> Self {
        Self {
            policy_name: "faultline-deny-ingress".to_string(),
            target_label: "app".to_string(),
            target_value: "web".to_string(),
            client_selector: "app=nginx".to_string(),
            probe_url: "http://web:8000/healthz/".to_string(),
            timeout_secs: 60,
            sla_secs: 30,
        }
    }
}

/// Load generation and autoscale monitoring
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoadTestConfig {
    /// Whether the load test runs alongside the chaos suite
    pub enabled: bool,

    /// URL the synthetic traffic targets
    pub target_url: String,

    /// Concurrent request workers
    pub concurrency: usize,

    /// How long load is applied, in seconds
    pub duration_secs: u64,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// HorizontalPodAutoscaler to monitor
    pub hpa_name: String,

    /// Replica/metric sampling cadence in seconds
    pub sample_interval_secs: u64,

    /// Mandatory window after load stops during which no scale-down is
    /// expected; an earlier transition is a configuration anomaly
    pub stabilization_window_secs: u64,

    /// How long to keep watching for the return to minimum replicas
    pub scaledown_window_secs: u64,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_url: "http://localhost:8000/".to_string(),
            concurrency: 20,
            duration_secs: 240,
            request_timeout_secs: 5,
            hpa_name: "web".to_string(),
            sample_interval_secs: 10,
            stabilization_window_secs: 300,
            scaledown_window_secs: 600,
        }
    }
}

/// Report output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportConfig {
    /// Directory the Markdown and JSON artifacts are written to
    pub output_dir: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: "./reports".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            cluster: ClusterConfig::default(),
            run: RunConfig::default(),
            database: DatabaseFaultConfig::default(),
            cache: CacheFaultConfig::default(),
            replicas: ReplicaFaultConfig::default(),
            workers: None,
            node: NodeFaultConfig::default(),
            network: NetworkFaultConfig::default(),
            load: LoadTestConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory.
    ///
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(Self::config_path())
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation. A missing file yields defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default().apply_env_overrides());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file from {:?}", path))?;

        let config = config.apply_env_overrides();
        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Get the default configuration file path.
    ///
    /// Returns `~/.config/faultline/config.toml` on Linux/Mac.
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("dev", "faultline", "Faultline") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("faultline")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values:
    /// - FAULTLINE_LOG_LEVEL
    /// - FAULTLINE_LOG_FORMAT
    /// - FAULTLINE_NAMESPACE
    /// - FAULTLINE_KUBECTL
    /// - FAULTLINE_CONTEXT
    /// - FAULTLINE_TARGET_URL
    /// - FAULTLINE_REPORT_DIR
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("FAULTLINE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("FAULTLINE_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(ns) = std::env::var("FAULTLINE_NAMESPACE") {
            self.cluster.namespace = ns;
        }
        if let Ok(path) = std::env::var("FAULTLINE_KUBECTL") {
            self.cluster.kubectl_path = path;
        }
        if let Ok(ctx) = std::env::var("FAULTLINE_CONTEXT") {
            self.cluster.context = Some(ctx);
        }
        if let Ok(url) = std::env::var("FAULTLINE_TARGET_URL") {
            self.load.target_url = url;
        }
        if let Ok(dir) = std::env::var("FAULTLINE_REPORT_DIR") {
            self.report.output_dir = dir;
        }
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        if self.cluster.namespace.is_empty() {
            anyhow::bail!("Cluster namespace must not be empty");
        }
        if self.run.poll_interval_secs == 0 {
            anyhow::bail!("Poll interval must be > 0 seconds");
        }
        if self.replicas.kill_count == 0 {
            anyhow::bail!("Replica kill count must be > 0");
        }
        if self.load.concurrency == 0 {
            anyhow::bail!("Load concurrency must be > 0");
        }
        if self.load.sample_interval_secs == 0 {
            anyhow::bail!("Load sample interval must be > 0 seconds");
        }

        let mut bounds = vec![
            ("database", self.database.timeout_secs, self.database.sla_secs),
            ("cache", self.cache.timeout_secs, self.cache.sla_secs),
            ("replicas", self.replicas.timeout_secs, self.replicas.sla_secs),
            ("node", self.node.timeout_secs, self.node.sla_secs),
            ("network", self.network.timeout_secs, self.network.sla_secs),
        ];
        if let Some(workers) = &self.workers {
            if workers.kill_count == 0 {
                anyhow::bail!("Worker kill count must be > 0");
            }
            bounds.push(("workers", workers.timeout_secs, workers.sla_secs));
        }
        for (name, timeout, sla) in bounds {
            if timeout == 0 {
                anyhow::bail!("{} recovery timeout must be > 0 seconds", name);
            }
            if sla > timeout {
                anyhow::bail!(
                    "{} SLA target ({}s) exceeds its recovery timeout ({}s)",
                    name,
                    sla,
                    timeout
                );
            }
        }

        Ok(())
    }
}
