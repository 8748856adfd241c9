// src/config/models.rs
use anyhow::{bail, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_http_port")]
    pub frontend_http_port: u16,
    #[serde(default = "default_https_port")]
    pub frontend_https_port: u16,
    #[serde(default = "default_http_port")]
    pub backend_http_port: u16,
    #[serde(default = "default_https_port")]
    pub backend_https_port: u16,

    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub inventory_retry: RetryConfig,

    /// Static node inventory, used when no cluster API is configured.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    /// YAML or JSON file holding additional static backends.
    #[serde(default)]
    pub inventory_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            frontend_http_port: default_http_port(),
            frontend_https_port: default_https_port(),
            backend_http_port: default_http_port(),
            backend_https_port: default_https_port(),
            metrics: MetricsConfig::default(),
            health_check: HealthCheckConfig::default(),
            proxy: ProxyConfig::default(),
            cluster: ClusterConfig::default(),
            inventory_retry: RetryConfig::default(),
            backends: Vec::new(),
            inventory_file: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        for (field, port) in [
            ("frontend_http_port", self.frontend_http_port),
            ("frontend_https_port", self.frontend_https_port),
            ("backend_http_port", self.backend_http_port),
            ("backend_https_port", self.backend_https_port),
            ("health_check.port", self.health_check.port),
        ] {
            if port == 0 {
                bail!("{} must be between 1 and 65535", field);
            }
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                bail!("metrics.port must be between 1 and 65535");
            }
            if !self.metrics.path.starts_with('/') {
                bail!("metrics.path must start with '/'");
            }
        }

        self.health_check.validate()?;

        if self.proxy.pool.enabled && self.proxy.pool.max_idle_per_backend == 0 {
            bail!("proxy.pool.max_idle_per_backend must be positive when pooling is enabled");
        }

        if self.cluster.api_server.is_some() && self.cluster.node_selector.trim().is_empty() {
            bail!("cluster.node_selector cannot be empty");
        }

        if self.cluster.api_server.is_none()
            && self.backends.is_empty()
            && self.inventory_file.is_none()
        {
            bail!("no node inventory configured: set cluster.api_server, backends or inventory_file");
        }

        if self.inventory_retry.max_attempts == 0 {
            bail!("inventory_retry.max_attempts must be positive");
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    /// IP address, optionally with a port which is ignored.
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Fixed health port, independent of any data port.
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default = "default_health_path")]
    pub path: String,
    /// Consecutive failed probes before a healthy backend is taken out of rotation.
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
    /// Nodes younger than this are held out of rotation while they warm up.
    #[serde(default = "default_new_node_threshold_mins")]
    pub new_node_threshold_mins: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            port: default_http_port(),
            path: default_health_path(),
            unhealthy_threshold: default_unhealthy_threshold(),
            new_node_threshold_mins: default_new_node_threshold_mins(),
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn new_node_threshold(&self) -> Duration {
        Duration::from_secs(self.new_node_threshold_mins * 60)
    }

    fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            bail!("health_check.interval_secs must be positive");
        }
        if self.timeout_secs == 0 {
            bail!("health_check.timeout_secs must be positive");
        }
        if self.unhealthy_threshold == 0 {
            bail!("health_check.unhealthy_threshold must be positive");
        }
        if !self.path.starts_with('/') {
            bail!("health_check.path must start with '/'");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Zero disables the client idle timeout.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Upper bound on concurrently handled connections per listener.
    #[serde(default)]
    pub max_connections: Option<usize>,
    #[serde(default)]
    pub pool: PoolConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_connections: None,
            pool: PoolConfig::default(),
        }
    }
}

impl ProxyConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_idle_per_backend")]
    pub max_idle_per_backend: usize,
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
    /// Spare connections dialed ahead of demand after each checkout.
    #[serde(default)]
    pub warm_connections: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_idle_per_backend: default_max_idle_per_backend(),
            idle_ttl_secs: default_idle_ttl_secs(),
            warm_connections: 0,
        }
    }
}

impl PoolConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Kubernetes API server; when unset the balancer runs on static inventory
    /// with the HTTP probe alone governing health.
    #[serde(default)]
    pub api_server: Option<Url>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(default = "default_node_selector")]
    pub node_selector: String,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    #[serde(default = "default_true")]
    pub readiness: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_server: None,
            token: None,
            token_file: None,
            node_selector: default_node_selector(),
            insecure_skip_verify: false,
            readiness: true,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ClusterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_http_port() -> u16 {
    80
}

fn default_https_port() -> u16 {
    443
}

fn default_metrics_port() -> u16 {
    9099
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_interval_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_health_path() -> String {
    "/healthz".to_string()
}

fn default_unhealthy_threshold() -> u32 {
    1
}

fn default_new_node_threshold_mins() -> u64 {
    15
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_idle_timeout_secs() -> u64 {
    30
}

fn default_max_idle_per_backend() -> usize {
    8
}

fn default_idle_ttl_secs() -> u64 {
    60
}

fn default_node_selector() -> String {
    "node-role.kubernetes.io/worker=true".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    2000
}

fn default_backoff_max_ms() -> u64 {
    10_000
}
