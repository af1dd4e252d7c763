//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: `set_default` calls and serde default functions
//! 2. **Config file**: TOML file specified by `FLUXGATE_CONFIG` env var
//! 3. **Environment variables**: `FLUXGATE__*` env vars override specific fields
//!
//! # Configuration Sections
//!
//! - [`ServerConfig`]: HTTP server settings (bind address, concurrency, body limit)
//! - [`NodesConfig`]: backend kind and the node groups (`default`, `logs`, `ws`)
//! - [`HealthCheckConfig`]: probe interval, timeout and failure threshold
//! - [`RateLimitConfig`]: per-caller token buckets
//! - [`LogFilterConfig`]: log query limits
//! - [`SubscriptionConfig`]: downstream queue sizing
//! - [`RelayConfig`]: raw transaction relay targets
//! - [`MetricsConfig`], [`LoggingConfig`]
//!
//! # Example
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! bind_port = 22537
//!
//! [nodes]
//! backend = "cfx"
//!
//! [[nodes.groups.default]]
//! name = "node-1"
//! url = "http://127.0.0.1:12537"
//! ws_url = "ws://127.0.0.1:12535"
//!
//! [[nodes.groups.logs]]
//! name = "archive-1"
//! url = "http://10.0.0.5:12537"
//! ```

use crate::{filter::FilterLimits, provider::GroupKey};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, time::Duration};

/// HTTP server configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind the server to. Defaults to `127.0.0.1`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port number to listen on. Defaults to `22537`.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Maximum number of concurrent RPC requests the server can handle. Defaults to `1000`.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Request timeout in seconds. Defaults to `30`.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Maximum accepted request body in bytes. Defaults to 1 MiB.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    22537
}

fn default_max_concurrent_requests() -> usize {
    1000
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// Which chain RPC surface the gateway fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Cfx,
    Eth,
}

impl BackendKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cfx => "cfx",
            Self::Eth => "eth",
        }
    }

    #[must_use]
    pub fn subscribe_method(&self) -> &'static str {
        match self {
            Self::Cfx => "cfx_subscribe",
            Self::Eth => "eth_subscribe",
        }
    }

    #[must_use]
    pub fn unsubscribe_method(&self) -> &'static str {
        match self {
            Self::Cfx => "cfx_unsubscribe",
            Self::Eth => "eth_unsubscribe",
        }
    }

    #[must_use]
    pub fn notification_method(&self) -> &'static str {
        match self {
            Self::Cfx => "cfx_subscription",
            Self::Eth => "eth_subscription",
        }
    }

    /// The cheap height query used as a health probe.
    #[must_use]
    pub fn probe_request(&self) -> (&'static str, serde_json::Value) {
        match self {
            Self::Cfx => ("cfx_epochNumber", serde_json::json!(["latest_mined"])),
            Self::Eth => ("eth_blockNumber", serde_json::json!([])),
        }
    }
}

/// Configuration for a single full node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEndpoint {
    /// Human-readable identifier used in logs, metrics and the sticky table.
    pub name: String,

    /// HTTP JSON-RPC endpoint.
    pub url: String,

    /// WebSocket endpoint, required for nodes in the `ws` group.
    #[serde(default)]
    pub ws_url: Option<String>,

    /// Per-request timeout in seconds. Defaults to `30`.
    #[serde(default = "default_node_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_node_timeout_seconds() -> u64 {
    30
}

impl NodeEndpoint {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Node pool configuration: the backend surface and named node groups.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodesConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Group name (`default`, `logs`, `ws`) to member nodes.
    #[serde(default)]
    pub groups: HashMap<String, Vec<NodeEndpoint>>,
}

impl NodesConfig {
    /// Returns the configured members of a group; empty if the group is not configured.
    #[must_use]
    pub fn group(&self, key: GroupKey) -> &[NodeEndpoint] {
        self.groups.get(key.as_str()).map_or(&[], Vec::as_slice)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_health_interval_ms")]
    pub interval_ms: u64,

    /// Consecutive failed probes before a healthy node is condemned.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_health_interval_ms() -> u64 {
    1000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_probe_timeout_ms() -> u64 {
    3000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Bucket capacity per caller.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Tokens added per second.
    #[serde(default = "default_refill_rate")]
    pub refill_rate: u32,

    /// Upper bound on tracked callers before idle buckets are evicted.
    #[serde(default = "default_max_buckets")]
    pub max_buckets: usize,
}

fn default_max_tokens() -> u32 {
    200
}

fn default_refill_rate() -> u32 {
    100
}

fn default_max_buckets() -> usize {
    100_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFilterConfig {
    #[serde(default = "default_max_block_hashes")]
    pub max_block_hashes: usize,
    #[serde(default = "default_max_range")]
    pub max_block_range: u64,
    #[serde(default = "default_max_range")]
    pub max_epoch_range: u64,
    #[serde(default = "default_max_limit")]
    pub max_limit: u64,
}

fn default_max_block_hashes() -> usize {
    128
}

fn default_max_range() -> u64 {
    1000
}

fn default_max_limit() -> u64 {
    10_000
}

impl LogFilterConfig {
    #[must_use]
    pub fn limits(&self) -> FilterLimits {
        FilterLimits {
            max_block_hashes: self.max_block_hashes,
            max_block_range: self.max_block_range,
            max_epoch_range: self.max_epoch_range,
            max_limit: self.max_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Bounded outbound queue per downstream subscriber.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub enabled: bool,

    /// HTTP endpoints that receive a copy of every accepted raw transaction.
    #[serde(default)]
    pub nodes: Vec<String>,

    #[serde(default = "default_relay_buffer_size")]
    pub buffer_size: usize,
}

fn default_relay_buffer_size() -> usize {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub nodes: NodesConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub log_filter: LogFilterConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            max_concurrent_requests: default_max_concurrent_requests(),
            request_timeout_seconds: default_request_timeout_seconds(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_health_interval_ms(),
            failure_threshold: default_failure_threshold(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_tokens: default_max_tokens(),
            refill_rate: default_refill_rate(),
            max_buckets: default_max_buckets(),
        }
    }
}

impl Default for LogFilterConfig {
    fn default() -> Self {
        Self {
            max_block_hashes: default_max_block_hashes(),
            max_block_range: default_max_range(),
            max_epoch_range: default_max_range(),
            max_limit: default_max_limit(),
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self { queue_capacity: default_queue_capacity() }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { enabled: false, nodes: Vec::new(), buffer_size: default_relay_buffer_size() }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            server: ServerConfig::default(),
            nodes: NodesConfig::default(),
            health_check: HealthCheckConfig::default(),
            rate_limit: RateLimitConfig::default(),
            log_filter: LogFilterConfig::default(),
            subscription: SubscriptionConfig::default(),
            relay: RelayConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// Environment variables with the `FLUXGATE__` prefix can override any configuration
    /// value. Use `__` as a separator for nested fields (e.g., `FLUXGATE__SERVER__BIND_PORT=8080`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("environment", "development")?
            .set_default("server.bind_address", "127.0.0.1")?
            .set_default("server.bind_port", 22537)?
            .set_default("nodes.backend", "cfx")?
            .set_default("health_check.interval_ms", 1000)?
            .set_default("health_check.failure_threshold", 3)?
            .set_default("rate_limit.enabled", false)?
            .set_default("metrics.enabled", true)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("FLUXGATE").prefix_separator("__").separator("__"))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/config.toml` with fallback to defaults.
    ///
    /// The config file path can be overridden using the `FLUXGATE_CONFIG` environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("FLUXGATE_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Returns the parsed socket address for the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns an error string if the address cannot be parsed into a valid socket address.
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, String> {
        format!("{}:{}", self.server.bind_address, self.server.bind_port)
            .parse()
            .map_err(|_| {
                format!(
                    "invalid socket address: {}:{}",
                    self.server.bind_address, self.server.bind_port
                )
            })
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_seconds)
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes.group(GroupKey::Default).is_empty() {
            return Err("no nodes configured in the default group".to_string());
        }

        for (group, members) in &self.nodes.groups {
            let key = GroupKey::parse(group)
                .ok_or_else(|| format!("unknown node group '{group}' (expected default, logs or ws)"))?;

            for node in members {
                if node.name.is_empty() {
                    return Err(format!("node in group '{group}' has an empty name"));
                }
                if !node.url.starts_with("http") {
                    return Err(format!("invalid HTTP URL for node {}: {}", node.name, node.url));
                }
                match (&node.ws_url, key) {
                    (Some(ws_url), _) if !ws_url.starts_with("ws") => {
                        return Err(format!(
                            "invalid WebSocket URL for node {}: {ws_url}",
                            node.name
                        ));
                    }
                    (None, GroupKey::Ws) => {
                        return Err(format!("node {} in the ws group needs a ws_url", node.name));
                    }
                    _ => {}
                }
                if node.timeout_seconds == 0 {
                    return Err(format!("timeout for node {} must be greater than 0", node.name));
                }
            }
        }

        if self.health_check.interval_ms == 0 {
            return Err("health check interval must be greater than 0".to_string());
        }

        if self.health_check.failure_threshold == 0 {
            return Err("health check failure threshold must be greater than 0".to_string());
        }

        if self.server.max_concurrent_requests == 0 {
            return Err("max concurrent requests must be greater than 0".to_string());
        }

        if self.server.bind_port == 0 {
            return Err("bind port must be greater than 0".to_string());
        }

        if self.subscription.queue_capacity == 0 {
            return Err("subscription queue capacity must be greater than 0".to_string());
        }

        if self.rate_limit.enabled &&
            (self.rate_limit.max_tokens == 0 || self.rate_limit.refill_rate == 0)
        {
            return Err("rate limit tokens and refill rate must be greater than 0".to_string());
        }

        if self.relay.enabled {
            if self.relay.nodes.is_empty() {
                return Err("relay enabled without relay nodes".to_string());
            }
            if self.relay.buffer_size == 0 {
                return Err("relay buffer size must be greater than 0".to_string());
            }
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
