//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: Hardcoded in struct `Default` implementations
//! 2. **Config file**: TOML file specified by `CONDUIT_CONFIG` env var
//! 3. **Environment variables**: `CONDUIT__*` env vars override specific fields
//!
//! # Configuration Sections
//!
//! - [`EndpointSettings`]: Remote endpoint definitions
//! - [`PoolConfig`]: Connection pool sizing and connect timeout
//! - [`CircuitBreakerConfig`]: Failure-rate threshold and open duration
//! - [`LoadBalancerConfig`]: Endpoint selection strategy
//! - [`RetryConfig`]: Attempt timeout and exponential backoff
//! - [`SchedulerSettings`]: Batch formation and execution limits
//! - [`HealthCheckConfig`]: Background probing of tripped endpoints
//! - [`MetricsConfig`]: Prometheus recorder and alert thresholds
//! - [`LoggingConfig`]: Log level and format
//!
//! # Example
//!
//! ```toml
//! [[endpoints]]
//! name = "primary"
//! url = "https://rpc.example.com"
//!
//! [load_balancer]
//! strategy = "least_connections"
//!
//! [retry]
//! max_retries = 3
//! base_delay_ms = 100
//! backoff_multiplier = 2.0
//! ```

use crate::{
    scheduler::SchedulerSettings,
    types::EndpointConfig,
    upstream::{BackoffPolicy, LoadBalancingStrategy},
};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::Path, sync::Arc, time::Duration};

/// Configuration for a single remote endpoint.
///
/// Per-endpoint overrides fall back to the [`PoolConfig`] and [`CircuitBreakerConfig`]
/// sections when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSettings {
    /// Unique identifier for this endpoint (e.g., "primary", "backup-eu").
    pub name: String,

    /// Endpoint URL. Must be an `http` or `https` URL for the default transport.
    pub url: String,

    /// Overrides `pool.max_connections_per_endpoint` for this endpoint.
    #[serde(default)]
    pub max_connections: Option<usize>,

    /// Overrides `circuit_breaker.threshold` for this endpoint.
    #[serde(default)]
    pub circuit_breaker_threshold: Option<f64>,
}

/// Connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum live connections per endpoint. Defaults to `4`.
    #[serde(default = "default_max_connections_per_endpoint")]
    pub max_connections_per_endpoint: usize,

    /// Budget for establishing a new connection in milliseconds. Defaults to `5000`.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
}

fn default_max_connections_per_endpoint() -> usize {
    4
}

fn default_connection_timeout_ms() -> u64 {
    5_000
}

/// Circuit breaker configuration shared by all endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failure rate in `(0, 1]` that opens the breaker. Defaults to `0.5`.
    #[serde(default = "default_circuit_breaker_threshold")]
    pub threshold: f64,

    /// Seconds spent in the open state before moving to half-open. Defaults to `30`.
    #[serde(default = "default_circuit_breaker_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_circuit_breaker_threshold() -> f64 {
    0.5
}

fn default_circuit_breaker_timeout_seconds() -> u64 {
    30
}

/// Load balancer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    /// Selection strategy. Defaults to `round_robin`.
    #[serde(default)]
    pub strategy: LoadBalancingStrategy,
}

/// Retry and timeout configuration for the direct request path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Number of retries after the first failed attempt. Defaults to `3`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds. Defaults to `100`.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Multiplier applied to the delay for each further retry. Defaults to `2.0`.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound on a single backoff delay in milliseconds. Defaults to `30000`.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Per-attempt request timeout in milliseconds. Defaults to `30000`.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

/// Background health checking of endpoints whose breaker is not closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Whether the background health checker runs. Defaults to `true`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interval between health check rounds in seconds. Defaults to `15`.
    #[serde(default = "default_health_check_interval_seconds")]
    pub interval_seconds: u64,

    /// RPC method used as the probe. Defaults to `"eth_blockNumber"`.
    #[serde(default = "default_health_check_method")]
    pub method: String,

    /// Probe timeout in milliseconds. Defaults to `5000`.
    #[serde(default = "default_health_check_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_health_check_interval_seconds() -> u64 {
    15
}

fn default_health_check_method() -> String {
    "eth_blockNumber".to_string()
}

fn default_health_check_timeout_ms() -> u64 {
    5_000
}

/// Metrics export configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the Prometheus recorder is installed. Defaults to `true`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Failure rate above which an endpoint is reported in health alerts. Defaults to `0.25`.
    #[serde(default = "default_failure_rate_warning")]
    pub failure_rate_warning: f64,
}

fn default_failure_rate_warning() -> f64 {
    0.25
}

/// Application logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "trace", "debug", "info", "warn", "error"). Defaults to `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Root application configuration containing all subsystem settings.
///
/// Loaded with the `CONDUIT` prefix for environment overrides using `__` as a separator
/// (e.g., `CONDUIT__RETRY__MAX_RETRIES=5`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote endpoints. Must contain at least one entry.
    #[serde(default)]
    pub endpoints: Vec<EndpointSettings>,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_endpoint: default_max_connections_per_endpoint(),
            connection_timeout_ms: default_connection_timeout_ms(),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: default_circuit_breaker_threshold(),
            timeout_seconds: default_circuit_breaker_timeout_seconds(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_health_check_interval_seconds(),
            method: default_health_check_method(),
            timeout_ms: default_health_check_timeout_ms(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true, failure_rate_warning: default_failure_rate_warning() }
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
            endpoints: vec![
                EndpointSettings {
                    name: "primary".to_string(),
                    url: "http://127.0.0.1:8545".to_string(),
                    max_connections: None,
                    circuit_breaker_threshold: None,
                },
                EndpointSettings {
                    name: "secondary".to_string(),
                    url: "http://127.0.0.1:8546".to_string(),
                    max_connections: None,
                    circuit_breaker_threshold: None,
                },
            ],
            pool: PoolConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            load_balancer: LoadBalancerConfig::default(),
            retry: RetryConfig::default(),
            scheduler: SchedulerSettings::default(),
            health_check: HealthCheckConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("retry.max_retries", 3)?
            .set_default("retry.base_delay_ms", 100)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("CONDUIT").separator("__"))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/config.toml`, overridable via `CONDUIT_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CONDUIT_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Resolves endpoint settings into runtime [`EndpointConfig`] values.
    #[must_use]
    pub fn endpoint_configs(&self) -> Vec<EndpointConfig> {
        self.endpoints
            .iter()
            .map(|e| EndpointConfig {
                name: Arc::from(e.name.as_str()),
                url: e.url.clone(),
                circuit_breaker_threshold: e
                    .circuit_breaker_threshold
                    .unwrap_or(self.circuit_breaker.threshold),
                circuit_breaker_timeout: Duration::from_secs(self.circuit_breaker.timeout_seconds),
                max_connections: e
                    .max_connections
                    .unwrap_or(self.pool.max_connections_per_endpoint),
            })
            .collect()
    }

    /// Returns the backoff policy for the direct request path.
    #[must_use]
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            multiplier: self.retry.backoff_multiplier,
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.retry.request_timeout_ms)
    }

    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.pool.connection_timeout_ms)
    }

    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check.interval_seconds)
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.endpoints.is_empty() {
            return Err("No endpoints configured".to_string());
        }

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.name.is_empty() {
                return Err("Endpoint name must not be empty".to_string());
            }
            if !seen.insert(endpoint.name.as_str()) {
                return Err(format!("Duplicate endpoint name: {}", endpoint.name));
            }
            match url::Url::parse(&endpoint.url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                _ => {
                    return Err(format!(
                        "Invalid URL for endpoint {}: {}",
                        endpoint.name, endpoint.url
                    ))
                }
            }
            if endpoint.max_connections == Some(0) {
                return Err(format!("max_connections must be > 0 for {}", endpoint.name));
            }
            if let Some(threshold) = endpoint.circuit_breaker_threshold {
                if !(threshold > 0.0 && threshold <= 1.0) {
                    return Err(format!(
                        "circuit_breaker_threshold for {} must be in (0, 1]",
                        endpoint.name
                    ));
                }
            }
        }

        if self.pool.max_connections_per_endpoint == 0 {
            return Err("pool.max_connections_per_endpoint must be greater than 0".to_string());
        }
        if self.pool.connection_timeout_ms == 0 {
            return Err("pool.connection_timeout_ms must be greater than 0".to_string());
        }
        if !(self.circuit_breaker.threshold > 0.0 && self.circuit_breaker.threshold <= 1.0) {
            return Err("circuit_breaker.threshold must be in (0, 1]".to_string());
        }
        if self.retry.request_timeout_ms == 0 {
            return Err("retry.request_timeout_ms must be greater than 0".to_string());
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err("retry.backoff_multiplier must be at least 1.0".to_string());
        }
        if self.health_check.enabled && self.health_check.interval_seconds == 0 {
            return Err("health_check.interval_seconds must be greater than 0".to_string());
        }

        self.scheduler.validate()?;

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
