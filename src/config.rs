// Layered configuration: file + SWITCHBOARD_* environment overrides

use serde::Deserialize;
use std::time::Duration;

use crate::invoker::breaker::CircuitBreakerConfig;
use crate::invoker::http::{RetryConfig, ServiceClientConfig};
use crate::openapi::ServiceSpecSource;
use crate::{Result, SwitchboardError};

/// Root settings. Any field can be overridden through the environment,
/// e.g. `SWITCHBOARD_HTTP__PORT=9090`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub definitions: DefinitionSettings,
    #[serde(default)]
    pub services: Vec<ServiceSettings>,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub lookups: LookupSettings,
    #[serde(default)]
    pub capabilities: CapabilitySettings,
    #[serde(default)]
    pub workflow: WorkflowSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HttpSettings {
    fn default() -> Self {
        HttpSettings {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DefinitionSettings {
    /// Directories walked for `.yaml` / `.yml` definition files
    #[serde(default)]
    pub dirs: Vec<String>,
}

/// One downstream service: its contract, address, and resilience tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSettings {
    pub id: String,
    pub spec_path: String,
    pub base_url: String,
    #[serde(default = "default_service_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub breaker: BreakerSettings,
}

impl ServiceSettings {
    pub fn spec_source(&self) -> ServiceSpecSource {
        ServiceSpecSource {
            service_id: self.id.clone(),
            spec_path: self.spec_path.clone(),
            base_url: self.base_url.clone(),
        }
    }

    pub fn client_config(&self) -> ServiceClientConfig {
        ServiceClientConfig {
            service_id: self.id.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
            retry: RetryConfig {
                max_attempts: self.retry.max_attempts,
                backoff_initial: Duration::from_millis(self.retry.backoff_initial_ms),
                backoff_max: Duration::from_millis(self.retry.backoff_max_ms),
                multiplier: self.retry.multiplier,
                idempotent_only: self.retry.idempotent_only,
            },
            breaker: CircuitBreakerConfig {
                failure_threshold: self.breaker.failure_threshold,
                success_threshold: self.breaker.success_threshold,
                timeout: Duration::from_millis(self.breaker.timeout_ms),
                error_rate_threshold: self.breaker.error_rate,
                window: Duration::from_millis(self.breaker.window_ms),
                min_samples: self.breaker.min_samples,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_true")]
    pub idempotent_only: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            multiplier: default_multiplier(),
            idempotent_only: true,
        }
    }
}

/// Zero values fall through to the breaker's own defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BreakerSettings {
    #[serde(default)]
    pub failure_threshold: u32,
    #[serde(default)]
    pub success_threshold: u32,
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default)]
    pub error_rate: f64,
    #[serde(default)]
    pub window_ms: u64,
    #[serde(default)]
    pub min_samples: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_search_timeout_ms")]
    pub provider_timeout_ms: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        SearchSettings {
            provider_timeout_ms: default_search_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LookupSettings {
    #[serde(default = "default_lookup_capacity")]
    pub cache_capacity: usize,
}

impl Default for LookupSettings {
    fn default() -> Self {
        LookupSettings {
            cache_capacity: default_lookup_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CapabilitySettings {
    #[serde(default = "default_capability_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "default_capability_capacity")]
    pub cache_capacity: usize,
}

impl Default for CapabilitySettings {
    fn default() -> Self {
        CapabilitySettings {
            ttl_ms: default_capability_ttl_ms(),
            cache_capacity: default_capability_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowSettings {
    #[serde(default = "default_chain_limit")]
    pub chain_limit: usize,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Postgres URL for the durable store; in-memory when absent
    #[serde(default)]
    pub database_url: Option<String>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        WorkflowSettings {
            chain_limit: default_chain_limit(),
            sweep_interval_ms: default_sweep_interval_ms(),
            database_url: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_service_timeout_ms() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_initial_ms() -> u64 {
    100
}
fn default_backoff_max_ms() -> u64 {
    5_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_true() -> bool {
    true
}
fn default_search_timeout_ms() -> u64 {
    3_000
}
fn default_lookup_capacity() -> usize {
    500
}
fn default_capability_ttl_ms() -> u64 {
    60_000
}
fn default_capability_capacity() -> usize {
    1_000
}
fn default_chain_limit() -> usize {
    10
}
fn default_sweep_interval_ms() -> u64 {
    30_000
}

impl Settings {
    /// Load from an optional file plus `SWITCHBOARD_*` environment
    /// variables (`__` separates nesting levels).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        builder = match path {
            Some(path) => builder.add_source(config::File::with_name(path)),
            None => builder.add_source(config::File::with_name("switchboard").required(false)),
        };
        builder = builder.add_source(
            config::Environment::with_prefix("SWITCHBOARD").separator("__"),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| SwitchboardError::Internal(format!("configuration error: {e}")))
    }
}
