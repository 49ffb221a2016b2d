use std::time::Duration;

use anyhow::{Context, Result};
use jsonschema::validator_for;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::params::TokenSpec;
use crate::scheduler::UpstreamPolicy;
use crate::util::{env_bool, env_u64};

pub const ENV_ENABLE_EVENT_QUEUE: &str = "APIWATCH_ENABLE_EVENT_QUEUE";
pub const ENV_INITIAL_DELAY_MS: &str = "APIWATCH_INITIAL_DELAY_MS";
pub const ENV_RETRY_ON_UPSTREAM_ERROR: &str = "APIWATCH_RETRY_ON_UPSTREAM_ERROR";
pub const ENV_RETRY_AFTER_MS: &str = "APIWATCH_RETRY_AFTER_MS";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    /// Allow event subscriptions; when false every schedule call fails.
    pub enable_event_queue: bool,
    /// Delay before the first check of a newly scheduled request.
    pub initial_delay_ms: u64,
    /// What the poll worker does with a request whose poll failed.
    pub on_upstream_error: UpstreamPolicy,
    /// Delay before a failed poll is retried (`retry` policy only).
    pub retry_after_ms: u64,
    /// Capacity of the out-of-band event bus.
    pub event_bus_capacity: usize,
    pub token: TokenSpec,
    pub http: HttpConfig,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enable_event_queue: true,
            initial_delay_ms: 1_000,
            on_upstream_error: UpstreamPolicy::Drop,
            retry_after_ms: 30_000,
            event_bus_capacity: 256,
            token: TokenSpec::default(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_ms: u64,
    /// Expiry used when a response carries neither `Expires` nor `max-age`.
    pub default_expiry_secs: u64,
    /// Expiry stamped on transport failures.
    pub error_expiry_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("apiwatch/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_ms: 30_000,
            default_expiry_secs: 60,
            error_expiry_secs: 5,
        }
    }
}

impl WatchConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn retry_after(&self) -> Duration {
        Duration::from_millis(self.retry_after_ms)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(enabled) = env_bool(ENV_ENABLE_EVENT_QUEUE) {
            self.enable_event_queue = enabled;
        }
        if let Some(ms) = env_u64(ENV_INITIAL_DELAY_MS) {
            self.initial_delay_ms = ms;
        }
        if let Some(retry) = env_bool(ENV_RETRY_ON_UPSTREAM_ERROR) {
            self.on_upstream_error = if retry {
                UpstreamPolicy::Retry
            } else {
                UpstreamPolicy::Drop
            };
        }
        if let Some(ms) = env_u64(ENV_RETRY_AFTER_MS) {
            self.retry_after_ms = ms;
        }
    }
}

/// Returns the JSON schema describing the configuration structure.
pub fn config_schema_json() -> serde_json::Value {
    let schema = schemars::schema_for!(WatchConfig);
    serde_json::to_value(&schema).unwrap_or_default()
}

/// Parse TOML, validate it against [`config_schema_json`], then deserialize.
pub fn parse_config(content: &str) -> Result<WatchConfig> {
    let raw: toml::Value = toml::from_str(content).context("parsing config toml")?;
    let json_value = serde_json::to_value(&raw)?;
    let validator = validator_for(&config_schema_json())
        .map_err(|err| anyhow::anyhow!("config schema is invalid: {err}"))?;
    let validation_errors: Vec<_> = validator
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(anyhow::anyhow!(validation_errors.join(", ")));
    }
    let cfg: WatchConfig = toml::from_str(content)?;
    Ok(cfg)
}

/// Load a config file and apply environment overrides on top.
pub fn load_config(path: &str) -> Result<WatchConfig> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading config at {path}"))?;
    let mut cfg = parse_config(&content).with_context(|| format!("validating config at {path}"))?;
    cfg.apply_env_overrides();
    tracing::debug!(path, ?cfg, "config loaded");
    Ok(cfg)
}

pub fn write_schema_file(path: &str) -> std::io::Result<()> {
    let schema_json = config_schema_json();
    std::fs::write(path, serde_json::to_string_pretty(&schema_json)?)
}
