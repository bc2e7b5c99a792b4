//! Controller configuration
//!
//! Loaded from a mounted YAML file; every field has a default so an empty
//! or missing file yields a working controller.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Default location of the mounted configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

/// Environment variable overriding [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_PATH_ENV: &str = "METAL_CONTROLLER_CONFIG";

/// Environment variable restricting the watch to one namespace.
pub const WATCH_NAMESPACE_ENV: &str = "WATCH_NAMESPACE";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Main controller configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Namespace to watch, all namespaces when unset
    #[serde(default = "default_namespace")]
    pub namespace: Option<String>,

    /// Number of concurrent reconcile workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Requeue delay while waiting on a dependency or the provider
    #[serde(default = "default_requeue_interval_secs")]
    pub requeue_interval_secs: u64,

    /// Periodic resync of converged objects
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,

    /// First retry delay after a failed reconcile
    #[serde(default = "default_backoff_base_millis")]
    pub backoff_base_millis: u64,

    /// Upper bound of the retry delay
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,

    /// Deadline of a single reconcile
    #[serde(default = "default_reconcile_timeout_secs")]
    pub reconcile_timeout_secs: u64,

    /// Deadline of a single provider call
    #[serde(default = "default_provider_request_timeout_secs")]
    pub provider_request_timeout_secs: u64,

    /// Listen address of the health endpoints
    #[serde(default = "default_health_addr")]
    pub health_addr: String,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_namespace() -> Option<String> {
    std::env::var(WATCH_NAMESPACE_ENV)
        .ok()
        .filter(|ns| !ns.is_empty())
}

fn default_workers() -> usize {
    4
}

fn default_requeue_interval_secs() -> u64 {
    10
}

fn default_resync_interval_secs() -> u64 {
    600
}

fn default_backoff_base_millis() -> u64 {
    500
}

fn default_backoff_max_secs() -> u64 {
    300
}

fn default_reconcile_timeout_secs() -> u64 {
    120
}

fn default_provider_request_timeout_secs() -> u64 {
    30
}

fn default_health_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            workers: default_workers(),
            requeue_interval_secs: default_requeue_interval_secs(),
            resync_interval_secs: default_resync_interval_secs(),
            backoff_base_millis: default_backoff_base_millis(),
            backoff_max_secs: default_backoff_max_secs(),
            reconcile_timeout_secs: default_reconcile_timeout_secs(),
            provider_request_timeout_secs: default_provider_request_timeout_secs(),
            health_addr: default_health_addr(),
            log_format: LogFormat::default(),
        }
    }
}

impl ControllerConfig {
    /// Validate that the configuration describes a runnable controller
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.workers == 0 {
            return Err(anyhow::anyhow!("workers must be at least 1"));
        }
        for (name, value) in [
            ("requeueIntervalSecs", self.requeue_interval_secs),
            ("resyncIntervalSecs", self.resync_interval_secs),
            ("backoffBaseMillis", self.backoff_base_millis),
            ("backoffMaxSecs", self.backoff_max_secs),
            ("reconcileTimeoutSecs", self.reconcile_timeout_secs),
            ("providerRequestTimeoutSecs", self.provider_request_timeout_secs),
        ] {
            if value == 0 {
                return Err(anyhow::anyhow!("{name} must be greater than zero"));
            }
        }
        if self.backoff_base_millis > self.backoff_max_secs.saturating_mul(1000) {
            return Err(anyhow::anyhow!(
                "backoffBaseMillis ({}) exceeds backoffMaxSecs ({})",
                self.backoff_base_millis,
                self.backoff_max_secs
            ));
        }
        if self.provider_request_timeout_secs > self.reconcile_timeout_secs {
            return Err(anyhow::anyhow!(
                "providerRequestTimeoutSecs ({}) exceeds reconcileTimeoutSecs ({})",
                self.provider_request_timeout_secs,
                self.reconcile_timeout_secs
            ));
        }
        self.health_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| anyhow::anyhow!("Invalid healthAddr {}: {e}", self.health_addr))?;
        Ok(())
    }

    /// Load configuration from mounted file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        let config: ControllerConfig = serde_yaml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))?;
        Ok(config)
    }

    /// Load from `METAL_CONTROLLER_CONFIG` or the default path, falling back to defaults.
    pub fn load() -> Self {
        let override_path = std::env::var(CONFIG_PATH_ENV).ok();
        let config_path = override_path
            .as_deref()
            .filter(|path| Path::new(path).exists())
            .unwrap_or(DEFAULT_CONFIG_PATH);

        match Self::from_mounted_file(config_path) {
            Ok(cfg) => {
                info!("Loaded controller configuration from {}", config_path);
                cfg
            }
            Err(err) => {
                warn!(
                    "Failed to load configuration from {}: {}. Using defaults.",
                    config_path, err
                );
                Self::default()
            }
        }
    }
}
