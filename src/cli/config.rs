//! Configuration file
//!
//! A single JSON document. Every field has a default, so `{}` is a valid
//! configuration for local development.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{CliError, CliResult};
use crate::http_server::HttpServerConfig;
use crate::observability::Severity;
use crate::service::ServiceConfig;
use crate::session::{SessionCacheConfig, StaticIdentity};
use crate::sync::{InstanceConfig, RegistryConfig};
use crate::watcher::WatcherConfig;

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpServerConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub sessions: SessionSettings,

    #[serde(default)]
    pub watcher: WatcherSettings,

    /// Credentials accepted by the static identity resolver
    #[serde(default)]
    pub identities: Vec<StaticIdentity>,

    /// Minimum log severity (trace, info, warn, error, fatal)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Sync engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Steps retained per document for catch-up (default 1000)
    #[serde(default = "default_max_log_len")]
    pub max_log_len: usize,

    /// Long-poll timeout when the client sends none (default 2 minutes)
    #[serde(default = "default_waiter_timeout_ms")]
    pub waiter_timeout_ms: u64,

    #[serde(default = "default_max_waiter_timeout_ms")]
    pub max_waiter_timeout_ms: u64,

    #[serde(default = "default_max_instances")]
    pub max_instances: usize,

    #[serde(default = "default_idle_evict_secs")]
    pub idle_evict_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_position_ttl_secs")]
    pub position_ttl_secs: u64,

    /// Retry budget for transient store failures, on load and on persist
    #[serde(default = "default_load_retries")]
    pub load_retries: u32,

    #[serde(default = "default_load_backoff_ms")]
    pub load_backoff_ms: u64,
}

/// Session cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_session_capacity")]
    pub capacity: usize,

    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
}

/// Entity watcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_topic")]
    pub topic: String,

    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,

    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_log_len() -> usize {
    1000
}
fn default_waiter_timeout_ms() -> u64 {
    120_000
}
fn default_max_waiter_timeout_ms() -> u64 {
    300_000
}
fn default_max_instances() -> usize {
    10_000
}
fn default_idle_evict_secs() -> u64 {
    900
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_position_ttl_secs() -> u64 {
    300
}
fn default_load_retries() -> u32 {
    3
}
fn default_load_backoff_ms() -> u64 {
    100
}
fn default_session_capacity() -> usize {
    1000
}
fn default_session_ttl_secs() -> u64 {
    600
}
fn default_topic() -> String {
    "entity-changes".to_string()
}
fn default_lease_ms() -> u64 {
    30_000
}
fn default_retry_interval_ms() -> u64 {
    5_000
}
fn default_max_backoff_ms() -> u64 {
    60_000
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_log_len: default_max_log_len(),
            waiter_timeout_ms: default_waiter_timeout_ms(),
            max_waiter_timeout_ms: default_max_waiter_timeout_ms(),
            max_instances: default_max_instances(),
            idle_evict_secs: default_idle_evict_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            position_ttl_secs: default_position_ttl_secs(),
            load_retries: default_load_retries(),
            load_backoff_ms: default_load_backoff_ms(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            capacity: default_session_capacity(),
            ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            topic: default_topic(),
            lease_ms: default_lease_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpServerConfig::default(),
            sync: SyncSettings::default(),
            sessions: SessionSettings::default(),
            watcher: WatcherSettings::default(),
            identities: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration JSON
    pub fn from_json(content: &str) -> CliResult<Self> {
        let config: Config = serde_json::from_str(content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> CliResult<()> {
        self.severity()?;

        let sync = &self.sync;
        let positive = [
            ("sync.max_log_len", sync.max_log_len as u64),
            ("sync.waiter_timeout_ms", sync.waiter_timeout_ms),
            ("sync.max_waiter_timeout_ms", sync.max_waiter_timeout_ms),
            ("sync.max_instances", sync.max_instances as u64),
            ("sync.sweep_interval_secs", sync.sweep_interval_secs),
            ("sync.position_ttl_secs", sync.position_ttl_secs),
            ("sessions.capacity", self.sessions.capacity as u64),
            ("sessions.ttl_secs", self.sessions.ttl_secs),
            ("watcher.lease_ms", self.watcher.lease_ms),
            ("watcher.retry_interval_ms", self.watcher.retry_interval_ms),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(CliError::config_error(format!("{} must be > 0", name)));
        }

        if sync.waiter_timeout_ms > sync.max_waiter_timeout_ms {
            return Err(CliError::config_error(
                "sync.waiter_timeout_ms must not exceed sync.max_waiter_timeout_ms",
            ));
        }

        if self.watcher.max_backoff_ms < self.watcher.retry_interval_ms {
            return Err(CliError::config_error(
                "watcher.max_backoff_ms must be >= watcher.retry_interval_ms",
            ));
        }

        if self.watcher.enabled && self.watcher.topic.trim().is_empty() {
            return Err(CliError::config_error("watcher.topic must not be empty"));
        }

        let mut tokens = std::collections::HashSet::new();
        for identity in &self.identities {
            if identity.token.is_empty() {
                return Err(CliError::config_error(format!(
                    "Identity '{}' has an empty token",
                    identity.shortname
                )));
            }
            if !tokens.insert(identity.token.as_str()) {
                return Err(CliError::config_error(format!(
                    "Duplicate token for identity '{}'",
                    identity.shortname
                )));
            }
        }

        Ok(())
    }

    /// Parsed `log_level`
    pub fn severity(&self) -> CliResult<Severity> {
        Severity::from_str(&self.log_level).map_err(|_| {
            CliError::config_error(format!(
                "Invalid log_level: '{}'. Must be one of trace, info, warn, error, fatal.",
                self.log_level
            ))
        })
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            instance: InstanceConfig {
                max_log_len: self.sync.max_log_len,
                persist_retries: self.sync.load_retries,
                persist_backoff: Duration::from_millis(self.sync.load_backoff_ms),
            },
            max_instances: self.sync.max_instances,
            load_retries: self.sync.load_retries,
            load_backoff: Duration::from_millis(self.sync.load_backoff_ms),
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            default_waiter_timeout: Duration::from_millis(self.sync.waiter_timeout_ms),
            max_waiter_timeout: Duration::from_millis(self.sync.max_waiter_timeout_ms),
            idle_evict: Duration::from_secs(self.sync.idle_evict_secs),
            sweep_interval: Duration::from_secs(self.sync.sweep_interval_secs),
            position_ttl: Duration::from_secs(self.sync.position_ttl_secs),
        }
    }

    pub fn session_config(&self) -> SessionCacheConfig {
        SessionCacheConfig {
            capacity: self.sessions.capacity,
            ttl: Duration::from_secs(self.sessions.ttl_secs),
        }
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            topic: self.watcher.topic.clone(),
            lease: Duration::from_millis(self.watcher.lease_ms),
            retry_interval: Duration::from_millis(self.watcher.retry_interval_ms),
            max_backoff: Duration::from_millis(self.watcher.max_backoff_ms),
        }
    }
}
