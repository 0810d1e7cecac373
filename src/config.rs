// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for repositories and the Redis transport.
//!
//! # Example
//!
//! ```
//! use shard_cache::RepoConfig;
//! use std::time::Duration;
//!
//! // Minimal config (uses defaults, derives key and channel from the name)
//! let config = RepoConfig::new("players");
//! assert_eq!(config.storage_key, "players");
//! assert_eq!(config.update_channel, "players_updates");
//! assert_eq!(config.save_interval(), Duration::from_secs(5));
//!
//! // Tuned config
//! let config = RepoConfig {
//!     save_interval_ms: 1_000,
//!     entity_timeout_ms: 30_000,
//!     load_all_on_start: true,
//!     ..RepoConfig::new("towns")
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::{CacheError, Result};
use crate::transport::envelope::DELIMITER;

/// Immutable configuration of one cached repository.
///
/// Created once and never mutated; a repository is reconfigured by swapping
/// the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepoConfig {
    /// Human-readable repository name used in logs and metrics
    pub name: String,

    /// Key of the remote hash holding this repository's entities
    pub storage_key: String,

    /// Pub/sub channel carrying updates and deletes between servers
    pub update_channel: String,

    /// Write-back period (default: 5 s)
    #[serde(default = "default_save_interval_ms")]
    pub save_interval_ms: u64,

    /// Attempts per storage write before giving up (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the second attempt; doubles every attempt (default: 100 ms)
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Whether idle entities are evicted at all
    #[serde(default = "default_cleanup_enabled")]
    pub cleanup_enabled: bool,

    /// Eviction period (default: 60 s)
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,

    /// Idle time after which a non-context entity is evicted (default: 5 min)
    #[serde(default = "default_entity_timeout_ms")]
    pub entity_timeout_ms: u64,

    /// Bulk-load the whole hash during `init()`
    #[serde(default)]
    pub load_all_on_start: bool,

    /// How long an empty or failed load suppresses further loads (default: 60 s)
    #[serde(default = "default_load_cooldown_ms")]
    pub load_cooldown_ms: u64,
}

fn default_save_interval_ms() -> u64 { 5_000 }
fn default_max_retries() -> u32 { 3 }
fn default_retry_base_delay_ms() -> u64 { 100 }
fn default_cleanup_enabled() -> bool { true }
fn default_cleanup_interval_ms() -> u64 { 60_000 }
fn default_entity_timeout_ms() -> u64 { 300_000 }
fn default_load_cooldown_ms() -> u64 { 60_000 }

impl RepoConfig {
    /// Defaults for a repository called `name`.
    ///
    /// The storage key is the name itself and the channel is `<name>_updates`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            storage_key: name.clone(),
            update_channel: format!("{name}_updates"),
            name,
            save_interval_ms: default_save_interval_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            cleanup_enabled: default_cleanup_enabled(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            entity_timeout_ms: default_entity_timeout_ms(),
            load_all_on_start: false,
            load_cooldown_ms: default_load_cooldown_ms(),
        }
    }

    #[must_use]
    pub fn save_interval(&self) -> Duration {
        Duration::from_millis(self.save_interval_ms)
    }

    #[must_use]
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    #[must_use]
    pub fn entity_timeout(&self) -> Duration {
        Duration::from_millis(self.entity_timeout_ms)
    }

    #[must_use]
    pub fn load_cooldown(&self) -> Duration {
        Duration::from_millis(self.load_cooldown_ms)
    }

    /// Reject configurations that cannot drive a repository.
    pub fn validate(&self) -> Result<()> {
        if self.storage_key.is_empty() {
            return Err(CacheError::Config(format!("repository '{}' has an empty storage key", self.name)));
        }
        if self.update_channel.is_empty() {
            return Err(CacheError::Config(format!("repository '{}' has an empty update channel", self.name)));
        }
        if self.save_interval_ms == 0 {
            return Err(CacheError::Config(format!("repository '{}': save interval must be > 0", self.name)));
        }
        if self.cleanup_enabled && self.cleanup_interval_ms == 0 {
            return Err(CacheError::Config(format!("repository '{}': cleanup interval must be > 0", self.name)));
        }
        Ok(())
    }
}

/// Connection settings for [`RedisTransport`](crate::transport::RedisTransport).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransportConfig {
    /// Redis connection string (e.g., "redis://localhost:6379")
    pub url: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Logical name of this server; prefixes every published message
    pub server_name: String,

    /// Pause before (re)subscribing so bursts of channel changes coalesce (default: 100 ms)
    #[serde(default = "default_subscribe_settle_ms")]
    pub subscribe_settle_ms: u64,

    /// Pause before the single retry of a failed subscription (default: 1 s)
    #[serde(default = "default_subscribe_retry_delay_ms")]
    pub subscribe_retry_delay_ms: u64,

    /// Read timeout of the blocking subscriber, bounds restart latency (default: 250 ms)
    #[serde(default = "default_subscribe_poll_ms")]
    pub subscribe_poll_ms: u64,

    /// Connect timeout for both connections (default: 5 s)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_subscribe_settle_ms() -> u64 { 100 }
fn default_subscribe_retry_delay_ms() -> u64 { 1_000 }
fn default_subscribe_poll_ms() -> u64 { 250 }
fn default_connect_timeout_ms() -> u64 { 5_000 }

impl TransportConfig {
    pub fn new(url: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            server_name: server_name.into(),
            subscribe_settle_ms: default_subscribe_settle_ms(),
            subscribe_retry_delay_ms: default_subscribe_retry_delay_ms(),
            subscribe_poll_ms: default_subscribe_poll_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }

    /// Attach credentials (ACL user and/or password).
    #[must_use]
    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    #[must_use]
    pub fn subscribe_settle(&self) -> Duration {
        Duration::from_millis(self.subscribe_settle_ms)
    }

    #[must_use]
    pub fn subscribe_retry_delay(&self) -> Duration {
        Duration::from_millis(self.subscribe_retry_delay_ms)
    }

    #[must_use]
    pub fn subscribe_poll(&self) -> Duration {
        Duration::from_millis(self.subscribe_poll_ms.max(1))
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_name.is_empty() {
            return Err(CacheError::Config("server name must not be empty".into()));
        }
        if self.server_name.contains(DELIMITER) {
            return Err(CacheError::Config(format!(
                "server name '{}' contains the message delimiter '{}'",
                self.server_name, DELIMITER
            )));
        }
        Ok(())
    }
}
