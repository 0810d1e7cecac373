// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis transport: one connection pair shared by every repository of a server.
//!
//! - The **command connection** (`ConnectionManager`) issues hash operations
//!   and publishes.
//! - The **subscriber connection** lives on a dedicated thread (see
//!   [`subscriber`]) because a subscription blocks its connection.
//!
//! A connection error seen by any command marks the transport disconnected.
//! Nothing reconnects on its own; call [`RedisTransport::connect`] again.
//!
//! # Example
//!
//! ```rust,no_run
//! use shard_cache::{RedisTransport, TransportConfig};
//!
//! # async fn example() -> shard_cache::Result<()> {
//! let transport = RedisTransport::new(TransportConfig::new("redis://localhost:6379", "lobby-1"))?;
//! transport.connect().await?;
//!
//! transport
//!     .save_map_entries("players", &[
//!         ("alice".into(), Some("{\"gold\":3}".into())),
//!         ("bob".into(), None), // deletes field "bob"
//!     ])
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod envelope;
pub(crate) mod subscriber;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, IntoConnectionInfo};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::TransportConfig;
use crate::error::{CacheError, Result};
use crate::resilience::retry::{retry, RetryConfig};

pub use envelope::Envelope;
use subscriber::Subscriber;

/// Credentials for an ACL user and/or password.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

pub struct RedisTransport {
    config: TransportConfig,
    connection: RwLock<Option<ConnectionManager>>,
    connected: Arc<AtomicBool>,
    subscriber: Arc<Subscriber>,
    /// Serializes connect/disconnect.
    lifecycle: Mutex<()>,
}

impl RedisTransport {
    /// Create a disconnected transport. Fails only on invalid configuration.
    pub fn new(config: TransportConfig) -> Result<Self> {
        config.validate()?;
        let connected = Arc::new(AtomicBool::new(false));
        let subscriber = Arc::new(Subscriber::new(&config, connected.clone()));
        Ok(Self {
            config,
            connection: RwLock::new(None),
            connected,
            subscriber,
            lifecycle: Mutex::new(()),
        })
    }

    /// Logical name stamped on every published message.
    pub fn server_name(&self) -> &str {
        &self.config.server_name
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connect using the configured address and credentials.
    pub async fn connect(&self) -> Result<()> {
        let credentials = Credentials {
            username: self.config.username.clone(),
            password: self.config.password.clone(),
        };
        let url = self.config.url.clone();
        self.connect_to(&url, &credentials).await
    }

    /// Tear down any existing connections, then connect to `url`.
    ///
    /// On failure the transport stays disconnected and the error is returned;
    /// calling again later is the way to recover.
    #[tracing::instrument(skip(self, credentials), fields(server = %self.config.server_name))]
    pub async fn connect_to(&self, url: &str, credentials: &Credentials) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.teardown().await;

        let client = match Self::build_client(url, credentials) {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "Invalid Redis address");
                return Err(e);
            }
        };

        let timeout = self.config.connect_timeout();
        let manager = retry("redis_connect", &RetryConfig::startup(), || {
            let client = client.clone();
            async move {
                tokio::time::timeout(timeout, ConnectionManager::new(client))
                    .await
                    .map_err(|_| CacheError::Connection(format!("connect timed out after {:?}", timeout)))?
                    .map_err(CacheError::from)
            }
        })
        .await;

        match manager {
            Ok(manager) => {
                *self.connection.write() = Some(manager);
                self.connected.store(true, Ordering::SeqCst);
                self.subscriber.attach(client);
                crate::metrics::set_transport_connected(true);
                info!("Redis transport connected");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to connect to Redis, transport stays disconnected");
                crate::metrics::record_connection_error("redis");
                crate::metrics::set_transport_connected(false);
                Err(e)
            }
        }
    }

    /// Drop both connections and stop the subscriber thread.
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;
        self.teardown().await;
        info!(server = %self.config.server_name, "Redis transport disconnected");
    }

    async fn teardown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.connection.write().take();
        crate::metrics::set_transport_connected(false);

        if let Some(handle) = self.subscriber.detach() {
            if let Err(e) = tokio::task::spawn_blocking(move || handle.join()).await {
                warn!(error = %e, "Failed to join subscriber thread");
            }
        }
    }

    fn build_client(url: &str, credentials: &Credentials) -> Result<redis::Client> {
        let mut info = url.into_connection_info().map_err(|e| CacheError::Config(e.to_string()))?;
        if credentials.username.is_some() {
            info.redis.username = credentials.username.clone();
        }
        if credentials.password.is_some() {
            info.redis.password = credentials.password.clone();
        }
        redis::Client::open(info).map_err(|e| CacheError::Config(e.to_string()))
    }

    fn connection(&self) -> Result<ConnectionManager> {
        if !self.is_connected() {
            return Err(CacheError::Disconnected);
        }
        self.connection.read().clone().ok_or(CacheError::Disconnected)
    }

    /// Convert a command failure, flagging the transport down on link errors.
    fn command_error(&self, operation: &str, err: redis::RedisError) -> CacheError {
        let err = CacheError::from(err);
        if err.is_connection() && self.connected.swap(false, Ordering::SeqCst) {
            warn!(operation, error = %err, "Redis connection lost, transport marked disconnected");
            crate::metrics::record_connection_error("redis");
            crate::metrics::set_transport_connected(false);
        }
        crate::metrics::record_transport(operation, "error");
        err
    }

    /// Round-trip a PING.
    pub async fn ping(&self) -> Result<Duration> {
        let mut conn = self.connection()?;
        let start = Instant::now();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error("ping", e))?;
        Ok(start.elapsed())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Pub/sub
    // ═══════════════════════════════════════════════════════════════════════════

    /// Publish `payload` on `channel`, framed with this server's name.
    ///
    /// Returns how many subscribers received it.
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<u64> {
        let mut conn = self.connection()?;
        let framed = envelope::encode(&self.config.server_name, payload);
        let receivers: u64 = conn
            .publish(channel, framed)
            .await
            .map_err(|e| self.command_error("publish", e))?;
        crate::metrics::record_transport("publish", "success");
        Ok(receivers)
    }

    /// Start receiving peer messages of `channel`.
    ///
    /// The subscription is restarted to include the channel. Messages this
    /// server published itself are filtered out.
    pub fn register_channel(&self, channel: &str) -> mpsc::UnboundedReceiver<Envelope> {
        self.subscriber.register(channel)
    }

    pub fn unregister_channel(&self, channel: &str) -> bool {
        self.subscriber.unregister(channel)
    }

    pub fn channels(&self) -> Vec<String> {
        self.subscriber.channels()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Hash operations
    // ═══════════════════════════════════════════════════════════════════════════

    pub async fn map_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.connection()?;
        conn.hget(key, field)
            .await
            .map_err(|e| self.command_error("hget", e))
    }

    /// Values for `fields` in input order; `None` where a field is absent.
    pub async fn map_get_many(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>> {
        if fields.is_empty() {
            return Ok(vec![]);
        }
        let mut conn = self.connection()?;
        redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error("hmget", e))
    }

    pub async fn map_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.connection()?;
        conn.hgetall(key)
            .await
            .map_err(|e| self.command_error("hgetall", e))
    }

    pub async fn map_exists(&self, key: &str, field: &str) -> Result<bool> {
        let mut conn = self.connection()?;
        conn.hexists(key, field)
            .await
            .map_err(|e| self.command_error("hexists", e))
    }

    /// Apply mixed upserts and deletes to one hash in a single round trip.
    ///
    /// Each pair is `(field, value)`; a `None` value deletes the field.
    /// Runs as a MULTI/EXEC pipeline.
    pub async fn save_map_entries(&self, key: &str, entries: &[(String, Option<String>)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut upserts: Vec<(&str, &str)> = Vec::new();
        let mut deletes: Vec<&str> = Vec::new();
        for (field, value) in entries {
            match value {
                Some(value) => upserts.push((field.as_str(), value.as_str())),
                None => deletes.push(field.as_str()),
            }
        }

        let mut pipeline = redis::pipe();
        pipeline.atomic();
        if !upserts.is_empty() {
            pipeline.hset_multiple(key, &upserts).ignore();
        }
        if !deletes.is_empty() {
            pipeline.hdel(key, &deletes).ignore();
        }

        let mut conn = self.connection()?;
        pipeline
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| self.command_error("save_map_entries", e))?;

        debug!(key = %key, upserts = upserts.len(), deletes = deletes.len(), "Hash entries saved");
        crate::metrics::record_transport("save_map_entries", "success");
        Ok(())
    }

    pub async fn delete_map_entries(&self, key: &str, fields: &[String]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection()?;
        conn.hdel::<_, _, ()>(key, fields)
            .await
            .map_err(|e| self.command_error("hdel", e))
    }
}

impl Drop for RedisTransport {
    fn drop(&mut self) {
        self.subscriber.request_shutdown();
    }
}
