// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Shard Cache
//!
//! A distributed write-back entity cache for fleets of servers that share
//! state through one Redis instance but never talk to each other directly.
//!
//! ## Architecture
//!
//! Each server keeps a local copy of the entities it touches. Writes land in
//! that copy immediately; a background job persists them and tells the other
//! servers, who fold the change into their own copies.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CachedRepository<E>                      │
//! │  • get / get_or_create / save / delete / observe            │
//! │  • single-flight loads, negative-load cooldown              │
//! │  • write-back + idle-eviction jobs, context pins            │
//! └─────────────────────────────────────────────────────────────┘
//!          │                   │                      ▲
//!    (always)           (miss / write-back)    (peer updates)
//!          ▼                   ▼                      │
//! ┌────────────────┐  ┌──────────────────┐  ┌───────────────────┐
//! │  LocalCache    │  │   Storage<E>     │  │  SyncService<E>   │
//! │  DashMap slots │  │  Redis hash      │  │  Redis pub/sub    │
//! │  + dirty flags │  │  (or memory)     │  │  (or memory bus)  │
//! └────────────────┘  └──────────────────┘  └───────────────────┘
//!                              │                      │
//!                              ▼                      ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RedisTransport                         │
//! │  • command connection: hashes, publish                      │
//! │  • subscriber thread: blocking SUBSCRIBE, restart on change │
//! │  • origin-prefixed envelopes, self-messages filtered        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde::{Deserialize, Serialize};
//! use shard_cache::{
//!     CachedRepository, Entity, RedisStorage, RedisSync, RedisTransport, RepoConfig, TransportConfig,
//! };
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Mine { id: String, depth: u32 }
//!
//! impl Entity for Mine {
//!     fn id(&self) -> &str { &self.id }
//! }
//!
//! #[tokio::main]
//! async fn main() -> shard_cache::Result<()> {
//!     let transport = Arc::new(RedisTransport::new(
//!         TransportConfig::new("redis://localhost:6379", "survival-1"),
//!     )?);
//!     transport.connect().await?;
//!
//!     let config = RepoConfig::new("mines");
//!     let storage = Arc::new(RedisStorage::<Mine>::new(transport.clone(), config.storage_key.clone()));
//!     let sync = Arc::new(RedisSync::<Mine>::new(transport.clone(), config.update_channel.clone()));
//!
//!     let mines = CachedRepository::with_sync(config, storage, sync)?;
//!     mines.init().await?;
//!
//!     let mine = mines.get_or_create("mine.1", || Mine { id: "mine.1".into(), depth: 0 }).await?;
//!     mines.save(Mine { depth: mine.depth + 1, ..mine })?;
//!
//!     mines.shutdown().await?;
//!     transport.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`repository`]: the [`CachedRepository`] orchestrator
//! - [`cache`]: local entity map with dirty tracking, access times, contexts
//! - [`storage`]: durable backends (Redis hash, memory)
//! - [`sync`]: peer propagation (Redis pub/sub, in-process bus)
//! - [`transport`]: the Redis connection pair and message framing
//! - [`resilience`]: retry with exponential backoff

pub mod cache;
pub mod config;
pub mod entity;
pub mod error;
pub mod metrics;
pub mod repository;
pub mod resilience;
pub mod storage;
pub mod sync;
pub mod transport;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::{RepoConfig, TransportConfig};
pub use entity::Entity;
pub use error::{CacheError, Result};
pub use repository::{CachedRepository, RepoState, RepoStats};
pub use resilience::retry::RetryConfig;
pub use storage::{MemoryStorage, RedisStorage, Storage};
pub use sync::{MemoryBus, MemorySync, RedisSync, SyncMessage, SyncService};
pub use transport::{Credentials, Envelope, RedisTransport};
pub use metrics::LatencyTimer;
