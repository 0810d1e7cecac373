// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis storage backend: one hash per repository.
//!
//! ```text
//! HSET <storage_key> <entity id> <serialized entity>
//! ```
//!
//! Entities are encoded with `serde_json`. Batch writes go through
//! [`RedisTransport::save_map_entries`], so a whole write-back cycle is a
//! single MULTI/EXEC round trip. Retrying is left to the repository.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::traits::Storage;
use crate::entity::Entity;
use crate::error::{CacheError, Result};
use crate::transport::RedisTransport;

pub struct RedisStorage<E> {
    transport: Arc<RedisTransport>,
    key: String,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> RedisStorage<E> {
    /// Store entities in the hash at `key`.
    pub fn new(transport: Arc<RedisTransport>, key: impl Into<String>) -> Self {
        Self {
            transport,
            key: key.into(),
            _entity: PhantomData,
        }
    }

    /// The hash key holding this repository's entities.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn transport(&self) -> &Arc<RedisTransport> {
        &self.transport
    }

    fn encode(entity: &E) -> Result<String> {
        serde_json::to_string(entity).map_err(|e| CacheError::serialization(entity.id(), &e))
    }

    fn decode(id: &str, payload: &str) -> Result<E> {
        serde_json::from_str(payload).map_err(|e| CacheError::serialization(id, &e))
    }
}

#[async_trait]
impl<E: Entity> Storage<E> for RedisStorage<E> {
    async fn load(&self, id: &str) -> Result<Option<E>> {
        let payload = self.transport.map_get(&self.key, id).await?;
        payload.map(|p| Self::decode(id, &p)).transpose()
    }

    /// Fails on the first undecodable payload; a corrupt field would otherwise
    /// be silently dropped on the next write-back.
    async fn load_all(&self) -> Result<Vec<E>> {
        let entries = self.transport.map_get_all(&self.key).await?;
        entries
            .iter()
            .map(|(id, payload)| Self::decode(id, payload))
            .collect()
    }

    async fn save(&self, entity: &E) -> Result<()> {
        let payload = Self::encode(entity)?;
        self.transport
            .save_map_entries(&self.key, &[(entity.id().to_string(), Some(payload))])
            .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.transport.delete_map_entries(&self.key, &[id.to_string()]).await
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        self.transport.map_exists(&self.key, id).await
    }

    async fn load_many(&self, ids: &[String]) -> Result<Vec<E>> {
        let payloads = self.transport.map_get_many(&self.key, ids).await?;
        let mut found = Vec::with_capacity(ids.len());
        for (id, payload) in ids.iter().zip(payloads) {
            if let Some(payload) = payload {
                found.push(Self::decode(id, &payload)?);
            }
        }
        Ok(found)
    }

    /// Encodes the whole batch before touching the network, so one bad entity
    /// fails the batch without a partial write.
    async fn save_many(&self, entities: &[E]) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let entries = entities
            .iter()
            .map(|e| Ok((e.id().to_string(), Some(Self::encode(e)?))))
            .collect::<Result<Vec<_>>>()
            .inspect_err(|e| warn!(key = %self.key, error = %e, "Failed to encode write-back batch"))?;
        self.transport.save_map_entries(&self.key, &entries).await
    }

    async fn delete_many(&self, ids: &[String]) -> Result<()> {
        self.transport.delete_map_entries(&self.key, ids).await
    }
}
