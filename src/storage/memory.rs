// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Process-local [`Storage`] that keeps serialized payloads in a `DashMap`.
//!
//! Entities go through the same JSON encoding as the Redis backend, so a
//! repository rebuilt over the same `MemoryStorage` sees exactly what a
//! restarted server would read back.

use std::marker::PhantomData;

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::Storage;
use crate::entity::Entity;
use crate::error::{CacheError, Result};

pub struct MemoryStorage<E> {
    data: DashMap<String, String>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> MemoryStorage<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            _entity: PhantomData,
        }
    }

    /// Get current entity count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    /// Store a raw payload, bypassing serialization.
    pub fn insert_raw(&self, id: impl Into<String>, payload: impl Into<String>) {
        self.data.insert(id.into(), payload.into());
    }

    fn decode(id: &str, payload: &str) -> Result<E> {
        serde_json::from_str(payload).map_err(|e| CacheError::serialization(id, &e))
    }
}

impl<E: Entity> Default for MemoryStorage<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> Storage<E> for MemoryStorage<E> {
    async fn load(&self, id: &str) -> Result<Option<E>> {
        let payload = self.data.get(id).map(|r| r.value().clone());
        payload.map(|p| Self::decode(id, &p)).transpose()
    }

    async fn load_all(&self) -> Result<Vec<E>> {
        let snapshot: Vec<(String, String)> = self
            .data
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        snapshot.iter().map(|(id, p)| Self::decode(id, p)).collect()
    }

    async fn save(&self, entity: &E) -> Result<()> {
        let payload = serde_json::to_string(entity)
            .map_err(|e| CacheError::serialization(entity.id(), &e))?;
        self.data.insert(entity.id().to_string(), payload);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.data.remove(id);
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.data.contains_key(id))
    }
}
