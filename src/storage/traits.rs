// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;

use crate::entity::Entity;
use crate::error::Result;

/// Durable backend of one repository.
///
/// Every operation reports backend unavailability as an `Err` value; a
/// missing entity is `Ok(None)` / `Ok(false)`, never an error.
#[async_trait]
pub trait Storage<E: Entity>: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<E>>;

    /// Load every entity in the backend.
    async fn load_all(&self) -> Result<Vec<E>>;

    async fn save(&self, entity: &E) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;

    async fn exists(&self, id: &str) -> Result<bool>;

    /// Load the given ids; absent ids are simply missing from the result.
    /// Default implementation falls back to sequential loads.
    async fn load_many(&self, ids: &[String]) -> Result<Vec<E>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entity) = self.load(id).await? {
                found.push(entity);
            }
        }
        Ok(found)
    }

    /// Write a batch of entities.
    /// Default implementation falls back to sequential saves.
    async fn save_many(&self, entities: &[E]) -> Result<()> {
        for entity in entities {
            self.save(entity).await?;
        }
        Ok(())
    }

    /// Default implementation falls back to sequential deletes.
    async fn delete_many(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            self.delete(id).await?;
        }
        Ok(())
    }
}
