// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! [`SyncService`] over one Redis pub/sub channel.
//!
//! Publishing goes through the transport's command connection. Receiving
//! registers the channel with the transport's subscriber thread; a tokio task
//! drains the resulting queue and invokes the handlers, so handlers never run
//! on the blocking subscriber thread.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::traits::{DeleteHandler, SyncHandlers, SyncMessage, SyncService, UpdateHandler};
use crate::entity::Entity;
use crate::error::Result;
use crate::transport::RedisTransport;

pub struct RedisSync<E> {
    transport: Arc<RedisTransport>,
    channel: String,
    handlers: Arc<SyncHandlers<E>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<E: Entity> RedisSync<E> {
    pub fn new(transport: Arc<RedisTransport>, channel: impl Into<String>) -> Self {
        Self {
            transport,
            channel: channel.into(),
            handlers: Arc::new(SyncHandlers::new()),
            task: Mutex::new(None),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_started(&self) -> bool {
        self.task.lock().is_some()
    }

    async fn publish(&self, message: &SyncMessage<E>) -> Result<()> {
        let payload = message.encode()?;
        self.transport.publish(&self.channel, &payload).await?;
        crate::metrics::record_sync(&self.channel, "out", message.kind());
        Ok(())
    }
}

#[async_trait]
impl<E: Entity> SyncService<E> for RedisSync<E> {
    async fn broadcast_update(&self, entity: &E) -> Result<()> {
        self.publish(&SyncMessage::Update { entity: entity.clone() }).await
    }

    async fn broadcast_delete(&self, id: &str) -> Result<()> {
        self.publish(&SyncMessage::Delete { id: id.to_string() }).await
    }

    fn on_update(&self, handler: UpdateHandler<E>) {
        self.handlers.set_update(handler);
    }

    fn on_delete(&self, handler: DeleteHandler) {
        self.handlers.set_delete(handler);
    }

    /// Registering works while disconnected; the subscription starts on the
    /// next successful connect.
    async fn start(&self) -> Result<()> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Ok(());
        }

        let mut rx = self.transport.register_channel(&self.channel);
        let handlers = Arc::clone(&self.handlers);
        let channel = self.channel.clone();

        *task = Some(tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                handlers.deliver(&channel, &envelope.payload);
            }
            debug!(channel = %channel, "Sync delivery queue closed");
        }));
        info!(channel = %self.channel, connected = self.transport.is_connected(), "Redis sync started");
        Ok(())
    }

    async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            self.transport.unregister_channel(&self.channel);
            task.abort();
            info!(channel = %self.channel, "Redis sync stopped");
        }
    }
}

impl<E> Drop for RedisSync<E> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
