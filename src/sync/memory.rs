// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process pub/sub bus.
//!
//! A [`MemoryBus`] stands in for the Redis channels: every [`MemorySync`]
//! attached to it plays one server, and messages carry the same origin
//! envelope, so self-originated messages are skipped exactly as they are over
//! Redis. Useful for tests and for running several repositories in one process.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::traits::{DeleteHandler, SyncHandlers, SyncMessage, SyncService, UpdateHandler};
use crate::entity::Entity;
use crate::error::Result;
use crate::transport::envelope::Envelope;

const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct BusMessage {
    channel: String,
    envelope: Envelope,
}

/// Shared broadcast medium. Cheap to clone.
#[derive(Clone)]
pub struct MemoryBus {
    tx: broadcast::Sender<BusMessage>,
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    /// A slow listener that falls more than `capacity` messages behind
    /// skips the oldest ones.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish on `channel` as `origin`. Returns how many listeners got it.
    pub fn publish(&self, channel: &str, origin: &str, payload: &str) -> usize {
        self.tx
            .send(BusMessage {
                channel: channel.to_string(),
                envelope: Envelope::new(origin, payload),
            })
            .unwrap_or(0)
    }

    pub fn listeners(&self) -> usize {
        self.tx.receiver_count()
    }

    fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

/// [`SyncService`] over a [`MemoryBus`] channel.
pub struct MemorySync<E> {
    bus: MemoryBus,
    server_name: String,
    channel: String,
    handlers: Arc<SyncHandlers<E>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<E: Entity> MemorySync<E> {
    pub fn new(bus: MemoryBus, server_name: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            bus,
            server_name: server_name.into(),
            channel: channel.into(),
            handlers: Arc::new(SyncHandlers::new()),
            task: Mutex::new(None),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn is_started(&self) -> bool {
        self.task.lock().is_some()
    }

    fn publish(&self, message: &SyncMessage<E>) -> Result<()> {
        let payload = message.encode()?;
        let receivers = self.bus.publish(&self.channel, &self.server_name, &payload);
        trace!(channel = %self.channel, receivers, kind = message.kind(), "Published on memory bus");
        crate::metrics::record_sync(&self.channel, "out", message.kind());
        Ok(())
    }
}

#[async_trait]
impl<E: Entity> SyncService<E> for MemorySync<E> {
    async fn broadcast_update(&self, entity: &E) -> Result<()> {
        self.publish(&SyncMessage::Update { entity: entity.clone() })
    }

    async fn broadcast_delete(&self, id: &str) -> Result<()> {
        self.publish(&SyncMessage::Delete { id: id.to_string() })
    }

    fn on_update(&self, handler: UpdateHandler<E>) {
        self.handlers.set_update(handler);
    }

    fn on_delete(&self, handler: DeleteHandler) {
        self.handlers.set_delete(handler);
    }

    async fn start(&self) -> Result<()> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Ok(());
        }

        let mut rx = self.bus.subscribe();
        let handlers = Arc::clone(&self.handlers);
        let channel = self.channel.clone();
        let server_name = self.server_name.clone();

        *task = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if message.channel != channel || message.envelope.is_from(&server_name) {
                            continue;
                        }
                        handlers.deliver(&channel, &message.envelope.payload);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel = %channel, skipped, "Memory bus listener lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
        debug!(channel = %self.channel, server = %self.server_name, "Memory sync started");
        Ok(())
    }

    async fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            debug!(channel = %self.channel, server = %self.server_name, "Memory sync stopped");
        }
    }
}

impl<E> Drop for MemorySync<E> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
