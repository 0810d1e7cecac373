// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::entity::Entity;
use crate::error::{CacheError, Result};

/// Called with every entity a peer broadcast.
pub type UpdateHandler<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Called with the id of every entity a peer deleted.
pub type DeleteHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Cross-process propagation of entity changes.
///
/// One handler per kind is active at a time; registering again replaces the
/// previous one. Handlers run on the service's delivery task and may call
/// back into the repository.
#[async_trait]
pub trait SyncService<E: Entity>: Send + Sync {
    async fn broadcast_update(&self, entity: &E) -> Result<()>;

    async fn broadcast_delete(&self, id: &str) -> Result<()>;

    fn on_update(&self, handler: UpdateHandler<E>);

    fn on_delete(&self, handler: DeleteHandler);

    /// Begin delivering peer messages to the registered handlers.
    async fn start(&self) -> Result<()>;

    async fn stop(&self);
}

/// Payload carried inside an envelope on a repository's update channel.
///
/// ```json
/// {"op":"update","entity":{"id":"farm.7","crop":"wheat"}}
/// {"op":"delete","id":"farm.7"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum SyncMessage<E> {
    Update { entity: E },
    Delete { id: String },
}

impl<E: Entity> SyncMessage<E> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            let id = match self {
                Self::Update { entity } => entity.id(),
                Self::Delete { id } => id.as_str(),
            };
            CacheError::serialization(id, &e)
        })
    }

    pub fn decode(channel: &str, payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| CacheError::serialization(channel, &e))
    }
}

/// The pair of handler slots every [`SyncService`] implementation carries.
pub struct SyncHandlers<E> {
    update: RwLock<Option<UpdateHandler<E>>>,
    delete: RwLock<Option<DeleteHandler>>,
}

impl<E: Entity> SyncHandlers<E> {
    pub fn new() -> Self {
        Self {
            update: RwLock::new(None),
            delete: RwLock::new(None),
        }
    }

    pub fn set_update(&self, handler: UpdateHandler<E>) {
        *self.update.write() = Some(handler);
    }

    pub fn set_delete(&self, handler: DeleteHandler) {
        *self.delete.write() = Some(handler);
    }

    /// Decode a raw payload and hand it to the matching handler.
    ///
    /// Returns `false` if the payload was malformed or no handler is set.
    pub fn deliver(&self, channel: &str, payload: &str) -> bool {
        match SyncMessage::<E>::decode(channel, payload) {
            Ok(message) => self.dispatch(channel, message),
            Err(e) => {
                warn!(channel = %channel, error = %e, "Dropping undecodable sync message");
                crate::metrics::record_error("sync", "decode", "serialization");
                false
            }
        }
    }

    pub fn dispatch(&self, channel: &str, message: SyncMessage<E>) -> bool {
        crate::metrics::record_sync(channel, "in", message.kind());
        // Clone the handler out so it runs without the slot lock held.
        match message {
            SyncMessage::Update { entity } => {
                let handler = self.update.read().clone();
                match handler {
                    Some(handler) => {
                        handler(entity);
                        true
                    }
                    None => {
                        trace!(channel = %channel, "No update handler registered");
                        false
                    }
                }
            }
            SyncMessage::Delete { id } => {
                let handler = self.delete.read().clone();
                match handler {
                    Some(handler) => {
                        handler(id);
                        true
                    }
                    None => {
                        trace!(channel = %channel, "No delete handler registered");
                        false
                    }
                }
            }
        }
    }
}

impl<E: Entity> Default for SyncHandlers<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Stall {
        id: String,
        price: u32,
    }

    impl Entity for Stall {
        fn id(&self) -> &str {
            &self.id
        }
    }

    #[test]
    fn test_message_wire_format() {
        let update = SyncMessage::Update {
            entity: Stall { id: "s1".into(), price: 4 },
        };
        assert_eq!(
            update.encode().unwrap(),
            r#"{"op":"update","entity":{"id":"s1","price":4}}"#
        );

        let delete: SyncMessage<Stall> = SyncMessage::Delete { id: "s1".into() };
        assert_eq!(delete.encode().unwrap(), r#"{"op":"delete","id":"s1"}"#);
    }

    #[test]
    fn test_decode_rejects_unknown_op() {
        let err = SyncMessage::<Stall>::decode("stalls_updates", r#"{"op":"explode"}"#).unwrap_err();
        assert!(err.is_serialization());
    }

    #[test]
    fn test_deliver_routes_by_kind() {
        let handlers = SyncHandlers::<Stall>::new();
        let updates = Arc::new(Mutex::new(Vec::new()));
        let deletes = Arc::new(Mutex::new(Vec::new()));

        let u = updates.clone();
        handlers.set_update(Arc::new(move |stall: Stall| u.lock().push(stall)));
        let d = deletes.clone();
        handlers.set_delete(Arc::new(move |id: String| d.lock().push(id)));

        assert!(handlers.deliver("c", r#"{"op":"update","entity":{"id":"s1","price":9}}"#));
        assert!(handlers.deliver("c", r#"{"op":"delete","id":"s2"}"#));
        assert!(!handlers.deliver("c", "garbage"));

        assert_eq!(*updates.lock(), vec![Stall { id: "s1".into(), price: 9 }]);
        assert_eq!(*deletes.lock(), vec!["s2".to_string()]);
    }

    #[test]
    fn test_reregistering_replaces_handler() {
        let handlers = SyncHandlers::<Stall>::new();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let first = hits.clone();
        handlers.set_delete(Arc::new(move |_| first.lock().push("first")));
        let second = hits.clone();
        handlers.set_delete(Arc::new(move |_| second.lock().push("second")));

        handlers.dispatch("c", SyncMessage::Delete { id: "x".into() });
        assert_eq!(*hits.lock(), vec!["second"]);
    }

    #[test]
    fn test_dispatch_without_handler() {
        let handlers = SyncHandlers::<Stall>::new();
        assert!(!handlers.dispatch("c", SyncMessage::Delete { id: "x".into() }));
    }
}
