// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Blocking pub/sub subscriber running on its own OS thread.
//!
//! Subscribing occupies a Redis connection for the life of the subscription,
//! so one dedicated thread per transport owns that connection. Channel
//! changes bump a generation counter; the thread notices within one poll
//! interval, waits the settle delay and resubscribes to the full channel set
//! exactly once, however many registrations arrived in the meantime.
//!
//! # Lifecycle
//!
//! ```text
//! attach(client) → [settle → subscribe → listen] ⟲ on generation change
//!                                  │
//!                       error ─────┴──► one retry after retry_delay
//!                                        (only if still connected)
//! detach()       → shutdown flag, thread exits within one poll interval
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::envelope::Envelope;
use crate::config::TransportConfig;

enum ListenExit {
    /// The channel set changed; subscribe again.
    Restart,
    Shutdown,
}

pub(crate) struct Subscriber {
    server_name: String,
    settle: Duration,
    retry_delay: Duration,
    poll: Duration,
    connect_timeout: Duration,

    channels: RwLock<HashMap<String, mpsc::UnboundedSender<Envelope>>>,
    generation: AtomicU64,
    shutdown: AtomicBool,
    /// Shared with the transport: false once a command saw the link drop.
    connected: Arc<AtomicBool>,
    client: Mutex<Option<redis::Client>>,

    /// Serializes (re)starts against the worker deciding to exit.
    restart_lock: Mutex<()>,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Subscriber {
    pub(crate) fn new(config: &TransportConfig, connected: Arc<AtomicBool>) -> Self {
        Self {
            server_name: config.server_name.clone(),
            settle: config.subscribe_settle(),
            retry_delay: config.subscribe_retry_delay(),
            poll: config.subscribe_poll(),
            connect_timeout: config.connect_timeout(),
            channels: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            shutdown: AtomicBool::new(true),
            connected,
            client: Mutex::new(None),
            restart_lock: Mutex::new(()),
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Route messages of `channel` to the returned receiver.
    ///
    /// Registering a channel twice replaces the previous receiver.
    pub(crate) fn register(self: &Arc<Self>, channel: &str) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.write().insert(channel.to_string(), tx);
        debug!(channel = %channel, "Channel registered");
        self.restart();
        rx
    }

    pub(crate) fn unregister(self: &Arc<Self>, channel: &str) -> bool {
        let removed = self.channels.write().remove(channel).is_some();
        if removed {
            debug!(channel = %channel, "Channel unregistered");
            self.restart();
        }
        removed
    }

    pub(crate) fn channels(&self) -> Vec<String> {
        self.channels.read().keys().cloned().collect()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start listening with a fresh client (after a successful connect).
    pub(crate) fn attach(self: &Arc<Self>, client: redis::Client) {
        *self.client.lock() = Some(client);
        self.shutdown.store(false, Ordering::SeqCst);
        self.restart();
    }

    /// Stop the worker and hand back its handle so the caller can join it.
    pub(crate) fn detach(&self) -> Option<JoinHandle<()>> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.client.lock().take();
        self.worker.lock().take()
    }

    /// Ask the worker to stop without waiting for it.
    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Signal a channel-set change, spawning the worker if none is alive.
    fn restart(self: &Arc<Self>) {
        let _guard = self.restart_lock.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);

        if self.running.load(Ordering::SeqCst)
            || self.shutdown.load(Ordering::SeqCst)
            || self.client.lock().is_none()
            || self.channels.read().is_empty()
        {
            return;
        }

        let worker = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("shard-cache-sub-{}", self.server_name))
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => {
                self.running.store(true, Ordering::SeqCst);
                // A previous worker has already exited; its handle can be dropped.
                *self.worker.lock() = Some(handle);
            }
            Err(e) => {
                error!(error = %e, "Failed to spawn subscriber thread");
                crate::metrics::record_error("transport", "subscribe", "spawn");
            }
        }
    }

    fn run(self: Arc<Self>) {
        let mut retried = false;

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(self.settle);

            let generation = self.generation.load(Ordering::SeqCst);
            let channels = self.channels();
            let client = self.client.lock().clone();

            let client = match client {
                Some(client) if !channels.is_empty() && !self.shutdown.load(Ordering::SeqCst) => client,
                _ => {
                    // Exit unless a registration slipped in after our snapshot.
                    // Held until `running` is cleared so a concurrent
                    // restart() either lands before this check or spawns anew.
                    let _guard = self.restart_lock.lock();
                    if self.generation.load(Ordering::SeqCst) != generation
                        && !self.shutdown.load(Ordering::SeqCst)
                    {
                        continue;
                    }
                    self.running.store(false, Ordering::SeqCst);
                    debug!("Subscriber thread idle, exiting");
                    return;
                }
            };

            match self.listen(&client, &channels, generation, &mut retried) {
                Ok(ListenExit::Restart) => {
                    debug!("Channel set changed, resubscribing");
                    crate::metrics::record_transport("subscribe", "restart");
                }
                Ok(ListenExit::Shutdown) => break,
                Err(e) => {
                    crate::metrics::record_connection_error("subscriber");
                    let connected = self.connected.load(Ordering::SeqCst);
                    if retried || !connected || self.shutdown.load(Ordering::SeqCst) {
                        error!(error = %e, connected, "Subscription failed, waiting for reconnect");
                        break;
                    }
                    warn!(error = %e, delay = ?self.retry_delay, "Subscription failed, retrying once");
                    retried = true;
                    thread::sleep(self.retry_delay);
                }
            }
        }

        let _guard = self.restart_lock.lock();
        self.running.store(false, Ordering::SeqCst);
        debug!("Subscriber thread stopped");
    }

    fn listen(
        &self,
        client: &redis::Client,
        channels: &[String],
        generation: u64,
        retried: &mut bool,
    ) -> redis::RedisResult<ListenExit> {
        let mut conn = client.get_connection_with_timeout(self.connect_timeout)?;
        conn.set_read_timeout(Some(self.poll))?;
        let mut pubsub = conn.as_pubsub();
        for channel in channels {
            pubsub.subscribe(channel)?;
        }
        *retried = false;
        info!(channels = ?channels, "Subscribed to update channels");
        crate::metrics::record_transport("subscribe", "success");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(ListenExit::Shutdown);
            }
            if self.generation.load(Ordering::SeqCst) != generation {
                return Ok(ListenExit::Restart);
            }

            match pubsub.get_message() {
                Ok(msg) => self.dispatch(&msg),
                Err(e) if e.is_timeout() => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn dispatch(&self, msg: &redis::Msg) {
        let channel = msg.get_channel_name();
        let raw: String = match msg.get_payload() {
            Ok(raw) => raw,
            Err(e) => {
                warn!(channel = %channel, error = %e, "Dropping non-text message");
                return;
            }
        };

        let Some(envelope) = Envelope::decode(&raw) else {
            warn!(channel = %channel, "Dropping message without origin framing");
            crate::metrics::record_transport("receive", "malformed");
            return;
        };

        if envelope.is_from(&self.server_name) {
            trace!(channel = %channel, "Skipping self-originated message");
            return;
        }

        match self.channels.read().get(channel) {
            Some(tx) => {
                if tx.send(envelope).is_err() {
                    debug!(channel = %channel, "Listener gone, message dropped");
                } else {
                    crate::metrics::record_transport("receive", "success");
                }
            }
            None => trace!(channel = %channel, "No listener for channel"),
        }
    }
}
