//! In-process listener registry for `from-ika` deliveries.
//!
//! Every listener owns a worker task fed by its own queue. The worker hands
//! events to the listener one at a time, in dispatch order, each call on a
//! supervised task. A listener that errors or panics is logged and does not
//! affect the others or its own later events. The registry is an ordinary
//! value, so tests build their own.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, warn};

use crate::bus::event::BusEvent;
use crate::common::error::RelayResult;

/// Receives every event published on `from-ika`.
#[async_trait]
pub trait BusListener: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn on_event(&self, event: BusEvent) -> RelayResult<()>;
}

/// Handle returned by [`ListenerRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    name: String,
    queue: mpsc::UnboundedSender<BusEvent>,
}

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener and start its worker. Must run inside a runtime.
    pub async fn add(&self, listener: Arc<dyn BusListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = listener.name().to_string();
        let (queue, rx) = mpsc::unbounded_channel();

        tokio::spawn(run_worker(listener, rx));
        debug!("Registered bus listener '{}'", name);

        self.listeners.write().await.push(Registration { id, name, queue });
        id
    }

    /// Returns false if the id was not registered. The worker stops once its
    /// queue is drained.
    pub async fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|registration| registration.id != id);
        listeners.len() != before
    }

    pub async fn len(&self) -> usize {
        self.listeners.read().await.len()
    }

    /// Queue `event` for every listener without waiting for them.
    ///
    /// Returns how many listeners it was queued for.
    pub async fn dispatch(&self, event: &BusEvent) -> usize {
        let listeners = self.listeners.read().await;
        let mut queued = 0;

        for registration in listeners.iter() {
            if registration.queue.send(event.clone()).is_ok() {
                queued += 1;
            } else {
                warn!("Listener '{}' is gone, event dropped", registration.name);
            }
        }

        queued
    }
}

async fn run_worker(listener: Arc<dyn BusListener>, mut rx: mpsc::UnboundedReceiver<BusEvent>) {
    let name = listener.name().to_string();

    while let Some(event) = rx.recv().await {
        let listener = listener.clone();
        match tokio::spawn(async move { listener.on_event(event).await }).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_user_facing() => debug!("Listener '{}' rejected event: {}", name, e),
            Ok(Err(e)) => error!("Listener '{}' failed: {}", name, e),
            Err(e) if e.is_panic() => error!("Listener '{}' panicked", name),
            Err(e) => debug!("Listener '{}' was cancelled: {}", name, e),
        }
    }

    debug!("Listener '{}' stopped", name);
}
