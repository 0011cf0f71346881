//! Event bus between the relay and the IRC network.
//!
//! Payloads are JSON envelopes ([`BusEvent`]) on two named channels,
//! `to-ika` and `from-ika`. The dispatcher fans `from-ika` deliveries out to
//! the in-process [`ListenerRegistry`].

pub mod event;
pub mod listeners;
pub mod transport;

pub use event::{BusEvent, FROM_IKA, TO_IKA};
pub use listeners::{BusListener, ListenerId, ListenerRegistry};
pub use transport::{BusTransport, MemoryTransport, RedisTransport};

use std::sync::Arc;
use std::time::Duration;

use backon::BackoffBuilder;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::common::error::BusError;

/// Typed publish/subscribe over a [`BusTransport`].
#[derive(Clone)]
pub struct EventBus {
    transport: Arc<dyn BusTransport>,
    publish_timeout: Duration,
}

impl EventBus {
    pub fn new(transport: Arc<dyn BusTransport>, publish_timeout: Duration) -> Self {
        Self {
            transport,
            publish_timeout,
        }
    }

    /// Connect according to the configured url (`redis://...` or `memory://`).
    pub async fn connect(url: &str, publish_timeout: Duration) -> Result<Self, BusError> {
        let transport: Arc<dyn BusTransport> = if url == "memory://" {
            Arc::new(MemoryTransport::new())
        } else if url.starts_with("redis://") || url.starts_with("rediss://") {
            Arc::new(RedisTransport::connect(url).await?)
        } else {
            return Err(BusError::UnsupportedUrl {
                url: url.to_string(),
            });
        };

        Ok(Self::new(transport, publish_timeout))
    }

    /// In-process bus.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryTransport::new()), Duration::from_secs(5))
    }

    /// Serialize and send one event. Not retried here.
    pub async fn publish(&self, channel: &str, event: &BusEvent) -> Result<(), BusError> {
        let payload = event.encode()?;

        tokio::time::timeout(self.publish_timeout, self.transport.publish(channel, payload))
            .await
            .map_err(|_| BusError::Timeout {
                channel: channel.to_string(),
            })?
    }

    /// Lazy stream of parsed events. Malformed payloads are logged and skipped.
    pub async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, BusEvent>, BusError> {
        let name = channel.to_string();
        let stream = self.transport.subscribe(channel).await?;

        Ok(stream
            .filter_map(move |payload| {
                let parsed = match BusEvent::parse(&payload) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        warn!("Dropping malformed payload on {}: {} ({})", name, e, payload);
                        None
                    }
                };
                async move { parsed }
            })
            .boxed())
    }
}

/// Backoff for resubscribing after the transport drops.
/// 1s initial, 1min max, with jitter, unlimited retries.
fn resubscribe_backoff() -> impl Iterator<Item = Duration> {
    backon::ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(60))
        .with_jitter()
        .without_max_times()
        .build()
}

/// Subscribe to `from-ika` and hand every event to the registry until shutdown.
///
/// Each wait is bounded by `poll_wait` so the shutdown signal is observed
/// promptly; an empty wait is the idle case.
pub async fn run_dispatcher(
    bus: EventBus,
    registry: Arc<ListenerRegistry>,
    poll_wait: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = resubscribe_backoff();

    'outer: loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let mut stream = match bus.subscribe(FROM_IKA).await {
            Ok(stream) => {
                info!("Subscribed to {}", FROM_IKA);
                backoff = resubscribe_backoff();
                stream
            }
            Err(e) => {
                error!("Failed to subscribe to {}: {}", FROM_IKA, e);
                let delay = backoff.next().unwrap_or(Duration::from_secs(60));
                tokio::select! {
                    _ = tokio::time::sleep(delay) => continue,
                    _ = shutdown_rx.changed() => break,
                }
            }
        };

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break 'outer;
                    }
                }
                next = tokio::time::timeout(poll_wait, stream.next()) => match next {
                    Err(_) => continue,
                    Ok(Some(event)) => {
                        debug!("Dispatching {:?}", event);
                        registry.dispatch(&event).await;
                    }
                    Ok(None) => {
                        warn!("Subscription to {} ended, resubscribing", FROM_IKA);
                        break;
                    }
                },
            }
        }
    }

    info!("Bus dispatcher stopped");
}
