//! Event fan-out bridge.
//!
//! Every tracking event is delivered to this process's listeners directly and
//! published on the broker channel `tracking:<delivery id>:events` for sibling
//! processes. Each bridge tags what it publishes with its own origin id and
//! ignores its own echoes, so a process sees each event exactly once under
//! normal operation. Without a broker the bridge is process-local.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::{Broker, BrokerMessage};
use crate::models::event::{Envelope, TrackingEvent};
use crate::models::order::DeliveryId;
use crate::observability::metrics::Metrics;

pub const EVENTS_PATTERN: &str = "tracking:*:events";

/// Upper bound on one broker publish. A stalled broker costs a caller at most
/// this long.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(3);

const RESUBSCRIBE_MIN_BACKOFF: Duration = Duration::from_secs(1);
const RESUBSCRIBE_MAX_BACKOFF: Duration = Duration::from_secs(30);

pub fn events_channel(id: &DeliveryId) -> String {
    format!("tracking:{id}:events")
}

fn delivery_from_channel(channel: &str) -> Option<DeliveryId> {
    channel
        .strip_prefix("tracking:")?
        .strip_suffix(":events")
        .filter(|id| !id.is_empty())
        .map(DeliveryId::new)
}

/// What local listeners receive: a ready-to-send frame for one delivery.
#[derive(Debug, Clone)]
pub struct BridgeMessage {
    pub delivery_id: DeliveryId,
    pub kind: String,
    pub frame: String,
    /// Published by another process.
    pub remote: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct BrokerEnvelope {
    origin: Uuid,
    kind: String,
    frame: String,
}

pub struct EventBridge {
    origin: Uuid,
    broker: Option<Arc<dyn Broker>>,
    publish_timeout: Duration,
    local_tx: broadcast::Sender<BridgeMessage>,
    metrics: Metrics,
}

impl EventBridge {
    pub fn new(broker: Option<Arc<dyn Broker>>, buffer: usize, metrics: Metrics) -> Self {
        let (local_tx, _unused_rx) = broadcast::channel(buffer.max(1));
        Self {
            origin: Uuid::new_v4(),
            broker,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            local_tx,
            metrics,
        }
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn is_distributed(&self) -> bool {
        self.broker.is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeMessage> {
        self.local_tx.subscribe()
    }

    /// Delivers to local listeners, then to sibling processes. Never fails:
    /// broker trouble is logged and counted.
    pub async fn publish(&self, event: &TrackingEvent) {
        let envelope = Envelope::from_event(event);
        let frame = match serde_json::to_string(&envelope) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(delivery_id = %event.delivery_id, error = %err, "failed to encode tracking event");
                return;
            }
        };

        // No local listeners is fine.
        let _ = self.local_tx.send(BridgeMessage {
            delivery_id: event.delivery_id.clone(),
            kind: envelope.kind.clone(),
            frame: frame.clone(),
            remote: false,
        });

        self.publish_to_broker(&event.delivery_id, envelope.kind, frame)
            .await;
    }

    /// Sends an already-delivered frame to sibling processes only.
    pub async fn publish_remote(&self, delivery_id: &DeliveryId, kind: &str, frame: &str) {
        self.publish_to_broker(delivery_id, kind.to_string(), frame.to_string())
            .await;
    }

    async fn publish_to_broker(&self, delivery_id: &DeliveryId, kind: String, frame: String) {
        let Some(broker) = &self.broker else {
            return;
        };

        let payload = match serde_json::to_string(&BrokerEnvelope {
            origin: self.origin,
            kind,
            frame,
        }) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(delivery_id = %delivery_id, error = %err, "failed to encode broker envelope");
                return;
            }
        };

        let channel = events_channel(delivery_id);
        match tokio::time::timeout(self.publish_timeout, broker.publish(&channel, &payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.metrics.broker_failures_total.inc();
                warn!(delivery_id = %delivery_id, error = %err, "broker publish failed");
            }
            Err(_) => {
                self.metrics.broker_failures_total.inc();
                warn!(
                    delivery_id = %delivery_id,
                    timeout_ms = self.publish_timeout.as_millis() as u64,
                    "broker publish timed out"
                );
            }
        }
    }

    /// Subscribes to the broker and spawns the task forwarding sibling events
    /// to local listeners. Returns `None`, leaving the bridge process-local,
    /// when there is no broker or the first subscription fails.
    pub async fn spawn_listener(self: &Arc<Self>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let Some(broker) = self.broker.clone() else {
            info!("no broker configured; fan-out is single-process");
            return None;
        };

        let stream = match broker.psubscribe(EVENTS_PATTERN).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "broker subscription failed; fan-out is single-process");
                return None;
            }
        };

        info!(origin = %self.origin, "broker listener started");
        let bridge = Arc::clone(self);
        Some(tokio::spawn(async move {
            bridge.pump(broker, stream, shutdown).await;
        }))
    }

    async fn pump(
        &self,
        broker: Arc<dyn Broker>,
        mut stream: BoxStream<'static, BrokerMessage>,
        shutdown: CancellationToken,
    ) {
        let mut backoff = RESUBSCRIBE_MIN_BACKOFF;

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = stream.next() => next,
            };

            match next {
                Some(message) => {
                    backoff = RESUBSCRIBE_MIN_BACKOFF;
                    self.accept(message);
                }
                None => {
                    warn!("broker subscription ended; resubscribing");
                    match self.resubscribe(&broker, &mut backoff, &shutdown).await {
                        Some(fresh) => stream = fresh,
                        None => break,
                    }
                }
            }
        }

        info!("broker listener stopped");
    }

    async fn resubscribe(
        &self,
        broker: &Arc<dyn Broker>,
        backoff: &mut Duration,
        shutdown: &CancellationToken,
    ) -> Option<BoxStream<'static, BrokerMessage>> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(*backoff) => {}
            }

            match broker.psubscribe(EVENTS_PATTERN).await {
                Ok(stream) => {
                    info!("broker subscription restored");
                    return Some(stream);
                }
                Err(err) => {
                    warn!(error = %err, retry_in_secs = backoff.as_secs(), "broker resubscribe failed");
                    *backoff = (*backoff * 2).min(RESUBSCRIBE_MAX_BACKOFF);
                }
            }
        }
    }

    fn accept(&self, message: BrokerMessage) {
        let Some(delivery_id) = delivery_from_channel(&message.channel) else {
            debug!(channel = %message.channel, "ignoring message on unexpected channel");
            return;
        };

        let envelope = match serde_json::from_str::<BrokerEnvelope>(&message.payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(channel = %message.channel, error = %err, "undecodable broker payload");
                return;
            }
        };

        if envelope.origin == self.origin {
            return;
        }

        let _ = self.local_tx.send(BridgeMessage {
            delivery_id,
            kind: envelope.kind,
            frame: envelope.frame,
            remote: true,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::{delivery_from_channel, events_channel, EventBridge};
    use crate::broker::{Broker, BrokerMessage, MemoryBroker};
    use crate::error::AppError;
    use crate::models::event::{TrackingEvent, TrackingEventKind};
    use crate::models::order::DeliveryId;
    use crate::observability::metrics::Metrics;

    fn event(id: &str) -> TrackingEvent {
        TrackingEvent::new(
            TrackingEventKind::LocationUpdate,
            DeliveryId::new(id),
            json!({ "etaMinutes": 4 }),
        )
    }

    /// Accepts publishes and never answers.
    struct StalledBroker;

    #[async_trait]
    impl Broker for StalledBroker {
        async fn publish(&self, _channel: &str, _payload: &str) -> Result<(), AppError> {
            futures::future::pending().await
        }

        async fn psubscribe(&self, _pattern: &str) -> Result<BoxStream<'static, BrokerMessage>, AppError> {
            Ok(Box::pin(futures::stream::pending()))
        }
    }

    #[test]
    fn channel_round_trips_delivery_id() {
        let id = DeliveryId::new("DLV-20261018-1A2B3C4D");
        assert_eq!(delivery_from_channel(&events_channel(&id)), Some(id));
        assert_eq!(delivery_from_channel("tracking::events"), None);
        assert_eq!(delivery_from_channel("other:x:events"), None);
    }

    #[tokio::test]
    async fn local_only_bridge_still_delivers() {
        let bridge = Arc::new(EventBridge::new(None, 16, Metrics::new()));
        let mut rx = bridge.subscribe();

        assert!(bridge.spawn_listener(CancellationToken::new()).await.is_none());
        bridge.publish(&event("DLV-20261018-00000001")).await;

        let message = rx.recv().await.unwrap();
        assert_eq!(message.kind, "location_update");
        assert!(!message.remote);
    }

    #[tokio::test]
    async fn sibling_receives_event_once_and_origin_ignores_echo() {
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new(64));
        let shutdown = CancellationToken::new();

        let a = Arc::new(EventBridge::new(Some(broker.clone()), 16, Metrics::new()));
        let b = Arc::new(EventBridge::new(Some(broker.clone()), 16, Metrics::new()));
        a.spawn_listener(shutdown.clone()).await.unwrap();
        b.spawn_listener(shutdown.clone()).await.unwrap();

        let mut a_rx = a.subscribe();
        let mut b_rx = b.subscribe();

        a.publish(&event("DLV-20261018-00000002")).await;

        let on_b = tokio::time::timeout(Duration::from_secs(1), b_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(on_b.remote);
        assert_eq!(on_b.delivery_id.as_str(), "DLV-20261018-00000002");

        let on_a = a_rx.recv().await.unwrap();
        assert!(!on_a.remote);
        assert!(
            tokio::time::timeout(Duration::from_millis(100), a_rx.recv())
                .await
                .is_err(),
            "origin must not receive its own echo"
        );

        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_broker_publish_is_bounded_and_counted() {
        let metrics = Metrics::new();
        let bridge = EventBridge::new(Some(Arc::new(StalledBroker)), 16, metrics.clone())
            .with_publish_timeout(Duration::from_millis(250));
        let mut rx = bridge.subscribe();

        let begun = tokio::time::Instant::now();
        tokio::time::timeout(Duration::from_secs(5), bridge.publish(&event("DLV-20261018-00000003")))
            .await
            .expect("publish must give up on a stalled broker");
        assert!(begun.elapsed() < Duration::from_secs(1));

        assert_eq!(metrics.broker_failures_total.get(), 1);
        assert!(!rx.recv().await.unwrap().remote);
    }
}
