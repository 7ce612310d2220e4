//! Connection hub: realtime connections, their courier identity and their
//! delivery subscriptions.
//!
//! Two tables: `clients` (connection -> courier, queue, subscriptions) and
//! `subscriptions` (delivery -> connections). When both are touched the
//! `clients` entry is taken first. Sends never block: a full queue drops the
//! frame.

pub mod message;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::fanout::EventBridge;
use crate::models::delivery::LocationUpdate;
use crate::models::event::Envelope;
use crate::models::order::{DeliveryId, OrderRecord, OrderRef};
use crate::observability::metrics::Metrics;
use crate::tracking::TrackingCoordinator;

use self::message::{InboundLocation, InboundMessage, SubscribeAction, SubscribeRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Connection {
    courier_id: Uuid,
    sender: mpsc::Sender<String>,
    subscriptions: HashSet<DeliveryId>,
    connected_at: DateTime<Utc>,
}

pub struct ConnectionHub {
    clients: DashMap<ConnectionId, Connection>,
    subscriptions: DashMap<DeliveryId, HashSet<ConnectionId>>,
    coordinator: Arc<TrackingCoordinator>,
    bridge: Arc<EventBridge>,
    send_buffer: usize,
    metrics: Metrics,
}

impl ConnectionHub {
    pub fn new(
        coordinator: Arc<TrackingCoordinator>,
        bridge: Arc<EventBridge>,
        send_buffer: usize,
        metrics: Metrics,
    ) -> Self {
        Self {
            clients: DashMap::new(),
            subscriptions: DashMap::new(),
            coordinator,
            bridge,
            send_buffer: send_buffer.max(1),
            metrics,
        }
    }

    /// Adds a connection owned by `courier_id`. The receiver is the
    /// connection's outbound queue.
    pub fn register(&self, courier_id: Uuid) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (sender, receiver) = mpsc::channel(self.send_buffer);

        self.clients.insert(
            id,
            Connection {
                courier_id,
                sender,
                subscriptions: HashSet::new(),
                connected_at: Utc::now(),
            },
        );
        self.metrics.connections.set(self.clients.len() as i64);

        info!(connection_id = %id, courier_id = %courier_id, "realtime connection registered");
        (id, receiver)
    }

    pub fn unregister(&self, id: ConnectionId) {
        let Some((_, connection)) = self.clients.remove(&id) else {
            return;
        };

        for delivery_id in &connection.subscriptions {
            self.detach(delivery_id, id);
        }
        self.metrics.connections.set(self.clients.len() as i64);

        info!(
            connection_id = %id,
            courier_id = %connection.courier_id,
            subscriptions = connection.subscriptions.len(),
            connected_secs = (Utc::now() - connection.connected_at).num_seconds(),
            "realtime connection unregistered"
        );
    }

    /// No-op for unknown connections.
    pub fn subscribe(&self, id: ConnectionId, delivery_id: &DeliveryId) {
        let Some(mut connection) = self.clients.get_mut(&id) else {
            return;
        };

        connection.subscriptions.insert(delivery_id.clone());
        self.subscriptions
            .entry(delivery_id.clone())
            .or_default()
            .insert(id);

        debug!(connection_id = %id, delivery_id = %delivery_id, "subscribed");
    }

    pub fn unsubscribe(&self, id: ConnectionId, delivery_id: &DeliveryId) {
        let Some(mut connection) = self.clients.get_mut(&id) else {
            return;
        };

        if connection.subscriptions.remove(delivery_id) {
            self.detach(delivery_id, id);
            debug!(connection_id = %id, delivery_id = %delivery_id, "unsubscribed");
        }
    }

    fn detach(&self, delivery_id: &DeliveryId, id: ConnectionId) {
        if let Some(mut members) = self.subscriptions.get_mut(delivery_id) {
            members.remove(&id);
        }
        self.subscriptions
            .remove_if(delivery_id, |_, members| members.is_empty());
    }

    pub fn subscriber_count(&self, delivery_id: &DeliveryId) -> usize {
        self.subscriptions
            .get(delivery_id)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    /// Queues `frame` on every local subscriber of the delivery. Returns how
    /// many accepted it.
    pub fn deliver_local(&self, delivery_id: &DeliveryId, frame: &str) -> usize {
        let members: Vec<ConnectionId> = match self.subscriptions.get(delivery_id) {
            Some(members) => members.iter().copied().collect(),
            None => return 0,
        };

        members
            .into_iter()
            .filter(|id| self.send_to_connection(*id, frame))
            .count()
    }

    /// Local subscribers first, then sibling processes through the bridge.
    pub async fn broadcast_to_delivery(&self, delivery_id: &DeliveryId, envelope: &Envelope) -> usize {
        let Some(frame) = message::encode(envelope) else {
            warn!(delivery_id = %delivery_id, kind = %envelope.kind, "failed to encode broadcast frame");
            return 0;
        };

        let delivered = self.deliver_local(delivery_id, &frame);
        self.bridge
            .publish_remote(delivery_id, &envelope.kind, &frame)
            .await;
        delivered
    }

    /// Every connection owned by the courier, regardless of subscriptions.
    pub fn send_to_courier(&self, courier_id: Uuid, envelope: &Envelope) -> usize {
        let Some(frame) = message::encode(envelope) else {
            return 0;
        };

        let targets: Vec<ConnectionId> = self
            .clients
            .iter()
            .filter(|entry| entry.courier_id == courier_id)
            .map(|entry| *entry.key())
            .collect();

        targets
            .into_iter()
            .filter(|id| self.send_to_connection(*id, &frame))
            .count()
    }

    /// `false` when the connection is gone or its queue is full.
    pub fn send_to_connection(&self, id: ConnectionId, frame: &str) -> bool {
        let sender = match self.clients.get(&id) {
            Some(connection) => connection.sender.clone(),
            None => return false,
        };

        match sender.try_send(frame.to_string()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.metrics.fanout_dropped_total.inc();
                debug!(connection_id = %id, "send queue full; frame dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Dispatches one client frame. Malformed and unknown frames are ignored.
    pub async fn handle_inbound(&self, id: ConnectionId, text: &str) {
        let Some(message) = InboundMessage::decode(text) else {
            debug!(connection_id = %id, "ignoring malformed frame");
            return;
        };

        match message {
            InboundMessage::LocationUpdate(location) => self.apply_location(id, location).await,
            InboundMessage::Subscribe(request) => self.apply_subscription(id, request).await,
            InboundMessage::Ping => {
                if let Some(frame) = message::encode(&message::pong()) {
                    self.send_to_connection(id, &frame);
                }
            }
            InboundMessage::Unrecognized(kind) => {
                debug!(connection_id = %id, kind = %kind, "ignoring unrecognized frame");
            }
        }
    }

    async fn apply_location(&self, id: ConnectionId, location: InboundLocation) {
        let Some(courier_id) = self.clients.get(&id).map(|connection| connection.courier_id) else {
            return;
        };

        let order = match self.resolve(&location.order_id).await {
            Some(order) => order,
            None => return,
        };

        if order.courier_id != courier_id {
            warn!(
                connection_id = %id,
                courier_id = %courier_id,
                delivery_id = %order.delivery_id,
                "location update for another courier's order ignored"
            );
            return;
        }

        let update = LocationUpdate {
            order_id: order.order_id,
            latitude: location.latitude,
            longitude: location.longitude,
            accuracy: location.accuracy,
            speed: location.speed,
            heading: location.heading,
            altitude: location.altitude,
        };
        if let Err(err) = self.coordinator.update_location(update).await {
            warn!(connection_id = %id, delivery_id = %order.delivery_id, error = %err, "realtime location update rejected");
        }
    }

    async fn apply_subscription(&self, id: ConnectionId, request: SubscribeRequest) {
        let Some(order) = self.resolve(&request.order_id).await else {
            return;
        };

        match request.action {
            SubscribeAction::Subscribe => self.subscribe(id, &order.delivery_id),
            SubscribeAction::Unsubscribe => self.unsubscribe(id, &order.delivery_id),
        }
    }

    async fn resolve(&self, raw: &str) -> Option<OrderRecord> {
        let order_ref = match raw.parse::<OrderRef>() {
            Ok(order_ref) => order_ref,
            Err(err) => {
                debug!(order_ref = %raw, error = %err, "unparseable order reference");
                return None;
            }
        };

        match self.coordinator.directory().resolve_ref(&order_ref).await {
            Ok(order) => Some(order),
            Err(err) => {
                debug!(order_ref = %raw, error = %err, "order reference did not resolve");
                None
            }
        }
    }

    /// Forwards every bridge message to this process's subscribers.
    pub fn spawn_listener(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.bridge.subscribe();
        let hub = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = rx.recv() => received,
                };

                match received {
                    Ok(message) => {
                        let delivered = hub.deliver_local(&message.delivery_id, &message.frame);
                        debug!(
                            delivery_id = %message.delivery_id,
                            kind = %message.kind,
                            remote = message.remote,
                            delivered,
                            "fan-out"
                        );
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        hub.metrics.fanout_dropped_total.inc_by(skipped);
                        warn!(skipped, "hub listener lagged behind the bridge");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            info!("hub listener stopped");
        })
    }
}
