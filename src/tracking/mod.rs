//! Tracking coordinator: the start / update / stop lifecycle of a delivery.
//!
//! A delivery moves `NONE -> TRACKING -> STOPPED`. Starting again after a stop
//! creates a fresh record; starting while already tracking replaces the
//! running session.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::directory::OrderDirectory;
use crate::error::AppError;
use crate::fanout::EventBridge;
use crate::geo::{live_eta_minutes, road_distance_km};
use crate::models::delivery::{
    DriverInfo, LiveDelivery, Location, LocationPoint, LocationUpdate, TrackingStatus,
};
use crate::models::event::{TrackingEvent, TrackingEventKind};
use crate::models::order::{GeoPoint, OrderRecord};
use crate::observability::metrics::Metrics;
use crate::persistence::{NewTrackingRow, PersistenceSink};
use crate::store::{DeliveryStore, HISTORY_LIMIT_CEILING};

pub const DEFAULT_STOP_REASON: &str = "completed";

pub struct TrackingCoordinator {
    directory: Arc<dyn OrderDirectory>,
    sink: Arc<dyn PersistenceSink>,
    store: Arc<DeliveryStore>,
    bridge: Arc<EventBridge>,
    metrics: Metrics,
}

impl TrackingCoordinator {
    pub fn new(
        directory: Arc<dyn OrderDirectory>,
        sink: Arc<dyn PersistenceSink>,
        store: Arc<DeliveryStore>,
        bridge: Arc<EventBridge>,
        metrics: Metrics,
    ) -> Self {
        Self {
            directory,
            sink,
            store,
            bridge,
            metrics,
        }
    }

    pub fn directory(&self) -> &Arc<dyn OrderDirectory> {
        &self.directory
    }

    pub fn store(&self) -> &Arc<DeliveryStore> {
        &self.store
    }

    pub async fn start_tracking(&self, order_id: Uuid, driver: DriverInfo) -> Result<LiveDelivery, AppError> {
        let order = self.directory.resolve(order_id).await?;
        validate_driver(&driver)?;

        if matches!(self.store.get(&order.delivery_id).await, Ok(Some(_))) {
            info!(delivery_id = %order.delivery_id, "tracking restarted; replacing running session");
        }

        let row_id = self
            .sink
            .create_tracking_row(NewTrackingRow {
                order_id: order.order_id,
                delivery_id: order.delivery_id.clone(),
                courier_id: order.courier_id,
                driver: driver.clone(),
            })
            .await?;

        let delivery = LiveDelivery::start(&order, driver, Some(row_id), Utc::now());
        self.store.put(&delivery).await;

        self.bridge
            .publish(&TrackingEvent::new(
                TrackingEventKind::TrackingStarted,
                delivery.delivery_id.clone(),
                to_payload(&delivery),
            ))
            .await;

        info!(
            delivery_id = %delivery.delivery_id,
            order_id = %order_id,
            courier_id = %delivery.courier_id,
            "tracking started"
        );

        Ok(delivery)
    }

    /// Applies a position report and returns the refreshed record. Durable
    /// writes happen on a detached task and never affect the result.
    pub async fn update_location(&self, update: LocationUpdate) -> Result<LiveDelivery, AppError> {
        let start = Instant::now();
        let result = self.apply_update(update).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(AppError::NotFound(_)) => "not_found",
            Err(AppError::NotTracking(_)) => "not_tracking",
            Err(AppError::InvalidInput(_)) => "invalid",
            Err(_) => "error",
        };
        self.metrics
            .location_update_latency_seconds
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());
        self.metrics
            .location_updates_total
            .with_label_values(&[outcome])
            .inc();

        result
    }

    async fn apply_update(&self, update: LocationUpdate) -> Result<LiveDelivery, AppError> {
        let order = self.directory.resolve(update.order_id).await?;
        let mut delivery = self
            .store
            .get(&order.delivery_id)
            .await?
            .ok_or_else(|| AppError::NotTracking(order.delivery_id.to_string()))?;

        validate_coordinates(update.latitude, update.longitude)?;

        let now = Utc::now();
        advance(&mut delivery, &update, now);

        self.store.put(&delivery).await;

        let location = delivery
            .current_location
            .clone()
            .ok_or_else(|| AppError::Internal("position missing after update".to_string()))?;
        let point = LocationPoint::from(&location);
        self.store
            .append_history(&delivery.delivery_id, &point)
            .await;

        self.spawn_durable_writes(&delivery, point);

        self.bridge
            .publish(&TrackingEvent::new(
                TrackingEventKind::LocationUpdate,
                delivery.delivery_id.clone(),
                json!({
                    "location": location,
                    "distanceRemaining": delivery.distance_remaining_km,
                    "etaMinutes": delivery.eta_minutes,
                    "estimatedArrival": delivery.estimated_arrival,
                }),
            ))
            .await;

        debug!(
            delivery_id = %delivery.delivery_id,
            distance_km = delivery.distance_remaining_km,
            eta_minutes = delivery.eta_minutes,
            "location updated"
        );

        Ok(delivery)
    }

    fn spawn_durable_writes(&self, delivery: &LiveDelivery, point: LocationPoint) {
        let sink = Arc::clone(&self.sink);
        let metrics = self.metrics.clone();
        let order_id = delivery.order_id;
        let delivery_id = delivery.delivery_id.clone();
        let tracking_row_id = delivery.tracking_row_id;
        let eta = delivery.estimated_arrival;
        let distance_km = delivery.distance_remaining_km.unwrap_or_default();
        let duration_secs = i64::from(delivery.eta_minutes.unwrap_or_default()) * 60;

        // Best-effort: not awaited, not retried, lost on shutdown.
        tokio::spawn(async move {
            let report = |what: &str, err: AppError| {
                metrics.durable_write_failures_total.inc();
                warn!(delivery_id = %delivery_id, write = what, error = %err, "durable write failed");
            };

            if let Err(err) = sink
                .update_position(order_id, point.latitude, point.longitude)
                .await
            {
                report("position", err);
            }

            if let Some(eta) = eta {
                if let Err(err) = sink
                    .update_eta(order_id, eta, distance_km, duration_secs)
                    .await
                {
                    report("eta", err);
                }
            }

            let row_id = match tracking_row_id {
                Some(id) => Ok(id),
                None => sink.latest_tracking_row(order_id).await.map(|row| row.id),
            };
            match row_id {
                Ok(row_id) => {
                    if let Err(err) = sink.append_history_point(row_id, &point).await {
                        report("history", err);
                    }
                }
                Err(err) => report("history", err),
            }
        });
    }

    pub async fn get_live_tracking(&self, order_id: Uuid) -> Result<LiveDelivery, AppError> {
        let order = self.directory.resolve(order_id).await?;
        self.store
            .get(&order.delivery_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no tracking data for {}", order.delivery_id)))
    }

    /// Newest first, at most `min(limit, 1000)` points. Empty when nothing
    /// was recorded.
    pub async fn get_location_history(&self, order_id: Uuid, limit: usize) -> Result<Vec<LocationPoint>, AppError> {
        let order = self.directory.resolve(order_id).await?;
        let limit = limit.min(HISTORY_LIMIT_CEILING);

        if self.store.has_shared_tier() {
            return self.store.read_history(&order.delivery_id, limit).await;
        }

        let row = match self.sink.latest_tracking_row(order_id).await {
            Ok(row) => row,
            Err(AppError::NotFound(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut points = self.sink.read_history_points(row.id).await?;
        points.reverse();
        points.truncate(limit);
        Ok(points)
    }

    pub async fn stop_tracking(&self, order_id: Uuid, reason: Option<String>) -> Result<OrderRecord, AppError> {
        let order = self.directory.resolve(order_id).await?;
        let reason = reason
            .map(|reason| reason.trim().to_string())
            .filter(|reason| !reason.is_empty())
            .unwrap_or_else(|| DEFAULT_STOP_REASON.to_string());

        // The durable row closes first, so a failing sink leaves the session
        // live and the stop can be retried.
        self.sink.complete_tracking(order_id).await?;

        let last = match self.store.get(&order.delivery_id).await {
            Ok(found) => found.map(|mut delivery| {
                delivery.mark_stopped(Utc::now());
                delivery
            }),
            Err(err) => {
                warn!(delivery_id = %order.delivery_id, error = %err, "could not read final state before stop");
                None
            }
        };
        self.store.remove(&order.delivery_id).await;

        self.bridge
            .publish(&TrackingEvent::new(
                TrackingEventKind::TrackingStopped,
                order.delivery_id.clone(),
                json!({ "reason": reason, "status": TrackingStatus::Stopped, "delivery": last }),
            ))
            .await;

        info!(delivery_id = %order.delivery_id, reason = %reason, "tracking stopped");
        Ok(order)
    }

    /// Keeps this process's local map honest when another process changes a
    /// delivery: the local copy is dropped and the next read refills from the
    /// shared tier.
    pub fn spawn_sibling_sync(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.bridge.subscribe();
        let store = Arc::clone(&self.store);
        // Without a shared tier the local copy is the only copy.
        let evict = store.has_shared_tier();

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = rx.recv() => received,
                };

                match received {
                    Ok(message) if message.remote && evict => {
                        if store.evict_local(&message.delivery_id) {
                            debug!(delivery_id = %message.delivery_id, kind = %message.kind, "dropped local copy after sibling event");
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "sibling sync lagged behind the bridge");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

fn validate_driver(driver: &DriverInfo) -> Result<(), AppError> {
    if driver.name.trim().is_empty() || driver.phone.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "driver name and phone are required".to_string(),
        ));
    }
    Ok(())
}

/// Zero means "not supplied", so the point (0, 0) itself is rejected.
fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), AppError> {
    if latitude == 0.0 || longitude == 0.0 {
        return Err(AppError::InvalidInput(
            "latitude and longitude are required".to_string(),
        ));
    }
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(AppError::InvalidInput(format!(
            "coordinates out of range: {latitude}, {longitude}"
        )));
    }
    Ok(())
}

/// Moves the delivery to the reported position and recomputes distance and ETA.
pub fn advance(delivery: &mut LiveDelivery, update: &LocationUpdate, now: DateTime<Utc>) {
    let here = GeoPoint {
        lat: update.latitude,
        lng: update.longitude,
    };
    let distance_km = road_distance_km(&here, &delivery.destination);
    let eta_minutes = live_eta_minutes(distance_km, update.speed);

    delivery.current_location = Some(Location {
        latitude: update.latitude,
        longitude: update.longitude,
        accuracy: update.accuracy,
        speed: update.speed,
        heading: update.heading,
        altitude: update.altitude,
        timestamp: now,
    });
    delivery.last_updated_at = now;
    delivery.distance_remaining_km = Some(distance_km);
    delivery.eta_minutes = Some(eta_minutes);
    delivery.estimated_arrival = Some(now + chrono::Duration::minutes(i64::from(eta_minutes)));
}

fn to_payload<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|err| {
        warn!(error = %err, "failed to encode event payload");
        Value::Null
    })
}
