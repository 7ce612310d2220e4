use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::delivery::LocationPoint;
use crate::persistence::{NewTrackingRow, PersistenceSink, TrackingRow};

/// Persistence sink kept in process memory.
///
/// Latency and failures can be injected to exercise the paths that must not
/// depend on the durable store.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    rows: DashMap<Uuid, TrackingRow>,
    history: DashMap<Uuid, Vec<LocationPoint>>,
    latency_ms: AtomicU64,
    failing: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::Relaxed);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn row(&self, tracking_row_id: Uuid) -> Option<TrackingRow> {
        self.rows.get(&tracking_row_id).map(|row| row.value().clone())
    }

    pub fn history_len(&self, tracking_row_id: Uuid) -> usize {
        self.history
            .get(&tracking_row_id)
            .map(|points| points.len())
            .unwrap_or(0)
    }

    async fn gate(&self) -> Result<(), AppError> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.failing.load(Ordering::Relaxed) {
            return Err(AppError::Infrastructure("durable store unavailable".to_string()));
        }
        Ok(())
    }

    fn latest_row_id(&self, order_id: Uuid) -> Option<Uuid> {
        self.rows
            .iter()
            .filter(|row| row.order_id == order_id)
            .max_by_key(|row| row.created_at)
            .map(|row| row.id)
    }

    fn with_active_row<F>(&self, order_id: Uuid, apply: F) -> Result<(), AppError>
    where
        F: FnOnce(&mut TrackingRow),
    {
        let row_id = self
            .latest_row_id(order_id)
            .ok_or_else(|| AppError::NotFound(format!("no tracking row for order {order_id}")))?;

        let mut row = self
            .rows
            .get_mut(&row_id)
            .ok_or_else(|| AppError::NotFound(format!("tracking row {row_id} vanished")))?;
        apply(row.value_mut());
        row.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl PersistenceSink for MemoryPersistence {
    async fn create_tracking_row(&self, row: NewTrackingRow) -> Result<Uuid, AppError> {
        self.gate().await?;

        let now = Utc::now();
        let id = Uuid::new_v4();
        self.rows.insert(
            id,
            TrackingRow {
                id,
                order_id: row.order_id,
                delivery_id: row.delivery_id,
                courier_id: row.courier_id,
                driver: row.driver,
                current_latitude: None,
                current_longitude: None,
                last_location_at: None,
                estimated_arrival: None,
                distance_remaining_km: None,
                duration_remaining_secs: None,
                is_active: true,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn update_position(&self, order_id: Uuid, latitude: f64, longitude: f64) -> Result<(), AppError> {
        self.gate().await?;
        self.with_active_row(order_id, |row| {
            row.current_latitude = Some(latitude);
            row.current_longitude = Some(longitude);
            row.last_location_at = Some(Utc::now());
        })
    }

    async fn update_eta(
        &self,
        order_id: Uuid,
        eta: DateTime<Utc>,
        distance_remaining_km: f64,
        duration_secs: i64,
    ) -> Result<(), AppError> {
        self.gate().await?;
        self.with_active_row(order_id, |row| {
            row.estimated_arrival = Some(eta);
            row.distance_remaining_km = Some(distance_remaining_km);
            row.duration_remaining_secs = Some(duration_secs);
        })
    }

    async fn complete_tracking(&self, order_id: Uuid) -> Result<(), AppError> {
        self.gate().await?;
        let now = Utc::now();
        for mut row in self.rows.iter_mut() {
            if row.order_id == order_id && row.is_active {
                row.is_active = false;
                row.updated_at = now;
            }
        }
        Ok(())
    }

    async fn append_history_point(&self, tracking_row_id: Uuid, point: &LocationPoint) -> Result<(), AppError> {
        self.gate().await?;
        if !self.rows.contains_key(&tracking_row_id) {
            return Err(AppError::NotFound(format!("tracking row {tracking_row_id} not found")));
        }

        let mut points = self.history.entry(tracking_row_id).or_default();
        let position = points.partition_point(|existing| existing.timestamp <= point.timestamp);
        points.insert(position, point.clone());
        Ok(())
    }

    async fn read_history_points(&self, tracking_row_id: Uuid) -> Result<Vec<LocationPoint>, AppError> {
        self.gate().await?;
        Ok(self
            .history
            .get(&tracking_row_id)
            .map(|points| points.value().clone())
            .unwrap_or_default())
    }

    async fn latest_tracking_row(&self, order_id: Uuid) -> Result<TrackingRow, AppError> {
        self.gate().await?;
        self.latest_row_id(order_id)
            .and_then(|id| self.row(id))
            .ok_or_else(|| AppError::NotFound(format!("no tracking row for order {order_id}")))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};
    use uuid::Uuid;

    use super::MemoryPersistence;
    use crate::error::AppError;
    use crate::models::delivery::{DriverInfo, LocationPoint};
    use crate::models::order::DeliveryId;
    use crate::persistence::{NewTrackingRow, PersistenceSink};

    fn new_row(order_id: Uuid) -> NewTrackingRow {
        NewTrackingRow {
            order_id,
            delivery_id: DeliveryId::new("DLV-20261018-00000001"),
            courier_id: Uuid::new_v4(),
            driver: DriverInfo {
                name: "Banda".to_string(),
                phone: "+260970000001".to_string(),
                vehicle_type: "motorbike".to_string(),
                vehicle_plate: None,
            },
        }
    }

    fn point_at(offset_secs: i64) -> LocationPoint {
        LocationPoint {
            latitude: -15.42,
            longitude: 28.28,
            speed: None,
            heading: None,
            timestamp: Utc::now() + ChronoDuration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn history_is_kept_in_time_order() {
        let sink = MemoryPersistence::new();
        let row_id = sink.create_tracking_row(new_row(Uuid::new_v4())).await.unwrap();

        sink.append_history_point(row_id, &point_at(20)).await.unwrap();
        sink.append_history_point(row_id, &point_at(0)).await.unwrap();
        sink.append_history_point(row_id, &point_at(10)).await.unwrap();

        let points = sink.read_history_points(row_id).await.unwrap();
        assert_eq!(points.len(), 3);
        assert!(points.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));
    }

    #[tokio::test]
    async fn complete_marks_row_inactive() {
        let sink = MemoryPersistence::new();
        let order_id = Uuid::new_v4();
        let row_id = sink.create_tracking_row(new_row(order_id)).await.unwrap();

        sink.complete_tracking(order_id).await.unwrap();
        sink.complete_tracking(order_id).await.unwrap();

        assert!(!sink.row(row_id).unwrap().is_active);
    }

    #[tokio::test]
    async fn injected_failure_surfaces_as_infrastructure() {
        let sink = MemoryPersistence::new();
        sink.set_failing(true);

        let err = sink.create_tracking_row(new_row(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, AppError::Infrastructure(_)));
    }
}
