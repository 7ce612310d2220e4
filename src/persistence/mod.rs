//! Durable storage of tracking rows and location history.
//!
//! Start and stop wait on the sink; position updates write to it from a
//! detached task, so a slow or failing sink never delays a location update.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::delivery::{DriverInfo, LocationPoint};
use crate::models::order::DeliveryId;

pub use self::memory::MemoryPersistence;

#[derive(Debug, Clone)]
pub struct NewTrackingRow {
    pub order_id: Uuid,
    pub delivery_id: DeliveryId,
    pub courier_id: Uuid,
    pub driver: DriverInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub delivery_id: DeliveryId,
    pub courier_id: Uuid,
    pub driver: DriverInfo,
    pub current_latitude: Option<f64>,
    pub current_longitude: Option<f64>,
    pub last_location_at: Option<DateTime<Utc>>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub distance_remaining_km: Option<f64>,
    pub duration_remaining_secs: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Returns the id of the new row.
    async fn create_tracking_row(&self, row: NewTrackingRow) -> Result<Uuid, AppError>;

    async fn update_position(&self, order_id: Uuid, latitude: f64, longitude: f64) -> Result<(), AppError>;

    async fn update_eta(
        &self,
        order_id: Uuid,
        eta: DateTime<Utc>,
        distance_remaining_km: f64,
        duration_secs: i64,
    ) -> Result<(), AppError>;

    /// Marks every active row of the order completed. Idempotent.
    async fn complete_tracking(&self, order_id: Uuid) -> Result<(), AppError>;

    async fn append_history_point(&self, tracking_row_id: Uuid, point: &LocationPoint) -> Result<(), AppError>;

    /// Oldest first.
    async fn read_history_points(&self, tracking_row_id: Uuid) -> Result<Vec<LocationPoint>, AppError>;

    /// Most recently created row for the order, active or not.
    async fn latest_tracking_row(&self, order_id: Uuid) -> Result<TrackingRow, AppError>;
}
