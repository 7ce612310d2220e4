use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::order::{DeliveryId, GeoPoint, OrderRecord};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverInfo {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub vehicle_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_plate: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    Tracking,
    Stopped,
}

/// A GPS fix with whatever metadata the device reported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// km/h.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Degrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// Meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// One entry of a delivery's location history. Never mutated once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl From<&Location> for LocationPoint {
    fn from(location: &Location) -> Self {
        Self {
            latitude: location.latitude,
            longitude: location.longitude,
            speed: location.speed,
            heading: location.heading,
            timestamp: location.timestamp,
        }
    }
}

/// Position report from a driver's device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub order_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
}

/// An actively tracked shipment.
///
/// The destination and driver fields are fixed at start. Position and the
/// derived distance/ETA fields are rewritten on every location update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveDelivery {
    pub delivery_id: DeliveryId,
    pub order_id: Uuid,
    pub courier_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_row_id: Option<Uuid>,

    pub driver_name: String,
    pub driver_phone: String,
    pub vehicle_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_plate: Option<String>,

    #[serde(default)]
    pub current_location: Option<Location>,
    pub last_updated_at: DateTime<Utc>,

    pub destination: GeoPoint,

    #[serde(rename = "distanceRemaining", default)]
    pub distance_remaining_km: Option<f64>,
    #[serde(default)]
    pub eta_minutes: Option<u32>,
    #[serde(default)]
    pub estimated_arrival: Option<DateTime<Utc>>,

    pub status: TrackingStatus,
    pub is_active: bool,
}

impl LiveDelivery {
    pub fn start(
        order: &OrderRecord,
        driver: DriverInfo,
        tracking_row_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            delivery_id: order.delivery_id.clone(),
            order_id: order.order_id,
            courier_id: order.courier_id,
            tracking_row_id,
            driver_name: driver.name,
            driver_phone: driver.phone,
            vehicle_type: driver.vehicle_type,
            vehicle_plate: driver.vehicle_plate,
            current_location: None,
            last_updated_at: now,
            destination: order.destination,
            distance_remaining_km: None,
            eta_minutes: None,
            estimated_arrival: None,
            status: TrackingStatus::Tracking,
            is_active: true,
        }
    }

    /// Flags the record inactive. It is evicted from both tiers right after.
    pub fn mark_stopped(&mut self, now: DateTime<Utc>) {
        self.status = TrackingStatus::Stopped;
        self.is_active = false;
        self.last_updated_at = now;
    }
}
