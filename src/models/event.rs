use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::order::DeliveryId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackingEventKind {
    TrackingStarted,
    LocationUpdate,
    TrackingStopped,
}

impl TrackingEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingEventKind::TrackingStarted => "tracking_started",
            TrackingEventKind::LocationUpdate => "location_update",
            TrackingEventKind::TrackingStopped => "tracking_stopped",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingEvent {
    #[serde(rename = "type")]
    pub kind: TrackingEventKind,
    pub delivery_id: DeliveryId,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl TrackingEvent {
    pub fn new(kind: TrackingEventKind, delivery_id: DeliveryId, data: Value) -> Self {
        Self {
            kind,
            delivery_id,
            timestamp: Utc::now(),
            data,
        }
    }
}

/// The `{type, payload}` frame written to realtime connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    pub fn from_event(event: &TrackingEvent) -> Self {
        Self::new(
            event.kind.as_str(),
            serde_json::json!({
                "deliveryId": event.delivery_id,
                "timestamp": event.timestamp,
                "data": event.data,
            }),
        )
    }
}
