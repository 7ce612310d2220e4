use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directory::OrderDirectory;
use crate::error::AppError;
use crate::models::delivery::{DriverInfo, LiveDelivery, Location, LocationPoint, LocationUpdate};
use crate::models::order::{DeliveryId, OrderRecord, OrderRef};
use crate::state::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 100;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tracking/:order_ref", get(get_live_tracking))
        .route("/tracking/:order_ref/start", post(start_tracking))
        .route("/tracking/:order_ref/location", post(update_location))
        .route("/tracking/:order_ref/history", get(get_history))
        .route("/tracking/:order_ref/stop", post(stop_tracking))
        .route("/tracking/:order_ref/subscribers", get(get_subscribers))
}

async fn resolve(state: &AppState, raw: &str) -> Result<OrderRecord, AppError> {
    let order_ref: OrderRef = raw.parse()?;
    state.directory.resolve_ref(&order_ref).await
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub message: &'static str,
    pub order_id: Uuid,
    pub delivery_id: DeliveryId,
}

async fn start_tracking(
    State(state): State<Arc<AppState>>,
    Path(order_ref): Path<String>,
    Json(driver): Json<DriverInfo>,
) -> Result<Json<StartResponse>, AppError> {
    let order = resolve(&state, &order_ref).await?;
    let delivery = state
        .coordinator
        .start_tracking(order.order_id, driver)
        .await?;

    Ok(Json(StartResponse {
        message: "tracking started",
        order_id: delivery.order_id,
        delivery_id: delivery.delivery_id,
    }))
}

/// Absent coordinates default to zero and are rejected as missing.
#[derive(Deserialize)]
pub struct LocationRequest {
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
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

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationResponse {
    pub location: Option<Location>,
    pub distance_remaining: Option<f64>,
    pub eta_minutes: Option<u32>,
    pub estimated_arrival: Option<DateTime<Utc>>,
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(order_ref): Path<String>,
    Json(payload): Json<LocationRequest>,
) -> Result<Json<LocationResponse>, AppError> {
    let order = resolve(&state, &order_ref).await?;
    let delivery = state
        .coordinator
        .update_location(LocationUpdate {
            order_id: order.order_id,
            latitude: payload.latitude,
            longitude: payload.longitude,
            accuracy: payload.accuracy,
            speed: payload.speed,
            heading: payload.heading,
            altitude: payload.altitude,
        })
        .await?;

    Ok(Json(LocationResponse {
        location: delivery.current_location,
        distance_remaining: delivery.distance_remaining_km,
        eta_minutes: delivery.eta_minutes,
        estimated_arrival: delivery.estimated_arrival,
    }))
}

async fn get_live_tracking(
    State(state): State<Arc<AppState>>,
    Path(order_ref): Path<String>,
) -> Result<Json<LiveDelivery>, AppError> {
    let order = resolve(&state, &order_ref).await?;
    let delivery = state.coordinator.get_live_tracking(order.order_id).await?;
    Ok(Json(delivery))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub order_id: Uuid,
    pub delivery_id: DeliveryId,
    pub points: Vec<LocationPoint>,
    pub count: usize,
}

async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(order_ref): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let order = resolve(&state, &order_ref).await?;
    let limit = match query.limit {
        Some(0) | None => DEFAULT_HISTORY_LIMIT,
        Some(limit) => limit,
    };

    let points = state
        .coordinator
        .get_location_history(order.order_id, limit)
        .await?;

    Ok(Json(HistoryResponse {
        order_id: order.order_id,
        delivery_id: order.delivery_id,
        count: points.len(),
        points,
    }))
}

#[derive(Deserialize)]
pub struct StopRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    pub message: &'static str,
    pub order_id: Uuid,
    pub delivery_id: DeliveryId,
}

async fn stop_tracking(
    State(state): State<Arc<AppState>>,
    Path(order_ref): Path<String>,
    payload: Option<Json<StopRequest>>,
) -> Result<Json<StopResponse>, AppError> {
    let order = resolve(&state, &order_ref).await?;
    let reason = payload.and_then(|Json(request)| request.reason);

    let order = state
        .coordinator
        .stop_tracking(order.order_id, reason)
        .await?;

    Ok(Json(StopResponse {
        message: "tracking stopped",
        order_id: order.order_id,
        delivery_id: order.delivery_id,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribersResponse {
    pub delivery_id: DeliveryId,
    pub subscribers: usize,
}

async fn get_subscribers(
    State(state): State<Arc<AppState>>,
    Path(order_ref): Path<String>,
) -> Result<Json<SubscribersResponse>, AppError> {
    let order = resolve(&state, &order_ref).await?;
    Ok(Json(SubscribersResponse {
        subscribers: state.hub.subscriber_count(&order.delivery_id),
        delivery_id: order.delivery_id,
    }))
}
