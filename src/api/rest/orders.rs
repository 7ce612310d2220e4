use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::directory::OrderDirectory;
use crate::error::AppError;
use crate::models::order::{GeoPoint, OrderRecord, OrderRef};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:order_ref", get(get_order))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub courier_id: Uuid,
    pub destination: GeoPoint,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<OrderRecord>, AppError> {
    let GeoPoint { lat, lng } = payload.destination;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(AppError::InvalidInput(format!(
            "destination out of range: {lat}, {lng}"
        )));
    }

    let order = state
        .directory
        .register(payload.courier_id, payload.destination);

    tracing::info!(
        order_id = %order.order_id,
        delivery_id = %order.delivery_id,
        courier_id = %order.courier_id,
        "order registered"
    );

    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(order_ref): Path<String>,
) -> Result<Json<OrderRecord>, AppError> {
    let order_ref: OrderRef = order_ref.parse()?;
    let order = state.directory.resolve_ref(&order_ref).await?;
    Ok(Json(order))
}
