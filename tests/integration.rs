use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use live_tracking::api::rest::router;
use live_tracking::cache::MemoryCache;
use live_tracking::config::Config;
use live_tracking::models::order::DeliveryId;
use live_tracking::persistence::MemoryPersistence;
use live_tracking::state::{AppState, Backends};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn setup() -> (axum::Router, Arc<AppState>) {
    let backends = Backends {
        shared_cache: Some(Arc::new(MemoryCache::new())),
        broker: None,
        sink: Arc::new(MemoryPersistence::new()),
    };
    let state = Arc::new(AppState::new(&Config::default(), backends));
    (router(state.clone()), state)
}

fn setup_without_shared_cache() -> axum::Router {
    let state = Arc::new(AppState::new(&Config::default(), Backends::in_memory()));
    router(state)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn empty_post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn create_order(app: &axum::Router) -> Value {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({
                "courierId": Uuid::new_v4(),
                "destination": { "lat": -15.4167, "lng": 28.2833 }
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn start(app: &axum::Router, order_ref: &str) -> axum::response::Response {
    app.clone()
        .oneshot(json_request(
            "POST",
            &format!("/tracking/{order_ref}/start"),
            json!({ "name": "Banda", "phone": "+260970000001", "vehicleType": "motorbike" }),
        ))
        .await
        .unwrap()
}

async fn report(app: &axum::Router, order_ref: &str, lat: f64, lng: f64) -> axum::response::Response {
    app.clone()
        .oneshot(json_request(
            "POST",
            &format!("/tracking/{order_ref}/location"),
            json!({ "latitude": lat, "longitude": lng, "speed": 30.0 }),
        ))
        .await
        .unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _state) = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["activeDeliveries"], 0);
    assert_eq!(body["connections"], 0);
    assert_eq!(body["distributed"], false);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _state) = setup();
    let response = app.oneshot(get_request("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("active_deliveries"));
    assert!(body.contains("realtime_connections"));
}

#[tokio::test]
async fn orders_resolve_by_either_reference() {
    let (app, _state) = setup();
    let order = create_order(&app).await;

    let delivery_id = order["deliveryId"].as_str().unwrap().to_string();
    assert!(DeliveryId::new(delivery_id.clone()).is_well_formed());
    assert!(delivery_id.starts_with("DLV-"));

    let order_id = order["orderId"].as_str().unwrap();
    for order_ref in [order_id, delivery_id.as_str()] {
        let response = app
            .clone()
            .oneshot(get_request(&format!("/orders/{order_ref}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["deliveryId"], delivery_id.as_str());
    }
}

#[tokio::test]
async fn unknown_order_returns_404() {
    let (app, _state) = setup();

    for uri in [
        format!("/orders/{}", Uuid::new_v4()),
        "/orders/DLV-20261018-DEADBEEF".to_string(),
        format!("/tracking/{}", Uuid::new_v4()),
    ] {
        let response = app.clone().oneshot(get_request(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        assert!(body_json(response).await["error"].is_string());
    }
}

#[tokio::test]
async fn full_tracking_lifecycle_over_http() {
    let (app, state) = setup();
    let order = create_order(&app).await;
    let delivery_id = order["deliveryId"].as_str().unwrap().to_string();

    let response = start(&app, &delivery_id).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["deliveryId"], delivery_id.as_str());
    assert_eq!(body["message"], "tracking started");

    let response = report(&app, &delivery_id, -15.42, 28.28).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["distanceRemaining"].as_f64().unwrap() > 0.0);
    assert!(body["etaMinutes"].as_u64().unwrap() >= 1);
    assert!(body["estimatedArrival"].is_string());
    assert_eq!(body["location"]["latitude"], -15.42);

    let response = app
        .clone()
        .oneshot(get_request(&format!("/tracking/{delivery_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "tracking");
    assert_eq!(body["isActive"], true);
    assert_eq!(body["driverName"], "Banda");
    assert_eq!(state.store.local_len(), 1);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/tracking/{delivery_id}/stop"),
            json!({ "reason": "delivered" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get_request(&format!("/tracking/{delivery_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(get_request(&format!("/tracking/{delivery_id}/history?limit=10")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["points"][0]["latitude"], -15.42);
}

#[tokio::test]
async fn location_without_active_session_returns_409() {
    let (app, _state) = setup();
    let order = create_order(&app).await;
    let order_id = order["orderId"].as_str().unwrap();

    let response = report(&app, order_id, -15.42, 28.28).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn missing_coordinates_return_400() {
    let (app, _state) = setup();
    let order = create_order(&app).await;
    let order_id = order["orderId"].as_str().unwrap();
    assert_eq!(start(&app, order_id).await.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/tracking/{order_id}/location"),
            json!({ "latitude": -15.42 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn start_without_driver_name_returns_400() {
    let (app, _state) = setup();
    let order = create_order(&app).await;
    let order_id = order["orderId"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/tracking/{order_id}/start"),
            json!({ "name": " ", "phone": "+260970000001" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stop_accepts_missing_body() {
    let (app, _state) = setup();
    let order = create_order(&app).await;
    let order_id = order["orderId"].as_str().unwrap();
    assert_eq!(start(&app, order_id).await.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(empty_post(&format!("/tracking/{order_id}/stop")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["message"], "tracking stopped");
}

#[tokio::test]
async fn history_is_newest_first_and_limited() {
    let (app, _state) = setup();
    let order = create_order(&app).await;
    let order_id = order["orderId"].as_str().unwrap();
    assert_eq!(start(&app, order_id).await.status(), StatusCode::OK);

    for step in 1..=4 {
        let lat = -15.40 - 0.001 * f64::from(step);
        assert_eq!(report(&app, order_id, lat, 28.28).await.status(), StatusCode::OK);
        tokio::time::sleep(Duration::from_millis(3)).await;
    }

    let response = app
        .clone()
        .oneshot(get_request(&format!("/tracking/{order_id}/history?limit=2")))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["count"], 2);
    assert!((body["points"][0]["latitude"].as_f64().unwrap() - -15.404).abs() < 1e-9);

    let response = app
        .clone()
        .oneshot(get_request(&format!("/tracking/{order_id}/history?limit=50000")))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["count"], 4);
}

#[tokio::test]
async fn history_without_shared_cache_reads_durable_store() {
    let app = setup_without_shared_cache();
    let order = create_order(&app).await;
    let order_id = order["orderId"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(get_request(&format!("/tracking/{order_id}/history")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["count"], 0);

    assert_eq!(start(&app, order_id).await.status(), StatusCode::OK);
    assert_eq!(report(&app, order_id, -15.42, 28.28).await.status(), StatusCode::OK);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let response = app
        .clone()
        .oneshot(get_request(&format!("/tracking/{order_id}/history")))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["count"], 1);
}

#[tokio::test]
async fn subscribers_counts_hub_connections() {
    let (app, state) = setup();
    let order = create_order(&app).await;
    let delivery_id = order["deliveryId"].as_str().unwrap().to_string();

    let (connection, _rx) = state.hub.register(Uuid::new_v4());
    state.hub.subscribe(connection, &DeliveryId::new(delivery_id.clone()));

    let response = app
        .clone()
        .oneshot(get_request(&format!("/tracking/{delivery_id}/subscribers")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["subscribers"], 1);
    assert_eq!(body["deliveryId"], delivery_id.as_str());
}
