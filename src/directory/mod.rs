//! Order directory: translates order references into the metadata the
//! tracking core needs (delivery identifier, courier, destination).

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::{DeliveryId, GeoPoint, OrderRecord, OrderRef};

#[async_trait]
pub trait OrderDirectory: Send + Sync {
    /// Fails with `AppError::NotFound` when the order does not exist.
    async fn resolve(&self, order_id: Uuid) -> Result<OrderRecord, AppError>;

    async fn find_by_delivery_id(&self, delivery_id: &DeliveryId) -> Result<OrderRecord, AppError>;

    async fn resolve_ref(&self, order_ref: &OrderRef) -> Result<OrderRecord, AppError> {
        match order_ref {
            OrderRef::Internal(order_id) => self.resolve(*order_id).await,
            OrderRef::Delivery(delivery_id) => self.find_by_delivery_id(delivery_id).await,
        }
    }
}

#[derive(Debug)]
pub struct MemoryOrderDirectory {
    prefix: String,
    orders: DashMap<Uuid, OrderRecord>,
    by_delivery: DashMap<DeliveryId, Uuid>,
}

impl MemoryOrderDirectory {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            orders: DashMap::new(),
            by_delivery: DashMap::new(),
        }
    }

    /// Registers a new order and hands out its delivery identifier.
    pub fn register(&self, courier_id: Uuid, destination: GeoPoint) -> OrderRecord {
        let now = Utc::now();
        let record = OrderRecord {
            order_id: Uuid::new_v4(),
            delivery_id: DeliveryId::generate(&self.prefix, now),
            courier_id,
            destination,
            created_at: now,
        };
        self.insert(record.clone());
        record
    }

    pub fn insert(&self, record: OrderRecord) {
        self.by_delivery
            .insert(record.delivery_id.clone(), record.order_id);
        self.orders.insert(record.order_id, record);
    }
}

#[async_trait]
impl OrderDirectory for MemoryOrderDirectory {
    async fn resolve(&self, order_id: Uuid) -> Result<OrderRecord, AppError> {
        self.orders
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
    }

    async fn find_by_delivery_id(&self, delivery_id: &DeliveryId) -> Result<OrderRecord, AppError> {
        let order_id = self
            .by_delivery
            .get(delivery_id)
            .map(|entry| *entry.value())
            .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

        self.resolve(order_id).await
    }
}
