//! Delivery state store.
//!
//! Two tiers: a process-local `DashMap` that answers reads while this process
//! is alive, and an optional shared cache that survives restarts and is
//! visible to sibling instances. Location history lives only in the shared
//! tier; without one, history is read back from the durable store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::SharedCache;
use crate::error::AppError;
use crate::models::delivery::{LiveDelivery, LocationPoint};
use crate::models::order::DeliveryId;
use crate::observability::metrics::Metrics;

/// No history read returns more points than this, whatever the caller asks.
pub const HISTORY_LIMIT_CEILING: usize = 1000;

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub live_ttl: Duration,
    pub history_retention: Duration,
    pub history_cap: usize,
    pub stale_after: Duration,
    pub sweep_interval: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            live_ttl: Duration::from_secs(24 * 60 * 60),
            history_retention: Duration::from_secs(7 * 24 * 60 * 60),
            history_cap: 1000,
            stale_after: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

pub fn live_key(id: &DeliveryId) -> String {
    format!("tracking:{id}")
}

pub fn history_key(id: &DeliveryId) -> String {
    format!("tracking:{id}:history")
}

pub struct DeliveryStore {
    local: DashMap<DeliveryId, LiveDelivery>,
    shared: Option<Arc<dyn SharedCache>>,
    settings: StoreSettings,
    metrics: Metrics,
}

impl DeliveryStore {
    pub fn new(shared: Option<Arc<dyn SharedCache>>, settings: StoreSettings, metrics: Metrics) -> Self {
        Self {
            local: DashMap::new(),
            shared,
            settings,
            metrics,
        }
    }

    pub fn has_shared_tier(&self) -> bool {
        self.shared.is_some()
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    /// Upserts locally and writes through to the shared tier, renewing its TTL.
    /// A failed shared write is logged; the local copy still wins.
    pub async fn put(&self, delivery: &LiveDelivery) {
        self.local
            .insert(delivery.delivery_id.clone(), delivery.clone());
        self.refresh_gauge();

        let Some(shared) = &self.shared else {
            return;
        };

        match serde_json::to_string(delivery) {
            Ok(body) => {
                if let Err(err) = shared
                    .set(&live_key(&delivery.delivery_id), &body, self.settings.live_ttl)
                    .await
                {
                    warn!(delivery_id = %delivery.delivery_id, error = %err, "shared cache write failed");
                }
            }
            Err(err) => {
                warn!(delivery_id = %delivery.delivery_id, error = %err, "failed to encode delivery");
            }
        }
    }

    /// Local tier first, then the shared tier, filling the local map on a hit.
    pub async fn get(&self, id: &DeliveryId) -> Result<Option<LiveDelivery>, AppError> {
        let cached = self.local.get(id).map(|entry| entry.value().clone());
        if cached.is_some() {
            return Ok(cached);
        }

        let Some(shared) = &self.shared else {
            return Ok(None);
        };

        let Some(body) = shared.get(&live_key(id)).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<LiveDelivery>(&body) {
            Ok(delivery) => {
                debug!(delivery_id = %id, "filled local map from shared cache");
                self.local.insert(id.clone(), delivery.clone());
                self.refresh_gauge();
                Ok(Some(delivery))
            }
            Err(err) => {
                warn!(delivery_id = %id, error = %err, "undecodable delivery in shared cache");
                Ok(None)
            }
        }
    }

    /// Drops the live record from both tiers. History stays readable for the
    /// retention window.
    pub async fn remove(&self, id: &DeliveryId) {
        self.evict_local(id);

        let Some(shared) = &self.shared else {
            return;
        };

        if let Err(err) = shared.delete(&live_key(id)).await {
            warn!(delivery_id = %id, error = %err, "shared cache delete failed");
        }
        if let Err(err) = shared
            .expire(&history_key(id), self.settings.history_retention)
            .await
        {
            warn!(delivery_id = %id, error = %err, "failed to set history retention");
        }
    }

    /// Forgets the local copy only; the next `get` refills from the shared tier.
    pub fn evict_local(&self, id: &DeliveryId) -> bool {
        let removed = self.local.remove(id).is_some();
        self.refresh_gauge();
        removed
    }

    pub async fn append_history(&self, id: &DeliveryId, point: &LocationPoint) {
        let Some(shared) = &self.shared else {
            return;
        };

        let body = match serde_json::to_string(point) {
            Ok(body) => body,
            Err(err) => {
                warn!(delivery_id = %id, error = %err, "failed to encode location point");
                return;
            }
        };

        let key = history_key(id);
        let score = point.timestamp.timestamp_millis();
        if let Err(err) = shared
            .push_capped(&key, score, &body, self.settings.history_cap)
            .await
        {
            warn!(delivery_id = %id, error = %err, "history append failed");
            return;
        }
        if let Err(err) = shared.expire(&key, self.settings.history_retention).await {
            warn!(delivery_id = %id, error = %err, "failed to refresh history retention");
        }
    }

    /// Newest first, at most `min(limit, 1000)` points.
    pub async fn read_history(&self, id: &DeliveryId, limit: usize) -> Result<Vec<LocationPoint>, AppError> {
        let Some(shared) = &self.shared else {
            return Ok(Vec::new());
        };

        let limit = limit.min(HISTORY_LIMIT_CEILING);
        let members = shared.newest(&history_key(id), limit).await?;

        Ok(members
            .iter()
            .filter_map(|member| match serde_json::from_str::<LocationPoint>(member) {
                Ok(point) => Some(point),
                Err(err) => {
                    warn!(delivery_id = %id, error = %err, "skipping undecodable history point");
                    None
                }
            })
            .collect())
    }

    /// Evicts local records not updated within `stale_after` of `now`.
    pub fn sweep_stale(&self, now: DateTime<Utc>) -> usize {
        let stale_after = chrono::Duration::from_std(self.settings.stale_after)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let threshold = now - stale_after;

        let candidates: Vec<DeliveryId> = self
            .local
            .iter()
            .filter(|entry| entry.value().last_updated_at < threshold)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for id in candidates {
            // An update may have landed since the scan.
            if self
                .local
                .remove_if(&id, |_, delivery| delivery.last_updated_at < threshold)
                .is_some()
            {
                debug!(delivery_id = %id, "evicted stale delivery");
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.metrics.stale_evictions_total.inc_by(evicted as u64);
            self.refresh_gauge();
        }
        evicted
    }

    /// Runs `sweep_stale` every `sweep_interval` until `shutdown` fires.
    pub async fn run_sweeper(self: Arc<Self>, shutdown: CancellationToken) {
        let period = self.settings.sweep_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = period.as_secs(), "stale delivery sweeper started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = self.sweep_stale(Utc::now());
                    if evicted > 0 {
                        info!(evicted, "swept stale deliveries");
                    }
                }
            }
        }

        info!("stale delivery sweeper stopped");
    }

    fn refresh_gauge(&self) {
        self.metrics.active_deliveries.set(self.local.len() as i64);
    }
}
