use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::cache::SharedCache;
use crate::config::Config;
use crate::directory::MemoryOrderDirectory;
use crate::fanout::EventBridge;
use crate::hub::ConnectionHub;
use crate::observability::metrics::Metrics;
use crate::persistence::{MemoryPersistence, PersistenceSink};
use crate::store::DeliveryStore;
use crate::tracking::TrackingCoordinator;

/// External collaborators. Absent cache or broker means single-process mode.
pub struct Backends {
    pub shared_cache: Option<Arc<dyn SharedCache>>,
    pub broker: Option<Arc<dyn Broker>>,
    pub sink: Arc<dyn PersistenceSink>,
}

impl Backends {
    pub fn in_memory() -> Self {
        Self {
            shared_cache: None,
            broker: None,
            sink: Arc::new(MemoryPersistence::new()),
        }
    }
}

pub struct AppState {
    pub directory: Arc<MemoryOrderDirectory>,
    pub store: Arc<DeliveryStore>,
    pub bridge: Arc<EventBridge>,
    pub coordinator: Arc<TrackingCoordinator>,
    pub hub: Arc<ConnectionHub>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: &Config, backends: Backends) -> Self {
        let metrics = Metrics::new();
        let directory = Arc::new(MemoryOrderDirectory::new(config.delivery_id_prefix.clone()));

        let store = Arc::new(DeliveryStore::new(
            backends.shared_cache,
            config.store_settings(),
            metrics.clone(),
        ));
        let bridge = Arc::new(
            EventBridge::new(backends.broker, config.event_buffer_size, metrics.clone())
                .with_publish_timeout(config.redis_response_timeout()),
        );
        let coordinator = Arc::new(TrackingCoordinator::new(
            directory.clone(),
            backends.sink,
            store.clone(),
            bridge.clone(),
            metrics.clone(),
        ));
        let hub = Arc::new(ConnectionHub::new(
            coordinator.clone(),
            bridge.clone(),
            config.connection_buffer_size,
            metrics.clone(),
        ));

        Self {
            directory,
            store,
            bridge,
            coordinator,
            hub,
            metrics,
        }
    }

    /// Starts the sweeper, the broker listener, sibling sync and the hub
    /// listener. All of them stop when `shutdown` is cancelled.
    pub async fn spawn_workers(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut workers = vec![
            tokio::spawn(self.store.clone().run_sweeper(shutdown.clone())),
            self.coordinator.spawn_sibling_sync(shutdown.clone()),
            self.hub.spawn_listener(shutdown.clone()),
        ];

        if let Some(listener) = self.bridge.spawn_listener(shutdown).await {
            workers.push(listener);
        }

        workers
    }
}
